mod dial;
mod hijack;

pub use dial::{default_tls_config, Dialer, TcpDialer};
pub use hijack::{Hijack, HyperHijack, OwnedConnection, UnsupportedHijack};

use crate::config::TunnelConfig;
use crate::diag::{DiagnosticSink, TracingSink};
use crate::handshake::{relay_handshake, PassthroughFilter, ResponseFilter};
use crate::relay::{DuplexRelay, FrameInspector, Inspect, NoInspect};
use crate::upgrade::UpgradeRequest;
use rustls::ClientConfig;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// A bidirectional byte stream a tunnel can own: TCP, TLS, an upgraded hyper
/// connection, or an in-memory pair in tests.
pub trait Endpoint: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Endpoint for T {}

pub type BoxEndpoint = Box<dyn Endpoint>;

#[derive(Error, Debug)]
pub enum TunnelError {
    /// Upstream unreachable; the tunnel is abandoned without retry.
    #[error("failed to dial {addr}: {source}")]
    Dial {
        addr: String,
        source: std::io::Error,
    },
    /// Writing the upgrade request (or relaying the response) failed.
    #[error("failed to write handshake: {0}")]
    HandshakeWrite(#[source] std::io::Error),
    /// The target's handshake response could not be read or parsed.
    #[error("failed to read handshake response: {0}")]
    HandshakeRead(String),
    /// The host server cannot release the client connection.
    #[error("connection hijacking unsupported: {0}")]
    HijackUnsupported(String),
    #[error("TLS error: {0}")]
    Tls(String),
}

/// One upgraded session: the two endpoints it exclusively owns, plus where
/// its warnings go. Lives from successful handshake to relay teardown.
pub struct TunnelContext {
    pub client: BoxEndpoint,
    pub target: BoxEndpoint,
    pub diagnostics: Arc<dyn DiagnosticSink>,
}

/// Builds WebSocket tunnels: dials the target, runs the handshake through
/// the filter chain, then hands both endpoints to the duplex relay.
///
/// All collaborators are injected per instance; nothing is process-global.
pub struct TunnelEstablisher {
    config: TunnelConfig,
    dialer: Arc<dyn Dialer>,
    filter: Arc<dyn ResponseFilter>,
    inspector: Arc<dyn Inspect>,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl TunnelEstablisher {
    pub fn new(config: TunnelConfig) -> Self {
        let diagnostics: Arc<dyn DiagnosticSink> = Arc::new(TracingSink);
        let inspector: Arc<dyn Inspect> = if config.inspect_frames {
            Arc::new(FrameInspector::new(
                Arc::clone(&diagnostics),
                config.max_inspect_buffer,
            ))
        } else {
            Arc::new(NoInspect)
        };

        Self {
            config,
            dialer: Arc::new(TcpDialer),
            filter: Arc::new(PassthroughFilter),
            inspector,
            diagnostics,
        }
    }

    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = dialer;
        self
    }

    pub fn with_filter(mut self, filter: Arc<dyn ResponseFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_inspector(mut self, inspector: Arc<dyn Inspect>) -> Self {
        self.inspector = inspector;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Tunnel an upgrade seen on a plain (non-TLS) proxy connection: dial
    /// the target over TCP and take over the hijacked client connection.
    ///
    /// Returns once the session is over, or on the first handshake-phase
    /// failure.
    pub async fn tunnel_plain(
        &self,
        request: UpgradeRequest,
        hijack: Box<dyn Hijack>,
    ) -> Result<(), TunnelError> {
        let addr = self.target_addr(&request, 80)?;
        let target = match self.dialer.dial(&addr).await {
            Ok(target) => target,
            Err(e) => {
                self.diagnostics.warn(&format!("error dialing target: {}", e));
                return Err(e);
            }
        };

        let client = match hijack.hijack().await {
            Ok(client) => client,
            Err(e) => {
                self.diagnostics.warn(&format!("hijack error: {}", e));
                return Err(e);
            }
        };

        self.establish(request, client, target).await
    }

    /// Tunnel an upgrade seen inside a MITM'd TLS connection: dial the
    /// target over TLS with the supplied configuration; `client` is the
    /// already TLS-terminated connection to the browser.
    pub async fn tunnel_tls(
        &self,
        request: UpgradeRequest,
        client: BoxEndpoint,
        tls: Arc<ClientConfig>,
    ) -> Result<(), TunnelError> {
        let addr = self.target_addr(&request, 443)?;
        let target = match self.dialer.dial_tls(&addr, sni_host(&addr), tls).await {
            Ok(target) => target,
            Err(e) => {
                self.diagnostics.warn(&format!("error dialing target: {}", e));
                return Err(e);
            }
        };

        self.establish(request, client, target).await
    }

    /// Shared tail of both paths: handshake, then relay until either side
    /// terminates.
    async fn establish(
        &self,
        request: UpgradeRequest,
        mut client: BoxEndpoint,
        mut target: BoxEndpoint,
    ) -> Result<(), TunnelError> {
        let handshake = relay_handshake(
            &request,
            &mut *target,
            &mut *client,
            &*self.filter,
            self.config.max_handshake_bytes,
        );

        let buffered = if self.config.handshake_timeout_secs > 0 {
            let limit = Duration::from_secs(self.config.handshake_timeout_secs);
            match tokio::time::timeout(limit, handshake).await {
                Ok(result) => result,
                Err(_) => Err(TunnelError::HandshakeRead("handshake timed out".to_string())),
            }
        } else {
            handshake.await
        };

        let buffered = match buffered {
            Ok(buffered) => buffered,
            Err(e) => {
                self.diagnostics.warn(&format!("websocket handshake error: {}", e));
                return Err(e);
            }
        };

        debug!("tunnel established for {}", request.uri);

        let ctx = TunnelContext {
            client,
            target,
            diagnostics: Arc::clone(&self.diagnostics),
        };
        DuplexRelay::new(ctx)
            .with_read_buffer_size(self.config.read_buffer_size)
            .run(&*self.inspector, buffered)
            .await;

        Ok(())
    }

    fn target_addr(&self, request: &UpgradeRequest, default_port: u16) -> Result<String, TunnelError> {
        request.authority(default_port).ok_or_else(|| TunnelError::Dial {
            addr: "(unknown)".to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "upgrade request has no target host",
            ),
        })
    }
}

/// Host portion of a `host:port` address, for SNI.
fn sni_host(addr: &str) -> &str {
    addr.rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(addr)
        .trim_start_matches('[')
        .trim_end_matches(']')
}
