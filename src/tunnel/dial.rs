use super::{BoxEndpoint, TunnelError};
use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Opens connections to upstream targets.
///
/// Injected into the tunnel establisher so hosts can route dials through
/// their own connect logic (SOCKS chains, DNS overrides, test doubles).
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connect to `addr` (`host:port`) over plain TCP.
    async fn dial(&self, addr: &str) -> Result<BoxEndpoint, TunnelError>;

    /// Connect to `addr` and complete a TLS handshake for `server_name`
    /// using the supplied client configuration.
    async fn dial_tls(
        &self,
        addr: &str,
        server_name: &str,
        tls: Arc<ClientConfig>,
    ) -> Result<BoxEndpoint, TunnelError>;
}

/// Default dialer: direct TCP, TLS via tokio-rustls.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: &str) -> Result<BoxEndpoint, TunnelError> {
        let stream = TcpStream::connect(addr).await.map_err(|e| TunnelError::Dial {
            addr: addr.to_string(),
            source: e,
        })?;
        debug!("dialed {}", addr);
        Ok(Box::new(stream))
    }

    async fn dial_tls(
        &self,
        addr: &str,
        server_name: &str,
        tls: Arc<ClientConfig>,
    ) -> Result<BoxEndpoint, TunnelError> {
        let stream = TcpStream::connect(addr).await.map_err(|e| TunnelError::Dial {
            addr: addr.to_string(),
            source: e,
        })?;

        let connector = TlsConnector::from(tls);
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|e| TunnelError::Tls(format!("invalid server name {:?}: {}", server_name, e)))?;

        let tls_stream = connector
            .connect(name, stream)
            .await
            .map_err(|e| TunnelError::Tls(e.to_string()))?;
        debug!("dialed {} with TLS for {}", addr, server_name);
        Ok(Box::new(tls_stream))
    }
}

/// TLS client configuration trusting the standard WebPKI roots.
pub fn default_tls_config() -> Arc<ClientConfig> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    )
}
