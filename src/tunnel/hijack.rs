use super::{BoxEndpoint, Endpoint, TunnelError};
use async_trait::async_trait;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;

/// Releases ownership of the raw client connection behind an in-flight HTTP
/// exchange.
///
/// Hosts that cannot give up their connection signal
/// [`TunnelError::HijackUnsupported`]; that is a capability problem of the
/// deployment, not a property of the request.
#[async_trait]
pub trait Hijack: Send {
    async fn hijack(self: Box<Self>) -> Result<BoxEndpoint, TunnelError>;
}

/// A client connection the host has already released, e.g. a stream accepted
/// by a dispatcher that parses requests itself.
pub struct OwnedConnection(BoxEndpoint);

impl OwnedConnection {
    pub fn new<E: Endpoint + 'static>(endpoint: E) -> Self {
        Self(Box::new(endpoint))
    }
}

#[async_trait]
impl Hijack for OwnedConnection {
    async fn hijack(self: Box<Self>) -> Result<BoxEndpoint, TunnelError> {
        Ok(self.0)
    }
}

/// Adapts hyper's connection-upgrade mechanism, the way a hyper-hosted proxy
/// releases the raw stream after answering a CONNECT.
pub struct HyperHijack {
    on_upgrade: OnUpgrade,
}

impl HyperHijack {
    pub fn new(on_upgrade: OnUpgrade) -> Self {
        Self { on_upgrade }
    }

    /// Claim the upgrade slot of a request before it is consumed.
    pub fn from_request<B>(request: &mut hyper::Request<B>) -> Self {
        Self::new(hyper::upgrade::on(request))
    }
}

#[async_trait]
impl Hijack for HyperHijack {
    async fn hijack(self: Box<Self>) -> Result<BoxEndpoint, TunnelError> {
        let upgraded = self
            .on_upgrade
            .await
            .map_err(|e| TunnelError::HijackUnsupported(e.to_string()))?;
        Ok(Box::new(TokioIo::new(upgraded)))
    }
}

/// For hosts without hijack capability; every tunnel attempt fails fast.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedHijack;

#[async_trait]
impl Hijack for UnsupportedHijack {
    async fn hijack(self: Box<Self>) -> Result<BoxEndpoint, TunnelError> {
        Err(TunnelError::HijackUnsupported(
            "host server cannot release the client connection".to_string(),
        ))
    }
}
