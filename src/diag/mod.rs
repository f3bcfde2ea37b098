use tracing::{info, warn};

/// Per-tunnel sink for diagnostic messages.
///
/// Implementations must return quickly; the relay calls into the sink from
/// its pump tasks and never waits on it.
pub trait DiagnosticSink: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
}

/// Default sink that forwards to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn info(&self, message: &str) {
        info!(target: "wstap", "{}", message);
    }

    fn warn(&self, message: &str) {
        warn!(target: "wstap", "{}", message);
    }
}
