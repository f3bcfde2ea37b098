use serde::{Deserialize, Serialize};

/// Tunnel behavior settings.
///
/// Designed to be embedded in a host proxy's configuration file; every field
/// has a default so a missing section works out of the box.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Decode relayed WebSocket frames for inspection
    pub inspect_frames: bool,
    /// Read buffer size per relay direction, in bytes
    pub read_buffer_size: usize,
    /// Largest single frame the inspector will buffer; larger frames are
    /// skipped (still forwarded)
    pub max_inspect_buffer: usize,
    /// Upper bound on the handshake response head, in bytes
    pub max_handshake_bytes: usize,
    /// Seconds to wait for the target's handshake response (0 = no limit)
    pub handshake_timeout_secs: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            inspect_frames: true,
            read_buffer_size: 8192,
            max_inspect_buffer: 1024 * 1024,
            max_handshake_bytes: 16 * 1024,
            handshake_timeout_secs: 30,
        }
    }
}
