pub mod config;
pub mod diag;
pub mod frame;
pub mod handshake;
pub mod relay;
pub mod tunnel;
pub mod upgrade;

pub use config::TunnelConfig;
pub use tunnel::{TunnelError, TunnelEstablisher};
pub use upgrade::is_websocket_upgrade;
