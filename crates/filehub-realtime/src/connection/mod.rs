//! Connection lifecycle: handles, heartbeat timing, frames and pumps.

pub mod frame;
pub mod handle;
pub mod heartbeat;
pub mod pump;

pub use frame::Frame;
pub use handle::{ConnectionHandle, ConnectionState};
pub use heartbeat::HeartbeatConfig;
pub use pump::serve_connection;
