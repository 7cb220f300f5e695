//! WebSocket connections: per-connection state, liveness, the read and
//! write pumps, and the authenticated upgrade handler.

pub mod connection;
pub mod heartbeat;
pub mod pumps;
pub mod upgrade;

pub use connection::{ConnectionHandle, DeliveryError};
pub use heartbeat::{HeartbeatConfig, Liveness};
pub use pumps::ConnectionTasks;
