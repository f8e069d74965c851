//! Connection management
//!
//! Per-socket connection actors and the registry of live connections.

mod connection;
mod manager;

pub use connection::{Connection, ConnectionConfig, ConnectionId, SendError, TeardownReason};
pub use manager::ConnectionManager;
