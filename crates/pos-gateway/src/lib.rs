//! # pos-gateway
//!
//! Realtime event gateway for point-of-sale clients.
//!
//! Speaks a WebSocket-compatible framing protocol directly over TCP, keeps
//! every client alive with pings, and fans out business events while caching
//! recent state for clients that connect late.

pub mod broadcast;
pub mod connection;
pub mod events;
pub mod protocol;
pub mod server;

pub use events::{EventKind, GatewayEvent, QueueMetricSnapshot, SystemErrorEvent};
pub use server::{run, run_with_shutdown, Gateway, GatewayState, UpgradeHost};
