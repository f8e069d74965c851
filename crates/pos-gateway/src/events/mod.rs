//! Gateway events
//!
//! Typed events and the payloads cached for late-joining clients.

mod event_types;
mod payloads;

pub use event_types::{EventKind, GatewayEvent, QUEUE_METRICS, SYSTEM_ERROR};
pub use payloads::{QueueMetricSnapshot, SystemErrorEvent};
