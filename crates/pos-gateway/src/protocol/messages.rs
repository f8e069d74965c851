//! Application message format
//!
//! Every text frame the gateway sends carries one JSON envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire envelope `{ "event": ..., "payload": ... }`
///
/// This is the only place event names are plain strings; inside the process
/// events are typed (see [`crate::events::GatewayEvent`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name, forwarded as-is
    pub event: String,
    /// Arbitrary JSON payload
    pub payload: Value,
}

impl Envelope {
    #[must_use]
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
