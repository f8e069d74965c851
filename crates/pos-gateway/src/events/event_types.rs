//! Gateway event types
//!
//! Events are typed inside the process; their string names only appear in the
//! wire envelope.

use super::{QueueMetricSnapshot, SystemErrorEvent};
use crate::protocol::Envelope;
use serde_json::Value;
use std::fmt;

/// Wire name of queue metric updates
pub const QUEUE_METRICS: &str = "queue.metrics";

/// Wire name of system error reports
pub const SYSTEM_ERROR: &str = "system.error";

/// Subscription key for in-process listeners
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    QueueMetrics,
    SystemError,
    /// Any other event, by wire name
    Custom(String),
}

impl EventKind {
    /// Map a wire name to its kind
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            QUEUE_METRICS => Self::QueueMetrics,
            SYSTEM_ERROR => Self::SystemError,
            other => Self::Custom(other.to_string()),
        }
    }

    /// The wire name of this kind
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::QueueMetrics => QUEUE_METRICS,
            Self::SystemError => SYSTEM_ERROR,
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An event published through the gateway
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    QueueMetrics(QueueMetricSnapshot),
    SystemError(SystemErrorEvent),
    /// Business event forwarded untouched
    Custom { name: String, payload: Value },
}

impl GatewayEvent {
    /// Build an event from a wire name and payload
    ///
    /// Names of the typed events are parsed into their typed form when the
    /// payload matches; everything else stays a custom event.
    #[must_use]
    pub fn from_wire(name: impl Into<String>, payload: Value) -> Self {
        let name = name.into();
        match EventKind::from_name(&name) {
            EventKind::QueueMetrics => match serde_json::from_value(payload.clone()) {
                Ok(snapshot) => Self::QueueMetrics(snapshot),
                Err(_) => Self::Custom { name, payload },
            },
            EventKind::SystemError => match serde_json::from_value(payload.clone()) {
                Ok(event) => Self::SystemError(event),
                Err(_) => Self::Custom { name, payload },
            },
            EventKind::Custom(_) => Self::Custom { name, payload },
        }
    }

    /// Subscription key, derived from the wire name
    ///
    /// A reserved name carrying an untyped payload still reaches the
    /// listeners of that name.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::QueueMetrics(_) => EventKind::QueueMetrics,
            Self::SystemError(_) => EventKind::SystemError,
            Self::Custom { name, .. } => EventKind::from_name(name),
        }
    }

    /// The wire name of this event
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::QueueMetrics(_) => QUEUE_METRICS,
            Self::SystemError(_) => SYSTEM_ERROR,
            Self::Custom { name, .. } => name,
        }
    }

    /// Convert into the wire envelope
    pub fn to_envelope(&self) -> Result<Envelope, serde_json::Error> {
        let payload = match self {
            Self::QueueMetrics(snapshot) => serde_json::to_value(snapshot)?,
            Self::SystemError(event) => serde_json::to_value(event)?,
            Self::Custom { payload, .. } => payload.clone(),
        };
        Ok(Envelope::new(self.name(), payload))
    }
}
