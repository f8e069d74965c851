//! Event payload structures
//!
//! Data structures for the events the gateway caches for late joiners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error as StdError;
use std::fmt;

/// Last known instrumentation state of one background queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMetricSnapshot {
    /// Queue name, the cache key
    pub queue: String,
    pub updated_at: DateTime<Utc>,
    /// Metric name to value
    pub metrics: Value,
}

impl QueueMetricSnapshot {
    /// Snapshot stamped with the current time
    #[must_use]
    pub fn now(queue: impl Into<String>, metrics: Value) -> Self {
        Self {
            queue: queue.into(),
            updated_at: Utc::now(),
            metrics,
        }
    }
}

/// A reported system error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemErrorEvent {
    /// Component that reported the error
    pub source: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl SystemErrorEvent {
    /// Normalize a plain message (or anything displayable) into an event
    #[must_use]
    pub fn new(source: impl Into<String>, message: impl fmt::Display, details: Option<Value>) -> Self {
        Self {
            source: source.into(),
            message: message.to_string(),
            occurred_at: Utc::now(),
            details,
        }
    }

    /// Normalize an error value, folding its source chain into the message
    #[must_use]
    pub fn from_error(
        source: impl Into<String>,
        error: &(dyn StdError + 'static),
        details: Option<Value>,
    ) -> Self {
        let mut message = error.to_string();
        let mut cause = error.source();
        while let Some(err) = cause {
            message.push_str(": ");
            message.push_str(&err.to_string());
            cause = err.source();
        }
        Self::new(source, message, details)
    }
}
