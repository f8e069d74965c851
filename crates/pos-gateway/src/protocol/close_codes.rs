//! Close status codes
//!
//! The subset of RFC 6455 status codes the gateway sends or understands.

use serde::{Deserialize, Serialize};

/// Close frame status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum CloseCode {
    /// Normal closure
    Normal = 1000,
    /// Endpoint is going away (server shutdown)
    GoingAway = 1001,
    /// Protocol violation
    ProtocolError = 1002,
    /// Data type the endpoint cannot accept
    UnsupportedData = 1003,
    /// Payload inconsistent with the message type
    InvalidPayload = 1007,
    /// Generic policy violation
    PolicyViolation = 1008,
    /// Frame too large to process
    MessageTooBig = 1009,
    /// Unexpected server-side condition
    InternalError = 1011,
}

impl CloseCode {
    /// Create a `CloseCode` from a raw u16 value
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1000 => Some(Self::Normal),
            1001 => Some(Self::GoingAway),
            1002 => Some(Self::ProtocolError),
            1003 => Some(Self::UnsupportedData),
            1007 => Some(Self::InvalidPayload),
            1008 => Some(Self::PolicyViolation),
            1009 => Some(Self::MessageTooBig),
            1011 => Some(Self::InternalError),
            _ => None,
        }
    }

    /// Read the status code from a close frame payload
    ///
    /// Returns `None` when the payload carries no status.
    #[must_use]
    pub fn from_payload(payload: &[u8]) -> Option<u16> {
        match payload {
            [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }

    /// Get the raw u16 value
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// The 2-byte big-endian close frame payload
    #[must_use]
    pub const fn to_payload(self) -> [u8; 2] {
        self.as_u16().to_be_bytes()
    }

    /// Get the description for this close code
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Normal => "Normal closure",
            Self::GoingAway => "Going away",
            Self::ProtocolError => "Protocol error",
            Self::UnsupportedData => "Unsupported data",
            Self::InvalidPayload => "Invalid payload data",
            Self::PolicyViolation => "Policy violation",
            Self::MessageTooBig => "Message too big",
            Self::InternalError => "Internal error",
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.description(), self.as_u16())
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}
