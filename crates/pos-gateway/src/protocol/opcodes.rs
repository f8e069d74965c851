//! Frame operation codes
//!
//! The 4-bit opcode carried in the first header byte of every frame.

/// Frame operation codes
///
/// Only text, close, ping and pong are ever acted on. The remaining values are
/// still represented so that the decoder can hand them to the connection, which
/// decides whether to drop them or to fail the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Continuation of a fragmented message
    Continuation,
    /// UTF-8 text payload (a JSON envelope in this protocol)
    Text,
    /// Binary payload
    Binary,
    /// Connection close, optionally carrying a 2-byte status code
    Close,
    /// Liveness check
    Ping,
    /// Reply to a ping
    Pong,
    /// Any value the protocol reserves for future use
    Reserved(u8),
}

impl OpCode {
    /// Create an `OpCode` from the low 4 bits of a header byte
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value & 0x0F {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            other => Self::Reserved(other),
        }
    }

    /// Get the raw 4-bit value
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
            Self::Reserved(value) => value & 0x0F,
        }
    }

    /// Control frames are close, ping, pong and the reserved 0xB-0xF range
    #[must_use]
    pub const fn is_control(self) -> bool {
        self.as_u8() >= 0x8
    }

    /// Get the name of this op code
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Continuation => "Continuation",
            Self::Text => "Text",
            Self::Binary => "Binary",
            Self::Close => "Close",
            Self::Ping => "Ping",
            Self::Pong => "Pong",
            Self::Reserved(_) => "Reserved",
        }
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:#x})", self.name(), self.as_u8())
    }
}
