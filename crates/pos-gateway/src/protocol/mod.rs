//! Wire protocol definitions
//!
//! Frame codec, op codes, close codes, and the JSON message envelope.

mod close_codes;
pub mod frame;
mod messages;
mod opcodes;

pub use close_codes::CloseCode;
pub use frame::{Decoded, Frame, FrameDecoder, ProtocolError};
pub use messages::Envelope;
pub use opcodes::OpCode;
