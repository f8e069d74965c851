//! Frame codec
//!
//! Incremental decoding of inbound frames from an accumulating byte buffer and
//! encoding of outbound frames. Both directions are plain functions over bytes so
//! they can be driven from a socket task, a test, or anything else that has bytes.

use super::{CloseCode, OpCode};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Largest payload a control frame may carry
pub const MAX_CONTROL_PAYLOAD: u64 = 125;

const FIN_BIT: u8 = 0x80;
const RSV_BITS: u8 = 0x70;
const MASK_BIT: u8 = 0x80;
const LEN_16: u8 = 126;
const LEN_64: u8 = 127;

/// A single decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag
    pub fin: bool,
    pub opcode: OpCode,
    /// Payload, already unmasked
    pub payload: Bytes,
}

impl Frame {
    /// Build a final (unfragmented) frame
    pub fn new(opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode,
            payload: payload.into(),
        }
    }
}

/// Outcome of one decode attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Not enough bytes yet; try again once more data arrives
    Pending,
    /// One complete frame and the number of buffer bytes it occupied
    Frame { frame: Frame, consumed: usize },
}

/// Unrecoverable framing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("reserved header bits set ({0:#04x}) without a negotiated extension")]
    ReservedBits(u8),

    #[error("64-bit payload length has its most significant bit set")]
    InvalidLength,

    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: u64, max: u64 },

    #[error("control frame payload of {0} bytes exceeds 125 bytes")]
    ControlFrameTooLarge(u64),

    #[error("control frames must not be fragmented")]
    FragmentedControl,
}

impl ProtocolError {
    /// The status code to close the offending connection with
    #[must_use]
    pub const fn close_code(&self) -> CloseCode {
        match self {
            Self::FrameTooLarge { .. } => CloseCode::MessageTooBig,
            _ => CloseCode::ProtocolError,
        }
    }
}

/// XOR `payload` in place with the 4-byte masking key
///
/// Masking is its own inverse: applying the same key twice restores the input.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Try to decode one frame from the front of `buf`
///
/// Header problems are reported as soon as the header bytes are available,
/// without waiting for the payload to arrive.
pub fn decode(buf: &[u8], max_payload: u64) -> Result<Decoded, ProtocolError> {
    let [b0, b1, ..] = *buf else {
        return Ok(Decoded::Pending);
    };

    if b0 & RSV_BITS != 0 {
        return Err(ProtocolError::ReservedBits(b0 & RSV_BITS));
    }

    let fin = b0 & FIN_BIT != 0;
    let opcode = OpCode::from_u8(b0);
    let masked = b1 & MASK_BIT != 0;

    let mut cursor = &buf[2..];
    let len = match b1 & !MASK_BIT {
        LEN_16 => {
            if cursor.remaining() < 2 {
                return Ok(Decoded::Pending);
            }
            u64::from(cursor.get_u16())
        }
        LEN_64 => {
            if cursor.remaining() < 8 {
                return Ok(Decoded::Pending);
            }
            let len = cursor.get_u64();
            if len >> 63 != 0 {
                return Err(ProtocolError::InvalidLength);
            }
            len
        }
        inline => u64::from(inline),
    };

    if opcode.is_control() {
        if !fin {
            return Err(ProtocolError::FragmentedControl);
        }
        if len > MAX_CONTROL_PAYLOAD {
            return Err(ProtocolError::ControlFrameTooLarge(len));
        }
    }

    let too_large = ProtocolError::FrameTooLarge {
        len,
        max: max_payload,
    };
    if len > max_payload {
        return Err(too_large);
    }
    let payload_len = usize::try_from(len).map_err(|_| too_large)?;

    let mask = if masked {
        if cursor.remaining() < 4 {
            return Ok(Decoded::Pending);
        }
        let mut key = [0u8; 4];
        cursor.copy_to_slice(&mut key);
        Some(key)
    } else {
        None
    };

    if cursor.remaining() < payload_len {
        return Ok(Decoded::Pending);
    }

    let header_len = buf.len() - cursor.remaining();
    let mut payload = BytesMut::from(&cursor[..payload_len]);
    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }

    Ok(Decoded::Frame {
        frame: Frame {
            fin,
            opcode,
            payload: payload.freeze(),
        },
        consumed: header_len + payload_len,
    })
}

fn put_header(buf: &mut BytesMut, opcode: OpCode, len: usize, mask_bit: u8) {
    buf.put_u8(FIN_BIT | opcode.as_u8());
    if len <= MAX_CONTROL_PAYLOAD as usize {
        buf.put_u8(mask_bit | len as u8);
    } else if let Ok(len) = u16::try_from(len) {
        buf.put_u8(mask_bit | LEN_16);
        buf.put_u16(len);
    } else {
        buf.put_u8(mask_bit | LEN_64);
        buf.put_u64(len as u64);
    }
}

fn header_capacity(len: usize) -> usize {
    if len <= MAX_CONTROL_PAYLOAD as usize {
        2
    } else if len <= usize::from(u16::MAX) {
        4
    } else {
        10
    }
}

/// Encode a final, unmasked server-to-client frame
///
/// Uses the smallest length encoding that fits the payload.
pub fn encode(opcode: OpCode, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(header_capacity(payload.len()) + payload.len());
    put_header(&mut buf, opcode, payload.len(), 0);
    buf.put_slice(payload);
    buf.freeze()
}

/// Encode a close frame carrying the 2-byte status code
pub fn encode_close(code: CloseCode) -> Bytes {
    encode(OpCode::Close, &code.to_payload())
}

/// Encode a final frame masked with `key`, as a client would send it
pub fn encode_masked(opcode: OpCode, payload: &[u8], key: [u8; 4]) -> Bytes {
    let mut buf = BytesMut::with_capacity(header_capacity(payload.len()) + 4 + payload.len());
    put_header(&mut buf, opcode, payload.len(), MASK_BIT);
    buf.put_slice(&key);
    let start = buf.len();
    buf.put_slice(payload);
    apply_mask(&mut buf[start..], key);
    buf.freeze()
}

/// Receive buffer plus incremental decoder for one connection
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_payload: u64,
}

impl FrameDecoder {
    /// Create a decoder that rejects payloads above `max_payload` bytes
    #[must_use]
    pub fn new(max_payload: u64) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_payload,
        }
    }

    #[cfg(test)]
    fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// The receive buffer, for reading straight from a socket
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pop the next complete frame, or `Ok(None)` if more bytes are needed
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        match decode(&self.buffer, self.max_payload)? {
            Decoded::Pending => Ok(None),
            Decoded::Frame { frame, consumed } => {
                self.buffer.advance(consumed);
                Ok(Some(frame))
            }
        }
    }
}
