//! # Frame
//!
//! WebSocket frames as defined in [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2),
//! the atomic transport unit of the protocol, plus the reassembled [`Message`] the
//! application actually consumes.
//!
//! ### Frame binary format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! |     Masking-key (continued)       |          Payload Data      |
//! +-----------------------------------+ - - - - - - - - - - - - - -+
//! ```
//!
//! Frames come in two categories:
//!
//! - **Data frames** (`Text`, `Binary`, `Continuation`) carry application payload and may
//!   be fragmented across the wire.
//! - **Control frames** (`Close`, `Ping`, `Pong`) manage the connection, must not be
//!   fragmented, and may interleave with a fragmented message.

use bytes::{Bytes, BytesMut};

use crate::close::CloseCode;

/// WebSocket operation code, the 4-bit frame type field.
///
/// This is a closed enum: opcode values outside the set RFC 6455 defines are preserved as
/// [`OpCode::Unknown`] rather than silently dropped, so every wire value round-trips and
/// callers can match exhaustively.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    /// Continues a fragmented message started by a text or binary frame.
    Continuation,
    /// UTF-8 text data.
    Text,
    /// Raw binary data.
    Binary,
    /// Connection close.
    Close,
    /// Liveness probe, requires a `Pong` reply carrying the same payload.
    Ping,
    /// Reply to a `Ping`.
    Pong,
    /// Reserved opcode (0x3-0x7, 0xB-0xF); the raw 4-bit value is preserved.
    Unknown(u8),
}

impl OpCode {
    /// Returns `true` for `Close`, `Ping` and `Pong`.
    ///
    /// Control frames must not be fragmented, carry at most 125 payload bytes, and are
    /// processed immediately rather than queued with data frames.
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    /// Returns `true` for `Text` and `Binary`, the opcodes that may open a message.
    pub fn is_data(&self) -> bool {
        matches!(*self, OpCode::Text | OpCode::Binary)
    }
}

impl From<u8> for OpCode {
    /// Interprets the low 4 bits of `value` as an opcode.
    fn from(value: u8) -> Self {
        match value & 0x0F {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            other => Self::Unknown(other),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
            OpCode::Unknown(value) => value & 0x0F,
        }
    }
}

/// Kind of a reassembled [`Message`], derived from the opcode of the first frame of its
/// fragment sequence.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
}

impl MessageKind {
    /// The opcode carried by the first frame of a message of this kind.
    pub(crate) fn opcode(self) -> OpCode {
        match self {
            MessageKind::Text => OpCode::Text,
            MessageKind::Binary => OpCode::Binary,
        }
    }
}

/// A complete logical message, reassembled from one or more frames.
///
/// Intermediate fragments are never exposed: a `Message` only exists once a frame with
/// `fin = true` closed the sequence, and its payload is the concatenation of all fragment
/// payloads in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Text or binary, from the opcode of the first frame of the sequence.
    pub kind: MessageKind,
    /// The full reassembled payload.
    pub payload: Bytes,
}

impl Message {
    /// Creates a text message.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageKind::Text,
            payload: payload.into(),
        }
    }

    /// Creates a binary message.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageKind::Binary,
            payload: payload.into(),
        }
    }

    /// Returns the payload as UTF-8 text, if it is valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Number of bytes a frame header can occupy: 2 fixed + 8 extended length + 4 mask key.
pub(crate) const MAX_HEAD_SIZE: usize = 14;

/// A single WebSocket wire frame.
///
/// Most users never touch frames directly; [`crate::WebSocket`] speaks in [`Message`]s and
/// handles control frames itself. The frame type is public for callers that need
/// fine-grained control over fragmentation or the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment of a logical message.
    pub fin: bool,
    /// Frame type.
    pub opcode: OpCode,
    /// XOR masking key. After decode this is `Some` iff the wire frame had the MASK bit
    /// set; on encode the client-role encoder fills it in when absent.
    pub mask: Option<[u8; 4]>,
    /// Payload bytes, already unmasked after decode.
    pub payload: BytesMut,
}

impl Frame {
    /// Creates a new frame.
    pub fn new(fin: bool, opcode: OpCode, mask: Option<[u8; 4]>, payload: impl Into<BytesMut>) -> Self {
        Self {
            fin,
            opcode,
            mask,
            payload: payload.into(),
        }
    }

    /// Creates a final, unmasked text frame.
    pub fn text(payload: impl Into<BytesMut>) -> Self {
        Self::new(true, OpCode::Text, None, payload)
    }

    /// Creates a final, unmasked binary frame.
    pub fn binary(payload: impl Into<BytesMut>) -> Self {
        Self::new(true, OpCode::Binary, None, payload)
    }

    /// Creates a continuation frame.
    pub fn continuation(fin: bool, payload: impl Into<BytesMut>) -> Self {
        Self::new(fin, OpCode::Continuation, None, payload)
    }

    /// Creates a ping frame.
    pub fn ping(payload: impl Into<BytesMut>) -> Self {
        Self::new(true, OpCode::Ping, None, payload)
    }

    /// Creates a pong frame.
    pub fn pong(payload: impl Into<BytesMut>) -> Self {
        Self::new(true, OpCode::Pong, None, payload)
    }

    /// Creates a close frame carrying a close code and a UTF-8 reason.
    pub fn close(code: CloseCode, reason: impl AsRef<[u8]>) -> Self {
        let reason = reason.as_ref();
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.extend_from_slice(&u16::from(code).to_be_bytes());
        payload.extend_from_slice(reason);
        Self::new(true, OpCode::Close, None, payload)
    }

    /// Creates a close frame with a raw payload, without enforcing the code/reason layout.
    pub fn close_raw(payload: impl Into<BytesMut>) -> Self {
        Self::new(true, OpCode::Close, None, payload)
    }

    /// Extracts the close code from a close frame payload, if one is present.
    pub fn close_code(&self) -> Option<CloseCode> {
        let code = u16::from_be_bytes(self.payload.get(0..2)?.try_into().ok()?);
        Some(CloseCode::from(code))
    }

    /// Serializes the frame header into `head`, returning the number of bytes written.
    ///
    /// The header mirrors the decoder's three-tier length scheme: payloads under 126
    /// bytes use the 7-bit length field, under 65536 the 16-bit extension, and anything
    /// larger the 64-bit extension. The MASK bit is set and the key appended iff
    /// `self.mask` is present. Payload bytes are not written here.
    ///
    /// # Panics
    /// Panics if `head` is shorter than [`MAX_HEAD_SIZE`].
    pub(crate) fn fmt_head(&self, head: &mut [u8]) -> usize {
        head[0] = (self.fin as u8) << 7 | u8::from(self.opcode);

        let len = self.payload.len();
        let size = if len < 126 {
            head[1] = len as u8;
            2
        } else if len < 65536 {
            head[1] = 126;
            head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
            4
        } else {
            head[1] = 127;
            head[2..10].copy_from_slice(&(len as u64).to_be_bytes());
            10
        };

        if let Some(mask) = self.mask {
            head[1] |= 0x80;
            head[size..size + 4].copy_from_slice(&mask);
            size + 4
        } else {
            size
        }
    }
}
