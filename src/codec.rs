//! Incremental WebSocket frame codec for [`tokio_util::codec::Framed`].
//!
//! The decoder consumes the wire format in stages (fixed header, extended length plus
//! mask key, payload), returning `None` until a whole frame is buffered. The encoder
//! mirrors the three-tier length scheme and computes masking into the output buffer, so
//! an encoded frame's payload is never mutated.
//!
//! Masking direction is enforced by role: a server rejects unmasked inbound frames and
//! sends unmasked, a client masks outbound frames and rejects masked inbound ones. The
//! codec itself is direction-symmetric; the role only selects which side is checked.

use bytes::{Buf, BytesMut};
use tokio_util::codec;

use crate::{
    frame::{Frame, MAX_HEAD_SIZE},
    mask::apply_mask,
    session::Role,
    OpCode, WebSocketError,
};

/// Reading state of the decoder.
enum ReadState {
    /// Fixed two bytes consumed; waiting for extended length and mask key.
    Header(Header),
    /// Full header consumed; waiting for the payload.
    Payload(HeaderAndMask),
}

/// Fields parsed from the first two header bytes.
struct Header {
    fin: bool,
    masked: bool,
    opcode: OpCode,
    /// 7-bit length indicator from byte 1.
    length_code: u8,
    /// Extended length field size: 0, 2 or 8 bytes.
    extra: usize,
    /// Bytes still needed before the payload: `extra` plus the mask key.
    header_size: usize,
}

/// Header plus the decoded length and mask key.
struct HeaderAndMask {
    header: Header,
    mask: Option<[u8; 4]>,
    payload_len: usize,
}

/// Decoder for WebSocket frames.
///
/// Payloads are unmasked in place during decode; the resulting [`Frame`] keeps its mask
/// key so `decode(encode(f)) == f` holds for masked frames too.
pub struct Decoder {
    role: Role,
    state: Option<ReadState>,
    /// Frames whose payload exceeds this are rejected to bound memory.
    max_payload_read: usize,
}

impl Decoder {
    /// Creates a decoder for the given role with a payload size limit in bytes.
    pub fn new(role: Role, max_payload_read: usize) -> Self {
        Self {
            role,
            state: None,
            max_payload_read,
        }
    }
}

impl codec::Decoder for Decoder {
    type Item = Frame;
    type Error = WebSocketError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state.take() {
                None => {
                    if src.remaining() < 2 {
                        return Ok(None);
                    }

                    // Bit 7 of byte 0 is FIN, the low 4 bits the opcode. Reserved bits
                    // are ignored: no extension is ever negotiated.
                    let fin = src[0] & 0b1000_0000 != 0;
                    let opcode = OpCode::from(src[0] & 0b0000_1111);
                    let masked = src[1] & 0b1000_0000 != 0;
                    let length_code = src[1] & 0x7F;

                    match self.role {
                        Role::Server if !masked => {
                            return Err(WebSocketError::ExpectedMaskedFrame)
                        }
                        Role::Client if masked => {
                            return Err(WebSocketError::UnexpectedMaskedFrame)
                        }
                        _ => {}
                    }

                    let extra = match length_code {
                        126 => 2,
                        127 => 8,
                        _ => 0,
                    };
                    let header_size = extra + masked as usize * 4;
                    src.advance(2);

                    self.state = Some(ReadState::Header(Header {
                        fin,
                        masked,
                        opcode,
                        length_code,
                        extra,
                        header_size,
                    }));
                }
                Some(ReadState::Header(header)) => {
                    if src.remaining() < header.header_size {
                        self.state = Some(ReadState::Header(header));
                        return Ok(None);
                    }

                    let payload_len: usize = match header.extra {
                        0 => usize::from(header.length_code),
                        2 => src.get_u16() as usize,
                        8 => match usize::try_from(src.get_u64()) {
                            Ok(length) => length,
                            Err(_) => return Err(WebSocketError::FrameTooLarge),
                        },
                        _ => unreachable!(),
                    };

                    let mask = if header.masked {
                        Some(src.get_u32().to_be_bytes())
                    } else {
                        None
                    };

                    if header.opcode.is_control() && !header.fin {
                        return Err(WebSocketError::ControlFrameFragmented);
                    }
                    if header.opcode == OpCode::Ping && payload_len > 125 {
                        return Err(WebSocketError::PingFrameTooLarge);
                    }
                    if payload_len > self.max_payload_read {
                        return Err(WebSocketError::FrameTooLarge);
                    }

                    self.state = Some(ReadState::Payload(HeaderAndMask {
                        header,
                        mask,
                        payload_len,
                    }));
                }
                Some(ReadState::Payload(header_and_mask)) => {
                    if src.remaining() < header_and_mask.payload_len {
                        self.state = Some(ReadState::Payload(header_and_mask));
                        return Ok(None);
                    }

                    let header = header_and_mask.header;
                    let mask = header_and_mask.mask;

                    let mut payload = src.split_to(header_and_mask.payload_len);
                    if let Some(key) = mask {
                        apply_mask(&mut payload, key);
                    }

                    break Ok(Some(Frame::new(header.fin, header.opcode, mask, payload)));
                }
            }
        }
    }

    /// Called when the transport reached EOF.
    ///
    /// A partially buffered frame at EOF is a short read on a closed stream, reported as
    /// [`WebSocketError::TruncatedStream`] rather than an I/O error. EOF at a frame
    /// boundary is a clean end of stream.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if src.is_empty() && self.state.is_none() {
                    Ok(None)
                } else {
                    Err(WebSocketError::TruncatedStream)
                }
            }
        }
    }
}

/// Encoder for WebSocket frames.
///
/// A client-role encoder masks every outbound frame, generating a random key when the
/// frame does not pin one. A server-role encoder sends frames unmasked and rejects
/// frames that arrive with a key set.
pub struct Encoder {
    role: Role,
}

impl Encoder {
    /// Creates an encoder for the given role.
    pub fn new(role: Role) -> Self {
        Self { role }
    }
}

impl codec::Encoder<Frame> for Encoder {
    type Error = WebSocketError;

    fn encode(&mut self, mut frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match self.role {
            Role::Client => {
                if frame.mask.is_none() {
                    frame.mask = Some(rand::random());
                }
            }
            Role::Server => {
                if frame.mask.is_some() {
                    return Err(WebSocketError::UnexpectedMaskedFrame);
                }
            }
        }

        let mut head = [0; MAX_HEAD_SIZE];
        let size = frame.fmt_head(&mut head);

        dst.reserve(size + frame.payload.len());
        dst.extend_from_slice(&head[..size]);

        // Masking is computed into the output buffer; the frame payload stays untouched.
        let start = dst.len();
        dst.extend_from_slice(&frame.payload);
        if let Some(key) = frame.mask {
            apply_mask(&mut dst[start..], key);
        }

        Ok(())
    }
}

/// Combined decoder and encoder, for use with [`tokio_util::codec::Framed`].
pub struct Codec {
    decoder: Decoder,
    encoder: Encoder,
}

impl Codec {
    /// Creates a codec pair for the given role.
    pub fn new(role: Role, max_payload_read: usize) -> Self {
        Self {
            decoder: Decoder::new(role, max_payload_read),
            encoder: Encoder::new(role),
        }
    }
}

impl From<(Decoder, Encoder)> for Codec {
    fn from((decoder, encoder): (Decoder, Encoder)) -> Self {
        Self { decoder, encoder }
    }
}

impl codec::Decoder for Codec {
    type Item = <Decoder as codec::Decoder>::Item;
    type Error = <Decoder as codec::Decoder>::Error;

    #[inline]
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decoder.decode(src)
    }

    #[inline]
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decoder.decode_eof(src)
    }
}

impl codec::Encoder<Frame> for Codec {
    type Error = <Encoder as codec::Encoder<Frame>>::Error;

    #[inline]
    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encoder.encode(item, dst)
    }
}
