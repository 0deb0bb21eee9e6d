//! Reassembly of fragmented messages.
//!
//! A logical message may be split across frames: the first frame carries the real data
//! opcode with `fin = false`, the middle frames `Continuation` with `fin = false`, and
//! the last `Continuation` with `fin = true`. This module is the per-connection state
//! machine enforcing that sequencing; control frames never reach it, so they can
//! interleave mid-message without disturbing its state.

use crate::{
    frame::{Frame, Message, MessageKind},
    OpCode, Result, WebSocketError,
};

/// Fragmentation state machine, either idle or mid-sequence.
pub(crate) struct Reassembler {
    /// Kind of the fragment sequence currently open, `None` when idle.
    pending: Option<MessageKind>,
    /// Accumulated payload of the in-progress message, empty when idle.
    buffer: Vec<u8>,
    /// A message growing past this is rejected to bound memory.
    max_message_size: usize,
}

impl Reassembler {
    pub(crate) fn new(max_message_size: usize) -> Self {
        Self {
            pending: None,
            buffer: Vec::new(),
            max_message_size,
        }
    }

    /// Whether no fragment sequence is currently open.
    #[cfg(test)]
    pub(crate) fn is_idle(&self) -> bool {
        self.pending.is_none() && self.buffer.is_empty()
    }

    /// Feeds one data frame into the state machine.
    ///
    /// Returns `Ok(Some(message))` when the frame completes a message, `Ok(None)` when
    /// more fragments are expected, and an error on a sequencing violation. The caller
    /// routes control and unknown-opcode frames elsewhere.
    pub(crate) fn push(&mut self, frame: Frame) -> Result<Option<Message>> {
        match frame.opcode {
            OpCode::Text | OpCode::Binary => {
                if self.pending.is_some() {
                    return Err(WebSocketError::ExpectedContinuationFrame);
                }

                let kind = match frame.opcode {
                    OpCode::Text => MessageKind::Text,
                    _ => MessageKind::Binary,
                };

                if frame.fin {
                    // Single-frame message, no buffering needed.
                    return Ok(Some(Message {
                        kind,
                        payload: frame.payload.freeze(),
                    }));
                }

                self.pending = Some(kind);
                self.buffer.extend_from_slice(&frame.payload);
                self.check_capacity()?;
                Ok(None)
            }
            OpCode::Continuation => {
                let kind = self
                    .pending
                    .ok_or(WebSocketError::UnexpectedContinuationFrame)?;

                self.buffer.extend_from_slice(&frame.payload);
                self.check_capacity()?;

                if frame.fin {
                    self.pending = None;
                    let payload = std::mem::take(&mut self.buffer);
                    return Ok(Some(Message {
                        kind,
                        payload: payload.into(),
                    }));
                }
                Ok(None)
            }
            OpCode::Close | OpCode::Ping | OpCode::Pong | OpCode::Unknown(_) => {
                unreachable!("control and unknown frames are routed before reassembly")
            }
        }
    }

    fn check_capacity(&self) -> Result<()> {
        if self.buffer.len() > self.max_message_size {
            return Err(WebSocketError::FrameTooLarge);
        }
        Ok(())
    }
}
