//! Connection session: one [`WebSocket`] per TCP connection.
//!
//! The session owns its transport exclusively. After the handshake it drives a loop of
//! frame decodes through the [`crate::reassembly::Reassembler`], handling control frames
//! itself: pings are answered with pongs carrying the same payload, pongs are observed
//! and discarded, and a close frame is echoed best-effort before the session terminates.
//! Outbound messages are fragmented according to [`crate::Options::with_max_frame_size`].
//!
//! [`WebSocket`] implements [`futures::Stream`] of messages and [`futures::Sink`] for
//! sending, so callers that read and write from separate tasks can use
//! [`futures::StreamExt::split`]; the split halves sequence their access to the
//! underlying stream, keeping concurrently sent frames from interleaving on the wire.

use std::{
    collections::VecDeque,
    future::poll_fn,
    pin::Pin,
    task::{ready, Context, Poll},
};

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, FramedParts};

use crate::{
    close::CloseCode,
    codec::Codec,
    frame::{Frame, Message, MessageKind},
    reassembly::Reassembler,
    OpCode, Options, Result, WebSocketError,
};

/// The role a session takes on its connection.
///
/// The role decides the masking direction: client frames are masked on the wire, server
/// frames are not.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
        }
    }
}

/// A WebSocket connection after a completed handshake.
///
/// Produced by [`crate::handshake::accept`] on the server side and
/// [`crate::client::connect`] on the client side.
pub struct WebSocket<S> {
    role: Role,
    stream: Framed<S, Codec>,
    reassembler: Reassembler,
    /// Control replies the protocol obligates us to send (pongs, close echoes). Flushed
    /// before any further read so a ping never waits behind application traffic.
    obligated_sends: VecDeque<Frame>,
    flush_sends: bool,
    /// Outbound fragments staged by `Sink::start_send`, not yet written to the codec.
    staged_sends: VecDeque<Frame>,
    max_frame_size: usize,
    close_sent: bool,
    is_closed: bool,
}

impl<S> WebSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a freshly upgraded transport. `leftover` holds bytes the handshake read
    /// past the end of the HTTP exchange; they are the first bytes the codec sees.
    pub(crate) fn from_upgraded(role: Role, io: S, leftover: BytesMut, options: Options) -> Self {
        let codec = Codec::new(role, options.max_payload_read);
        let mut parts = FramedParts::new::<Frame>(io, codec);
        parts.read_buf = leftover;

        Self {
            role,
            stream: Framed::from_parts(parts),
            reassembler: Reassembler::new(options.max_message_size),
            obligated_sends: VecDeque::new(),
            flush_sends: false,
            staged_sends: VecDeque::new(),
            max_frame_size: options.max_frame_size,
            close_sent: false,
            is_closed: false,
        }
    }

    /// The role this session plays.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Receives the next complete message.
    ///
    /// Returns `Ok(None)` once the connection has terminated cleanly: a close frame was
    /// received (and echoed), or the peer shut the stream down at a frame boundary.
    /// Control frames are handled internally and never surface here.
    pub async fn next_message(&mut self) -> Result<Option<Message>> {
        poll_fn(|cx| self.poll_next_message(cx)).await
    }

    /// Sends one message, fragmenting it if the payload exceeds the configured maximum
    /// frame size.
    pub async fn send(&mut self, kind: MessageKind, payload: impl Into<Bytes>) -> Result<()> {
        SinkExt::send(
            self,
            Message {
                kind,
                payload: payload.into(),
            },
        )
        .await
    }

    /// Sends a close frame with code 1000 and shuts the transport down.
    pub async fn close(&mut self) -> Result<()> {
        SinkExt::close(self).await
    }

    /// Polls for the next complete message, flushing obligated control replies first.
    pub fn poll_next_message(&mut self, cx: &mut Context<'_>) -> Poll<Result<Option<Message>>> {
        loop {
            ready!(self.poll_flush_obligated(cx))?;

            if self.is_closed {
                return Poll::Ready(Ok(None));
            }

            let frame = match ready!(self.stream.poll_next_unpin(cx)) {
                // EOF at a frame boundary; a mid-frame EOF surfaces as TruncatedStream.
                None => {
                    self.is_closed = true;
                    return Poll::Ready(Ok(None));
                }
                Some(Err(err)) => return Poll::Ready(Err(self.abort(err, cx))),
                Some(Ok(frame)) => frame,
            };

            match self.on_frame(frame) {
                Ok(Some(message)) => return Poll::Ready(Ok(Some(message))),
                Ok(None) => continue,
                Err(err) => return Poll::Ready(Err(self.abort(err, cx))),
            }
        }
    }

    /// Routes one decoded frame: control frames are handled here, data frames feed the
    /// reassembler.
    fn on_frame(&mut self, frame: Frame) -> Result<Option<Message>> {
        match frame.opcode {
            OpCode::Ping => {
                log::debug!("{} received ping ({} bytes)", self.role, frame.payload.len());
                self.obligated_sends.push_back(Frame::pong(frame.payload));
                Ok(None)
            }
            OpCode::Pong => {
                // Keepalive liveness only; no application effect.
                log::debug!("{} received pong", self.role);
                Ok(None)
            }
            OpCode::Close => {
                log::debug!("{} received close", self.role);
                if !self.close_sent {
                    self.obligated_sends.push_back(Frame::close_raw(frame.payload));
                    self.close_sent = true;
                }
                self.is_closed = true;
                Ok(None)
            }
            OpCode::Unknown(value) => Err(WebSocketError::UnknownOpCode(value)),
            OpCode::Text | OpCode::Binary | OpCode::Continuation => self.reassembler.push(frame),
        }
    }

    /// Tears the session down after a fatal error, sending a close frame with a mapped
    /// code. One attempt; the transport may already be gone and any failure is ignored.
    fn abort(&mut self, err: WebSocketError, cx: &mut Context<'_>) -> WebSocketError {
        if !self.close_sent {
            let code = match err {
                WebSocketError::FrameTooLarge => CloseCode::Size,
                WebSocketError::UnknownOpCode(_) => CloseCode::Unsupported,
                WebSocketError::UnexpectedContinuationFrame
                | WebSocketError::ExpectedContinuationFrame
                | WebSocketError::ControlFrameFragmented
                | WebSocketError::PingFrameTooLarge
                | WebSocketError::ExpectedMaskedFrame
                | WebSocketError::UnexpectedMaskedFrame
                | WebSocketError::TruncatedStream => CloseCode::Protocol,
                _ => CloseCode::Error,
            };
            self.obligated_sends.push_back(Frame::close(code, err.to_string()));
            self.close_sent = true;
            let _ = self.poll_flush_obligated(cx);
        }
        self.is_closed = true;
        err
    }

    /// Writes and flushes any queued control replies.
    fn poll_flush_obligated(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        while !self.obligated_sends.is_empty() {
            ready!(self.stream.poll_ready_unpin(cx))?;
            let next = self.obligated_sends.pop_front().expect("obligated send");
            self.stream.start_send_unpin(next)?;
            self.flush_sends = true;
        }

        if self.flush_sends {
            ready!(self.stream.poll_flush_unpin(cx))?;
            self.flush_sends = false;
        }

        Poll::Ready(Ok(()))
    }

    /// Moves staged outbound fragments into the codec.
    fn poll_write_staged(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        while !self.staged_sends.is_empty() {
            ready!(self.stream.poll_ready_unpin(cx))?;
            let next = self.staged_sends.pop_front().expect("staged send");
            self.stream.start_send_unpin(next)?;
        }
        Poll::Ready(Ok(()))
    }
}

/// Splits `payload` into wire frames.
///
/// The first frame carries the message's real opcode, every later chunk uses
/// `Continuation`; only the final frame has `fin = true`. A zero-length payload becomes
/// a single final frame with an empty payload.
pub(crate) fn fragment(kind: MessageKind, payload: Bytes, max_frame_size: usize) -> Vec<Frame> {
    let total = payload.len();
    if total <= max_frame_size {
        return vec![Frame::new(true, kind.opcode(), None, &payload[..])];
    }

    let mut frames = Vec::with_capacity(total.div_ceil(max_frame_size));
    let mut offset = 0;
    let mut first = true;

    while offset < total {
        let end = (offset + max_frame_size).min(total);
        let opcode = if first { kind.opcode() } else { OpCode::Continuation };
        frames.push(Frame::new(end == total, opcode, None, &payload[offset..end]));
        first = false;
        offset = end;
    }

    frames
}

impl<S> futures::Stream for WebSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Item = Result<Message>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match ready!(this.poll_next_message(cx)) {
            Ok(Some(message)) => Poll::Ready(Some(Ok(message))),
            Ok(None) => Poll::Ready(None),
            Err(err) => Poll::Ready(Some(Err(err))),
        }
    }
}

impl<S> futures::Sink<Message> for WebSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Error = WebSocketError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        let this = self.get_mut();
        if this.is_closed {
            return Poll::Ready(Err(WebSocketError::ConnectionClosed));
        }
        ready!(this.poll_flush_obligated(cx))?;
        ready!(this.poll_write_staged(cx))?;
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Message) -> Result<()> {
        let this = self.get_mut();
        if this.is_closed {
            return Err(WebSocketError::ConnectionClosed);
        }
        this.staged_sends
            .extend(fragment(item.kind, item.payload, this.max_frame_size));
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_flush_obligated(cx))?;
        ready!(this.poll_write_staged(cx))?;
        this.stream.poll_flush_unpin(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        let this = self.get_mut();
        if !this.close_sent {
            this.obligated_sends
                .push_back(Frame::close(CloseCode::Normal, ""));
            this.close_sent = true;
        }
        ready!(this.poll_flush_obligated(cx))?;
        ready!(this.poll_write_staged(cx))?;
        this.is_closed = true;
        this.stream.poll_close_unpin(cx)
    }
}
