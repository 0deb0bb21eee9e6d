//! # wirews
//! Implementation of the WebSocket wire protocol (RFC 6455 subset) directly on top of raw
//! TCP byte streams: the HTTP Upgrade handshake, a binary frame codec with masking,
//! fragmentation/reassembly of multi-frame messages, and control-frame handling, for both
//! a listening server and a connecting client.
//!
//! The crate deliberately stops at the protocol engine. There is no TLS, no extension
//! negotiation (permessage-deflate or otherwise), and no HTTP routing beyond the single
//! upgrade path. Reconnection and keepalive policies belong to the caller.
//!
//! # Architecture
//!
//! - [`codec`]: incremental frame decoder/encoder, pluggable into
//!   [`tokio_util::codec::Framed`].
//! - [`handshake`]: the one-time HTTP Upgrade exchange, parsed straight off the stream.
//! - [`WebSocket`]: a connection session owning one transport, yielding reassembled
//!   [`Message`]s and fragmenting outbound payloads.
//! - [`Listener`]: accept loop spawning one task per connection.
//! - [`client::connect`]: dialer for `ws://` URLs.
//!
//! # Client example
//! ```no_run
//! use wirews::{client, MessageKind};
//!
//! #[tokio::main]
//! async fn main() -> wirews::Result<()> {
//!     let mut ws = client::connect("ws://127.0.0.1:4443/".parse()?).await?;
//!     ws.send(MessageKind::Text, "hello").await?;
//!     while let Some(msg) = ws.next_message().await? {
//!         println!("got {} bytes", msg.payload.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Server example
//! ```no_run
//! use wirews::{Listener, Message};
//!
//! #[tokio::main]
//! async fn main() -> wirews::Result<()> {
//!     let listener = Listener::bind("127.0.0.1:4443").await?;
//!     listener
//!         .serve(|msg: Message| Some(msg)) // echo
//!         .await
//! }
//! ```

pub mod client;
pub mod close;
pub mod codec;
pub mod frame;
pub mod handshake;
mod mask;
mod options;
mod reassembly;
mod server;
mod session;

use thiserror::Error;

pub use frame::{Frame, Message, MessageKind, OpCode};
pub use options::Options;
pub use server::{ChatEcho, ChatMessage, Listener, MessageHandler};
pub use session::{Role, WebSocket};

/// A result type for WebSocket operations, using [`WebSocketError`] as the error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Errors produced by the protocol engine.
///
/// Every variant is fatal to the connection it occurred on: the session is torn down and
/// the caller decides whether to reconnect. Errors never cross connection boundaries and
/// never take down the [`Listener`] accept loop.
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// The peer closed the transport in the middle of a frame: fewer bytes arrived than
    /// the frame header declared. Distinct from [`WebSocketError::Io`], which carries a
    /// transport-level failure on an open stream.
    #[error("stream truncated mid-frame")]
    TruncatedStream,

    /// The HTTP request or response of the upgrade exchange was malformed.
    #[error("invalid handshake: {0}")]
    InvalidHandshake(&'static str),

    /// The handshake response status was not `101 Switching Protocols`.
    #[error("invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// The `Upgrade` header is missing or does not name `websocket`.
    #[error("invalid upgrade header")]
    InvalidUpgradeHeader,

    /// The `Connection` header is missing or does not carry the `Upgrade` token.
    #[error("invalid connection header")]
    InvalidConnectionHeader,

    /// The client request carries no `Sec-WebSocket-Key` header.
    #[error("Sec-WebSocket-Key header is missing")]
    MissingSecWebSocketKey,

    /// The client request pinned a `Sec-WebSocket-Version` other than 13.
    #[error("Sec-WebSocket-Version must be 13")]
    InvalidSecWebSocketVersion,

    /// The server's `Sec-WebSocket-Accept` does not match the key we sent.
    #[error("Sec-WebSocket-Accept does not match the request key")]
    MismatchedAcceptKey,

    /// The dial URL scheme is not `ws`.
    #[error("invalid url scheme")]
    InvalidHttpScheme,

    /// A continuation frame arrived with no fragment sequence open.
    #[error("unexpected continuation frame")]
    UnexpectedContinuationFrame,

    /// A new data frame arrived while a fragment sequence was still open.
    #[error("expected continuation frame")]
    ExpectedContinuationFrame,

    /// A control frame arrived with the FIN bit clear. RFC 6455 forbids fragmenting
    /// control frames.
    #[error("control frame must not be fragmented")]
    ControlFrameFragmented,

    /// A ping frame carried more than the 125 payload bytes RFC 6455 allows.
    #[error("ping frame too large")]
    PingFrameTooLarge,

    /// A frame payload or a reassembled message exceeded the configured limit.
    #[error("frame too large")]
    FrameTooLarge,

    /// A frame used an opcode outside the set RFC 6455 defines. The decoder preserves
    /// the raw value; the session refuses to process it.
    #[error("unknown opcode (byte={0})")]
    UnknownOpCode(u8),

    /// The server received an unmasked frame. Client-to-server frames must be masked.
    #[error("expected masked frame")]
    ExpectedMaskedFrame,

    /// The client received a masked frame. Server-to-client frames must not be masked.
    #[error("unexpected masked frame")]
    UnexpectedMaskedFrame,

    /// An operation was attempted on a session that already closed.
    #[error("connection is closed")]
    ConnectionClosed,

    /// Transport failure on the underlying stream.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Dial URL failed to parse.
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),
}
