//! Accepting side: a TCP listener upgrading connections and dispatching messages.
//!
//! [`Listener::serve`] runs the accept loop on the current task and spawns one task per
//! connection, so a slow or misbehaving peer never stalls the others. Per-connection
//! failures are logged and scoped to that connection; the accept loop itself only ends
//! if the caller drops the future.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use crate::{handshake, Message, Options, Result};

/// Application hook invoked once per complete inbound message.
///
/// Returning `Some` sends the reply on the same connection; `None` means no reply.
/// Closures of type `Fn(Message) -> Option<Message>` implement this directly.
pub trait MessageHandler: Send + Sync + 'static {
    fn on_message(&self, message: Message) -> Option<Message>;
}

impl<F> MessageHandler for F
where
    F: Fn(Message) -> Option<Message> + Send + Sync + 'static,
{
    fn on_message(&self, message: Message) -> Option<Message> {
        self(message)
    }
}

/// A WebSocket server bound to a TCP address.
pub struct Listener {
    listener: TcpListener,
    options: Options,
}

impl Listener {
    /// Binds to `addr` with default session options.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        Self::bind_with_options(addr, Options::default()).await
    }

    /// Binds to `addr`; `options` applies to every accepted session.
    pub async fn bind_with_options(addr: impl ToSocketAddrs, options: Options) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("listening on {}", listener.local_addr()?);
        Ok(Self { listener, options })
    }

    /// The address the listener is bound to. Useful when binding to port 0.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Runs the accept loop, handling each connection on its own task.
    ///
    /// Accept errors and per-connection errors are logged and do not end the loop.
    pub async fn serve<H: MessageHandler>(self, handler: H) -> Result<()> {
        let handler = Arc::new(handler);
        let mut next_id: u64 = 0;

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    log::error!("accept failed: {err}");
                    continue;
                }
            };

            next_id += 1;
            let conn = next_id;
            let options = self.options;
            let handler = Arc::clone(&handler);

            tokio::spawn(async move {
                log::info!("connection {conn}: accepted from {peer}");
                match handle_connection(stream, options, handler.as_ref()).await {
                    Ok(()) => log::info!("connection {conn}: closed"),
                    Err(err) => log::warn!("connection {conn}: {err}"),
                }
            });
        }
    }
}

/// Upgrades one connection and runs its message loop until the peer closes.
async fn handle_connection<H>(stream: TcpStream, options: Options, handler: &H) -> Result<()>
where
    H: MessageHandler + ?Sized,
{
    let mut ws = handshake::accept_with_options(stream, options).await?;

    while let Some(message) = ws.next_message().await? {
        if let Some(reply) = handler.on_message(message) {
            ws.send(reply.kind, reply.payload).await?;
        }
    }

    Ok(())
}

/// One chat message on the wire, as a JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// A chat endpoint: logs each inbound [`ChatMessage`] and acknowledges it.
///
/// Messages that fail to parse as JSON are logged and skipped; the connection stays up.
pub struct ChatEcho;

impl MessageHandler for ChatEcho {
    fn on_message(&self, message: Message) -> Option<Message> {
        let chat: ChatMessage = match serde_json::from_slice(&message.payload) {
            Ok(chat) => chat,
            Err(err) => {
                log::warn!("skipping undecodable chat message: {err}");
                return None;
            }
        };

        log::info!("{}: {}", chat.role, chat.content);

        let reply = ChatMessage {
            role: "agent".to_owned(),
            content: "Okay i got it".to_owned(),
        };
        Some(Message::text(serde_json::to_vec(&reply).ok()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{client, MessageKind};

    async fn spawn_server<H: MessageHandler>(handler: H) -> std::net::SocketAddr {
        let listener = Listener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(listener.serve(handler));
        addr
    }

    #[tokio::test]
    async fn test_echo_over_loopback() {
        let addr = spawn_server(|msg: Message| Some(msg)).await;

        let mut ws = client::connect(format!("ws://{addr}/").parse().unwrap())
            .await
            .unwrap();

        ws.send(MessageKind::Text, "echo me").await.unwrap();
        let reply = ws.next_message().await.unwrap().unwrap();
        assert_eq!(reply.as_text(), Some("echo me"));

        ws.send(MessageKind::Binary, vec![0u8, 1, 2]).await.unwrap();
        let reply = ws.next_message().await.unwrap().unwrap();
        assert_eq!(reply.kind, MessageKind::Binary);
        assert_eq!(&reply.payload[..], &[0u8, 1, 2]);

        ws.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_fragmented_message_over_loopback() {
        let addr = spawn_server(|msg: Message| Some(msg)).await;

        // Client fragments aggressively; the server must hand the handler one message.
        let options = Options::default().with_max_frame_size(3);
        let mut ws = client::connect_with_options(format!("ws://{addr}/").parse().unwrap(), options)
            .await
            .unwrap();

        ws.send(MessageKind::Text, "fragment me please").await.unwrap();
        let reply = ws.next_message().await.unwrap().unwrap();
        assert_eq!(reply.as_text(), Some("fragment me please"));
    }

    #[tokio::test]
    async fn test_chat_echo_acknowledges() {
        let addr = spawn_server(ChatEcho).await;

        let mut ws = client::connect(format!("ws://{addr}/").parse().unwrap())
            .await
            .unwrap();

        let hello = serde_json::to_vec(&ChatMessage {
            role: "user".to_owned(),
            content: "hello agent".to_owned(),
        })
        .unwrap();
        ws.send(MessageKind::Text, hello).await.unwrap();

        let reply = ws.next_message().await.unwrap().unwrap();
        let reply: ChatMessage = serde_json::from_slice(&reply.payload).unwrap();
        assert_eq!(reply.role, "agent");
        assert_eq!(reply.content, "Okay i got it");
    }

    #[tokio::test]
    async fn test_chat_echo_skips_bad_json() {
        let addr = spawn_server(ChatEcho).await;

        let mut ws = client::connect(format!("ws://{addr}/").parse().unwrap())
            .await
            .unwrap();

        // Not JSON: no reply, and the connection must survive.
        ws.send(MessageKind::Text, "not json at all").await.unwrap();

        let hello = serde_json::to_vec(&ChatMessage {
            role: "user".to_owned(),
            content: "still here".to_owned(),
        })
        .unwrap();
        ws.send(MessageKind::Text, hello).await.unwrap();

        // The first reply we see acknowledges the second send.
        let reply = ws.next_message().await.unwrap().unwrap();
        let reply: ChatMessage = serde_json::from_slice(&reply.payload).unwrap();
        assert_eq!(reply.role, "agent");
    }

    #[tokio::test]
    async fn test_one_bad_connection_does_not_stop_the_server() {
        let addr = spawn_server(|msg: Message| Some(msg)).await;

        // A peer that never upgrades.
        use tokio::io::AsyncWriteExt;
        let mut raw = tokio::net::TcpStream::connect(addr).await.unwrap();
        raw.write_all(b"this is not http\r\n\r\n").await.unwrap();
        drop(raw);

        // The listener keeps accepting.
        let mut ws = client::connect(format!("ws://{addr}/").parse().unwrap())
            .await
            .unwrap();
        ws.send(MessageKind::Text, "alive").await.unwrap();
        let reply = ws.next_message().await.unwrap().unwrap();
        assert_eq!(reply.as_text(), Some("alive"));
    }
}
