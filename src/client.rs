//! Connecting side: dial a `ws://` URL over plain TCP.

use tokio::net::TcpStream;
use url::Url;

use crate::{handshake, Options, Result, WebSocket, WebSocketError};

/// Connects to `url` with default session options.
pub async fn connect(url: Url) -> Result<WebSocket<TcpStream>> {
    connect_with_options(url, Options::default()).await
}

/// Connects to `url`, performs the upgrade handshake, and returns the session.
///
/// Only the `ws` scheme is supported; TLS termination is out of scope. The port defaults
/// to 80 when the URL carries none.
pub async fn connect_with_options(url: Url, options: Options) -> Result<WebSocket<TcpStream>> {
    if url.scheme() != "ws" {
        return Err(WebSocketError::InvalidHttpScheme);
    }

    let host = url
        .host_str()
        .ok_or(WebSocketError::InvalidHandshake("url has no host"))?;
    let port = url.port().unwrap_or(80);

    // Host header keeps the explicit port the caller dialed with.
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    };

    let mut path = url.path().to_owned();
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }

    log::debug!("dialing {host}:{port}{path}");
    let stream = TcpStream::connect((host, port)).await?;

    handshake::connect_stream(stream, &authority, &path, options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::accept_key;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_rejects_non_ws_schemes() {
        for url in ["http://example.com/", "wss://example.com/", "ftp://example.com/"] {
            assert!(matches!(
                connect(url.parse().unwrap()).await,
                Err(WebSocketError::InvalidHttpScheme)
            ));
        }
    }

    #[tokio::test]
    async fn test_request_line_carries_path_and_query() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let fake_server = async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let read = stream.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..read]).into_owned();

            let key = request
                .lines()
                .find_map(|line| line.strip_prefix("Sec-WebSocket-Key: "))
                .unwrap()
                .trim()
                .to_owned();
            let response = format!(
                "HTTP/1.1 101 Switching Protocols\r\n\
                 Upgrade: websocket\r\n\
                 Connection: Upgrade\r\n\
                 Sec-WebSocket-Accept: {}\r\n\
                 \r\n",
                accept_key(&key)
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            request
        };

        let url = format!("ws://{addr}/chat?room=42").parse().unwrap();
        let (request, result) = tokio::join!(fake_server, connect(url));
        result.unwrap();

        let request_line = request.lines().next().unwrap();
        assert_eq!(request_line, "GET /chat?room=42 HTTP/1.1");
        assert!(request.contains(&format!("Host: {addr}\r\n")));
        assert!(request.contains("Sec-WebSocket-Version: 13\r\n"));
    }
}
