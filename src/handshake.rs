//! The HTTP Upgrade handshake, RFC 6455 Section 4.
//!
//! The exchange is parsed straight off the byte stream with [`httparse`]; there is no
//! HTTP stack underneath. Bytes read past the end of the HTTP exchange belong to the
//! frame layer and are handed to the session codec untouched, so a peer that pipelines
//! its first frame behind the handshake loses nothing.
//!
//! The server side accepts exactly one request shape: a `GET` with `Upgrade: websocket`,
//! a `Connection` header carrying the `Upgrade` token and a `Sec-WebSocket-Key`. The
//! client side verifies the `Sec-WebSocket-Accept` echo before trusting the connection.

use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::BytesMut;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{session::Role, Options, Result, WebSocket, WebSocketError};

/// Key-derivation GUID fixed by RFC 6455 Section 1.3.
const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on the buffered HTTP exchange. A peer that has not finished its headers
/// by then is not speaking the handshake.
const MAX_HANDSHAKE_SIZE: usize = 16 * 1024;

const MAX_HEADERS: usize = 32;

/// Computes the `Sec-WebSocket-Accept` value for a `Sec-WebSocket-Key`:
/// `base64(sha1(key + GUID))`.
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(GUID.as_bytes());
    STANDARD.encode(sha1.finalize())
}

/// A fresh `Sec-WebSocket-Key`: 16 random bytes, base64-encoded.
fn generate_key() -> String {
    let bytes: [u8; 16] = rand::random();
    STANDARD.encode(bytes)
}

/// Whether a comma-separated header value carries `token`, case-insensitively.
fn has_token(value: &[u8], token: &str) -> bool {
    std::str::from_utf8(value)
        .map(|v| v.split(',').any(|part| part.trim().eq_ignore_ascii_case(token)))
        .unwrap_or(false)
}

/// Performs the server side of the handshake on a freshly accepted stream, with default
/// session options.
pub async fn accept<S>(io: S) -> Result<WebSocket<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    accept_with_options(io, Options::default()).await
}

/// Performs the server side of the handshake on a freshly accepted stream.
///
/// Reads the upgrade request, validates it, and writes the `101 Switching Protocols`
/// response. On a rejected request nothing is written; the error says what was wrong and
/// the caller drops the stream.
pub async fn accept_with_options<S>(mut io: S, options: Options) -> Result<WebSocket<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);

    let (response, leftover) = loop {
        if io.read_buf(&mut buf).await? == 0 {
            return Err(WebSocketError::InvalidHandshake(
                "connection closed during handshake",
            ));
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut headers);

        match request
            .parse(&buf)
            .map_err(|_| WebSocketError::InvalidHandshake("malformed upgrade request"))?
        {
            httparse::Status::Complete(parsed) => {
                let response = check_upgrade_request(&request)?;
                break (response, BytesMut::from(&buf[parsed..]));
            }
            httparse::Status::Partial if buf.len() > MAX_HANDSHAKE_SIZE => {
                return Err(WebSocketError::InvalidHandshake("upgrade request too large"));
            }
            httparse::Status::Partial => {}
        }
    };

    io.write_all(response.as_bytes()).await?;
    io.flush().await?;

    Ok(WebSocket::from_upgraded(Role::Server, io, leftover, options))
}

/// Validates an upgrade request and builds the `101` response for it.
fn check_upgrade_request(request: &httparse::Request<'_, '_>) -> Result<String> {
    if request.method != Some("GET") {
        return Err(WebSocketError::InvalidHandshake("method must be GET"));
    }

    let mut key = None;
    let mut upgrade_ok = false;
    let mut connection_ok = false;

    for header in request.headers.iter() {
        if header.name.eq_ignore_ascii_case("upgrade") {
            upgrade_ok = has_token(header.value, "websocket");
        } else if header.name.eq_ignore_ascii_case("connection") {
            connection_ok = has_token(header.value, "upgrade");
        } else if header.name.eq_ignore_ascii_case("sec-websocket-key") {
            key = std::str::from_utf8(header.value).ok().map(|v| v.trim().to_owned());
        } else if header.name.eq_ignore_ascii_case("sec-websocket-version") {
            // Only checked when present; 13 is the sole version this crate speaks.
            if std::str::from_utf8(header.value).map(str::trim) != Ok("13") {
                return Err(WebSocketError::InvalidSecWebSocketVersion);
            }
        }
    }

    if !upgrade_ok {
        return Err(WebSocketError::InvalidUpgradeHeader);
    }
    if !connection_ok {
        return Err(WebSocketError::InvalidConnectionHeader);
    }
    let key = key.ok_or(WebSocketError::MissingSecWebSocketKey)?;

    log::debug!(
        "accepting upgrade for {}",
        request.path.unwrap_or("/")
    );

    Ok(format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_key(&key)
    ))
}

/// Performs the client side of the handshake on a connected stream.
///
/// `host` goes into the `Host` header, `path` into the request line.
pub(crate) async fn connect_stream<S>(
    mut io: S,
    host: &str,
    path: &str,
    options: Options,
) -> Result<WebSocket<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = generate_key();
    let request = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    );
    io.write_all(request.as_bytes()).await?;
    io.flush().await?;

    let mut buf = BytesMut::with_capacity(1024);

    loop {
        if io.read_buf(&mut buf).await? == 0 {
            return Err(WebSocketError::InvalidHandshake(
                "connection closed during handshake",
            ));
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut response = httparse::Response::new(&mut headers);

        match response
            .parse(&buf)
            .map_err(|_| WebSocketError::InvalidHandshake("malformed upgrade response"))?
        {
            httparse::Status::Complete(parsed) => {
                check_upgrade_response(&response, &key)?;
                let leftover = BytesMut::from(&buf[parsed..]);
                return Ok(WebSocket::from_upgraded(Role::Client, io, leftover, options));
            }
            httparse::Status::Partial if buf.len() > MAX_HANDSHAKE_SIZE => {
                return Err(WebSocketError::InvalidHandshake(
                    "upgrade response too large",
                ));
            }
            httparse::Status::Partial => {}
        }
    }
}

/// Validates the server's upgrade response against the key we sent.
fn check_upgrade_response(response: &httparse::Response<'_, '_>, key: &str) -> Result<()> {
    match response.code {
        Some(101) => {}
        Some(code) => return Err(WebSocketError::InvalidStatusCode(code)),
        None => return Err(WebSocketError::InvalidHandshake("missing status code")),
    }

    let mut upgrade_ok = false;
    let mut connection_ok = false;
    let mut accept_ok = false;

    for header in response.headers.iter() {
        if header.name.eq_ignore_ascii_case("upgrade") {
            upgrade_ok = has_token(header.value, "websocket");
        } else if header.name.eq_ignore_ascii_case("connection") {
            connection_ok = has_token(header.value, "upgrade");
        } else if header.name.eq_ignore_ascii_case("sec-websocket-accept") {
            accept_ok = std::str::from_utf8(header.value)
                .map(|v| v.trim() == accept_key(key))
                .unwrap_or(false);
        }
    }

    if !upgrade_ok {
        return Err(WebSocketError::InvalidUpgradeHeader);
    }
    if !connection_ok {
        return Err(WebSocketError::InvalidConnectionHeader);
    }
    if !accept_ok {
        return Err(WebSocketError::MismatchedAcceptKey);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageKind;
    use tokio::io::duplex;

    #[test]
    fn test_accept_key_rfc_vector() {
        // The worked example from RFC 6455 Section 1.3.
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_generate_key_is_16_random_bytes() {
        let key = generate_key();
        assert_eq!(STANDARD.decode(&key).unwrap().len(), 16);
        assert_ne!(key, generate_key());
    }

    #[test]
    fn test_has_token() {
        assert!(has_token(b"Upgrade", "upgrade"));
        assert!(has_token(b"keep-alive, Upgrade", "upgrade"));
        assert!(!has_token(b"keep-alive", "upgrade"));
        assert!(!has_token(b"", "upgrade"));
    }

    #[tokio::test]
    async fn test_handshake_end_to_end() {
        let (client_io, server_io) = duplex(1 << 16);

        let (server, client) = tokio::join!(
            accept(server_io),
            connect_stream(client_io, "localhost", "/chat", Options::default()),
        );
        let mut server = server.unwrap();
        let mut client = client.unwrap();

        client.send(MessageKind::Text, "hi there").await.unwrap();
        let msg = server.next_message().await.unwrap().unwrap();
        assert_eq!(msg.as_text(), Some("hi there"));

        server.send(MessageKind::Text, "hello yourself").await.unwrap();
        let msg = client.next_message().await.unwrap().unwrap();
        assert_eq!(msg.as_text(), Some("hello yourself"));
    }

    #[tokio::test]
    async fn test_accept_rejects_missing_key() {
        let (mut client_io, server_io) = duplex(1 << 16);

        client_io
            .write_all(
                b"GET / HTTP/1.1\r\n\
                  Host: localhost\r\n\
                  Upgrade: websocket\r\n\
                  Connection: Upgrade\r\n\
                  \r\n",
            )
            .await
            .unwrap();

        assert!(matches!(
            accept(server_io).await,
            Err(WebSocketError::MissingSecWebSocketKey)
        ));

        // Nothing was written before the stream was dropped.
        let mut sink = Vec::new();
        assert_eq!(client_io.read_to_end(&mut sink).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_accept_rejects_wrong_version() {
        let (mut client_io, server_io) = duplex(1 << 16);

        client_io
            .write_all(
                b"GET / HTTP/1.1\r\n\
                  Host: localhost\r\n\
                  Upgrade: websocket\r\n\
                  Connection: Upgrade\r\n\
                  Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                  Sec-WebSocket-Version: 8\r\n\
                  \r\n",
            )
            .await
            .unwrap();

        assert!(matches!(
            accept(server_io).await,
            Err(WebSocketError::InvalidSecWebSocketVersion)
        ));
    }

    #[tokio::test]
    async fn test_accept_rejects_non_get() {
        let (mut client_io, server_io) = duplex(1 << 16);

        client_io
            .write_all(
                b"POST / HTTP/1.1\r\n\
                  Host: localhost\r\n\
                  Upgrade: websocket\r\n\
                  Connection: Upgrade\r\n\
                  Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                  \r\n",
            )
            .await
            .unwrap();

        assert!(matches!(
            accept(server_io).await,
            Err(WebSocketError::InvalidHandshake(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_status() {
        let (client_io, mut server_io) = duplex(1 << 16);

        let fake_server = async {
            let mut buf = vec![0u8; 4096];
            server_io.read(&mut buf).await.unwrap();
            server_io
                .write_all(b"HTTP/1.1 404 Not Found\r\n\r\n")
                .await
                .unwrap();
        };

        let (result, ()) = tokio::join!(
            connect_stream(client_io, "localhost", "/", Options::default()),
            fake_server,
        );

        assert!(matches!(
            result.map(|_| ()),
            Err(WebSocketError::InvalidStatusCode(404))
        ));
    }

    #[tokio::test]
    async fn test_connect_rejects_mismatched_accept_key() {
        let (client_io, mut server_io) = duplex(1 << 16);

        let fake_server = async {
            let mut buf = vec![0u8; 4096];
            server_io.read(&mut buf).await.unwrap();
            server_io
                .write_all(
                    b"HTTP/1.1 101 Switching Protocols\r\n\
                      Upgrade: websocket\r\n\
                      Connection: Upgrade\r\n\
                      Sec-WebSocket-Accept: bm90IHRoZSByaWdodCBrZXk=\r\n\
                      \r\n",
                )
                .await
                .unwrap();
        };

        let (result, ()) = tokio::join!(
            connect_stream(client_io, "localhost", "/", Options::default()),
            fake_server,
        );

        assert!(matches!(
            result.map(|_| ()),
            Err(WebSocketError::MismatchedAcceptKey)
        ));
    }

    #[tokio::test]
    async fn test_bytes_behind_handshake_reach_the_codec() {
        // A server that pipelines its first frame in the same write as the 101 response.
        let (client_io, mut server_io) = duplex(1 << 16);

        let fake_server = async {
            let mut buf = vec![0u8; 4096];
            let read = server_io.read(&mut buf).await.unwrap();
            let request = std::str::from_utf8(&buf[..read]).unwrap();
            let key = request
                .lines()
                .find_map(|line| line.strip_prefix("Sec-WebSocket-Key: "))
                .unwrap()
                .trim();

            let mut wire = format!(
                "HTTP/1.1 101 Switching Protocols\r\n\
                 Upgrade: websocket\r\n\
                 Connection: Upgrade\r\n\
                 Sec-WebSocket-Accept: {}\r\n\
                 \r\n",
                accept_key(key)
            )
            .into_bytes();
            // Unmasked text frame "early", FIN set.
            wire.extend_from_slice(&[0x81, 0x05, b'e', b'a', b'r', b'l', b'y']);
            server_io.write_all(&wire).await.unwrap();
        };

        let (result, ()) = tokio::join!(
            connect_stream(client_io, "localhost", "/", Options::default()),
            fake_server,
        );
        let mut ws = result.unwrap();

        let msg = ws.next_message().await.unwrap().unwrap();
        assert_eq!(msg.as_text(), Some("early"));
    }
}
