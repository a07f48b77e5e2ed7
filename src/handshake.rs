//! RFC 6455 §4 HTTP Upgrade handshake, driven byte-at-a-time the way the
//! teacher crate's `perform_handshake`/`handle_handshake` do, so neither side
//! ever reads past the blank line terminating the HTTP headers.

use base64::Engine;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::auth::{AuthContext, AuthorizationContext, ValidationResult};
use crate::error::{ProtocolError, WsError};

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const MAX_HEADER_BYTES: usize = 16 * 1024;

/// what the client side of a handshake wants to send.
#[derive(Debug, Clone, Default)]
pub struct WsRequestContext {
    pub path: String,
    pub extra_headers: Vec<(String, String)>,
    pub credentials: Option<AuthorizationContext>,
}

/// what the client side observed in the server's handshake response.
#[derive(Debug, Clone)]
pub struct WsResponseContext {
    pub code: u16,
}

fn gen_key() -> String {
    let raw: [u8; 16] = rand::random();
    base64::engine::general_purpose::STANDARD.encode(raw)
}

fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(GUID.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

async fn read_http_head<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Vec<u8>, WsError> {
    let mut buf = Vec::with_capacity(512);
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(WsError::HandshakeFailed("connection closed during handshake".into()));
        }
        buf.push(byte[0]);
        if buf.len() >= 4 && &buf[buf.len() - 4..] == b"\r\n\r\n" {
            return Ok(buf);
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Err(WsError::HandshakeFailed("handshake headers too large".into()));
        }
    }
}

/// drive the client side of the handshake over an already-connected
/// transport. Retries once, with credentials attached, if the first attempt
/// is rejected with 401.
pub async fn client_handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    host: &str,
    port: i32,
    req: &WsRequestContext,
) -> Result<WsResponseContext, WsError> {
    let resp = send_client_request(stream, host, port, req, None).await?;
    if resp.code == 401 {
        let Some(creds) = &req.credentials else {
            return Err(WsError::AuthRequired);
        };
        let challenge = resp
            .challenge
            .as_ref()
            .ok_or_else(|| WsError::HandshakeFailed("401 without WWW-Authenticate".into()))?;
        let retry = send_client_request(stream, host, port, req, Some((creds, challenge))).await?;
        if retry.code != 101 {
            return Err(WsError::AuthRejected);
        }
        return Ok(WsResponseContext { code: retry.code });
    }
    if resp.code != 101 {
        return Err(WsError::HandshakeFailed(format!("unexpected status {}", resp.code)));
    }
    Ok(WsResponseContext { code: resp.code })
}

struct ClientResponse {
    code: u16,
    challenge: Option<AuthContext>,
}

async fn send_client_request<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    host: &str,
    port: i32,
    req: &WsRequestContext,
    auth: Option<(&AuthorizationContext, &AuthContext)>,
) -> Result<ClientResponse, WsError> {
    let key = gen_key();
    let mut request = format!(
        "GET {} HTTP/1.1\r\nHost: {host}:{port}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\nSec-WebSocket-Version: 13\r\n",
        req.path
    );
    for (name, value) in &req.extra_headers {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    if let Some((creds, challenge)) = auth {
        if let Some(header) = creds.authorize_header(challenge, "GET", &req.path) {
            request.push_str(&format!("Authorization: {header}\r\n"));
        }
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let head = read_http_head(stream).await?;
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut response = httparse::Response::new(&mut headers);
    response
        .parse(&head)
        .map_err(|e| WsError::HandshakeFailed(e.to_string()))?;
    let code = response.code.unwrap_or(0);

    if code == 101 {
        let accept = find_header(response.headers, "Sec-WebSocket-Accept")
            .ok_or_else(|| WsError::HandshakeFailed("missing Sec-WebSocket-Accept".into()))?;
        if accept != accept_key(&key) {
            return Err(WsError::Protocol(ProtocolError::InvalidUtf8));
        }
        return Ok(ClientResponse { code, challenge: None });
    }

    let challenge = find_header(response.headers, "WWW-Authenticate").and_then(parse_challenge);
    Ok(ClientResponse { code, challenge })
}

fn find_header<'a>(headers: &'a [httparse::Header<'a>], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .and_then(|h| std::str::from_utf8(h.value).ok())
}

fn parse_challenge(value: &str) -> Option<AuthContext> {
    let realm = extract_param(value, "realm").unwrap_or_default();
    if value.starts_with("Digest") {
        let nonce = extract_param(value, "nonce").unwrap_or_default();
        Some(AuthContext::Digest { realm, nonce })
    } else if value.starts_with("Basic") {
        Some(AuthContext::Basic { realm })
    } else {
        None
    }
}

fn extract_param(value: &str, key: &str) -> Option<String> {
    value.split(',').find_map(|part| {
        let part = part.trim();
        let prefix = format!("{key}=");
        part.strip_prefix(&prefix)
            .or_else(|| part.rsplit(' ').next().filter(|_| part.starts_with(&prefix)))
            .map(|v| v.trim_matches('"').to_string())
    })
}

/// drive the server side of the handshake; `auth` is `None` when the server
/// requires no credentials. On success the Upgrade response has already been
/// written and the transport is ready to carry WS frames.
pub async fn server_handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    auth: &AuthContext,
    credentials: Option<&AuthorizationContext>,
) -> Result<(), WsError> {
    loop {
        let head = read_http_head(stream).await?;
        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut request = httparse::Request::new(&mut headers);
        request
            .parse(&head)
            .map_err(|e| WsError::HandshakeFailed(e.to_string()))?;
        let method = request.method.unwrap_or("GET").to_string();
        let path = request.path.unwrap_or("/").to_string();
        let key = find_header(request.headers, "Sec-WebSocket-Key")
            .ok_or_else(|| WsError::HandshakeFailed("missing Sec-WebSocket-Key".into()))?
            .to_string();

        if let (AuthContext::Basic { .. } | AuthContext::Digest { .. }, Some(creds)) = (auth, credentials) {
            let authorized = find_header(request.headers, "Authorization")
                .map(|header| creds.validate(auth, &method, &path, header) == ValidationResult::Valid)
                .unwrap_or(false);
            if !authorized {
                write_unauthorized(stream, auth).await?;
                continue;
            }
        }

        let accept = accept_key(&key);
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
             Sec-WebSocket-Accept: {accept}\r\n\r\n"
        );
        stream.write_all(response.as_bytes()).await?;
        stream.flush().await?;
        return Ok(());
    }
}

async fn write_unauthorized<S: AsyncWrite + Unpin>(stream: &mut S, auth: &AuthContext) -> Result<(), WsError> {
    let challenge = auth.challenge_header().unwrap_or_default();
    let response = format!(
        "HTTP/1.1 401 Unauthorized\r\nWWW-Authenticate: {challenge}\r\nContent-Length: 0\r\n\r\n"
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn client_and_server_agree_on_accept_key() {
        let (mut client_io, mut server_io) = duplex(8192);
        let req = WsRequestContext {
            path: "/ws".into(),
            ..Default::default()
        };
        let server = tokio::spawn(async move {
            server_handshake(&mut server_io, &AuthContext::None, None).await.unwrap();
            server_io
        });
        let resp = client_handshake(&mut client_io, "localhost", 9000, &req).await.unwrap();
        assert_eq!(resp.code, 101);
        server.await.unwrap();
    }

    #[test]
    fn accept_key_matches_rfc6455_example() {
        // the example key/accept pair from RFC 6455 §1.3.
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }
}
