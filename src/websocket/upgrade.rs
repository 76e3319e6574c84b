use std::collections::HashMap;

use sha1::{Digest, Sha1};

use super::WebSocket;
use crate::{
    http::{HttpRequest, ResponseHeaders},
    transport::Connection,
    Error, Options, Result,
};

/// Derives the `Sec-WebSocket-Accept` value for a client's `Sec-WebSocket-Key`.
pub fn accept_key(key: &str) -> String {
    use base64::prelude::*;
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11"); // magic string
    let result = sha1.finalize();
    BASE64_STANDARD.encode(&result[..])
}

/// Returns `true` if `request` asks for a WebSocket upgrade.
pub fn is_websocket_upgrade(request: &HttpRequest) -> bool {
    request
        .header("Upgrade")
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
        && request.header("Sec-WebSocket-Key").is_some()
}

/// A pending WebSocket handshake.
///
/// The request owns the connection taken over from the [`HttpRequest`]. It is answered with
/// [`accept`](Self::accept) or [`reject`](Self::reject); dropping it unanswered rejects it.
pub struct WebSocketRequest {
    url: String,
    headers: HashMap<String, String>,
    key: String,
    conn: Option<Connection>,
    options: Options,
}

impl std::fmt::Debug for WebSocketRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketRequest")
            .field("url", &self.url)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl TryFrom<&mut HttpRequest> for WebSocketRequest {
    type Error = Error;

    /// Validates the handshake headers and takes the connection out of `request`.
    ///
    /// On error `request` is left untouched.
    fn try_from(request: &mut HttpRequest) -> Result<Self> {
        if !request
            .header("Upgrade")
            .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
        {
            return Err(Error::InvalidUpgradeHeader);
        }
        let key = request
            .header("Sec-WebSocket-Key")
            .ok_or(Error::MissingSecWebSocketKey)?
            .to_owned();

        let url = request.url().to_owned();
        let headers = request.headers().clone();
        let conn = request.detach().ok_or(Error::Detached)?;

        Ok(Self {
            url,
            headers,
            key,
            conn: Some(conn),
            options: Options::default(),
        })
    }
}

impl WebSocketRequest {
    pub(crate) fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Subprotocols requested by the client, if any.
    pub fn protocol(&self) -> Option<&str> {
        self.header("Sec-WebSocket-Protocol")
    }

    /// Completes the handshake with `101 Switching Protocols`.
    ///
    /// The returned socket is in [`ReadyState::Connecting`](super::ReadyState::Connecting);
    /// register listeners and call [`WebSocket::start`] to begin receiving messages.
    pub fn accept(mut self) -> Result<WebSocket> {
        let conn = self.conn.take().ok_or(Error::Detached)?;

        let mut headers: ResponseHeaders = [
            ("Upgrade", "websocket".to_owned()),
            ("Connection", "Upgrade".to_owned()),
            ("Sec-WebSocket-Accept", accept_key(&self.key)),
        ]
        .into_iter()
        .collect();
        if let Some(protocol) = self.protocol() {
            headers.set("Sec-WebSocket-Protocol", protocol);
        }

        conn.writer
            .write_untracked(crate::http::format_head(101, &headers))?;
        log::debug!("Upgraded {} to WebSocket", self.url);

        Ok(WebSocket::new(conn, &self.options))
    }

    /// Declines the handshake and closes the connection.
    pub fn reject(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            log::debug!("Rejected WebSocket upgrade for {}", self.url);
            conn.writer.close();
        }
    }
}

impl Drop for WebSocketRequest {
    fn drop(&mut self) {
        self.close();
    }
}
