//! # WebSocket
//!
//! Server side of the WebSocket protocol on top of [`HttpServer`].
//!
//! A [`WebSocketServer`] listens for upgrade requests, checks the handshake headers and emits a
//! [`WebSocketRequest`] for each one. A listener either accepts it, which answers with
//! `101 Switching Protocols` and turns the connection into a [`WebSocket`], or rejects it.
//! Requests no listener handles are rejected.
//!
//! Only text messages and the close handshake are implemented. Binary, ping and pong frames are
//! parsed and discarded.
mod socket;
mod upgrade;

use std::sync::Arc;

pub use socket::WebSocket;
pub use upgrade::{accept_key, is_websocket_upgrade, WebSocketRequest};

use crate::{
    http::{HttpRequest, HttpServer},
    signal::{Dispatch, Signal},
    Options,
};

/// Connection state of a [`WebSocket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    /// Accepted, not reading yet.
    Connecting = 0,
    Open = 1,
    /// A close frame was sent, waiting for the client to confirm.
    Closing = 2,
    Closed = 3,
}

impl From<u8> for ReadyState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Accepts WebSocket upgrades for an [`HttpServer`].
#[derive(Clone)]
pub struct WebSocketServer {
    inner: Arc<Inner>,
}

struct Inner {
    requests: Signal<WebSocketRequest>,
    options: Options,
}

impl WebSocketServer {
    /// Subscribes to the upgrade requests of `server`, using the server's [`Options`] for the
    /// sockets it accepts.
    pub fn new(server: &HttpServer) -> Self {
        let inner = Arc::new(Inner {
            requests: Signal::new(),
            options: server.options().clone(),
        });

        let this = Arc::clone(&inner);
        server.upgrades().on(move |request| this.on_upgrade(request));

        Self { inner }
    }

    /// Valid handshakes waiting to be accepted or rejected.
    pub fn requests(&self) -> &Signal<WebSocketRequest> {
        &self.inner.requests
    }
}

impl Inner {
    fn on_upgrade(&self, mut request: HttpRequest) -> Dispatch<HttpRequest> {
        if !is_websocket_upgrade(&request) {
            return Dispatch::Unhandled(request);
        }

        let ws_request = match WebSocketRequest::try_from(&mut request) {
            Ok(ws_request) => ws_request.with_options(self.options.clone()),
            Err(err) => {
                log::debug!("Not a WebSocket upgrade: {err}");
                return Dispatch::Unhandled(request);
            }
        };

        if let Some(unclaimed) = self.requests.emit(ws_request).into_unhandled() {
            unclaimed.reject();
        }
        Dispatch::Handled
    }
}

impl std::fmt::Debug for WebSocketServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketServer")
            .field("requests", &self.inner.requests)
            .finish()
    }
}
