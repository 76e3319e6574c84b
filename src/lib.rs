//! # yaws
//! An embeddable HTTP/1.1 server that speaks just enough HTTP to serve simple `GET` requests and to
//! upgrade connections to the WebSocket protocol (RFC 6455).
//!
//! The server is built from a handful of small pieces:
//!
//! - [`HttpServer`]: accepts TCP connections, parses request heads and dispatches them as
//!   `request` or `upgrade` events.
//! - [`HttpRequest`]: a parsed request which doubles as its own response writer, with chunked
//!   transfer-encoding and keep-alive connection reuse.
//! - [`WebSocketServer`]: listens for `upgrade` events, validates the handshake and hands out
//!   [`WebSocketRequest`]s that can be accepted into a [`WebSocket`].
//! - [`Signal`]: the typed event registry every component uses to notify its listeners.
//!
//! Every listener receives its event by value. A listener that handles the event returns
//! [`Dispatch::Handled`], which stops delivery to the remaining listeners. A listener that is not
//! interested returns the event untouched with [`Dispatch::Unhandled`].
//!
//! # Server Example
//! ```no_run
//! use yaws::{Dispatch, HttpServer, WebSocketServer};
//!
//! #[tokio::main]
//! async fn main() -> yaws::Result<()> {
//!     let server = HttpServer::new();
//!     let websockets = WebSocketServer::new(&server);
//!
//!     server.requests().on(|mut req| {
//!         if req.url() != "/" {
//!             return Dispatch::Unhandled(req);
//!         }
//!         let _ = req.write_head(200, [("Content-Type", "text/plain")]);
//!         let _ = req.end_with("hello");
//!         Dispatch::Handled
//!     });
//!
//!     websockets.requests().on(|req| {
//!         if let Ok(ws) = req.accept() {
//!             let echo = ws.clone();
//!             ws.messages().on(move |text| {
//!                 let _ = echo.send(&text);
//!                 Dispatch::Handled
//!             });
//!             ws.start();
//!         }
//!         Dispatch::Handled
//!     });
//!
//!     let listening = server.listen(8080, None).await?;
//!     listening.join().await;
//!     Ok(())
//! }
//! ```
//!
//! # Limits
//! By default the server places no bound on header blocks, frame payloads or fragmented messages,
//! and never times out idle or half-closed connections. [`Options`] allows setting size limits;
//! a connection that exceeds one is closed.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod codec;
pub mod frame;
pub mod http;
mod mask;
mod options;
pub mod signal;
pub mod transport;
pub mod websocket;

use thiserror::Error;

pub use frame::{Frame, OpCode};
pub use http::{HttpRequest, HttpServer, Listening, RequestState};
pub use options::Options;
pub use signal::{Dispatch, HandlerId, Signal};
pub use websocket::{ReadyState, WebSocket, WebSocketRequest, WebSocketServer};

/// A result type for server operations, using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the HTTP and WebSocket layers.
///
/// Every error is scoped to a single connection. Transport failures tear that connection
/// down; they never affect other connections served by the same [`HttpServer`].
#[derive(Error, Debug)]
pub enum Error {
    /// The connection was closed, either by the peer or locally, before the operation completed.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// The request no longer owns its connection. This happens once the response finished,
    /// the request was closed, or the connection was handed over to a WebSocket.
    #[error("Request is detached from its connection")]
    Detached,

    /// `write_head` was called twice for the same response.
    #[error("Response headers were already sent")]
    HeadersAlreadySent,

    /// A body write was attempted before `write_head`.
    #[error("Response headers have not been sent")]
    HeadersNotSent,

    /// The request head grew beyond [`Options::with_max_header_size`] without terminating.
    #[error("Request header block too large")]
    HeaderTooLarge,

    /// A frame or a fragmented message exceeded the configured payload limits.
    #[error("Frame too large")]
    FrameTooLarge,

    /// The upgrade request did not carry `Upgrade: websocket`.
    #[error("Invalid upgrade header")]
    InvalidUpgradeHeader,

    /// The upgrade request did not carry a `Sec-WebSocket-Key` header.
    #[error("Sec-WebSocket-Key header is missing")]
    MissingSecWebSocketKey,

    /// The WebSocket is not in a state that allows the operation.
    #[error("Invalid WebSocket state: {0:?}")]
    InvalidState(ReadyState),

    /// The requested resource could not be retrieved by the content source.
    #[error("Content not found: {0}")]
    NotFound(String),

    /// A URL handed to the content source could not be parsed.
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    /// Wraps standard I/O errors reported by the transport.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}
