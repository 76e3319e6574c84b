//! # HTTP
//!
//! A minimal HTTP/1.1 server: request heads are parsed off the connection, dispatched through
//! [`HttpServer::requests`] or [`HttpServer::upgrades`], and answered through the
//! [`HttpRequest`] itself.
//!
//! Only what a small embedded server needs is supported. Request bodies are whatever arrived
//! together with the head, pipelined requests are not recognized, and a response either carries
//! a `Content-Length` or, on keep-alive connections, uses chunked transfer-encoding.
//!
//! ```no_run
//! use yaws::{Dispatch, HttpServer};
//! use yaws::http::FileSource;
//!
//! # async fn run() -> yaws::Result<()> {
//! let server = HttpServer::new();
//! let files = std::sync::Arc::new(FileSource::new("/var/www")?);
//!
//! server.requests().on(move |mut req| {
//!     let files = files.clone();
//!     tokio::spawn(async move {
//!         let url = req.url().to_owned();
//!         if let Err(err) = req.serve_url(&*files, &url).await {
//!             log::error!("{err}");
//!         }
//!     });
//!     Dispatch::Handled
//! });
//!
//! server.listen(8080, None).await?.join().await;
//! # Ok(())
//! # }
//! ```
mod content;
mod parse;
mod request;
mod response;
mod server;

pub use content::{mime_type, Content, ContentSource, FileSource};
pub use request::{HttpRequest, RequestState};
pub use response::{reason, ResponseHeaders};
pub(crate) use response::format_head;
pub use server::{HttpServer, Listening, DEFAULT_HOST};
