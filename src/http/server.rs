use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpSocket},
    sync::oneshot,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use super::{
    parse::{parse_head, HeadScanner, RequestHead},
    HttpRequest,
};
use crate::{
    signal::Signal,
    transport::{self, ConnReader, Connection},
    Error, Options, Result,
};

/// Host used by [`HttpServer::listen`] when none is given.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// An HTTP/1.1 server.
///
/// Every parsed request is emitted on one of two signals: [`upgrades`](Self::upgrades) when it
/// carries an `Upgrade` header, [`requests`](Self::requests) otherwise. A request nobody handles
/// has its connection closed without a response.
///
/// The server is a cheap handle; clones share the same listeners.
#[derive(Clone, Default)]
pub struct HttpServer {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    options: Options,
    requests: Signal<HttpRequest>,
    upgrades: Signal<HttpRequest>,
}

impl HttpServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: Options) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                ..Default::default()
            }),
        }
    }

    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    /// Plain requests.
    pub fn requests(&self) -> &Signal<HttpRequest> {
        &self.inner.requests
    }

    /// Requests carrying an `Upgrade` header.
    pub fn upgrades(&self) -> &Signal<HttpRequest> {
        &self.inner.upgrades
    }

    /// Binds `host:port` and starts accepting connections in the background.
    ///
    /// `host` defaults to [`DEFAULT_HOST`]. Port `0` binds an ephemeral port, see
    /// [`Listening::local_addr`].
    pub async fn listen(&self, port: u16, host: Option<&str>) -> Result<Listening> {
        let host = host.unwrap_or(DEFAULT_HOST);
        let addr = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("no address for {host}:{port}"),
                )
            })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(self.inner.options.backlog)?;
        let local_addr = listener.local_addr()?;
        log::debug!("Listening on {local_addr}");

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(self.clone().accept_loop(listener, shutdown.clone()));

        Ok(Listening {
            local_addr,
            shutdown,
            task,
        })
    }

    /// Serves HTTP on an already established connection.
    ///
    /// Returns the handle of the task reading requests from `io`. The task ends when the
    /// connection closes or is handed over to an upgrade handler.
    pub fn serve_connection<S>(&self, io: S) -> JoinHandle<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        tokio::spawn(self.clone().handle(transport::connect(io)))
    }

    async fn accept_loop(self, listener: TcpListener, shutdown: CancellationToken) {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    log::debug!("Accepted connection from {peer}");
                    if let Err(err) = stream.set_nodelay(self.inner.options.no_delay) {
                        log::warn!("Unable to set TCP_NODELAY: {err}");
                    }
                    self.serve_connection(stream);
                }
                Err(err) => {
                    log::error!("Error accepting connection: {err}");
                    // typically out of file descriptors, give the others a chance to close
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
        log::debug!("Stopped listening");
    }

    async fn handle(self, mut conn: Connection) {
        let max_header_size = self.inner.options.max_header_size;
        loop {
            let head = match read_head(&mut conn.reader, max_header_size).await {
                Ok(Some(head)) => head,
                Ok(None) => {
                    log::debug!("Connection closed by peer");
                    conn.writer.close();
                    return;
                }
                Err(err) => {
                    log::warn!("Dropping connection: {err}");
                    conn.writer.close();
                    return;
                }
            };

            let upgrade = head.headers.contains_key("Upgrade");
            // an upgrade keeps whatever followed its head for the new protocol
            let body = if upgrade {
                Default::default()
            } else {
                conn.reader.buffer_mut().split().freeze()
            };

            let keep_alive = !upgrade
                && head
                    .headers
                    .get("Connection")
                    .is_some_and(|value| value == "keep-alive");
            let (reuse, next) = if keep_alive {
                let (tx, rx) = oneshot::channel();
                (Some(tx), Some(rx))
            } else {
                (None, None)
            };

            log::debug!("{} {} {}", head.method, head.url, head.version);
            let request = HttpRequest::new(head, body, conn, reuse);
            let signal = if upgrade {
                &self.inner.upgrades
            } else {
                &self.inner.requests
            };

            if let Some(mut request) = signal.emit(request).into_unhandled() {
                log::debug!("Unhandled request for {}, closing", request.url());
                request.abort();
                return;
            }

            let Some(next) = next else {
                return;
            };
            match next.await {
                Ok(reused) => {
                    log::debug!("Keep-alive, waiting for the next request");
                    conn = reused;
                }
                // closed while responding
                Err(_) => return,
            }
        }
    }
}

impl std::fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServer")
            .field("options", &self.inner.options)
            .field("requests", &self.inner.requests)
            .field("upgrades", &self.inner.upgrades)
            .finish()
    }
}

/// Reads until a full request head is buffered and consumes it.
///
/// Returns `Ok(None)` when the connection ends first.
async fn read_head(
    reader: &mut ConnReader,
    max_header_size: Option<usize>,
) -> Result<Option<RequestHead>> {
    let mut scanner = HeadScanner::default();
    loop {
        if let Some(end) = scanner.scan(reader.buffer()) {
            let raw = reader.buffer_mut().split_to(end.body_start);
            return Ok(Some(parse_head(&raw[..end.head_len])));
        }

        if max_header_size.is_some_and(|max| reader.buffer().len() > max) {
            return Err(Error::HeaderTooLarge);
        }

        if reader.read().await? == 0 {
            return Ok(None);
        }
    }
}

/// A server accepting connections in the background.
#[derive(Debug)]
pub struct Listening {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl Listening {
    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting new connections. Established connections are not affected.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Waits until the accept loop has stopped.
    pub async fn join(self) {
        if let Err(err) = self.task.await {
            log::error!("Accept loop failed: {err}");
        }
    }
}
