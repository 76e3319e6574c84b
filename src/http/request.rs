use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::oneshot;

use super::{
    content::{mime_type, ContentSource},
    parse::RequestHead,
    response::{chunk, format_head, Release, ResponseHeaders, Tracker, LAST_CHUNK},
};
use crate::{transport::Connection, Error, Result};

/// Lifecycle of an [`HttpRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Parsed, no response sent yet.
    Open,
    /// The response head was written.
    ResponseStarted,
    /// The response finished, the request was closed, or its connection moved elsewhere.
    Closed,
}

/// A parsed HTTP request, which is also the writer for its response.
///
/// The request owns its connection until the response is finished with [`end`](Self::end) or
/// [`end_with`](Self::end_with), or until it is closed. Once every response byte has been written
/// the connection is either handed back to the server for the next request (`Connection:
/// keep-alive`) or shut down.
///
/// Dropping a request that still owns its connection shuts the connection down.
pub struct HttpRequest {
    method: String,
    url: String,
    version: String,
    headers: HashMap<String, String>,
    body: Bytes,
    conn: Option<Connection>,
    reuse: Option<oneshot::Sender<Connection>>,
    state: RequestState,
    response_headers: ResponseHeaders,
    tracker: Tracker,
}

impl std::fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("version", &self.version)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl HttpRequest {
    pub(crate) fn new(
        head: RequestHead,
        body: Bytes,
        conn: Connection,
        reuse: Option<oneshot::Sender<Connection>>,
    ) -> Self {
        Self {
            method: head.method,
            url: head.url,
            version: head.version,
            headers: head.headers,
            body,
            conn: Some(conn),
            reuse,
            state: RequestState::Open,
            response_headers: ResponseHeaders::default(),
            tracker: Tracker::default(),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The protocol version from the request line, e.g. `HTTP/1.1`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Request headers. Names are case-sensitive.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Bytes received after the request head.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns `true` if the client asked for `Connection: keep-alive`.
    pub fn is_keep_alive(&self) -> bool {
        self.header("Connection") == Some("keep-alive")
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Headers of the response, as sent by [`write_head`](Self::write_head).
    pub fn response_headers(&self) -> &ResponseHeaders {
        &self.response_headers
    }

    /// Response bytes handed to the transport and not yet written.
    pub fn bytes_remaining(&self) -> usize {
        self.tracker.remaining()
    }

    /// Writes the status line and `headers`.
    ///
    /// For keep-alive requests `Connection: keep-alive` is set, and a response without
    /// `Content-Length` switches to chunked transfer-encoding.
    pub fn write_head<I, K, V>(&mut self, status: u16, headers: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        match self.state {
            RequestState::Open => {}
            RequestState::ResponseStarted => return Err(Error::HeadersAlreadySent),
            RequestState::Closed => return Err(Error::Detached),
        }

        let mut headers: ResponseHeaders = headers.into_iter().collect();
        if self.is_keep_alive() {
            headers.set("Connection", "keep-alive");
            if !headers.contains("Content-Length") {
                headers.set("Transfer-Encoding", "chunked");
            }
        }

        let head = format_head(status, &headers);
        self.response_headers = headers;
        self.state = RequestState::ResponseStarted;
        self.send(head)
    }

    /// Writes part of the body, as one chunk when the response is chunked.
    ///
    /// Empty writes are skipped, since an empty chunk would end a chunked body.
    pub fn write(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        match self.state {
            RequestState::ResponseStarted => {}
            RequestState::Open => return Err(Error::HeadersNotSent),
            RequestState::Closed => return Err(Error::Detached),
        }

        let data = data.as_ref();
        if data.is_empty() {
            return Ok(());
        }
        if self.response_headers.is_chunked() {
            self.send(chunk(data))
        } else {
            self.send(Bytes::copy_from_slice(data))
        }
    }

    /// Finishes the response.
    ///
    /// A chunked body gets its terminating chunk. The connection is released once every byte is
    /// written. Calling `end` on a finished or closed request does nothing.
    pub fn end(&mut self) -> Result<()> {
        if self.state == RequestState::Closed {
            return Ok(());
        }
        if self.response_headers.is_chunked() {
            self.send(Bytes::from_static(LAST_CHUNK))?;
        }
        self.finish();
        Ok(())
    }

    /// Writes `data` and finishes the response.
    pub fn end_with(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        if self.state == RequestState::Closed {
            return Ok(());
        }
        self.write(data)?;
        self.end()
    }

    /// Responds with the resource at `url` fetched from `source`.
    ///
    /// The content type is the one reported by the source, or else derived from the extension of
    /// `url`. `Content-Length` is set to the size of the fetched body.
    pub async fn serve_url<S>(&mut self, source: &S, url: &str) -> Result<()>
    where
        S: ContentSource + ?Sized,
    {
        let content = source.fetch(url).await;
        let content_type = content
            .content_type
            .unwrap_or_else(|| mime_type(url).to_owned());

        log::debug!("Served {url} ({})", content.status);
        self.write_head(
            content.status,
            [
                ("Content-Type", content_type),
                ("Content-Length", content.body.len().to_string()),
            ],
        )?;
        self.end_with(content.body)
    }

    /// Stops using the connection.
    ///
    /// A keep-alive connection is handed back to the server, which reads the next request from
    /// it; any other connection is shut down once pending writes are flushed.
    pub fn close(&mut self) {
        self.state = RequestState::Closed;
        if let Some(conn) = self.conn.take() {
            Release {
                conn,
                reuse: self.reuse.take(),
            }
            .run();
        }
    }

    /// Shuts the connection down, keep-alive or not.
    pub(crate) fn abort(&mut self) {
        self.state = RequestState::Closed;
        self.reuse = None;
        if let Some(conn) = self.conn.take() {
            conn.writer.close();
        }
    }

    /// Moves the connection out, leaving the request closed.
    pub(crate) fn detach(&mut self) -> Option<Connection> {
        self.state = RequestState::Closed;
        self.reuse = None;
        self.conn.take()
    }

    fn finish(&mut self) {
        self.state = RequestState::Closed;
        if let Some(conn) = self.conn.take() {
            self.tracker.finish(Release {
                conn,
                reuse: self.reuse.take(),
            });
        }
    }

    fn send(&mut self, bytes: Bytes) -> Result<()> {
        let conn = self.conn.as_ref().ok_or(Error::Detached)?;

        self.tracker.submit(bytes.len());
        let tracker = self.tracker.clone();
        let res = conn.writer.write(bytes, move |res| {
            if let Err(err) = &res {
                log::error!("Error writing response: {err}");
            }
            tracker.written(res);
        });

        if res.is_err() {
            self.abort();
        }
        res
    }
}

impl Drop for HttpRequest {
    fn drop(&mut self) {
        if self.conn.is_some() {
            log::debug!("{} {} dropped without a response", self.method, self.url);
            self.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::content::Content;
    use crate::transport;
    use futures::future::BoxFuture;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    fn request(
        headers: &[(&str, &str)],
    ) -> (HttpRequest, DuplexStream, oneshot::Receiver<Connection>) {
        let (local, remote) = duplex(64 * 1024);
        let head = RequestHead {
            method: "GET".into(),
            url: "/index.html".into(),
            version: "HTTP/1.1".into(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        // the server only offers the connection back for keep-alive requests
        let (tx, rx) = oneshot::channel();
        let reuse = head.headers.get("Connection").is_some_and(|v| v == "keep-alive").then_some(tx);
        let req = HttpRequest::new(head, Bytes::new(), transport::connect(local), reuse);
        (req, remote, rx)
    }

    async fn read_all(mut remote: DuplexStream) -> String {
        let mut out = Vec::new();
        remote.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_plain_response_closes_connection() {
        let (mut req, remote, mut reuse) = request(&[]);
        req.write_head(200, [("Content-Type", "text/plain")]).unwrap();
        req.end_with("hello").unwrap();

        assert_eq!(
            read_all(remote).await,
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nhello"
        );
        assert_eq!(req.state(), RequestState::Closed);
        assert!(reuse.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_keep_alive_response_is_chunked() {
        let (mut req, mut remote, reuse) = request(&[("Connection", "keep-alive")]);
        req.write_head(200, [("Content-Type", "text/plain")]).unwrap();
        req.write("hello").unwrap();
        req.write("").unwrap();
        req.end().unwrap();

        let conn = reuse.await.unwrap();
        assert!(!conn.writer.is_closed());
        assert_eq!(req.bytes_remaining(), 0);

        let expected = "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nConnection: keep-alive\r\n\
                        Transfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n";
        let mut out = vec![0u8; expected.len()];
        remote.read_exact(&mut out).await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_keep_alive_with_content_length_is_not_chunked() {
        let (mut req, mut remote, reuse) = request(&[("Connection", "keep-alive")]);
        req.write_head(200, [("Content-Length", "2")]).unwrap();
        req.end_with("ok").unwrap();
        reuse.await.unwrap();

        let expected = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: keep-alive\r\n\r\nok";
        let mut out = vec![0u8; expected.len()];
        remote.read_exact(&mut out).await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_end_is_idempotent() {
        let (mut req, remote, _reuse) = request(&[]);
        req.write_head(204, Vec::<(String, String)>::new()).unwrap();
        req.end().unwrap();
        req.end().unwrap();
        req.end_with("ignored").unwrap();

        assert_eq!(read_all(remote).await, "HTTP/1.1 204 Unknown\r\n\r\n");
    }

    #[tokio::test]
    async fn test_misuse_errors() {
        let (mut req, _remote, _reuse) = request(&[]);
        assert!(matches!(req.write("early"), Err(Error::HeadersNotSent)));

        req.write_head(200, [("Content-Length", "0")]).unwrap();
        assert!(matches!(
            req.write_head(200, [("Content-Length", "0")]),
            Err(Error::HeadersAlreadySent)
        ));

        req.end().unwrap();
        assert!(matches!(req.write("late"), Err(Error::Detached)));
    }

    #[tokio::test]
    async fn test_close_keep_alive_detaches() {
        let (mut req, _remote, reuse) = request(&[("Connection", "keep-alive")]);
        req.close();
        assert_eq!(req.state(), RequestState::Closed);

        let conn = reuse.await.unwrap();
        assert!(!conn.writer.is_closed());
    }

    #[tokio::test]
    async fn test_drop_without_response_closes() {
        let (req, remote, reuse) = request(&[("Connection", "keep-alive")]);
        drop(req);

        assert!(reuse.await.is_err());
        assert_eq!(read_all(remote).await, "");
    }

    struct Static;

    impl ContentSource for Static {
        fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Content> {
            Box::pin(async move {
                match url {
                    "/style.css" => Content::ok(Bytes::from_static(b"body{}")),
                    _ => Content::not_found(),
                }
            })
        }
    }

    #[tokio::test]
    async fn test_serve_url() {
        let (mut req, remote, _reuse) = request(&[]);
        req.serve_url(&Static, "/style.css").await.unwrap();

        assert_eq!(
            read_all(remote).await,
            "HTTP/1.1 200 OK\r\nContent-Type: text/css\r\nContent-Length: 6\r\n\r\nbody{}"
        );
    }

    #[tokio::test]
    async fn test_serve_url_not_found() {
        let (mut req, remote, _reuse) = request(&[]);
        req.serve_url(&Static, "/missing.png").await.unwrap();

        assert_eq!(
            read_all(remote).await,
            "HTTP/1.1 404 Not Found\r\nContent-Type: image/png\r\nContent-Length: 0\r\n\r\n"
        );
    }
}
