//! Response head formatting, chunk framing and write tracking.
use std::sync::{Arc, Mutex, PoisonError};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::oneshot;

use crate::transport::Connection;

/// Protocol version written on every status line.
pub(crate) const VERSION: &str = "HTTP/1.1";

/// The zero-length chunk that terminates a chunked body.
pub(crate) const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Returns the reason phrase for `status`, or `"Unknown"`.
pub fn reason(status: u16) -> &'static str {
    match status {
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        301 => "Moved Permanently",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        413 => "Request Entity Too Large",
        414 => "Request-URI Too Long",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Ordered response headers.
///
/// Lookups ignore ASCII case. Setting an existing header replaces its value in place.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResponseHeaders(Vec<(String, String)>);

impl ResponseHeaders {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(key, _)| key.eq_ignore_ascii_case(&name)) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `true` when the body is sent with chunked transfer-encoding.
    pub fn is_chunked(&self) -> bool {
        self.get("Transfer-Encoding")
            .is_some_and(|value| value.eq_ignore_ascii_case("chunked"))
    }
}

impl<K, V> FromIterator<(K, V)> for ResponseHeaders
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::default();
        for (name, value) in iter {
            headers.set(name, value);
        }
        headers
    }
}

/// Serializes a status line and headers, followed by the blank line.
pub(crate) fn format_head(status: u16, headers: &ResponseHeaders) -> Bytes {
    let mut buf = BytesMut::with_capacity(64 + headers.len() * 32);
    buf.put_slice(VERSION.as_bytes());
    buf.put_slice(format!(" {status} {}", reason(status)).as_bytes());
    for (name, value) in headers.iter() {
        buf.put_slice(b"\r\n");
        buf.put_slice(name.as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
    }
    buf.put_slice(b"\r\n\r\n");
    buf.freeze()
}

/// Wraps `data` into one chunk: uppercase hex length, CRLF, data, CRLF.
pub(crate) fn chunk(data: &[u8]) -> Bytes {
    let size = format!("{:X}\r\n", data.len());
    let mut buf = BytesMut::with_capacity(size.len() + data.len() + 2);
    buf.put_slice(size.as_bytes());
    buf.put_slice(data);
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// What happens to the connection once the response is complete.
pub(crate) struct Release {
    pub conn: Connection,
    /// Hands the connection back to the server loop for the next request.
    pub reuse: Option<oneshot::Sender<Connection>>,
}

impl Release {
    /// Returns the connection to the server loop, or shuts it down when the request was not
    /// keep-alive or the loop is gone.
    pub fn run(self) {
        match self.reuse {
            Some(reuse) => {
                if let Err(conn) = reuse.send(self.conn) {
                    conn.writer.close();
                }
            }
            None => self.conn.writer.close(),
        }
    }
}

#[derive(Default)]
struct Progress {
    /// Bytes handed to the transport and not yet confirmed written.
    remaining: usize,
    finished: bool,
    failed: bool,
    release: Option<Release>,
}

/// Tracks outstanding response bytes and releases the connection once the response is finished
/// and every byte was written.
#[derive(Clone, Default)]
pub(crate) struct Tracker(Arc<Mutex<Progress>>);

impl Tracker {
    /// Accounts for `len` bytes about to be written.
    pub fn submit(&self, len: usize) {
        self.lock().remaining += len;
    }

    /// Accounts for a completed write.
    pub fn written(&self, res: std::io::Result<usize>) {
        let release = {
            let mut progress = self.lock();
            match res {
                Ok(len) => {
                    progress.remaining = progress.remaining.saturating_sub(len);
                    progress.take_if_done()
                }
                Err(_) => {
                    // the writer already tore the connection down
                    progress.failed = true;
                    progress.release.take();
                    None
                }
            }
        };
        if let Some(release) = release {
            release.run();
        }
    }

    /// Marks the response finished and parks the connection until the remaining bytes are out.
    pub fn finish(&self, release: Release) {
        let ready = {
            let mut progress = self.lock();
            progress.finished = true;
            if progress.failed {
                None
            } else {
                progress.release = Some(release);
                progress.take_if_done()
            }
        };
        if let Some(release) = ready {
            release.run();
        }
    }

    /// Bytes still in flight.
    pub fn remaining(&self) -> usize {
        self.lock().remaining
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Progress> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Progress {
    fn take_if_done(&mut self) -> Option<Release> {
        if self.finished && self.remaining == 0 {
            self.release.take()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_table() {
        assert_eq!(reason(101), "Switching Protocols");
        assert_eq!(reason(200), "OK");
        assert_eq!(reason(404), "Not Found");
        assert_eq!(reason(414), "Request-URI Too Long");
        assert_eq!(reason(418), "Unknown");
    }

    #[test]
    fn test_format_head() {
        let headers: ResponseHeaders = [("Content-Type", "text/plain"), ("Content-Length", "5")]
            .into_iter()
            .collect();
        let head = format_head(200, &headers);
        assert_eq!(
            &head[..],
            b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\n"
        );
    }

    #[test]
    fn test_format_head_unknown_status() {
        let head = format_head(299, &ResponseHeaders::default());
        assert_eq!(&head[..], b"HTTP/1.1 299 Unknown\r\n\r\n");
    }

    #[test]
    fn test_chunk_uses_uppercase_hex() {
        assert_eq!(&chunk(b"hello")[..], b"5\r\nhello\r\n");
        assert_eq!(&chunk(&[b'x'; 26])[..4], b"1A\r\n");
        assert_eq!(&chunk(&[b'x'; 255])[..4], b"FF\r\n");
    }

    #[test]
    fn test_headers_replace_in_place() {
        let mut headers: ResponseHeaders =
            [("Connection", "close"), ("X-Other", "1")].into_iter().collect();
        headers.set("connection", "keep-alive");

        let collected: Vec<_> = headers.iter().collect();
        assert_eq!(collected, vec![("Connection", "keep-alive"), ("X-Other", "1")]);
        assert!(!headers.is_chunked());

        headers.set("Transfer-Encoding", "Chunked");
        assert!(headers.is_chunked());
    }
}
