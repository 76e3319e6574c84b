//! # Transport
//!
//! Adapts any tokio byte stream into the two handles the HTTP and WebSocket layers work with:
//!
//! - [`ConnReader`]: owns the read half and the accumulation buffer. Reading requires `&mut`,
//!   so at most one read per connection is ever in flight.
//! - [`ConnWriter`]: a cheap handle that queues writes to a per-connection writer task. Each
//!   write may carry a completion callback that receives the number of bytes written or the
//!   I/O error that ended the connection. Writes complete in submission order.
//!
//! Closing a connection is queued behind the writes already submitted, so pending data is
//! flushed before the socket is shut down. Once the writer task is gone, reads report EOF and
//! new writes fail with [`Error::ConnectionClosed`].
use std::io;

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Minimum spare capacity reserved in the read buffer before each read.
const READ_CHUNK: usize = 4096;

/// Completion callback for a queued write.
pub type OnWritten = Box<dyn FnOnce(io::Result<usize>) + Send>;

enum WriteOp {
    Data {
        bytes: Bytes,
        on_written: Option<OnWritten>,
    },
    Close,
}

/// Splits `io` into a reader and a writer and spawns the writer task.
///
/// Must be called from within a tokio runtime.
pub fn connect<S>(io: S) -> Connection
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(io);
    let closed = CancellationToken::new();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(write_loop(write_half, rx, closed.clone()));

    Connection {
        reader: ConnReader {
            io: Box::new(read_half),
            buf: BytesMut::with_capacity(READ_CHUNK),
            closed: closed.clone(),
        },
        writer: ConnWriter { tx, closed },
    }
}

/// Both halves of one connection, moved as a unit between owners.
pub struct Connection {
    pub reader: ConnReader,
    pub writer: ConnWriter,
}

/// The reading side of a connection.
pub struct ConnReader {
    io: Box<dyn AsyncRead + Send + Unpin>,
    buf: BytesMut,
    closed: CancellationToken,
}

impl ConnReader {
    /// Reads more bytes into the buffer and returns how many arrived.
    ///
    /// `Ok(0)` means the peer closed its side or the connection was closed locally.
    pub async fn read(&mut self) -> io::Result<usize> {
        self.buf.reserve(READ_CHUNK);
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Ok(0),
            res = self.io.read_buf(&mut self.buf) => res,
        }
    }

    /// Bytes received but not yet consumed.
    #[inline]
    pub fn buffer(&self) -> &BytesMut {
        &self.buf
    }

    /// Mutable access to the unconsumed bytes, used by the parsers to consume from the front.
    #[inline]
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Returns `true` once the connection has been closed locally.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// The writing side of a connection.
#[derive(Clone)]
pub struct ConnWriter {
    tx: mpsc::UnboundedSender<WriteOp>,
    closed: CancellationToken,
}

impl ConnWriter {
    /// Queues `bytes` for writing. `on_written` runs on the writer task once the bytes were
    /// flushed, or with the error that aborted the connection.
    ///
    /// Fails without running `on_written` if the connection is already closed.
    pub fn write<F>(&self, bytes: impl Into<Bytes>, on_written: F) -> Result<()>
    where
        F: FnOnce(io::Result<usize>) + Send + 'static,
    {
        self.send(WriteOp::Data {
            bytes: bytes.into(),
            on_written: Some(Box::new(on_written)),
        })
    }

    /// Queues `bytes` for writing without a completion callback.
    pub fn write_untracked(&self, bytes: impl Into<Bytes>) -> Result<()> {
        self.send(WriteOp::Data {
            bytes: bytes.into(),
            on_written: None,
        })
    }

    /// Shuts the connection down after every write queued so far has been flushed.
    pub fn close(&self) {
        let _ = self.send(WriteOp::Close);
    }

    /// Returns `true` once the writer task has shut the connection down.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Waits until the connection has been shut down.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    fn send(&self, op: WriteOp) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(Error::ConnectionClosed);
        }
        self.tx.send(op).map_err(|_| Error::ConnectionClosed)
    }
}

async fn write_loop<W>(
    mut io: W,
    mut rx: mpsc::UnboundedReceiver<WriteOp>,
    closed: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(op) = rx.recv().await {
        match op {
            WriteOp::Data { bytes, on_written } => {
                let res = match io.write_all(&bytes).await {
                    Ok(()) => io.flush().await.map(|_| bytes.len()),
                    Err(err) => Err(err),
                };

                let failed = res.is_err();
                if let Err(err) = &res {
                    log::error!("Error writing to socket: {err}");
                }
                if let Some(on_written) = on_written {
                    on_written(res);
                }
                if failed {
                    break;
                }
            }
            WriteOp::Close => break,
        }
    }

    // anything still queued is dropped without running its callback
    rx.close();
    closed.cancel();
    let _ = io.shutdown().await;
    log::debug!("Connection closed");
}
