use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc, Mutex, PoisonError,
};

use bytes::BytesMut;
use tokio_util::codec::{Decoder as _, Encoder as _};

use super::ReadyState;
use crate::{
    codec::{Decoder, Encoder, Message, Reassembler},
    frame::{Frame, OpCode},
    signal::Signal,
    transport::{ConnReader, ConnWriter, Connection},
    Error, Options, Result,
};

/// Server side of an upgraded WebSocket connection.
///
/// `WebSocket` is a cheap handle: clones refer to the same connection, which makes it easy to
/// reply from within a message listener.
///
/// Incoming text messages are emitted on [`messages`](Self::messages). Once the connection is
/// gone, either through the close handshake or because the transport failed, the socket moves
/// to [`ReadyState::Closed`] and [`closes`](Self::closes) fires exactly once.
///
/// ```no_run
/// # fn on_accept(ws: yaws::WebSocket) {
/// use yaws::Dispatch;
///
/// let echo = ws.clone();
/// ws.messages().on(move |text| {
///     let _ = echo.send(&text);
///     Dispatch::Handled
/// });
/// ws.closes().on(|()| {
///     log::debug!("bye");
///     Dispatch::Handled
/// });
/// ws.start();
/// # }
/// ```
#[derive(Clone)]
pub struct WebSocket {
    inner: Arc<Inner>,
}

struct Inner {
    writer: ConnWriter,
    state: AtomicU8,
    messages: Signal<String>,
    closes: Signal<()>,
    /// The read side, parked until `start`.
    pending: Mutex<Option<(ConnReader, Options)>>,
}

impl WebSocket {
    pub(crate) fn new(conn: Connection, options: &Options) -> Self {
        let Connection { reader, writer } = conn;
        Self {
            inner: Arc::new(Inner {
                writer,
                state: AtomicU8::new(ReadyState::Connecting as u8),
                messages: Signal::new(),
                closes: Signal::new(),
                pending: Mutex::new(Some((reader, options.clone()))),
            }),
        }
    }

    /// Text messages received from the client.
    pub fn messages(&self) -> &Signal<String> {
        &self.inner.messages
    }

    /// Fires once when the connection is closed.
    pub fn closes(&self) -> &Signal<()> {
        &self.inner.closes
    }

    pub fn ready_state(&self) -> ReadyState {
        self.inner.ready_state()
    }

    /// Starts reading from the client.
    ///
    /// Listeners registered before this call see every message; bytes the client sent right
    /// after its handshake are processed first. Calling `start` again does nothing.
    pub fn start(&self) {
        let pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some((reader, options)) = pending {
            let _ = self.inner.state.compare_exchange(
                ReadyState::Connecting as u8,
                ReadyState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            tokio::spawn(read_loop(Arc::clone(&self.inner), reader, options));
        }
    }

    /// Sends a text message.
    pub fn send(&self, text: &str) -> Result<()> {
        match self.ready_state() {
            ReadyState::Connecting | ReadyState::Open => self.inner.send_frame(Frame::text(text)),
            state => Err(Error::InvalidState(state)),
        }
    }

    /// Starts the close handshake.
    ///
    /// A close frame is sent and the socket moves to [`ReadyState::Closing`]. The connection is
    /// closed once the client confirms with its own close frame.
    pub fn close(&self) -> Result<()> {
        let state = &self.inner.state;
        let mut current = state.load(Ordering::Acquire);
        loop {
            match ReadyState::from(current) {
                ReadyState::Connecting | ReadyState::Open => {}
                other => return Err(Error::InvalidState(other)),
            }
            match state.compare_exchange(
                current,
                ReadyState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        self.inner.send_frame(Frame::close())
    }
}

impl std::fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocket")
            .field("ready_state", &self.ready_state())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn ready_state(&self) -> ReadyState {
        ReadyState::from(self.state.load(Ordering::Acquire))
    }

    fn send_frame(self: &Arc<Self>, frame: Frame) -> Result<()> {
        let mut buf = BytesMut::new();
        Encoder.encode(frame, &mut buf)?;

        let inner = Arc::clone(self);
        let res = self.writer.write(buf, move |res| {
            if let Err(err) = res {
                log::error!("Error writing frame: {err}");
                inner.terminate();
            }
        });
        if res.is_err() {
            self.terminate();
        }
        res
    }

    /// Handles a complete message. Returns `false` once the connection is done.
    fn on_message(self: &Arc<Self>, message: Message) -> bool {
        match message.opcode {
            OpCode::Text => {
                let text = String::from_utf8_lossy(&message.payload).into_owned();
                let _ = self.messages.emit(text);
                true
            }
            OpCode::Close => {
                if self.ready_state() == ReadyState::Open {
                    // confirm, queued ahead of the shutdown
                    let _ = self.send_frame(Frame::close());
                }
                self.terminate();
                false
            }
            opcode => {
                log::debug!("Ignoring {opcode:?} message");
                true
            }
        }
    }

    /// Moves to `Closed`, fires `close` and shuts the connection down, once.
    fn terminate(&self) {
        let previous = self.state.swap(ReadyState::Closed as u8, Ordering::AcqRel);
        if previous == ReadyState::Closed as u8 {
            return;
        }

        log::debug!("WebSocket closed");
        let _ = self.closes.emit(());
        self.writer.close();

        // listeners often hold a handle to this socket
        self.messages.clear();
        self.closes.clear();
    }
}

async fn read_loop(inner: Arc<Inner>, mut reader: ConnReader, options: Options) {
    let mut decoder = Decoder::new(options.max_payload_read);
    let mut reassembler = Reassembler::new(options.max_read_buffer);

    loop {
        loop {
            let message = decoder
                .decode(reader.buffer_mut())
                .and_then(|frame| match frame {
                    Some(frame) => reassembler.push(frame).map(Some),
                    None => Ok(None),
                });

            match message {
                Ok(Some(Some(message))) => {
                    if !inner.on_message(message) {
                        return;
                    }
                }
                Ok(Some(None)) => {}
                Ok(None) => break,
                Err(err) => {
                    log::warn!("Closing WebSocket: {err}");
                    inner.terminate();
                    return;
                }
            }
        }

        match reader.read().await {
            Ok(0) => {
                log::debug!("WebSocket connection ended");
                inner.terminate();
                return;
            }
            Ok(_) => {}
            Err(err) => {
                log::error!("Error reading from socket: {err}");
                inner.terminate();
                return;
            }
        }
    }
}
