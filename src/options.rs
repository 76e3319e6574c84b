/// Backlog handed to `listen(2)` when none is configured.
pub const DEFAULT_BACKLOG: u32 = 50;

/// Configuration shared by the HTTP server and the WebSockets it upgrades.
///
/// The defaults impose no limits: header blocks, frames and fragmented messages may grow
/// as large as the peer makes them. Use the `with_*` methods to bound them.
///
/// ```rust
/// use yaws::Options;
///
/// let options = Options::default()
///     .with_max_header_size(16 * 1024)
///     .with_max_payload_read(1024 * 1024)
///     .with_max_read_buffer(2 * 1024 * 1024);
/// ```
#[derive(Debug, Clone)]
pub struct Options {
    /// Pending connection queue length for the listening socket.
    pub backlog: u32,

    /// Whether accepted sockets set `TCP_NODELAY`.
    pub no_delay: bool,

    /// Largest request head (request line plus headers) accepted before the connection is
    /// dropped. `None` waits forever for the terminating blank line.
    pub max_header_size: Option<usize>,

    /// Largest payload accepted in a single WebSocket frame.
    pub max_payload_read: Option<usize>,

    /// Largest message accepted while reassembling fragmented WebSocket frames.
    pub max_read_buffer: Option<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            backlog: DEFAULT_BACKLOG,
            no_delay: true,
            max_header_size: None,
            max_payload_read: None,
            max_read_buffer: None,
        }
    }
}

impl Options {
    /// Sets the listen backlog.
    pub fn with_backlog(self, backlog: u32) -> Self {
        Self { backlog, ..self }
    }

    /// Disables `TCP_NODELAY` on accepted sockets.
    pub fn with_nagle(self) -> Self {
        Self {
            no_delay: false,
            ..self
        }
    }

    /// Bounds the size of a request head.
    pub fn with_max_header_size(self, size: usize) -> Self {
        Self {
            max_header_size: Some(size),
            ..self
        }
    }

    /// Bounds the payload size of a single incoming frame.
    pub fn with_max_payload_read(self, size: usize) -> Self {
        Self {
            max_payload_read: Some(size),
            ..self
        }
    }

    /// Bounds the size of a reassembled fragmented message.
    pub fn with_max_read_buffer(self, size: usize) -> Self {
        Self {
            max_read_buffer: Some(size),
            ..self
        }
    }
}
