//! # Frame
//!
//! The `frame` module implements WebSocket frames as defined in [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2).
//!
//! ### Frame Binary Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! |     Masking-key (continued)       |          Payload Data      |
//! +-----------------------------------+ - - - - - - - - - - - - - -+
//! :                     Payload Data continued ...                :
//! +---------------------------------------------------------------+
//! ```
//!
//! The payload length uses one of three encodings:
//!
//! - `0..=125`: the 7-bit field holds the length itself.
//! - `126`: the next 2 bytes hold the length (big-endian).
//! - `127`: the next 8 bytes hold the length (big-endian).
//!
//! Clients mask every frame they send; the server never masks its frames.
//!
//! ```rust
//! use yaws::frame::{Frame, OpCode};
//!
//! let text = Frame::text("Hello, WebSocket!");
//! assert!(text.fin);
//! assert_eq!(text.opcode, OpCode::Text);
//!
//! // first fragment of a longer message
//! let first = Frame::text("Hello, ").with_fin(false);
//! let last = Frame::continuation("WebSocket!");
//! assert!(!first.fin && last.fin);
//! ```
use bytes::BytesMut;

/// WebSocket operation code (OpCode) that determines the semantic meaning of a frame.
///
/// The numeric values are defined in [RFC 6455, Section 11.8](https://datatracker.ietf.org/doc/html/rfc6455#section-11.8):
/// - Continuation = 0x0
/// - Text = 0x1
/// - Binary = 0x2
/// - Close = 0x8
/// - Ping = 0x9
/// - Pong = 0xA
///
/// The remaining values are kept as [`OpCode::Reserved`]. They are parsed like any other frame
/// but the server never dispatches them.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    Reserved(u8),
}

impl OpCode {
    /// Returns `true` if the `OpCode` represents a control frame (`Close`, `Ping`, or `Pong`).
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl From<u8> for OpCode {
    /// Interprets the low 4 bits of `value` as an opcode.
    fn from(value: u8) -> Self {
        match value & 0x0F {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            other => Self::Reserved(other),
        }
    }
}

impl From<OpCode> for u8 {
    /// Converts an `OpCode` into its 4-bit wire value.
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
            OpCode::Reserved(value) => value & 0x0F,
        }
    }
}

/// A single WebSocket frame.
///
/// # Fields
/// - `fin`: Final fragment flag. When `true`, indicates this frame completes a message.
/// - `opcode`: Defines the frame type.
/// - `mask`: Optional 32-bit XOR masking key, present on client-to-server frames.
/// - `payload`: Frame payload data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Indicates if this is the final frame in a message.
    pub fin: bool,
    /// The opcode of the frame, defining its type.
    pub opcode: OpCode,
    /// The masking key, if the payload is (or is to be) masked.
    mask: Option<[u8; 4]>,
    /// The payload of the frame.
    pub payload: BytesMut,
}

/// Largest possible frame head: 2 fixed bytes, 8 length bytes and a 4 byte mask.
pub(crate) const MAX_HEAD_SIZE: usize = 14;

impl Frame {
    /// Creates a new WebSocket `Frame`.
    ///
    /// # Parameters
    /// - `fin`: Indicates if this frame is the final fragment in a message.
    /// - `opcode`: The operation code of the frame.
    /// - `mask`: Optional 4-byte masking key, only set on client-to-server frames.
    /// - `payload`: The frame payload data, unmasked.
    pub fn new(
        fin: bool,
        opcode: OpCode,
        mask: Option<[u8; 4]>,
        payload: impl AsRef<[u8]>,
    ) -> Self {
        Self {
            fin,
            opcode,
            mask,
            payload: BytesMut::from(payload.as_ref()),
        }
    }

    /// Creates a final text frame.
    pub fn text(payload: impl AsRef<[u8]>) -> Self {
        Self::new(true, OpCode::Text, None, payload)
    }

    /// Creates a final continuation frame.
    pub fn continuation(payload: impl AsRef<[u8]>) -> Self {
        Self::new(true, OpCode::Continuation, None, payload)
    }

    /// Creates a close frame with an empty payload.
    pub fn close() -> Self {
        Self::new(true, OpCode::Close, None, b"")
    }

    /// Sets the FIN bit.
    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    /// Sets the masking key the encoder applies to the payload.
    pub fn with_mask(mut self, mask: [u8; 4]) -> Self {
        self.mask = Some(mask);
        self
    }

    /// The masking key, if any.
    #[inline]
    pub fn mask_key(&self) -> Option<[u8; 4]> {
        self.mask
    }

    /// Returns whether the frame is masked.
    #[inline(always)]
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Returns the payload as text, replacing invalid UTF-8 sequences.
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Unmasks the payload in place and forgets the key.
    pub(crate) fn unmask(&mut self) {
        if let Some(mask) = self.mask.take() {
            crate::mask::apply_mask(&mut self.payload, mask);
        }
    }

    /// Formats the frame header into the provided `head` buffer and returns its size.
    ///
    /// The size is 2, 4 or 10 bytes, plus 4 when a masking key is set.
    ///
    /// # Panics
    /// Panics if `head` is shorter than [`MAX_HEAD_SIZE`].
    pub(crate) fn fmt_head(&self, head: &mut [u8]) -> usize {
        head[0] = (self.fin as u8) << 7 | u8::from(self.opcode);

        let len = self.payload.len();
        let size = if len < 126 {
            head[1] = len as u8;
            2
        } else if len < 65536 {
            head[1] = 126;
            head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
            4
        } else {
            head[1] = 127;
            head[2..10].copy_from_slice(&(len as u64).to_be_bytes());
            10
        };

        if let Some(mask) = self.mask {
            head[1] |= 0x80;
            head[size..size + 4].copy_from_slice(&mask);
            size + 4
        } else {
            size
        }
    }
}
