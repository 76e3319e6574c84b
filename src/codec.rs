//! # Codec
//!
//! Turns the byte stream of a WebSocket connection into frames and messages, and frames back
//! into bytes.
//!
//! - [`Decoder`] parses one frame at a time off the front of a growing buffer. A frame is only
//!   consumed once the buffer holds all of it (head, mask and payload), so a partial frame leaves
//!   the buffer untouched until more bytes arrive.
//! - [`Reassembler`] joins fragmented messages back together.
//! - [`Encoder`] serializes frames, masking the payload when the frame carries a key.
//!
//! Both codec halves implement the `tokio_util` codec traits, so they can be driven by hand over a
//! [`BytesMut`] or plugged into a `Framed` stream.
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec;

use crate::{
    frame::{Frame, OpCode, MAX_HEAD_SIZE},
    Error, Result,
};

/// The decoded head of a frame.
struct Head {
    fin: bool,
    opcode: OpCode,
    mask: Option<[u8; 4]>,
    /// Bytes taken by the head, including the extended length and the mask.
    size: usize,
    payload_len: usize,
}

/// Parses the frame head at the front of `src` without consuming anything.
///
/// Returns `Ok(None)` when `src` does not hold the full head yet. With `always_masked` the
/// 4-byte key is read whatever the mask bit says.
fn parse_head(
    src: &[u8],
    max_payload_read: Option<usize>,
    always_masked: bool,
) -> Result<Option<Head>> {
    if src.len() < 2 {
        return Ok(None);
    }

    let fin = src[0] & 0b1000_0000 != 0;
    let opcode = OpCode::from(src[0]);
    let masked = always_masked || src[1] & 0b1000_0000 != 0;
    let length_code = src[1] & 0x7F;

    let extra = match length_code {
        126 => 2,
        127 => 8,
        _ => 0,
    };
    let size = 2 + extra + masked as usize * 4;
    if src.len() < size {
        return Ok(None);
    }

    let payload_len = match extra {
        0 => u64::from(length_code),
        2 => u64::from(u16::from_be_bytes([src[2], src[3]])),
        _ => {
            let mut len = [0u8; 8];
            len.copy_from_slice(&src[2..10]);
            u64::from_be_bytes(len)
        }
    };
    // lengths that do not fit the address space can never be buffered
    let payload_len = usize::try_from(payload_len).map_err(|_| Error::FrameTooLarge)?;
    if max_payload_read.is_some_and(|max| payload_len > max) {
        return Err(Error::FrameTooLarge);
    }

    let mask = masked.then(|| {
        let at = 2 + extra;
        [src[at], src[at + 1], src[at + 2], src[at + 3]]
    });

    Ok(Some(Head {
        fin,
        opcode,
        mask,
        size,
        payload_len,
    }))
}

/// A decoder for WebSocket frames.
///
/// Decoded frames are returned unmasked. The server side ignores the mask bit: every client
/// frame carries a 4-byte key right after the length. [`Decoder::client`] reads frames the
/// other way round, where the key is present only when the mask bit is set.
#[derive(Debug, Default, Clone)]
pub struct Decoder {
    /// Maximum allowed payload of a single frame.
    max_payload_read: Option<usize>,
    /// Read the key only when the mask bit is set.
    client: bool,
}

impl Decoder {
    /// Creates a server-side `Decoder`, optionally limiting frame payloads to
    /// `max_payload_read` bytes.
    pub fn new(max_payload_read: Option<usize>) -> Self {
        Self {
            max_payload_read,
            client: false,
        }
    }

    /// Creates a decoder for frames sent by a server, as read by a client.
    pub fn client() -> Self {
        Self {
            max_payload_read: None,
            client: true,
        }
    }
}

impl codec::Decoder for Decoder {
    type Item = Frame;
    type Error = Error;

    /// Decodes the frame at the front of `src`.
    ///
    /// # Returns
    /// - `Ok(Some(Frame))`: a complete frame was removed from the front of `src`.
    /// - `Ok(None)`: `src` does not hold a complete frame yet; nothing was consumed.
    /// - `Err(Error::FrameTooLarge)`: the announced payload exceeds the configured limit or
    ///   the address space.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some(head) = parse_head(src, self.max_payload_read, !self.client)? else {
            return Ok(None);
        };

        // the buffer grows as payload bytes arrive, never up front from the announced length
        let total = head
            .size
            .checked_add(head.payload_len)
            .ok_or(Error::FrameTooLarge)?;
        if src.len() < total {
            return Ok(None);
        }

        src.advance(head.size);
        let payload = src.split_to(head.payload_len);

        let mut frame = Frame::new(head.fin, head.opcode, head.mask, b"");
        frame.payload = payload;
        frame.unmask();

        Ok(Some(frame))
    }
}

/// WebSocket frame encoder.
///
/// Frames built by the server carry no mask and are written as-is. A frame with a masking key
/// (as built by clients and tests) has its payload masked on the way out.
#[derive(Debug, Default, Clone, Copy)]
pub struct Encoder;

impl codec::Encoder<Frame> for Encoder {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        let mut head = [0; MAX_HEAD_SIZE];
        let size = frame.fmt_head(&mut head[..]);

        dst.reserve(size + frame.payload.len());
        dst.extend_from_slice(&head[..size]);

        let start = dst.len();
        dst.extend_from_slice(&frame.payload);
        if let Some(mask) = frame.mask_key() {
            crate::mask::apply_mask(&mut dst[start..], mask);
        }

        Ok(())
    }
}

/// A complete message, possibly reassembled from several frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Opcode of the frame that started the message.
    pub opcode: OpCode,
    pub payload: Bytes,
}

/// Reassembles fragmented messages.
///
/// A frame with FIN set and a non-continuation opcode is a complete message on its own, even
/// while a fragmented message is in progress (this is how control frames interleave with
/// fragments). Any other frame is accumulated: the first one fixes the message opcode and the
/// first one with FIN set completes the message.
#[derive(Debug, Default)]
pub struct Reassembler {
    /// Opcode of the fragmented message in progress.
    fragment: Option<OpCode>,
    /// Payload accumulated so far.
    accumulated: BytesMut,
    /// Maximum size of a reassembled message.
    max_read_buffer: Option<usize>,
}

impl Reassembler {
    pub fn new(max_read_buffer: Option<usize>) -> Self {
        Self {
            max_read_buffer,
            ..Default::default()
        }
    }

    /// Returns `true` while a fragmented message is incomplete.
    pub fn in_progress(&self) -> bool {
        self.fragment.is_some() || !self.accumulated.is_empty()
    }

    /// Feeds one decoded frame.
    ///
    /// # Returns
    /// - `Ok(Some(Message))` when `frame` completes a message.
    /// - `Ok(None)` when more fragments are needed, or when a final continuation frame arrives
    ///   without a message to continue (such frames carry no opcode and are dropped).
    /// - `Err(Error::FrameTooLarge)` when the reassembled message exceeds the configured limit.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>> {
        if frame.fin && frame.opcode != OpCode::Continuation {
            return Ok(Some(Message {
                opcode: frame.opcode,
                payload: frame.payload.freeze(),
            }));
        }

        if self
            .max_read_buffer
            .is_some_and(|max| self.accumulated.len() + frame.payload.len() > max)
        {
            return Err(Error::FrameTooLarge);
        }

        if self.fragment.is_none() && frame.opcode != OpCode::Continuation {
            self.fragment = Some(frame.opcode);
        }
        self.accumulated.extend_from_slice(&frame.payload);

        if !frame.fin {
            return Ok(None);
        }

        let payload = std::mem::take(&mut self.accumulated).freeze();
        match self.fragment.take() {
            Some(opcode) => Ok(Some(Message { opcode, payload })),
            None => {
                log::debug!("Dropping continuation frame without a message to continue");
                Ok(None)
            }
        }
    }
}
