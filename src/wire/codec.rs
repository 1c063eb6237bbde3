//! OP_MSG codec for tokio_util.
//!
//! Frames are self-delimiting: the first four bytes hold the total length
//! of the message, little-endian, including those four bytes.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::error::WireError;
use super::message::{OpMsg, DEFAULT_MAX_MESSAGE_SIZE, MIN_MESSAGE_SIZE};

/// OP_MSG message codec.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    /// Maximum frame size accepted in either direction
    max_message_size: usize,
}

impl MessageCodec {
    /// Create a new codec with the default size limit.
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Create a codec with a custom size limit.
    pub fn with_max_size(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    /// Current size limit.
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Replace the size limit, e.g. with the server's `maxMessageSizeBytes`.
    pub fn set_max_message_size(&mut self, max_message_size: usize) {
        self.max_message_size = max_message_size;
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageCodec {
    type Item = OpMsg;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need the length prefix first
        if src.len() < 4 {
            return Ok(None);
        }

        let declared = i32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        if declared < MIN_MESSAGE_SIZE as i32 {
            return Err(WireError::protocol(format!(
                "frame length {} below minimum {}",
                declared, MIN_MESSAGE_SIZE
            )));
        }
        let declared = declared as usize;
        if declared > self.max_message_size {
            return Err(WireError::MessageTooLarge {
                size: declared,
                max: self.max_message_size,
            });
        }

        if src.len() < declared {
            src.reserve(declared - src.len());
            return Ok(None);
        }

        let frame = src.split_to(declared);
        OpMsg::parse_response(&frame).map(Some)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(msg) => Ok(Some(msg)),
            None if src.is_empty() => Ok(None),
            None => {
                let leftover = src.remaining();
                src.clear();
                Err(WireError::protocol(format!(
                    "stream ended inside a frame ({} bytes buffered)",
                    leftover
                )))
            }
        }
    }
}

impl Encoder<OpMsg> for MessageCodec {
    type Error = WireError;

    fn encode(&mut self, item: OpMsg, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let start = dst.len();
        item.encode(dst)?;
        let size = dst.len() - start;
        if size > self.max_message_size {
            dst.truncate(start);
            return Err(WireError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }
}
