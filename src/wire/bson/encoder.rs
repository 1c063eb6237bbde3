//! BSON encoder.

use bytes::{BufMut, BytesMut};

use super::marker::*;
use super::types::{Bson, Document};
use super::BsonError;

/// BSON encoder that writes documents to a byte buffer.
pub struct BsonEncoder {
    buffer: BytesMut,
    depth: usize,
}

impl BsonEncoder {
    /// Create a new encoder with default buffer capacity.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a new encoder with specified buffer capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            depth: 0,
        }
    }

    /// Get the current buffer length.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Consume the encoder and return the bytes.
    pub fn into_bytes(self) -> BytesMut {
        self.buffer
    }

    /// Get the bytes as a slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Encode a top-level document.
    ///
    /// Fails if the encoded document exceeds [`MAX_DOCUMENT_SIZE`] or nests
    /// deeper than [`MAX_NESTING_DEPTH`].
    pub fn encode_document(&mut self, doc: &Document) -> Result<(), BsonError> {
        let start = self.buffer.len();
        self.depth = 0;
        if let Err(e) = self.write_document(doc) {
            self.buffer.truncate(start);
            return Err(e);
        }
        let size = self.buffer.len() - start;
        if size > MAX_DOCUMENT_SIZE {
            self.buffer.truncate(start);
            return Err(BsonError::DocumentTooLarge {
                size,
                max: MAX_DOCUMENT_SIZE,
            });
        }
        Ok(())
    }

    fn write_document(&mut self, doc: &Document) -> Result<(), BsonError> {
        let start = self.enter()?;
        for (key, value) in doc {
            self.write_element(key, value)?;
        }
        self.leave(start)
    }

    fn write_array(&mut self, items: &[Bson]) -> Result<(), BsonError> {
        let start = self.enter()?;
        for (index, value) in items.iter().enumerate() {
            self.write_element(&index.to_string(), value)?;
        }
        self.leave(start)
    }

    /// Open a nested element list: depth check plus length placeholder.
    fn enter(&mut self) -> Result<usize, BsonError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(BsonError::NestingTooDeep(MAX_NESTING_DEPTH));
        }
        self.depth += 1;
        Ok(self.begin_length())
    }

    fn leave(&mut self, start: usize) -> Result<(), BsonError> {
        self.buffer.put_u8(0x00);
        self.depth -= 1;
        self.end_length(start)
    }

    fn write_element(&mut self, key: &str, value: &Bson) -> Result<(), BsonError> {
        self.buffer.put_u8(value.element_type());
        self.write_cstring(key)?;

        match value {
            Bson::Null | Bson::MinKey | Bson::MaxKey => {}
            Bson::Boolean(b) => self.buffer.put_u8(u8::from(*b)),
            Bson::Double(d) => self.buffer.put_f64_le(*d),
            Bson::String(s) => self.write_string(s)?,
            Bson::Document(d) => self.write_document(d)?,
            Bson::Array(items) => self.write_array(items)?,
            Bson::ObjectId(oid) => self.buffer.put_slice(&oid.bytes()),
            Bson::DateTime(dt) => self.buffer.put_i64_le(dt.timestamp_millis()),
            Bson::Int32(i) => self.buffer.put_i32_le(*i),
            Bson::Int64(i) => self.buffer.put_i64_le(*i),
            Bson::Binary(bin) => {
                let len = length_prefix(bin.bytes.len())?;
                if bin.subtype == BINARY_OLD {
                    // Old binary repeats the payload length inside the payload.
                    self.buffer.put_i32_le(length_prefix(bin.bytes.len() + 4)?);
                    self.buffer.put_u8(bin.subtype);
                    self.buffer.put_i32_le(len);
                } else {
                    self.buffer.put_i32_le(len);
                    self.buffer.put_u8(bin.subtype);
                }
                self.buffer.put_slice(&bin.bytes);
            }
            Bson::RegularExpression(re) => {
                self.write_cstring(&re.pattern)?;
                self.write_cstring(&re.options)?;
            }
            Bson::Timestamp(ts) => {
                self.buffer.put_u32_le(ts.increment);
                self.buffer.put_u32_le(ts.time);
            }
        }

        Ok(())
    }

    fn write_string(&mut self, s: &str) -> Result<(), BsonError> {
        self.buffer.put_i32_le(length_prefix(s.len() + 1)?);
        self.buffer.put_slice(s.as_bytes());
        self.buffer.put_u8(0x00);
        Ok(())
    }

    fn write_cstring(&mut self, s: &str) -> Result<(), BsonError> {
        if s.as_bytes().contains(&0x00) {
            return Err(BsonError::InvalidCString(s.to_string()));
        }
        self.buffer.put_slice(s.as_bytes());
        self.buffer.put_u8(0x00);
        Ok(())
    }

    /// Reserve four bytes for a length prefix, returning its offset.
    fn begin_length(&mut self) -> usize {
        let start = self.buffer.len();
        self.buffer.put_i32_le(0);
        start
    }

    /// Backpatch the length prefix at `start` with the bytes written since.
    fn end_length(&mut self, start: usize) -> Result<(), BsonError> {
        let len = length_prefix(self.buffer.len() - start)?;
        self.buffer[start..start + 4].copy_from_slice(&len.to_le_bytes());
        Ok(())
    }
}

fn length_prefix(len: usize) -> Result<i32, BsonError> {
    i32::try_from(len).map_err(|_| BsonError::DocumentTooLarge {
        size: len,
        max: MAX_DOCUMENT_SIZE,
    })
}

impl Default for BsonEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience function to encode a single document.
pub fn encode_document(doc: &Document) -> Result<BytesMut, BsonError> {
    let mut encoder = BsonEncoder::new();
    encoder.encode_document(doc)?;
    Ok(encoder.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::wire::bson::types::Binary;

    #[test]
    fn test_encode_empty_document() {
        let bytes = encode_document(&Document::new()).unwrap();
        assert_eq!(&bytes[..], &[0x05, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_encode_int32() {
        let bytes = encode_document(&doc! { "a" => 1 }).unwrap();
        assert_eq!(
            &bytes[..],
            &[0x0C, 0x00, 0x00, 0x00, INT32, b'a', 0x00, 0x01, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_encode_string_length_includes_nul() {
        let bytes = encode_document(&doc! { "s" => "hi" }).unwrap();
        // length(4) + tag + "s\0" + strlen(4) + "hi\0" + terminator
        assert_eq!(bytes.len(), 4 + 1 + 2 + 4 + 3 + 1);
        assert_eq!(bytes[4], STRING);
        assert_eq!(&bytes[7..11], &3i32.to_le_bytes());
        assert_eq!(&bytes[11..14], b"hi\0");
    }

    #[test]
    fn test_encode_array_keys_are_indices() {
        let bytes = encode_document(&doc! { "a" => vec![Bson::Int32(7), Bson::Int32(8)] }).unwrap();
        // inner array document starts after tag + "a\0"
        let inner = &bytes[7..];
        assert_eq!(inner[4], INT32);
        assert_eq!(&inner[5..7], b"0\0");
        assert_eq!(inner[11], INT32);
        assert_eq!(&inner[12..14], b"1\0");
    }

    #[test]
    fn test_encode_int64_not_narrowed() {
        let bytes = encode_document(&doc! { "n" => 1i64 }).unwrap();
        assert_eq!(bytes[4], INT64);
        assert_eq!(bytes.len(), 4 + 1 + 2 + 8 + 1);
    }

    #[test]
    fn test_encode_old_binary() {
        let bytes = encode_document(&doc! { "b" => Binary::new(BINARY_OLD, vec![9, 9]) }).unwrap();
        assert_eq!(&bytes[7..11], &6i32.to_le_bytes());
        assert_eq!(bytes[11], BINARY_OLD);
        assert_eq!(&bytes[12..16], &2i32.to_le_bytes());
    }

    #[test]
    fn test_key_with_nul_rejected() {
        let result = encode_document(&doc! { "a\0b" => 1 });
        assert!(matches!(result, Err(BsonError::InvalidCString(_))));
    }

    #[test]
    fn test_document_too_large() {
        let big = "x".repeat(MAX_DOCUMENT_SIZE);
        let result = encode_document(&doc! { "big" => big });
        assert!(matches!(result, Err(BsonError::DocumentTooLarge { .. })));
    }

    fn nested(levels: usize) -> Document {
        let mut inner = doc! { "leaf" => true };
        for _ in 1..levels {
            inner = doc! { "x" => inner };
        }
        inner
    }

    #[test]
    fn test_nesting_limit_matches_decoder() {
        let deepest = nested(MAX_NESTING_DEPTH);
        let bytes = encode_document(&deepest).unwrap();
        assert_eq!(crate::wire::bson::decode_document(&bytes).unwrap(), deepest);

        let mut encoder = BsonEncoder::new();
        let result = encoder.encode_document(&nested(MAX_NESTING_DEPTH + 1));
        assert!(matches!(result, Err(BsonError::NestingTooDeep(MAX_NESTING_DEPTH))));
        assert!(encoder.is_empty());

        // the encoder stays usable after the failure
        encoder.encode_document(&doc! { "a" => 1 }).unwrap();
        assert_eq!(encoder.len(), 12);
    }

    #[test]
    fn test_length_prefix_overflow() {
        assert_eq!(length_prefix(12).unwrap(), 12);
        assert!(matches!(
            length_prefix(i32::MAX as usize + 1),
            Err(BsonError::DocumentTooLarge { .. })
        ));
    }
}
