//! BSON decoder.

use super::marker::*;
use super::oid::ObjectId;
use super::types::{Binary, Bson, DateTime, Document, Regex, Timestamp};
use super::BsonError;

/// BSON decoder that reads documents from a byte buffer.
pub struct BsonDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> BsonDecoder<'a> {
    /// Create a new decoder for the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            depth: 0,
        }
    }

    /// Get the current position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Get remaining bytes count.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Check if all data has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Decode the next document.
    pub fn decode_document(&mut self) -> Result<Document, BsonError> {
        let mut doc = Document::new();
        self.read_elements(|key, value| {
            doc.insert(key, value);
        })?;
        Ok(doc)
    }

    fn decode_array(&mut self) -> Result<Vec<Bson>, BsonError> {
        let mut items = Vec::new();
        self.read_elements(|_, value| items.push(value))?;
        Ok(items)
    }

    /// Read a length-prefixed element list, handing each entry to `sink`.
    fn read_elements<F>(&mut self, mut sink: F) -> Result<(), BsonError>
    where
        F: FnMut(String, Bson),
    {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(BsonError::NestingTooDeep(MAX_NESTING_DEPTH));
        }

        let start = self.pos;
        let declared = self.read_i32()?;
        if declared < MIN_DOCUMENT_SIZE as i32 {
            return Err(BsonError::InvalidLength(declared as i64));
        }
        let declared = declared as usize;
        if self.data.len() - start < declared {
            return Err(BsonError::LengthMismatch {
                declared,
                available: self.data.len() - start,
            });
        }
        let end = start + declared;

        self.depth += 1;
        loop {
            let tag = self.read_u8()?;
            if tag == 0x00 {
                break;
            }
            let key = self.read_cstring()?;
            let value = self.read_value(tag)?;
            if self.pos > end {
                return Err(BsonError::LengthMismatch {
                    declared,
                    available: self.pos - start,
                });
            }
            sink(key, value);
        }
        self.depth -= 1;

        if self.pos != end {
            return Err(BsonError::LengthMismatch {
                declared,
                available: self.pos - start,
            });
        }
        Ok(())
    }

    fn read_value(&mut self, tag: u8) -> Result<Bson, BsonError> {
        match tag {
            DOUBLE => Ok(Bson::Double(f64::from_le_bytes(self.read_array()?))),
            STRING => Ok(Bson::String(self.read_string()?)),
            DOCUMENT => Ok(Bson::Document(self.decode_document()?)),
            ARRAY => Ok(Bson::Array(self.decode_array()?)),
            BINARY => self.read_binary(),
            OBJECT_ID => Ok(Bson::ObjectId(ObjectId::from_bytes(self.read_array()?))),
            BOOLEAN => match self.read_u8()? {
                0x00 => Ok(Bson::Boolean(false)),
                0x01 => Ok(Bson::Boolean(true)),
                other => Err(BsonError::InvalidBoolean(other)),
            },
            DATE_TIME => Ok(Bson::DateTime(DateTime::from_millis(self.read_i64()?))),
            NULL => Ok(Bson::Null),
            REGEX => {
                let pattern = self.read_cstring()?;
                let options = self.read_cstring()?;
                Ok(Bson::RegularExpression(Regex { pattern, options }))
            }
            INT32 => Ok(Bson::Int32(self.read_i32()?)),
            TIMESTAMP => {
                let increment = self.read_u32()?;
                let time = self.read_u32()?;
                Ok(Bson::Timestamp(Timestamp { time, increment }))
            }
            INT64 => Ok(Bson::Int64(self.read_i64()?)),
            MIN_KEY => Ok(Bson::MinKey),
            MAX_KEY => Ok(Bson::MaxKey),
            _ => Err(BsonError::UnknownElementType(tag)),
        }
    }

    fn read_binary(&mut self) -> Result<Bson, BsonError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(BsonError::InvalidLength(len as i64));
        }
        let subtype = self.read_u8()?;
        let bytes = if subtype == BINARY_OLD {
            let inner = self.read_i32()?;
            if inner < 0 || inner as i64 + 4 != len as i64 {
                return Err(BsonError::InvalidLength(inner as i64));
            }
            self.read_bytes(inner as usize)?
        } else {
            self.read_bytes(len as usize)?
        };
        Ok(Bson::Binary(Binary::new(subtype, bytes.to_vec())))
    }

    fn read_string(&mut self) -> Result<String, BsonError> {
        let len = self.read_i32()?;
        if len < 1 {
            return Err(BsonError::InvalidLength(len as i64));
        }
        let bytes = self.read_bytes(len as usize)?;
        let (body, terminator) = bytes.split_at(bytes.len() - 1);
        if terminator != [0x00] {
            return Err(BsonError::MissingTerminator);
        }
        std::str::from_utf8(body)
            .map(str::to_string)
            .map_err(|e| BsonError::InvalidUtf8(e.to_string()))
    }

    fn read_cstring(&mut self) -> Result<String, BsonError> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let nul = rest
            .iter()
            .position(|&b| b == 0x00)
            .ok_or(BsonError::UnexpectedEof)?;
        let s = std::str::from_utf8(&rest[..nul])
            .map_err(|e| BsonError::InvalidUtf8(e.to_string()))?
            .to_string();
        self.pos += nul + 1;
        Ok(s)
    }

    // Low-level read methods (BSON is little-endian throughout)

    fn read_u8(&mut self) -> Result<u8, BsonError> {
        let [b] = self.read_array::<1>()?;
        Ok(b)
    }

    fn read_i32(&mut self) -> Result<i32, BsonError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    fn read_u32(&mut self) -> Result<u32, BsonError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    fn read_i64(&mut self) -> Result<i64, BsonError> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], BsonError> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], BsonError> {
        if self.remaining() < len {
            return Err(BsonError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }
}

/// Decode a single document from the front of `data`.
///
/// The buffer must hold at least the declared document length; trailing
/// bytes after the document are left unread.
pub fn decode_document(data: &[u8]) -> Result<Document, BsonError> {
    BsonDecoder::new(data).decode_document()
}

/// Decode back-to-back documents until `data` is exhausted.
pub fn decode_document_sequence(data: &[u8]) -> Result<Vec<Document>, BsonError> {
    let mut decoder = BsonDecoder::new(data);
    let mut docs = Vec::new();
    while !decoder.is_empty() {
        docs.push(decoder.decode_document()?);
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_empty_document() {
        let doc = decode_document(&[0x05, 0x00, 0x00, 0x00, 0x00]).unwrap();
        assert!(doc.is_empty());
    }

    #[test]
    fn test_decode_int32() {
        let data = [0x0C, 0x00, 0x00, 0x00, INT32, b'a', 0x00, 0x2A, 0x00, 0x00, 0x00, 0x00];
        let doc = decode_document(&data).unwrap();
        assert_eq!(doc.get("a"), Some(&Bson::Int32(42)));
    }

    #[test]
    fn test_declared_length_exceeds_buffer() {
        let data = [0x20, 0x00, 0x00, 0x00, 0x00];
        assert!(matches!(
            decode_document(&data),
            Err(BsonError::LengthMismatch { declared: 32, available: 5 })
        ));
    }

    #[test]
    fn test_declared_length_too_small() {
        let data = [0x03, 0x00, 0x00, 0x00, 0x00];
        assert!(matches!(decode_document(&data), Err(BsonError::InvalidLength(3))));
    }

    #[test]
    fn test_declared_length_disagrees_with_content() {
        // Declares 6 bytes but the terminator comes at byte 5.
        let data = [0x06, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert!(matches!(decode_document(&data), Err(BsonError::LengthMismatch { .. })));
    }

    #[test]
    fn test_unknown_element_type() {
        // 0x13 is decimal128, not supported
        let mut data = vec![0x00, 0x00, 0x00, 0x00, 0x13, b'd', 0x00];
        data.extend_from_slice(&[0u8; 16]);
        data.push(0x00);
        let len = data.len() as i32;
        data[0..4].copy_from_slice(&len.to_le_bytes());
        assert!(matches!(decode_document(&data), Err(BsonError::UnknownElementType(0x13))));
    }

    #[test]
    fn test_truncated_element() {
        // INT64 element with only 4 payload bytes, length claims the full buffer
        let data = [0x0D, 0x00, 0x00, 0x00, INT64, b'n', 0x00, 1, 0, 0, 0, 0, 0];
        assert!(decode_document(&data).is_err());
    }

    #[test]
    fn test_string_missing_terminator() {
        let data = [
            0x0F, 0x00, 0x00, 0x00, STRING, b's', 0x00, 0x02, 0x00, 0x00, 0x00, b'h', b'i', 0x00,
            0x00,
        ];
        assert!(matches!(decode_document(&data), Err(BsonError::MissingTerminator)));
    }

    #[test]
    fn test_invalid_boolean() {
        let data = [0x09, 0x00, 0x00, 0x00, BOOLEAN, b'b', 0x00, 0x02, 0x00];
        assert!(matches!(decode_document(&data), Err(BsonError::InvalidBoolean(2))));
    }

    #[test]
    fn test_decode_sequence() {
        let one = [0x05, 0x00, 0x00, 0x00, 0x00];
        let mut data = Vec::new();
        data.extend_from_slice(&one);
        data.extend_from_slice(&one);
        let docs = decode_document_sequence(&data).unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn test_nesting_limit() {
        // Build MAX_NESTING_DEPTH + 1 nested documents by hand.
        let mut inner: Vec<u8> = vec![0x05, 0x00, 0x00, 0x00, 0x00];
        for _ in 0..MAX_NESTING_DEPTH {
            let mut outer = vec![0, 0, 0, 0, DOCUMENT, b'x', 0x00];
            outer.extend_from_slice(&inner);
            outer.push(0x00);
            let len = outer.len() as i32;
            outer[0..4].copy_from_slice(&len.to_le_bytes());
            inner = outer;
        }
        assert!(matches!(decode_document(&inner), Err(BsonError::NestingTooDeep(_))));
    }
}
