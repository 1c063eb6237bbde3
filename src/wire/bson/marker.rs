//! BSON element type tags.
//!
//! Every element inside a BSON document is prefixed with a single byte
//! that identifies the payload layout that follows the element name.

/// 64-bit IEEE 754 floating point
pub const DOUBLE: u8 = 0x01;

/// UTF-8 string (int32 length including NUL, bytes, NUL)
pub const STRING: u8 = 0x02;

/// Embedded document
pub const DOCUMENT: u8 = 0x03;

/// Array (document keyed "0", "1", ...)
pub const ARRAY: u8 = 0x04;

/// Binary data (int32 length, subtype byte, bytes)
pub const BINARY: u8 = 0x05;

/// ObjectId (12 bytes)
pub const OBJECT_ID: u8 = 0x07;

/// Boolean (one byte, 0x00 or 0x01)
pub const BOOLEAN: u8 = 0x08;

/// UTC datetime (int64 milliseconds since the Unix epoch)
pub const DATE_TIME: u8 = 0x09;

/// Null value (no payload)
pub const NULL: u8 = 0x0A;

/// Regular expression (cstring pattern, cstring options)
pub const REGEX: u8 = 0x0B;

/// 32-bit signed integer
pub const INT32: u8 = 0x10;

/// Internal replication timestamp (uint32 increment, uint32 seconds)
pub const TIMESTAMP: u8 = 0x11;

/// 64-bit signed integer
pub const INT64: u8 = 0x12;

/// Min key sentinel (no payload)
pub const MIN_KEY: u8 = 0xFF;

/// Max key sentinel (no payload)
pub const MAX_KEY: u8 = 0x7F;

/// Binary subtypes
pub const BINARY_GENERIC: u8 = 0x00;
pub const BINARY_FUNCTION: u8 = 0x01;
pub const BINARY_OLD: u8 = 0x02;
pub const BINARY_UUID: u8 = 0x04;
pub const BINARY_MD5: u8 = 0x05;
pub const BINARY_USER_DEFINED: u8 = 0x80;

/// Maximum encoded size of a single document (16 MiB).
pub const MAX_DOCUMENT_SIZE: usize = 16 * 1024 * 1024;

/// Smallest possible document: int32 length + terminating NUL.
pub const MIN_DOCUMENT_SIZE: usize = 5;

/// Deepest document/array nesting accepted by the encoder and decoder.
pub const MAX_NESTING_DEPTH: usize = 100;

/// Human readable name for an element type tag.
pub fn type_name(tag: u8) -> &'static str {
    match tag {
        DOUBLE => "double",
        STRING => "string",
        DOCUMENT => "document",
        ARRAY => "array",
        BINARY => "binary",
        OBJECT_ID => "objectId",
        BOOLEAN => "bool",
        DATE_TIME => "date",
        NULL => "null",
        REGEX => "regex",
        INT32 => "int",
        TIMESTAMP => "timestamp",
        INT64 => "long",
        MIN_KEY => "minKey",
        MAX_KEY => "maxKey",
        _ => "unknown",
    }
}

/// Check if a tag is one this codec understands.
#[inline]
pub fn is_known_type(tag: u8) -> bool {
    type_name(tag) != "unknown"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_types() {
        for tag in [DOUBLE, STRING, DOCUMENT, ARRAY, BINARY, OBJECT_ID, BOOLEAN, DATE_TIME,
            NULL, REGEX, INT32, TIMESTAMP, INT64, MIN_KEY, MAX_KEY]
        {
            assert!(is_known_type(tag), "tag 0x{:02X} should be known", tag);
        }
    }

    #[test]
    fn test_unsupported_types() {
        // undefined, DBPointer, JavaScript, symbol, decimal128
        for tag in [0x06, 0x0C, 0x0D, 0x0E, 0x13, 0x00, 0x20] {
            assert!(!is_known_type(tag));
        }
    }

    #[test]
    fn test_type_names() {
        assert_eq!(type_name(INT32), "int");
        assert_eq!(type_name(INT64), "long");
        assert_eq!(type_name(MIN_KEY), "minKey");
    }
}
