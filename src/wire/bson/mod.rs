//! BSON serialization format.
//!
//! BSON is the binary document format carried in every OP_MSG section.
//! A document is an int32 total length, a list of elements and a
//! terminating NUL. Each element is a type tag, a NUL-terminated key and a
//! payload whose layout depends on the tag.
//!
//! # Supported Types
//!
//! - **Double**, **Int32**, **Int64**: little-endian, never coerced
//! - **String**: int32 length (including NUL), UTF-8 bytes, NUL
//! - **Document** / **Array**: nested documents, arrays keyed "0", "1", ...
//! - **Binary**: int32 length, subtype byte, bytes
//! - **ObjectId**: 12 raw bytes
//! - **Boolean**, **Null**, **DateTime** (int64 millis), **Regex**
//! - **Timestamp**: uint32 increment, uint32 seconds
//! - **MinKey** / **MaxKey**: no payload
//!
//! Deprecated types (undefined, DBPointer, JavaScript, symbol) and
//! decimal128 are rejected on decode.

pub mod decoder;
pub mod encoder;
pub mod extjson;
pub mod marker;
pub mod oid;
pub mod types;

pub use decoder::{decode_document, decode_document_sequence, BsonDecoder};
pub use encoder::{encode_document, BsonEncoder};
pub use extjson::{
    document_from_extended_json, document_to_extended_json, from_extended_json,
    to_extended_json, ExtJsonError,
};
pub use marker::{MAX_DOCUMENT_SIZE, MAX_NESTING_DEPTH, MIN_DOCUMENT_SIZE};
pub use oid::{ObjectId, ObjectIdGenerator};
pub use types::{Binary, Bson, DateTime, Document, Regex, Timestamp};

use std::fmt;

/// BSON errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BsonError {
    /// Unexpected end of input
    UnexpectedEof,
    /// Declared document length disagrees with the bytes available
    LengthMismatch { declared: usize, available: usize },
    /// Negative or impossibly small length prefix
    InvalidLength(i64),
    /// Element type tag this codec does not understand
    UnknownElementType(u8),
    /// Invalid UTF-8 in a string or key
    InvalidUtf8(String),
    /// String payload not terminated by NUL
    MissingTerminator,
    /// Boolean payload other than 0x00 / 0x01
    InvalidBoolean(u8),
    /// Key or regex part containing an interior NUL
    InvalidCString(String),
    /// Not a 24-character hex ObjectId
    InvalidObjectId(String),
    /// Nested documents beyond the depth limit
    NestingTooDeep(usize),
    /// Encoded document exceeds the maximum BSON size
    DocumentTooLarge { size: usize, max: usize },
}

impl fmt::Display for BsonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BsonError::UnexpectedEof => write!(f, "Unexpected end of BSON data"),
            BsonError::LengthMismatch { declared, available } => write!(
                f,
                "Document length mismatch: declared {} bytes, found {}",
                declared, available
            ),
            BsonError::InvalidLength(len) => write!(f, "Invalid length prefix: {}", len),
            BsonError::UnknownElementType(t) => {
                write!(f, "Unknown BSON element type: 0x{:02X}", t)
            }
            BsonError::InvalidUtf8(e) => write!(f, "Invalid UTF-8 in string: {}", e),
            BsonError::MissingTerminator => write!(f, "String is not NUL-terminated"),
            BsonError::InvalidBoolean(b) => write!(f, "Invalid boolean byte: 0x{:02X}", b),
            BsonError::InvalidCString(s) => write!(f, "Key contains NUL byte: {:?}", s),
            BsonError::InvalidObjectId(s) => write!(f, "Invalid ObjectId: {:?}", s),
            BsonError::NestingTooDeep(max) => {
                write!(f, "Documents nested deeper than {} levels", max)
            }
            BsonError::DocumentTooLarge { size, max } => {
                write!(f, "Document too large: {} bytes (max: {})", size, max)
            }
        }
    }
}

impl std::error::Error for BsonError {}

/// Build a [`Document`] from `"key" => value` pairs, preserving order.
///
/// ```
/// use mongowire::doc;
///
/// let filter = doc! { "age" => doc! { "$gt" => 30 }, "name" => "Alice" };
/// assert_eq!(filter.first_key(), Some("age"));
/// ```
#[macro_export]
macro_rules! doc {
    () => {
        $crate::wire::bson::Document::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut doc = $crate::wire::bson::Document::new();
        $(
            doc.insert($key, $crate::wire::bson::Bson::from($value));
        )+
        doc
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    fn roundtrip(doc: &Document) -> Document {
        let bytes = encode_document(doc).unwrap();
        decode_document(&bytes).unwrap()
    }

    #[test]
    fn test_roundtrip_every_variant() {
        let gen = ObjectIdGenerator::with_seed([9, 8, 7, 6, 5], 1);
        let doc = doc! {
            "null" => Bson::Null,
            "bool" => true,
            "double" => 2.5,
            "string" => "héllo",
            "doc" => doc! { "x" => 1 },
            "array" => vec![Bson::Int32(1), Bson::String("two".into()), Bson::Null],
            "oid" => gen.generate_at(1_700_000_000),
            "date" => DateTime::from_millis(1_704_067_200_123),
            "int32" => 42,
            "int64" => 42i64,
            "binary" => Binary::new(marker::BINARY_GENERIC, vec![0, 1, 2, 255]),
            "old_binary" => Binary::new(marker::BINARY_OLD, vec![7]),
            "regex" => Regex::new("^ab+c$", "i"),
            "ts" => Timestamp { time: 1_700_000_000, increment: 3 },
            "min" => Bson::MinKey,
            "max" => Bson::MaxKey,
        };
        assert_eq!(roundtrip(&doc), doc);
    }

    #[test]
    fn test_roundtrip_preserves_key_order() {
        let doc = doc! { "z" => 1, "a" => 2, "m" => doc! { "k2" => 1, "k1" => 2 } };
        let back = roundtrip(&doc);
        let keys: Vec<&String> = back.keys().collect();
        assert_eq!(keys, ["z", "a", "m"]);
        let inner: Vec<&String> = back.get_document("m").unwrap().keys().collect();
        assert_eq!(inner, ["k2", "k1"]);
    }

    #[test]
    fn test_numeric_types_are_not_coerced() {
        let doc = doc! { "i" => 1, "l" => 1i64, "d" => 1.0 };
        let back = roundtrip(&doc);
        assert_eq!(back.get("i"), Some(&Bson::Int32(1)));
        assert_eq!(back.get("l"), Some(&Bson::Int64(1)));
        assert_eq!(back.get("d"), Some(&Bson::Double(1.0)));
    }

    #[test]
    fn test_deeply_nested_arrays() {
        let doc = doc! {
            "matrix" => vec![
                Bson::Array(vec![Bson::Int32(1), Bson::Int32(2)]),
                Bson::Array(vec![Bson::Document(doc! { "deep" => vec![Bson::Boolean(false)] })]),
            ],
        };
        assert_eq!(roundtrip(&doc), doc);
    }

    #[test]
    fn test_empty_containers() {
        let doc = doc! { "d" => Document::new(), "a" => Bson::Array(vec![]), "s" => "" };
        assert_eq!(roundtrip(&doc), doc);
    }

    #[test]
    fn test_doc_macro_empty() {
        let doc = doc! {};
        assert!(doc.is_empty());
    }

    #[test]
    fn test_error_display() {
        let err = BsonError::UnknownElementType(0x13);
        assert_eq!(err.to_string(), "Unknown BSON element type: 0x13");

        let err = BsonError::DocumentTooLarge { size: 20, max: 10 };
        assert!(err.to_string().contains("too large"));
    }
}
