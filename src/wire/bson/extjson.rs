//! Extended JSON bridge.
//!
//! Converts between `serde_json::Value` and [`Bson`]. Types JSON cannot
//! express are wrapped in single-key sentinel objects:
//!
//! | BSON       | Extended JSON                                          |
//! |------------|--------------------------------------------------------|
//! | ObjectId   | `{"$oid": "<24 hex>"}`                                 |
//! | DateTime   | `{"$date": {"$numberLong": "<millis>"}}`               |
//! | Int64      | `{"$numberLong": "<decimal>"}`                         |
//! | Int32      | plain number, or `{"$numberInt": "<decimal>"}` on input |
//! | Binary     | `{"$binary": {"base64": "...", "subType": "<hex>"}}`   |
//! | Regex      | `{"$regex": {"pattern": "...", "options": "..."}}`     |
//! | Timestamp  | `{"$timestamp": {"t": <secs>, "i": <inc>}}`            |
//! | MinKey     | `{"$minKey": 1}`                                       |
//! | MaxKey     | `{"$maxKey": 1}`                                       |
//!
//! Objects that do not match a sentinel shape are ordinary documents, so
//! query operators such as `{"$regex": "^A"}` pass through unchanged.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map, Number, Value};

use super::oid::ObjectId;
use super::types::{Binary, Bson, DateTime, Document, Regex, Timestamp};

/// Extended JSON conversion errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtJsonError {
    /// Input is not valid JSON
    Json(String),
    /// Top-level value is not an object
    NotADocument,
    /// `$numberInt` / `$numberLong` / `$numberDouble` payload is not a number
    InvalidNumber(String),
    /// `$oid` payload is not 24 hex characters
    InvalidObjectId(String),
    /// `$date` payload is neither millis nor an RFC 3339 string
    InvalidDate(String),
    /// `$binary` payload is malformed
    InvalidBinary(String),
    /// `$regex` payload is malformed
    InvalidRegex(String),
    /// `$timestamp` payload is malformed
    InvalidTimestamp(String),
}

impl fmt::Display for ExtJsonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtJsonError::Json(e) => write!(f, "Invalid JSON: {}", e),
            ExtJsonError::NotADocument => write!(f, "Extended JSON value is not a document"),
            ExtJsonError::InvalidNumber(s) => write!(f, "Invalid number: {}", s),
            ExtJsonError::InvalidObjectId(s) => write!(f, "Invalid $oid: {}", s),
            ExtJsonError::InvalidDate(s) => write!(f, "Invalid $date: {}", s),
            ExtJsonError::InvalidBinary(s) => write!(f, "Invalid $binary: {}", s),
            ExtJsonError::InvalidRegex(s) => write!(f, "Invalid $regex: {}", s),
            ExtJsonError::InvalidTimestamp(s) => write!(f, "Invalid $timestamp: {}", s),
        }
    }
}

impl std::error::Error for ExtJsonError {}

// ============================================================================
// JSON -> BSON
// ============================================================================

/// Parse Extended JSON text into a document.
pub fn document_from_extended_json(text: &str) -> Result<Document, ExtJsonError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ExtJsonError::Json(e.to_string()))?;
    match from_extended_json(&value)? {
        Bson::Document(doc) => Ok(doc),
        _ => Err(ExtJsonError::NotADocument),
    }
}

/// Convert a JSON value into BSON, resolving sentinel objects.
pub fn from_extended_json(value: &Value) -> Result<Bson, ExtJsonError> {
    match value {
        Value::Null => Ok(Bson::Null),
        Value::Bool(b) => Ok(Bson::Boolean(*b)),
        Value::Number(n) => Ok(number_to_bson(n)),
        Value::String(s) => Ok(Bson::String(s.clone())),
        Value::Array(items) => items
            .iter()
            .map(from_extended_json)
            .collect::<Result<Vec<_>, _>>()
            .map(Bson::Array),
        Value::Object(map) => {
            if let Some(special) = sentinel(map)? {
                return Ok(special);
            }
            let mut doc = Document::with_capacity(map.len());
            for (key, v) in map {
                doc.insert(key.as_str(), from_extended_json(v)?);
            }
            Ok(Bson::Document(doc))
        }
    }
}

fn number_to_bson(n: &Number) -> Bson {
    if let Some(i) = n.as_i64() {
        match i32::try_from(i) {
            Ok(small) => Bson::Int32(small),
            Err(_) => Bson::Int64(i),
        }
    } else {
        // Fractional, or an unsigned value past i64::MAX.
        Bson::Double(n.as_f64().unwrap_or(f64::NAN))
    }
}

/// Recognize a sentinel object. `Ok(None)` means "plain document".
fn sentinel(map: &Map<String, Value>) -> Result<Option<Bson>, ExtJsonError> {
    if map.len() == 2 {
        // Legacy forms.
        if let (Some(Value::String(data)), Some(kind)) = (map.get("$binary"), map.get("$type")) {
            let subtype = parse_subtype(kind)?;
            return decode_base64(data).map(|bytes| Some(Bson::Binary(Binary::new(subtype, bytes))));
        }
        if let (Some(Value::String(pattern)), Some(Value::String(options))) =
            (map.get("$regex"), map.get("$options"))
        {
            return Ok(Some(Bson::RegularExpression(Regex::new(
                pattern.as_str(),
                options.as_str(),
            ))));
        }
        return Ok(None);
    }

    let Some((key, value)) = map.iter().next().filter(|_| map.len() == 1) else {
        return Ok(None);
    };

    match key.as_str() {
        "$oid" => {
            let hex = value
                .as_str()
                .ok_or_else(|| ExtJsonError::InvalidObjectId(value.to_string()))?;
            ObjectId::parse_str(hex)
                .map(|oid| Some(Bson::ObjectId(oid)))
                .map_err(|_| ExtJsonError::InvalidObjectId(hex.to_string()))
        }
        "$date" => parse_date(value).map(|dt| Some(Bson::DateTime(dt))),
        "$numberLong" => {
            let s = number_string(value)?;
            s.parse::<i64>()
                .map(|i| Some(Bson::Int64(i)))
                .map_err(|_| ExtJsonError::InvalidNumber(s.to_string()))
        }
        "$numberInt" => {
            let s = number_string(value)?;
            s.parse::<i32>()
                .map(|i| Some(Bson::Int32(i)))
                .map_err(|_| ExtJsonError::InvalidNumber(s.to_string()))
        }
        "$numberDouble" => {
            let s = number_string(value)?;
            let d = match s {
                "NaN" => f64::NAN,
                "Infinity" => f64::INFINITY,
                "-Infinity" => f64::NEG_INFINITY,
                other => other
                    .parse::<f64>()
                    .map_err(|_| ExtJsonError::InvalidNumber(other.to_string()))?,
            };
            Ok(Some(Bson::Double(d)))
        }
        "$binary" => match value {
            Value::Object(inner) => {
                let data = inner
                    .get("base64")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ExtJsonError::InvalidBinary("missing base64".into()))?;
                let subtype = inner
                    .get("subType")
                    .ok_or_else(|| ExtJsonError::InvalidBinary("missing subType".into()))
                    .and_then(parse_subtype)?;
                let bytes = decode_base64(data)?;
                Ok(Some(Bson::Binary(Binary::new(subtype, bytes))))
            }
            _ => Err(ExtJsonError::InvalidBinary(value.to_string())),
        },
        "$regex" | "$regularExpression" => match value {
            Value::Object(inner) => {
                let pattern = inner
                    .get("pattern")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ExtJsonError::InvalidRegex(value.to_string()))?;
                let options = inner.get("options").and_then(Value::as_str).unwrap_or("");
                Ok(Some(Bson::RegularExpression(Regex::new(pattern, options))))
            }
            // `{"$regex": "^A"}` is the query operator, not a regex literal.
            _ if key == "$regex" => Ok(None),
            _ => Err(ExtJsonError::InvalidRegex(value.to_string())),
        },
        "$timestamp" => {
            let field = |name: &str| {
                value
                    .get(name)
                    .and_then(Value::as_u64)
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| ExtJsonError::InvalidTimestamp(value.to_string()))
            };
            Ok(Some(Bson::Timestamp(Timestamp {
                time: field("t")?,
                increment: field("i")?,
            })))
        }
        "$minKey" => Ok(Some(Bson::MinKey)),
        "$maxKey" => Ok(Some(Bson::MaxKey)),
        _ => Ok(None),
    }
}

fn number_string(value: &Value) -> Result<&str, ExtJsonError> {
    value
        .as_str()
        .ok_or_else(|| ExtJsonError::InvalidNumber(value.to_string()))
}

fn parse_date(value: &Value) -> Result<DateTime, ExtJsonError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(DateTime::from_millis)
            .ok_or_else(|| ExtJsonError::InvalidDate(n.to_string())),
        Value::String(s) => {
            DateTime::parse_rfc3339(s).ok_or_else(|| ExtJsonError::InvalidDate(s.clone()))
        }
        Value::Object(inner) => match inner.get("$numberLong").and_then(Value::as_str) {
            Some(s) if inner.len() == 1 => s
                .parse::<i64>()
                .map(DateTime::from_millis)
                .map_err(|_| ExtJsonError::InvalidDate(s.to_string())),
            _ => Err(ExtJsonError::InvalidDate(value.to_string())),
        },
        other => Err(ExtJsonError::InvalidDate(other.to_string())),
    }
}

fn parse_subtype(value: &Value) -> Result<u8, ExtJsonError> {
    match value {
        Value::String(s) if !s.is_empty() && s.len() <= 2 => u8::from_str_radix(s, 16)
            .map_err(|_| ExtJsonError::InvalidBinary(format!("bad subType {:?}", s))),
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u8::try_from(n).ok())
            .ok_or_else(|| ExtJsonError::InvalidBinary(format!("bad subType {}", n))),
        other => Err(ExtJsonError::InvalidBinary(format!("bad subType {}", other))),
    }
}

fn decode_base64(data: &str) -> Result<Vec<u8>, ExtJsonError> {
    STANDARD
        .decode(data)
        .map_err(|e| ExtJsonError::InvalidBinary(e.to_string()))
}

// ============================================================================
// BSON -> JSON
// ============================================================================

/// Render a document as an Extended JSON object.
pub fn document_to_extended_json(doc: &Document) -> Value {
    let mut map = Map::with_capacity(doc.len());
    for (key, value) in doc {
        map.insert(key.clone(), to_extended_json(value));
    }
    Value::Object(map)
}

/// Render a BSON value as Extended JSON.
pub fn to_extended_json(value: &Bson) -> Value {
    match value {
        Bson::Null => Value::Null,
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(i) => Value::Number((*i).into()),
        Bson::Double(d) => match Number::from_f64(*d) {
            Some(n) => Value::Number(n),
            None => wrap("$numberDouble", Value::String(non_finite_name(*d).to_string())),
        },
        Bson::String(s) => Value::String(s.clone()),
        Bson::Document(doc) => document_to_extended_json(doc),
        Bson::Array(items) => Value::Array(items.iter().map(to_extended_json).collect()),
        Bson::ObjectId(oid) => wrap("$oid", Value::String(oid.to_hex())),
        Bson::DateTime(dt) => wrap(
            "$date",
            wrap("$numberLong", Value::String(dt.timestamp_millis().to_string())),
        ),
        Bson::Int64(i) => wrap("$numberLong", Value::String(i.to_string())),
        Bson::Binary(bin) => {
            let mut inner = Map::new();
            inner.insert("base64".into(), Value::String(STANDARD.encode(&bin.bytes)));
            inner.insert("subType".into(), Value::String(format!("{:02x}", bin.subtype)));
            wrap("$binary", Value::Object(inner))
        }
        Bson::RegularExpression(re) => {
            let mut inner = Map::new();
            inner.insert("pattern".into(), Value::String(re.pattern.clone()));
            inner.insert("options".into(), Value::String(re.options.clone()));
            wrap("$regex", Value::Object(inner))
        }
        Bson::Timestamp(ts) => {
            let mut inner = Map::new();
            inner.insert("t".into(), Value::Number(ts.time.into()));
            inner.insert("i".into(), Value::Number(ts.increment.into()));
            wrap("$timestamp", Value::Object(inner))
        }
        Bson::MinKey => wrap("$minKey", Value::Number(1.into())),
        Bson::MaxKey => wrap("$maxKey", Value::Number(1.into())),
    }
}

fn wrap(key: &str, value: Value) -> Value {
    let mut map = Map::with_capacity(1);
    map.insert(key.to_string(), value);
    Value::Object(map)
}

fn non_finite_name(d: f64) -> &'static str {
    if d.is_nan() {
        "NaN"
    } else if d.is_sign_positive() {
        "Infinity"
    } else {
        "-Infinity"
    }
}
