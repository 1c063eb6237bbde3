//! BSON value types.

use std::fmt;

use chrono::{TimeZone, Utc};
use indexmap::IndexMap;

use super::oid::ObjectId;

/// A BSON value.
#[derive(Debug, Clone, PartialEq)]
pub enum Bson {
    /// Null value
    Null,
    /// Boolean value
    Boolean(bool),
    /// 64-bit floating point
    Double(f64),
    /// UTF-8 string
    String(String),
    /// Embedded document
    Document(Document),
    /// Ordered list of values
    Array(Vec<Bson>),
    /// 12-byte object identifier
    ObjectId(ObjectId),
    /// UTC datetime in milliseconds since the epoch
    DateTime(DateTime),
    /// 32-bit signed integer
    Int32(i32),
    /// 64-bit signed integer
    Int64(i64),
    /// Binary data with subtype
    Binary(Binary),
    /// Regular expression
    RegularExpression(Regex),
    /// Replication timestamp
    Timestamp(Timestamp),
    /// Sorts before every other value
    MinKey,
    /// Sorts after every other value
    MaxKey,
}

/// Binary payload tagged with a subtype byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binary {
    /// Subtype byte
    pub subtype: u8,
    /// Raw bytes
    pub bytes: Vec<u8>,
}

impl Binary {
    /// Create a new binary value.
    pub fn new(subtype: u8, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            subtype,
            bytes: bytes.into(),
        }
    }
}

/// Regular expression with option flags.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Regex {
    /// Pattern source
    pub pattern: String,
    /// Option characters (i, m, s, x, ...)
    pub options: String,
}

impl Regex {
    /// Create a new regular expression. Options are stored sorted, as the
    /// server expects them.
    pub fn new(pattern: impl Into<String>, options: impl Into<String>) -> Self {
        let mut chars: Vec<char> = options.into().chars().collect();
        chars.sort_unstable();
        Self {
            pattern: pattern.into(),
            options: chars.into_iter().collect(),
        }
    }
}

/// Internal MongoDB replication timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp {
    /// Seconds since the epoch
    pub time: u32,
    /// Ordinal within the second
    pub increment: u32,
}

/// UTC datetime with millisecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DateTime(i64);

impl DateTime {
    /// Datetime from milliseconds since the epoch.
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// The current time.
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    /// Milliseconds since the epoch.
    pub const fn timestamp_millis(&self) -> i64 {
        self.0
    }

    /// Parse an RFC 3339 string such as `2024-01-01T00:00:00.000Z`.
    pub fn parse_rfc3339(s: &str) -> Option<Self> {
        chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| Self(dt.timestamp_millis()))
    }

    /// Format as RFC 3339 with millisecond precision, if representable.
    pub fn to_rfc3339(&self) -> Option<String> {
        Utc.timestamp_millis_opt(self.0)
            .single()
            .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_rfc3339() {
            Some(s) => write!(f, "{}", s),
            None => write!(f, "DateTime({})", self.0),
        }
    }
}

impl Bson {
    /// The element type tag used on the wire.
    pub fn element_type(&self) -> u8 {
        use super::marker::*;
        match self {
            Bson::Null => NULL,
            Bson::Boolean(_) => BOOLEAN,
            Bson::Double(_) => DOUBLE,
            Bson::String(_) => STRING,
            Bson::Document(_) => DOCUMENT,
            Bson::Array(_) => ARRAY,
            Bson::ObjectId(_) => OBJECT_ID,
            Bson::DateTime(_) => DATE_TIME,
            Bson::Int32(_) => INT32,
            Bson::Int64(_) => INT64,
            Bson::Binary(_) => BINARY,
            Bson::RegularExpression(_) => REGEX,
            Bson::Timestamp(_) => TIMESTAMP,
            Bson::MinKey => MIN_KEY,
            Bson::MaxKey => MAX_KEY,
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Bson::Null)
    }

    /// Try to get as boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Bson::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as 32-bit integer. Only matches `Int32`.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Bson::Int32(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get as 64-bit integer, widening `Int32`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Bson::Int64(i) => Some(*i),
            Bson::Int32(i) => Some(*i as i64),
            _ => None,
        }
    }

    /// Try to get as float. Only matches `Double`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Bson::Double(f) => Some(*f),
            _ => None,
        }
    }

    /// Interpret any numeric variant as f64.
    ///
    /// Reply fields like `ok` and `n` arrive as int or double depending on
    /// server version.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Bson::Double(f) => Some(*f),
            Bson::Int32(i) => Some(*i as f64),
            Bson::Int64(i) => Some(*i as f64),
            Bson::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Try to get as string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Bson::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as document reference.
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Bson::Document(d) => Some(d),
            _ => None,
        }
    }

    /// Try to get as array reference.
    pub fn as_array(&self) -> Option<&[Bson]> {
        match self {
            Bson::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Try to get as ObjectId.
    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            Bson::ObjectId(oid) => Some(*oid),
            _ => None,
        }
    }

    /// Try to get as datetime.
    pub fn as_datetime(&self) -> Option<DateTime> {
        match self {
            Bson::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Try to get as timestamp.
    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match self {
            Bson::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Get the type name of this value.
    pub fn type_name(&self) -> &'static str {
        super::marker::type_name(self.element_type())
    }
}

impl fmt::Display for Bson {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bson::Null => write!(f, "null"),
            Bson::Boolean(b) => write!(f, "{}", b),
            Bson::Double(d) => write!(f, "{:?}", d),
            Bson::String(s) => write!(f, "\"{}\"", s),
            Bson::Document(d) => write!(f, "{}", d),
            Bson::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Bson::ObjectId(oid) => write!(f, "ObjectId(\"{}\")", oid),
            Bson::DateTime(dt) => write!(f, "ISODate(\"{}\")", dt),
            Bson::Int32(i) => write!(f, "{}", i),
            Bson::Int64(i) => write!(f, "NumberLong({})", i),
            Bson::Binary(b) => write!(f, "BinData({}, {} bytes)", b.subtype, b.bytes.len()),
            Bson::RegularExpression(r) => write!(f, "/{}/{}", r.pattern, r.options),
            Bson::Timestamp(ts) => write!(f, "Timestamp({}, {})", ts.time, ts.increment),
            Bson::MinKey => write!(f, "MinKey"),
            Bson::MaxKey => write!(f, "MaxKey"),
        }
    }
}

impl From<bool> for Bson {
    fn from(v: bool) -> Self {
        Bson::Boolean(v)
    }
}

impl From<i32> for Bson {
    fn from(v: i32) -> Self {
        Bson::Int32(v)
    }
}

impl From<i64> for Bson {
    fn from(v: i64) -> Self {
        Bson::Int64(v)
    }
}

impl From<f64> for Bson {
    fn from(v: f64) -> Self {
        Bson::Double(v)
    }
}

impl From<&str> for Bson {
    fn from(v: &str) -> Self {
        Bson::String(v.to_string())
    }
}

impl From<String> for Bson {
    fn from(v: String) -> Self {
        Bson::String(v)
    }
}

impl From<Document> for Bson {
    fn from(v: Document) -> Self {
        Bson::Document(v)
    }
}

impl From<ObjectId> for Bson {
    fn from(v: ObjectId) -> Self {
        Bson::ObjectId(v)
    }
}

impl From<DateTime> for Bson {
    fn from(v: DateTime) -> Self {
        Bson::DateTime(v)
    }
}

impl From<Binary> for Bson {
    fn from(v: Binary) -> Self {
        Bson::Binary(v)
    }
}

impl From<Regex> for Bson {
    fn from(v: Regex) -> Self {
        Bson::RegularExpression(v)
    }
}

impl From<Timestamp> for Bson {
    fn from(v: Timestamp) -> Self {
        Bson::Timestamp(v)
    }
}

impl<T: Into<Bson>> From<Vec<T>> for Bson {
    fn from(v: Vec<T>) -> Self {
        Bson::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Bson>> From<Option<T>> for Bson {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Bson::Null)
    }
}

// ============================================================================
// Document
// ============================================================================

/// An ordered BSON document.
///
/// Key order is significant: two documents are equal only if they hold the
/// same keys in the same order with equal values.
#[derive(Debug, Clone, Default)]
pub struct Document {
    inner: IndexMap<String, Bson>,
}

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty document with room for `capacity` keys.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: IndexMap::with_capacity(capacity),
        }
    }

    /// Insert a key. An existing key keeps its position and gets the new value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Bson>) -> Option<Bson> {
        self.inner.insert(key.into(), value.into())
    }

    /// Insert a key at the front of the document.
    pub fn insert_first(&mut self, key: impl Into<String>, value: impl Into<Bson>) {
        let (index, _) = self.inner.insert_full(key.into(), value.into());
        self.inner.move_index(index, 0);
    }

    /// Remove a key, preserving the order of the remaining keys.
    pub fn remove(&mut self, key: &str) -> Option<Bson> {
        self.inner.shift_remove(key)
    }

    /// Get a value by key.
    pub fn get(&self, key: &str) -> Option<&Bson> {
        self.inner.get(key)
    }

    /// Get a mutable value by key.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Bson> {
        self.inner.get_mut(key)
    }

    /// Check if a key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// Get a string field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Bson::as_str)
    }

    /// Get an `Int32` field.
    pub fn get_i32(&self, key: &str) -> Option<i32> {
        self.get(key).and_then(Bson::as_i32)
    }

    /// Get an integer field, accepting `Int32` or `Int64`.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Bson::as_i64)
    }

    /// Get any numeric field as f64. See [`Bson::as_number`].
    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Bson::as_number)
    }

    /// Get a boolean field.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Bson::as_bool)
    }

    /// Get an embedded document field.
    pub fn get_document(&self, key: &str) -> Option<&Document> {
        self.get(key).and_then(Bson::as_document)
    }

    /// Get an array field.
    pub fn get_array(&self, key: &str) -> Option<&[Bson]> {
        self.get(key).and_then(Bson::as_array)
    }

    /// Get an ObjectId field.
    pub fn get_object_id(&self, key: &str) -> Option<ObjectId> {
        self.get(key).and_then(Bson::as_object_id)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if the document has no keys.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// The first key, which names the command in a command document.
    pub fn first_key(&self) -> Option<&str> {
        self.inner.get_index(0).map(|(k, _)| k.as_str())
    }

    /// Iterate keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.inner.keys()
    }

    /// Iterate values in order.
    pub fn values(&self) -> impl Iterator<Item = &Bson> {
        self.inner.values()
    }

    /// Iterate entries in order.
    pub fn iter(&self) -> indexmap::map::Iter<'_, String, Bson> {
        self.inner.iter()
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, " \"{}\": {}", k, v)?;
        }
        if !self.is_empty() {
            write!(f, " ")?;
        }
        write!(f, "}}")
    }
}

impl<K: Into<String>, V: Into<Bson>> FromIterator<(K, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

impl IntoIterator for Document {
    type Item = (String, Bson);
    type IntoIter = indexmap::map::IntoIter<String, Bson>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a String, &'a Bson);
    type IntoIter = indexmap::map::Iter<'a, String, Bson>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}
