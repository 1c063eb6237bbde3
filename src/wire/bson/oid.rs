//! ObjectId and its generator.
//!
//! An ObjectId is 12 bytes:
//!
//! ```text
//! | 4 bytes      | 5 bytes          | 3 bytes |
//! | unix seconds | process-unique   | counter |
//! ```
//!
//! Timestamp and counter are big-endian so ids generated later sort later.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use super::BsonError;

/// Mask for the 3-byte counter.
const COUNTER_MASK: u32 = 0x00FF_FFFF;

/// A 12-byte BSON object identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Wrap raw bytes.
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Raw bytes.
    pub const fn bytes(&self) -> [u8; 12] {
        self.0
    }

    /// Seconds since the epoch encoded in the first four bytes.
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Lowercase 24-character hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 24-character hex string.
    pub fn parse_str(s: &str) -> Result<Self, BsonError> {
        if s.len() != 24 {
            return Err(BsonError::InvalidObjectId(s.to_string()));
        }
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|_| BsonError::InvalidObjectId(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = BsonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_str(s)
    }
}

// ============================================================================
// ObjectIdGenerator
// ============================================================================

/// Generates ObjectIds for client-side `_id` assignment.
///
/// Owned by a client and shared through an `Arc`. `generate` only touches an
/// atomic counter, so concurrent callers on different connections never
/// produce the same id.
#[derive(Debug)]
pub struct ObjectIdGenerator {
    process_unique: [u8; 5],
    counter: AtomicU32,
}

impl ObjectIdGenerator {
    /// Create a generator with a random process-unique value and counter seed.
    pub fn new() -> Self {
        Self::with_seed(rand::random(), rand::random())
    }

    /// Create a generator with fixed components.
    pub fn with_seed(process_unique: [u8; 5], counter_seed: u32) -> Self {
        Self {
            process_unique,
            counter: AtomicU32::new(counter_seed & COUNTER_MASK),
        }
    }

    /// The 5-byte process-unique component.
    pub fn process_unique(&self) -> [u8; 5] {
        self.process_unique
    }

    /// Generate a new id stamped with the current time.
    pub fn generate(&self) -> ObjectId {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        self.generate_at(secs)
    }

    /// Generate a new id stamped with the given unix time.
    pub fn generate_at(&self, unix_secs: u32) -> ObjectId {
        let count = self.counter.fetch_add(1, Ordering::Relaxed) & COUNTER_MASK;

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&unix_secs.to_be_bytes());
        bytes[4..9].copy_from_slice(&self.process_unique);
        bytes[9..12].copy_from_slice(&count.to_be_bytes()[1..4]);
        ObjectId(bytes)
    }
}

impl Default for ObjectIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
