//! Wire protocol error types.

use std::fmt;
use std::io;

use super::bson::BsonError;

/// Result type for wire protocol operations.
pub type WireResult<T> = Result<T, WireError>;

/// Wire protocol errors.
#[derive(Debug)]
pub enum WireError {
    /// I/O error
    Io(io::Error),

    /// Handshake error
    Handshake(HandshakeError),

    /// BSON serialization error
    Bson(BsonError),

    /// Protocol error (malformed frame, bad correlation, etc.)
    Protocol(String),

    /// Frame larger than the negotiated maximum
    MessageTooLarge { size: usize, max: usize },

    /// CRC-32C checksum did not match the frame contents
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Peer closed the stream
    ConnectionClosed,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Io(e) => write!(f, "I/O error: {}", e),
            WireError::Handshake(e) => write!(f, "Handshake error: {}", e),
            WireError::Bson(e) => write!(f, "BSON error: {}", e),
            WireError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            WireError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max: {})", size, max)
            }
            WireError::ChecksumMismatch { expected, actual } => write!(
                f,
                "Checksum mismatch: frame carries 0x{:08X}, computed 0x{:08X}",
                expected, actual
            ),
            WireError::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl WireError {
    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        WireError::Protocol(msg.into())
    }

}

impl std::error::Error for WireError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WireError::Io(e) => Some(e),
            WireError::Handshake(e) => Some(e),
            WireError::Bson(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WireError {
    fn from(err: io::Error) -> Self {
        WireError::Io(err)
    }
}

impl From<HandshakeError> for WireError {
    fn from(err: HandshakeError) -> Self {
        WireError::Handshake(err)
    }
}

impl From<BsonError> for WireError {
    fn from(err: BsonError) -> Self {
        WireError::Bson(err)
    }
}

/// Handshake-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Server answered the hello command with `ok: 0`
    Rejected { code: i32, message: String },

    /// Server wire version range does not include OP_MSG support
    IncompatibleWireVersion { min: i32, max: i32, required: i32 },

    /// Reply is missing a required field or has the wrong type
    InvalidReply(String),
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::Rejected { code, message } => {
                write!(f, "Server rejected hello ({}): {}", code, message)
            }
            HandshakeError::IncompatibleWireVersion { min, max, required } => write!(
                f,
                "Server wire versions {}..={} do not include required version {}",
                min, max, required
            ),
            HandshakeError::InvalidReply(msg) => write!(f, "Invalid hello reply: {}", msg),
        }
    }
}

impl std::error::Error for HandshakeError {}
