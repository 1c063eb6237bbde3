//! Driver Error Types
//!
//! 드라이버 에러 정의

use thiserror::Error;

use crate::wire::bson::{BsonError, ExtJsonError};
use crate::wire::WireError;

use super::bulk::BulkWriteFailure;

// ============================================================================
// DriverError - 드라이버 에러
// ============================================================================

/// 드라이버 에러
#[derive(Error, Debug)]
pub enum DriverError {
    /// TCP 연결 실패
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// 요청 전송 실패
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// 응답 수신 실패
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// hello 핸드셰이크 실패
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// 응답 문서 형식 오류
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// 와이어 프로토콜 위반
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 서버 명령 실패 (`ok != 1`)
    #[error("Command failed: {code_name} ({code}) - {message}")]
    CommandFailed {
        code: i32,
        code_name: String,
        message: String,
    },

    /// 쓰기 에러 (`writeErrors`의 첫 항목)
    #[error("Write error at index {index}: {message} ({code})")]
    WriteError {
        index: usize,
        code: i32,
        message: String,
    },

    /// 쓰기 보장 에러
    #[error("Write concern error: {message} ({code})")]
    WriteConcernError { code: i32, message: String },

    /// 벌크 쓰기 실패
    #[error(
        "Bulk write failed: {} write error(s), {} operation(s) not executed",
        .0.write_errors.len(),
        .0.not_executed.len()
    )]
    BulkWrite(Box<BulkWriteFailure>),

    /// 요청이 서버의 `maxMessageSizeBytes`를 넘어 전송하지 않음
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// 연결 종료됨
    #[error("Connection closed")]
    Closed,

    /// 설정 에러
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// BSON 인코딩/디코딩 에러
    #[error("BSON error: {0}")]
    Bson(#[from] BsonError),

    /// Extended JSON 변환 에러
    #[error("Extended JSON error: {0}")]
    ExtJson(#[from] ExtJsonError),
}

impl DriverError {
    /// 연결 실패 에러 생성
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    /// 전송 실패 에러 생성
    pub fn send_failed(msg: impl Into<String>) -> Self {
        Self::SendFailed(msg.into())
    }

    /// 수신 실패 에러 생성
    pub fn receive_failed(msg: impl Into<String>) -> Self {
        Self::ReceiveFailed(msg.into())
    }

    /// 핸드셰이크 에러 생성
    pub fn handshake_failed(msg: impl Into<String>) -> Self {
        Self::HandshakeFailed(msg.into())
    }

    /// 응답 형식 에러 생성
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// 프로토콜 에러 생성
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// 설정 에러 생성
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// 명령 실패 에러 생성
    pub fn command_failed(code: i32, code_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CommandFailed {
            code,
            code_name: code_name.into(),
            message: message.into(),
        }
    }

    /// 서버 에러 코드
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::CommandFailed { code, .. }
            | Self::WriteError { code, .. }
            | Self::WriteConcernError { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// 재시도 가능 여부
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionFailed(_) | Self::SendFailed(_) | Self::ReceiveFailed(_) => true,
            Self::CommandFailed { code, .. } => RETRYABLE_CODES.contains(code),
            _ => false,
        }
    }

    /// 변경 스트림 재개 가능 여부
    pub fn is_resumable(&self) -> bool {
        match self {
            Self::CommandFailed { code, code_name, .. } => {
                RESUMABLE_CODES.contains(code) || code_name == "CursorNotFound"
            }
            _ => false,
        }
    }

    /// 이 에러 이후 연결을 더 쓸 수 없는지 여부
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::SendFailed(_)
                | Self::ReceiveFailed(_)
                | Self::HandshakeFailed(_)
                | Self::Protocol(_)
                | Self::Closed
        )
    }

    /// 클라이언트 측 에러 여부
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::Bson(_)
                | Self::ExtJson(_)
                | Self::MessageTooLarge { .. }
        )
    }
}

/// 재시도 가능한 서버 에러 코드
const RETRYABLE_CODES: &[i32] = &[
    6,     // HostUnreachable
    7,     // HostNotFound
    89,    // NetworkTimeout
    91,    // ShutdownInProgress
    189,   // PrimarySteppedDown
    262,   // ExceededTimeLimit
    9001,  // SocketException
    10107, // NotWritablePrimary
    11600, // InterruptedAtShutdown
    11602, // InterruptedDueToReplStateChange
    13435, // NotPrimaryNoSecondaryOk
    13436, // NotPrimaryOrSecondary
];

/// 변경 스트림 재개 가능한 서버 에러 코드
const RESUMABLE_CODES: &[i32] = &[
    6, 7, 43, 63, 89, 91, 133, 150, 189, 234, 262, 9001, 10107, 11600, 11602, 13388, 13435,
    13436,
];

impl From<WireError> for DriverError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Io(e) => DriverError::ReceiveFailed(e.to_string()),
            WireError::Handshake(e) => DriverError::HandshakeFailed(e.to_string()),
            WireError::Bson(e) => DriverError::Bson(e),
            WireError::Protocol(msg) => DriverError::Protocol(msg),
            WireError::ConnectionClosed => {
                DriverError::ReceiveFailed("connection closed by server".to_string())
            }
            other @ (WireError::MessageTooLarge { .. } | WireError::ChecksumMismatch { .. }) => {
                DriverError::Protocol(other.to_string())
            }
        }
    }
}

// ============================================================================
// Result Type
// ============================================================================

/// 드라이버 결과 타입
pub type DriverResult<T> = Result<T, DriverError>;

// ============================================================================
// Tests
// ============================================================================
