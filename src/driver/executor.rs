//! Command Executor
//!
//! 명령 실행 및 응답 검사

use std::sync::Arc;

use tracing::debug;

use crate::wire::bson::{Bson, Document};
use crate::wire::message::DEFAULT_MAX_MESSAGE_SIZE;
use crate::wire::DocumentSequence;

use super::connection::Connection;
use super::error::{DriverError, DriverResult};

// ============================================================================
// CommandExecutor - 명령 실행기
// ============================================================================

/// 명령 실행기
///
/// 명령 문서에 `$db`를 붙여 보내고, 응답의 `ok` 필드를 검사한다.
/// 복제해도 같은 연결을 공유한다.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    conn: Arc<Connection>,
}

impl CommandExecutor {
    /// 연결로부터 생성
    pub fn new(conn: Arc<Connection>) -> Self {
        Self { conn }
    }

    /// 하위 연결
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// 서버가 허용하는 최대 쓰기 배치 크기
    pub fn max_write_batch_size(&self) -> usize {
        usize::try_from(self.conn.hello().max_write_batch_size)
            .ok()
            .filter(|n| *n > 0)
            .unwrap_or(1)
    }

    /// 서버가 허용하는 최대 메시지 크기
    pub fn max_message_size(&self) -> usize {
        usize::try_from(self.conn.hello().max_message_size_bytes)
            .ok()
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// 명령 실행
    ///
    /// `ok != 1`이면 [`DriverError::CommandFailed`]를 반환한다.
    pub async fn run_command(&self, db: &str, command: Document) -> DriverResult<Document> {
        let reply = self.send(db, command, None).await?;
        check_ok(&reply)?;
        Ok(reply)
    }

    /// 쓰기 명령 실행
    ///
    /// `writeErrors`와 `writeConcernError`도 에러로 변환한다.
    pub async fn run_write_command(&self, db: &str, command: Document) -> DriverResult<Document> {
        let reply = self.run_command(db, command).await?;
        check_write_errors(&reply)?;
        Ok(reply)
    }

    /// 문서 시퀀스(kind 1 섹션)를 포함한 명령 실행
    pub async fn run_command_with_sequence(
        &self,
        db: &str,
        command: Document,
        sequence: DocumentSequence,
    ) -> DriverResult<Document> {
        let reply = self.send(db, command, Some(sequence)).await?;
        check_ok(&reply)?;
        Ok(reply)
    }

    /// 문서 시퀀스를 포함한 명령을 보내고 응답을 검사 없이 반환
    ///
    /// 벌크 쓰기처럼 쓰기 에러를 직접 해석해야 하는 호출자용.
    pub(crate) async fn send_raw(
        &self,
        db: &str,
        command: Document,
        sequence: Option<DocumentSequence>,
    ) -> DriverResult<Document> {
        self.send(db, command, sequence).await
    }

    async fn send(
        &self,
        db: &str,
        mut command: Document,
        sequence: Option<DocumentSequence>,
    ) -> DriverResult<Document> {
        let name = command.first_key().unwrap_or_default().to_string();
        if !command.contains_key("$db") {
            command.insert("$db", db);
        }
        debug!(command = %name, db = %db, "Running command");

        let reply = match sequence {
            Some(seq) => self.conn.send_with_sequences(&command, &[seq]).await?,
            None => self.conn.send(&command).await?,
        };

        debug!(command = %name, ok = ?reply.get_number("ok"), "Command reply");
        Ok(reply)
    }
}

// ============================================================================
// Reply inspection
// ============================================================================

/// `ok` 필드 검사
pub(crate) fn check_ok(reply: &Document) -> DriverResult<()> {
    if reply.get_number("ok") == Some(1.0) {
        return Ok(());
    }
    Err(command_error(reply))
}

/// 실패 응답을 [`DriverError::CommandFailed`]로 변환
pub(crate) fn command_error(reply: &Document) -> DriverError {
    let code = reply.get_number("code").map(|c| c as i32).unwrap_or(0);
    let code_name = reply.get_str("codeName").unwrap_or_default();
    let message = reply.get_str("errmsg").unwrap_or("command failed");
    DriverError::command_failed(code, code_name, message)
}

/// `writeErrors` / `writeConcernError` 검사
pub(crate) fn check_write_errors(reply: &Document) -> DriverResult<()> {
    if let Some(first) = write_errors(reply).into_iter().next() {
        return Err(DriverError::WriteError {
            index: first.index,
            code: first.code,
            message: first.message,
        });
    }
    if let Some(wce) = reply.get_document("writeConcernError") {
        return Err(DriverError::WriteConcernError {
            code: wce.get_number("code").map(|c| c as i32).unwrap_or(0),
            message: wce.get_str("errmsg").unwrap_or_default().to_string(),
        });
    }
    Ok(())
}

/// 응답에 담긴 개별 쓰기 에러
#[derive(Debug, Clone, PartialEq)]
pub struct WriteErrorEntry {
    /// 명령 안에서의 연산 위치
    pub index: usize,
    /// 서버 에러 코드
    pub code: i32,
    /// 서버 메시지
    pub message: String,
}

/// `writeErrors` 배열 파싱
pub(crate) fn write_errors(reply: &Document) -> Vec<WriteErrorEntry> {
    reply
        .get_array("writeErrors")
        .unwrap_or_default()
        .iter()
        .filter_map(Bson::as_document)
        .map(|e| WriteErrorEntry {
            index: e.get_number("index").map(|i| i as usize).unwrap_or(0),
            code: e.get_number("code").map(|c| c as i32).unwrap_or(0),
            message: e.get_str("errmsg").unwrap_or_default().to_string(),
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
