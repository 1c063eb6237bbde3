//! Cursor
//!
//! 배치 단위로 결과를 가져오는 서버 커서
//!
//! 첫 배치는 `find`/`aggregate` 응답에 들어 있고, 버퍼가 비면 `getMore`로
//! 다음 배치를 요청합니다. 서버 커서 ID가 0이 되면 더 이상 요청하지 않습니다.

use std::collections::VecDeque;

use futures::stream::{self, Stream};
use tracing::{debug, warn};

use crate::wire::bson::{Bson, Document};

use super::commands;
use super::error::{DriverError, DriverResult};
use super::executor::CommandExecutor;

/// 서버 커서
#[derive(Debug)]
pub struct Cursor {
    executor: CommandExecutor,
    id: i64,
    namespace: String,
    db: String,
    collection: String,
    buffer: VecDeque<Document>,
    batch_size: Option<i32>,
    post_batch_resume_token: Option<Document>,
}

impl Cursor {
    /// `{cursor: {id, ns, firstBatch}}` 응답으로부터 커서 생성
    ///
    /// 서버가 커서를 열었는데 응답을 해석할 수 없으면 그 커서를 `killCursors`로
    /// 정리한 뒤 에러를 반환합니다.
    pub fn from_reply(
        executor: CommandExecutor,
        reply: &Document,
        batch_size: Option<i32>,
    ) -> DriverResult<Self> {
        let cursor = reply
            .get_document("cursor")
            .ok_or_else(|| DriverError::invalid_response("reply has no cursor document"))?;
        let id = cursor
            .get_i64("id")
            .ok_or_else(|| DriverError::invalid_response("cursor has no id"))?;

        let parsed = cursor
            .get_str("ns")
            .ok_or_else(|| DriverError::invalid_response("cursor has no ns"))
            .and_then(|ns| {
                let batch = read_batch(cursor, "firstBatch")?;
                let (db, collection) = split_namespace(ns)?;
                Ok((ns, db, collection, batch))
            });
        let (namespace, db, collection, batch) = match parsed {
            Ok(parts) => parts,
            Err(e) => {
                if id != 0 {
                    kill_orphan(&executor, cursor, id);
                }
                return Err(e);
            }
        };

        debug!(cursor_id = id, ns = %namespace, first_batch = batch.len(), "cursor opened");

        Ok(Self {
            executor,
            id,
            db: db.to_string(),
            collection: collection.to_string(),
            namespace: namespace.to_string(),
            buffer: batch,
            batch_size,
            post_batch_resume_token: cursor.get_document("postBatchResumeToken").cloned(),
        })
    }

    /// 다음 문서
    ///
    /// 결과가 끝나면 `Ok(None)`을 반환하고, 이후 호출도 계속 `Ok(None)`입니다.
    /// `getMore`가 실패하면 커서는 소진된 것으로 처리됩니다.
    pub async fn next(&mut self) -> DriverResult<Option<Document>> {
        loop {
            if let Some(doc) = self.buffer.pop_front() {
                return Ok(Some(doc));
            }
            if self.id == 0 {
                return Ok(None);
            }
            self.get_more().await?;
        }
    }

    /// 다음 배치를 가져와 버퍼에 채운다. 이미 버퍼에 문서가 있거나 커서가
    /// 끝났으면 아무것도 하지 않는다.
    pub(crate) async fn get_more(&mut self) -> DriverResult<()> {
        if !self.buffer.is_empty() || self.id == 0 {
            return Ok(());
        }
        let cmd = commands::get_more(self.id, &self.collection, self.batch_size);
        let reply = match self.executor.run_command(&self.db, cmd).await {
            Ok(reply) => reply,
            Err(e) => {
                self.id = 0;
                return Err(e);
            }
        };

        let parsed = reply
            .get_document("cursor")
            .ok_or_else(|| DriverError::invalid_response("getMore reply has no cursor document"))
            .and_then(|cursor| {
                let id = cursor
                    .get_i64("id")
                    .ok_or_else(|| DriverError::invalid_response("cursor has no id"))?;
                Ok((id, read_batch(cursor, "nextBatch")?))
            });
        match parsed {
            Ok((id, batch)) => {
                debug!(cursor_id = self.id, next_id = id, batch = batch.len(), "getMore");
                self.id = id;
                self.buffer = batch;
                if let Some(token) = reply
                    .get_document("cursor")
                    .and_then(|c| c.get_document("postBatchResumeToken"))
                {
                    self.post_batch_resume_token = Some(token.clone());
                }
                Ok(())
            }
            Err(e) => {
                self.id = 0;
                Err(e)
            }
        }
    }

    /// 남은 문서를 모두 모은다.
    pub async fn try_collect(mut self) -> DriverResult<Vec<Document>> {
        let mut docs = Vec::new();
        while let Some(doc) = self.next().await? {
            docs.push(doc);
        }
        Ok(docs)
    }

    /// `futures::Stream`으로 변환
    ///
    /// 에러가 나면 그 에러를 마지막 항목으로 내보내고 끝난다.
    pub fn into_stream(self) -> impl Stream<Item = DriverResult<Document>> + Send {
        stream::unfold(Some(self), |state| async move {
            let mut cursor = state?;
            match cursor.next().await {
                Ok(Some(doc)) => Some((Ok(doc), Some(cursor))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    /// 서버 커서 닫기
    ///
    /// `killCursors` 실패는 로그만 남긴다. 여러 번 호출해도 된다.
    pub async fn close(&mut self) {
        self.buffer.clear();
        if self.id == 0 {
            return;
        }
        let id = std::mem::replace(&mut self.id, 0);
        let cmd = commands::kill_cursors(&self.collection, &[id]);
        if let Err(e) = self.executor.run_command(&self.db, cmd).await {
            warn!(cursor_id = id, ns = %self.namespace, error = %e, "killCursors failed");
        }
    }

    /// 서버 커서 ID (0이면 서버 측 커서 없음)
    pub fn id(&self) -> i64 {
        self.id
    }

    /// `db.collection` 네임스페이스
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// 마지막 배치 응답의 `postBatchResumeToken` (변경 스트림 커서만 가진다)
    pub fn post_batch_resume_token(&self) -> Option<&Document> {
        self.post_batch_resume_token.as_ref()
    }

    /// 버퍼에 남은 문서 수
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// 더 받을 문서가 없는지 여부
    pub fn is_exhausted(&self) -> bool {
        self.id == 0 && self.buffer.is_empty()
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if self.id == 0 {
            return;
        }
        spawn_kill(
            self.executor.clone(),
            std::mem::take(&mut self.db),
            std::mem::take(&mut self.collection),
            std::mem::take(&mut self.namespace),
            self.id,
        );
    }
}

/// 현재 런타임에 `killCursors`를 띄운다. 런타임이 없으면 로그만 남긴다.
fn spawn_kill(executor: CommandExecutor, db: String, collection: String, ns: String, id: i64) {
    let cmd = commands::kill_cursors(&collection, &[id]);
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = executor.run_command(&db, cmd).await {
                    warn!(cursor_id = id, ns = %ns, error = %e, "killCursors on drop failed");
                }
            });
        }
        Err(_) => {
            warn!(cursor_id = id, ns = %ns, "cursor dropped outside a runtime; not killed");
        }
    }
}

/// 해석하지 못한 응답이 연 서버 커서 정리. `ns`를 알 수 없으면 정리할 수 없다.
fn kill_orphan(executor: &CommandExecutor, cursor: &Document, id: i64) {
    let ns = cursor.get_str("ns").unwrap_or_default();
    match split_namespace(ns) {
        Ok((db, collection)) => spawn_kill(
            executor.clone(),
            db.to_string(),
            collection.to_string(),
            ns.to_string(),
            id,
        ),
        Err(_) => warn!(cursor_id = id, "unparseable cursor reply without ns; cursor not killed"),
    }
}

fn read_batch(cursor: &Document, key: &str) -> DriverResult<VecDeque<Document>> {
    let batch = cursor
        .get_array(key)
        .ok_or_else(|| DriverError::invalid_response(format!("cursor has no {}", key)))?;
    batch
        .iter()
        .map(|item| match item {
            Bson::Document(doc) => Ok(doc.clone()),
            other => Err(DriverError::invalid_response(format!(
                "{} contains a {}",
                key,
                other.type_name()
            ))),
        })
        .collect()
}

fn split_namespace(ns: &str) -> DriverResult<(&str, &str)> {
    ns.split_once('.')
        .filter(|(db, coll)| !db.is_empty() && !coll.is_empty())
        .ok_or_else(|| DriverError::invalid_response(format!("invalid namespace: {}", ns)))
}
