//! Bulk Write
//!
//! 여러 쓰기 연산을 종류별 배치로 묶어 실행
//!
//! - ordered: 같은 종류의 연속된 연산끼리 묶고, 첫 실패 배치에서 멈춘다.
//! - unordered: 종류별로 모두 묶어 원래 순서 번호를 유지한 채 전부 실행한다.
//!
//! 각 배치는 서버의 `maxWriteBatchSize`와 `maxMessageSizeBytes`를 넘지 않도록 나뉜다.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::wire::bson::{encode_document, Bson, Document, ObjectIdGenerator};
use crate::wire::message::HEADER_SIZE;

use super::commands::{self, DeleteStatement, UpdateStatement};
use super::error::{DriverError, DriverResult};
use super::executor::{self, CommandExecutor};
use super::results::{count_field, upserted_entries};

// ============================================================================
// WriteModel - 쓰기 연산
// ============================================================================

/// 벌크 쓰기에 들어가는 연산 하나
#[derive(Debug, Clone, PartialEq)]
pub enum WriteModel {
    /// 문서 삽입
    InsertOne { document: Document },
    /// 일치하는 첫 문서 갱신
    UpdateOne {
        filter: Document,
        update: Document,
        upsert: bool,
    },
    /// 일치하는 모든 문서 갱신
    UpdateMany {
        filter: Document,
        update: Document,
        upsert: bool,
    },
    /// 일치하는 첫 문서 대체
    ReplaceOne {
        filter: Document,
        replacement: Document,
        upsert: bool,
    },
    /// 일치하는 첫 문서 삭제
    DeleteOne { filter: Document },
    /// 일치하는 모든 문서 삭제
    DeleteMany { filter: Document },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    Insert,
    Update,
    Delete,
}

impl WriteModel {
    fn kind(&self) -> OpKind {
        match self {
            Self::InsertOne { .. } => OpKind::Insert,
            Self::UpdateOne { .. } | Self::UpdateMany { .. } | Self::ReplaceOne { .. } => {
                OpKind::Update
            }
            Self::DeleteOne { .. } | Self::DeleteMany { .. } => OpKind::Delete,
        }
    }

    fn update_statement(&self) -> Option<UpdateStatement> {
        let (filter, update, upsert, multi) = match self {
            Self::UpdateOne {
                filter,
                update,
                upsert,
            } => (filter, update, *upsert, false),
            Self::UpdateMany {
                filter,
                update,
                upsert,
            } => (filter, update, *upsert, true),
            Self::ReplaceOne {
                filter,
                replacement,
                upsert,
            } => (filter, replacement, *upsert, false),
            _ => return None,
        };
        Some(UpdateStatement {
            filter: filter.clone(),
            update: Bson::Document(update.clone()),
            upsert,
            multi,
        })
    }

    /// 문서 시퀀스에 들어갈 문서의 인코딩 크기
    fn encoded_len(&self) -> usize {
        let statement = match self {
            Self::InsertOne { document } => return encoded_len(document),
            Self::DeleteOne { .. } | Self::DeleteMany { .. } => {
                self.delete_statement().map(|d| d.to_document())
            }
            _ => self.update_statement().map(|u| u.to_document()),
        };
        statement.as_ref().map_or(0, encoded_len)
    }

    fn delete_statement(&self) -> Option<DeleteStatement> {
        match self {
            Self::DeleteOne { filter } => Some(DeleteStatement {
                filter: filter.clone(),
                limit: 1,
            }),
            Self::DeleteMany { filter } => Some(DeleteStatement {
                filter: filter.clone(),
                limit: 0,
            }),
            _ => None,
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// 벌크 쓰기 결과
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BulkWriteResult {
    /// 삽입된 문서 수
    pub inserted_count: u64,
    /// 갱신 필터에 일치한 문서 수
    pub matched_count: u64,
    /// 변경된 문서 수
    pub modified_count: u64,
    /// 삭제된 문서 수
    pub deleted_count: u64,
    /// upsert로 삽입된 문서 수
    pub upserted_count: u64,
    /// 원래 연산 위치 → upsert된 `_id`
    pub upserted_ids: BTreeMap<usize, Bson>,
    /// 원래 연산 위치 → 삽입된 `_id`
    pub inserted_ids: BTreeMap<usize, Bson>,
}

/// 벌크 쓰기 중 개별 연산 에러
#[derive(Debug, Clone, PartialEq)]
pub struct BulkWriteError {
    /// 원래 연산 위치
    pub index: usize,
    /// 서버 에러 코드
    pub code: i32,
    /// 서버 메시지
    pub message: String,
}

/// 쓰기 보장 에러
#[derive(Debug, Clone, PartialEq)]
pub struct WriteConcernFailure {
    /// 서버 에러 코드
    pub code: i32,
    /// 서버 메시지
    pub message: String,
}

/// 벌크 쓰기 실패
///
/// 실패 전까지 적용된 결과와 어떤 연산이 전송되었는지를 함께 보고한다.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BulkWriteFailure {
    /// 부분 결과
    pub result: BulkWriteResult,
    /// 연산별 에러 (원래 위치 기준, 오름차순)
    pub write_errors: Vec<BulkWriteError>,
    /// 쓰기 보장 에러
    pub write_concern_errors: Vec<WriteConcernFailure>,
    /// 서버가 실행한 연산 위치 (ordered 실패 시 실패한 연산까지)
    pub executed: Vec<usize>,
    /// 실행되지 않은 연산 위치 (전송되지 않았거나 ordered 실패 뒤에 남은 연산)
    pub not_executed: Vec<usize>,
}

// ============================================================================
// BulkWrite - 벌크 쓰기 빌더
// ============================================================================

/// 벌크 쓰기
#[derive(Debug, Clone)]
pub struct BulkWrite {
    ordered: bool,
    models: Vec<WriteModel>,
    id_generator: Option<Arc<ObjectIdGenerator>>,
}

/// 서버로 보낼 배치 하나. `indices`는 원래 연산 위치.
#[derive(Debug, Clone, PartialEq)]
struct Batch {
    kind: OpKind,
    indices: Vec<usize>,
}

impl BulkWrite {
    /// 새 벌크 쓰기
    pub fn new(ordered: bool) -> Self {
        Self {
            ordered,
            models: Vec::new(),
            id_generator: None,
        }
    }

    /// 삽입 문서의 `_id` 생성기 지정
    pub fn with_id_generator(mut self, generator: Arc<ObjectIdGenerator>) -> Self {
        self.id_generator = Some(generator);
        self
    }

    /// 순서 보장 여부
    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// 연산 수
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// 연산이 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// 연산 추가
    pub fn add(&mut self, model: WriteModel) -> &mut Self {
        self.models.push(model);
        self
    }

    /// 삽입 추가
    pub fn insert_one(&mut self, document: Document) -> &mut Self {
        self.add(WriteModel::InsertOne { document })
    }

    /// 단일 갱신 추가
    pub fn update_one(&mut self, filter: Document, update: Document, upsert: bool) -> &mut Self {
        self.add(WriteModel::UpdateOne {
            filter,
            update,
            upsert,
        })
    }

    /// 다중 갱신 추가
    pub fn update_many(&mut self, filter: Document, update: Document, upsert: bool) -> &mut Self {
        self.add(WriteModel::UpdateMany {
            filter,
            update,
            upsert,
        })
    }

    /// 대체 추가
    pub fn replace_one(
        &mut self,
        filter: Document,
        replacement: Document,
        upsert: bool,
    ) -> &mut Self {
        self.add(WriteModel::ReplaceOne {
            filter,
            replacement,
            upsert,
        })
    }

    /// 단일 삭제 추가
    pub fn delete_one(&mut self, filter: Document) -> &mut Self {
        self.add(WriteModel::DeleteOne { filter })
    }

    /// 다중 삭제 추가
    pub fn delete_many(&mut self, filter: Document) -> &mut Self {
        self.add(WriteModel::DeleteMany { filter })
    }

    /// 실행
    ///
    /// 연산별 실패는 [`DriverError::BulkWrite`]로 보고된다. 연결 수준 에러는
    /// 그대로 전달된다.
    pub async fn execute(
        mut self,
        executor: &CommandExecutor,
        db: &str,
        collection: &str,
    ) -> DriverResult<BulkWriteResult> {
        let mut result = BulkWriteResult::default();
        if self.models.is_empty() {
            return Ok(result);
        }

        self.assign_ids(&mut result);

        let max_message = executor.max_message_size();
        let batches = self.plan(executor.max_write_batch_size(), |kind| {
            max_message.saturating_sub(self.message_overhead(kind, db, collection))
        });
        let mut write_errors = Vec::new();
        let mut write_concern_errors = Vec::new();
        let mut executed = Vec::new();
        let mut not_executed = Vec::new();
        let mut stopped = false;

        for batch in &batches {
            if stopped {
                not_executed.extend_from_slice(&batch.indices);
                continue;
            }

            let (cmd, seq) = self.build(batch, collection);
            debug!(
                kind = ?batch.kind,
                ops = batch.indices.len(),
                ordered = self.ordered,
                "bulk write batch"
            );
            let reply = executor.send_raw(db, cmd, Some(seq)).await?;

            let batch_errors = self.merge_reply(batch, &reply, &mut result);
            if let Some(wce) = reply.get_document("writeConcernError") {
                write_concern_errors.push(WriteConcernFailure {
                    code: wce.get_number("code").map(|c| c as i32).unwrap_or(0),
                    message: wce.get_str("errmsg").unwrap_or_default().to_string(),
                });
            }

            // ordered 실행은 첫 실패에서 멈추므로 그 뒤의 연산은 실행되지 않았다.
            match batch_errors.iter().map(|e| e.index).min() {
                Some(first) if self.ordered => {
                    let cut = batch.indices.partition_point(|&i| i <= first);
                    executed.extend_from_slice(&batch.indices[..cut]);
                    not_executed.extend_from_slice(&batch.indices[cut..]);
                    stopped = true;
                }
                _ => executed.extend_from_slice(&batch.indices),
            }
            write_errors.extend(batch_errors);
        }

        for index in &not_executed {
            result.inserted_ids.remove(index);
        }

        if write_errors.is_empty() && write_concern_errors.is_empty() {
            return Ok(result);
        }

        write_errors.sort_by_key(|e| e.index);
        executed.sort_unstable();
        not_executed.sort_unstable();
        Err(DriverError::BulkWrite(Box::new(BulkWriteFailure {
            result,
            write_errors,
            write_concern_errors,
            executed,
            not_executed,
        })))
    }

    /// `_id`가 없는 삽입 문서 앞에 ObjectId를 붙이고 id 목록을 만든다.
    fn assign_ids(&mut self, result: &mut BulkWriteResult) {
        let generator = self
            .id_generator
            .clone()
            .unwrap_or_else(|| Arc::new(ObjectIdGenerator::new()));
        for (index, model) in self.models.iter_mut().enumerate() {
            if let WriteModel::InsertOne { document } = model {
                let id = ensure_id(document, &generator);
                result.inserted_ids.insert(index, id);
            }
        }
    }

    /// 배치 계획
    ///
    /// `payload_budget`은 종류별로 문서 시퀀스에 쓸 수 있는 바이트 수.
    /// 예산보다 큰 연산 하나는 혼자 배치가 된다.
    fn plan<F>(&self, max_batch: usize, payload_budget: F) -> Vec<Batch>
    where
        F: Fn(OpKind) -> usize,
    {
        let mut groups: Vec<Batch> = Vec::new();
        for (index, model) in self.models.iter().enumerate() {
            let kind = model.kind();
            let target = if self.ordered {
                groups.last_mut().filter(|g| g.kind == kind)
            } else {
                groups.iter_mut().find(|g| g.kind == kind)
            };
            match target {
                Some(group) => group.indices.push(index),
                None => groups.push(Batch {
                    kind,
                    indices: vec![index],
                }),
            }
        }

        let max_batch = max_batch.max(1);
        let mut batches = Vec::new();
        for group in groups {
            let budget = payload_budget(group.kind);
            let mut current = Vec::new();
            let mut bytes = 0usize;
            for index in group.indices {
                let size = self.models[index].encoded_len();
                let full = current.len() >= max_batch
                    || (!current.is_empty() && bytes.saturating_add(size) > budget);
                if full {
                    batches.push(Batch {
                        kind: group.kind,
                        indices: std::mem::take(&mut current),
                    });
                    bytes = 0;
                }
                current.push(index);
                bytes = bytes.saturating_add(size);
            }
            if !current.is_empty() {
                batches.push(Batch {
                    kind: group.kind,
                    indices: current,
                });
            }
        }
        batches
    }

    /// 문서 시퀀스를 뺀 메시지 크기: 헤더, 플래그, 본문 섹션, 시퀀스 섹션 머리
    fn message_overhead(&self, kind: OpKind, db: &str, collection: &str) -> usize {
        let (mut body, seq) = match kind {
            OpKind::Insert => commands::insert(collection, Vec::new(), self.ordered),
            OpKind::Update => commands::update(collection, &[], self.ordered),
            OpKind::Delete => commands::delete(collection, &[], self.ordered),
        };
        body.insert("$db", db);
        HEADER_SIZE + 4 + 1 + encoded_len(&body) + 1 + 4 + seq.identifier.len() + 1
    }

    fn build(&self, batch: &Batch, collection: &str) -> (Document, crate::wire::DocumentSequence) {
        let models = batch.indices.iter().map(|&i| &self.models[i]);
        match batch.kind {
            OpKind::Insert => {
                let docs = models
                    .filter_map(|m| match m {
                        WriteModel::InsertOne { document } => Some(document.clone()),
                        _ => None,
                    })
                    .collect();
                commands::insert(collection, docs, self.ordered)
            }
            OpKind::Update => {
                let stmts: Vec<_> = models.filter_map(WriteModel::update_statement).collect();
                commands::update(collection, &stmts, self.ordered)
            }
            OpKind::Delete => {
                let stmts: Vec<_> = models.filter_map(WriteModel::delete_statement).collect();
                commands::delete(collection, &stmts, self.ordered)
            }
        }
    }

    /// 배치 응답의 카운터를 합치고, 원래 위치로 바꾼 에러 목록을 반환한다.
    fn merge_reply(
        &self,
        batch: &Batch,
        reply: &Document,
        result: &mut BulkWriteResult,
    ) -> Vec<BulkWriteError> {
        // 명령 자체가 실패하면 배치의 첫 연산에서 실패한 것으로 본다.
        if executor::check_ok(reply).is_err() {
            let first = batch.indices[0];
            let code = executor::command_error(reply).code().unwrap_or(0);
            if batch.kind == OpKind::Insert {
                for index in &batch.indices {
                    result.inserted_ids.remove(index);
                }
            }
            return vec![BulkWriteError {
                index: first,
                code,
                message: reply.get_str("errmsg").unwrap_or("command failed").to_string(),
            }];
        }

        let errors: Vec<BulkWriteError> = executor::write_errors(reply)
            .into_iter()
            .filter_map(|e| {
                batch.indices.get(e.index).map(|&index| BulkWriteError {
                    index,
                    code: e.code,
                    message: e.message,
                })
            })
            .collect();

        match batch.kind {
            OpKind::Insert => {
                result.inserted_count += count_field(reply, "n");
                // 실패한 문서와, ordered일 때 첫 실패 이후 문서는 삽입되지 않았다.
                let first_failure = errors.iter().map(|e| e.index).min();
                for index in &batch.indices {
                    let failed = errors.iter().any(|e| e.index == *index);
                    let skipped = self.ordered && first_failure.is_some_and(|f| *index > f);
                    if failed || skipped {
                        result.inserted_ids.remove(index);
                    }
                }
            }
            OpKind::Update => {
                let upserted = upserted_entries(reply);
                let n = count_field(reply, "n");
                result.matched_count += n.saturating_sub(upserted.len() as u64);
                result.modified_count += count_field(reply, "nModified");
                result.upserted_count += upserted.len() as u64;
                for (local, id) in upserted {
                    if let Some(&index) = batch.indices.get(local) {
                        result.upserted_ids.insert(index, id);
                    }
                }
            }
            OpKind::Delete => {
                result.deleted_count += count_field(reply, "n");
            }
        }
        errors
    }
}

fn encoded_len(document: &Document) -> usize {
    encode_document(document).map_or(0, |bytes| bytes.len())
}

/// 문서에 `_id`가 없으면 새 ObjectId를 맨 앞에 넣는다. 문서의 `_id`를 반환.
pub(crate) fn ensure_id(document: &mut Document, generator: &ObjectIdGenerator) -> Bson {
    match document.get("_id") {
        Some(id) => id.clone(),
        None => {
            let id = Bson::ObjectId(generator.generate());
            document.insert_first("_id", id.clone());
            id
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::driver::testing::{failure, hello_with_limits, ok, MockServer, Reply};

    /// insert/delete는 성공, update는 첫 문장이 실패하는 서버
    fn failing_update_server(cmd: &Document) -> Reply {
        match cmd.first_key() {
            Some("insert") => {
                let n = cmd.get_array("documents").map(|d| d.len()).unwrap_or(0) as i32;
                Reply::Doc(ok(doc! { "n" => n }))
            }
            Some("update") => Reply::Doc(ok(doc! {
                "n" => 0,
                "nModified" => 0,
                "writeErrors" => vec![doc! {
                    "index" => 0,
                    "code" => 9,
                    "errmsg" => "Unknown modifier: $bogus",
                }],
            })),
            Some("delete") => Reply::Doc(ok(doc! { "n" => 1 })),
            _ => Reply::Doc(failure(59, "CommandNotFound", "no such command")),
        }
    }

    fn mixed_bulk(ordered: bool) -> BulkWrite {
        let mut bulk = BulkWrite::new(ordered);
        bulk.insert_one(doc! { "_id" => 1, "x" => 1 })
            .update_one(
                doc! { "_id" => 1 },
                doc! { "$bogus" => doc! { "x" => 2 } },
                false,
            )
            .insert_one(doc! { "_id" => 2, "x" => 2 })
            .delete_one(doc! { "_id" => 3 });
        bulk
    }

    fn failure_of(err: DriverError) -> BulkWriteFailure {
        match err {
            DriverError::BulkWrite(f) => *f,
            other => panic!("expected bulk write failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ordered_stops_at_first_failure() {
        let (conn, server) = MockServer::connect(failing_update_server).await;
        let exec = CommandExecutor::new(conn);

        let err = mixed_bulk(true).execute(&exec, "app", "items").await.unwrap_err();
        let failure = failure_of(err);

        assert_eq!(server.command_names(), vec!["insert", "update"]);
        assert_eq!(failure.executed, vec![0, 1]);
        assert_eq!(failure.not_executed, vec![2, 3]);
        assert_eq!(failure.write_errors.len(), 1);
        assert_eq!(failure.write_errors[0].index, 1);
        assert_eq!(failure.write_errors[0].code, 9);
        assert_eq!(failure.result.inserted_count, 1);
        assert_eq!(failure.result.deleted_count, 0);
        assert_eq!(
            failure.result.inserted_ids.keys().copied().collect::<Vec<_>>(),
            vec![0]
        );
    }

    #[tokio::test]
    async fn test_unordered_runs_everything() {
        let (conn, server) = MockServer::connect(failing_update_server).await;
        let exec = CommandExecutor::new(conn);

        let err = mixed_bulk(false).execute(&exec, "app", "items").await.unwrap_err();
        let failure = failure_of(err);

        // 종류별로 한 배치씩, 처음 등장한 순서대로
        assert_eq!(server.command_names(), vec!["insert", "update", "delete"]);
        let commands = server.commands();
        assert_eq!(commands[0].get_array("documents").unwrap().len(), 2);
        assert_eq!(commands[0].get_bool("ordered"), Some(false));

        assert_eq!(failure.executed, vec![0, 1, 2, 3]);
        assert!(failure.not_executed.is_empty());
        assert_eq!(failure.write_errors[0].index, 1);
        assert_eq!(failure.result.inserted_count, 2);
        assert_eq!(failure.result.deleted_count, 1);
    }

    #[tokio::test]
    async fn test_success_merges_counters() {
        let (conn, _server) = MockServer::connect(|cmd| match cmd.first_key() {
            Some("update") => Reply::Doc(ok(doc! {
                "n" => 2,
                "nModified" => 1,
                "upserted" => vec![doc! { "index" => 1, "_id" => "u1" }],
            })),
            _ => Reply::Doc(ok(doc! { "n" => 1 })),
        })
        .await;
        let exec = CommandExecutor::new(conn);

        let mut bulk = BulkWrite::new(true);
        bulk.insert_one(doc! { "name" => "a" })
            .update_many(doc! {}, doc! { "$set" => doc! { "seen" => true } }, false)
            .replace_one(doc! { "_id" => "u1" }, doc! { "name" => "b" }, true);
        let result = bulk.execute(&exec, "app", "items").await.unwrap();

        assert_eq!(result.inserted_count, 1);
        assert_eq!(result.matched_count, 1);
        assert_eq!(result.modified_count, 1);
        assert_eq!(result.upserted_count, 1);
        assert_eq!(result.upserted_ids.get(&2), Some(&Bson::String("u1".into())));
        assert!(matches!(result.inserted_ids.get(&0), Some(Bson::ObjectId(_))));
    }

    #[tokio::test]
    async fn test_command_failure_reports_first_index() {
        let (conn, _server) =
            MockServer::connect(|_| Reply::Doc(failure(13, "Unauthorized", "not authorized"))).await;
        let exec = CommandExecutor::new(conn);

        let mut bulk = BulkWrite::new(true);
        bulk.delete_one(doc! { "a" => 1 }).delete_many(doc! { "b" => 1 });
        let failure = failure_of(bulk.execute(&exec, "app", "items").await.unwrap_err());

        assert_eq!(failure.write_errors.len(), 1);
        assert_eq!(failure.write_errors[0].index, 0);
        assert_eq!(failure.write_errors[0].code, 13);
        assert_eq!(failure.executed, vec![0]);
        assert_eq!(failure.not_executed, vec![1]);
    }

    #[tokio::test]
    async fn test_ordered_failure_inside_batch_splits_boundary() {
        let (conn, server) = MockServer::connect(|_| {
            Reply::Doc(ok(doc! {
                "n" => 1,
                "writeErrors" => vec![doc! {
                    "index" => 1,
                    "code" => 11000,
                    "errmsg" => "E11000 duplicate key error",
                }],
            }))
        })
        .await;
        let exec = CommandExecutor::new(conn);

        let mut bulk = BulkWrite::new(true);
        bulk.insert_one(doc! { "_id" => 1 })
            .insert_one(doc! { "_id" => 1 })
            .insert_one(doc! { "_id" => 2 })
            .delete_one(doc! { "_id" => 9 });
        let failure = failure_of(bulk.execute(&exec, "app", "items").await.unwrap_err());

        // 세 삽입은 한 배치로 전송되고, delete는 전송되지 않는다.
        assert_eq!(server.command_names(), vec!["insert"]);
        assert_eq!(failure.executed, vec![0, 1]);
        assert_eq!(failure.not_executed, vec![2, 3]);
        assert_eq!(failure.write_errors[0].index, 1);
        assert_eq!(failure.write_errors[0].code, 11000);
        assert_eq!(failure.result.inserted_count, 1);
        assert_eq!(
            failure.result.inserted_ids.keys().copied().collect::<Vec<_>>(),
            vec![0]
        );
    }

    #[tokio::test]
    async fn test_batches_split_by_message_size() {
        let (conn, server) = MockServer::connect_with_hello(hello_with_limits(2048, 1000), |cmd| {
            let n = cmd.get_array("documents").map(|d| d.len()).unwrap_or(0) as i32;
            Reply::Doc(ok(doc! { "n" => n }))
        })
        .await;
        let exec = CommandExecutor::new(conn);

        // 각 문서는 624바이트, 메시지 하나에 세 개까지 들어간다.
        let mut bulk = BulkWrite::new(true);
        for i in 0..5 {
            bulk.insert_one(doc! { "_id" => i, "pad" => "x".repeat(600) });
        }
        let result = bulk.execute(&exec, "app", "items").await.unwrap();

        assert_eq!(result.inserted_count, 5);
        let sizes: Vec<usize> = server
            .commands()
            .iter()
            .map(|c| c.get_array("documents").unwrap().len())
            .collect();
        assert_eq!(sizes, vec![3, 2]);
        assert!(exec.connection().is_ready());
    }

    #[test]
    fn test_plan_splits_at_payload_budget() {
        let mut bulk = BulkWrite::new(false);
        for i in 0..4 {
            bulk.insert_one(doc! { "_id" => i, "pad" => "x".repeat(100) });
        }
        bulk.delete_one(doc! { "_id" => 0 });

        let doc_len = bulk.models[0].encoded_len();
        let batches = bulk.plan(1000, |kind| match kind {
            OpKind::Insert => doc_len * 2,
            _ => usize::MAX,
        });
        let indices: Vec<_> = batches.into_iter().map(|b| b.indices).collect();
        assert_eq!(indices, vec![vec![0, 1], vec![2, 3], vec![4]]);
    }

    #[tokio::test]
    async fn test_empty_bulk_sends_nothing() {
        let (conn, server) = MockServer::connect(|_| Reply::Doc(ok(doc! {}))).await;
        let exec = CommandExecutor::new(conn);

        let result = BulkWrite::new(true).execute(&exec, "app", "items").await.unwrap();
        assert_eq!(result, BulkWriteResult::default());
        assert!(server.commands().is_empty());
    }

    #[test]
    fn test_plan_ordered_groups_consecutive() {
        let bulk = mixed_bulk(true);
        let kinds: Vec<_> = bulk
            .plan(1000, |_| usize::MAX)
            .into_iter()
            .map(|b| b.indices)
            .collect();
        assert_eq!(kinds, vec![vec![0], vec![1], vec![2], vec![3]]);
    }

    #[test]
    fn test_plan_unordered_groups_by_kind() {
        let bulk = mixed_bulk(false);
        let batches = bulk.plan(1000, |_| usize::MAX);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].kind, OpKind::Insert);
        assert_eq!(batches[0].indices, vec![0, 2]);
        assert_eq!(batches[1].indices, vec![1]);
        assert_eq!(batches[2].indices, vec![3]);
    }

    #[test]
    fn test_plan_splits_at_max_batch_size() {
        let mut bulk = BulkWrite::new(true);
        for i in 0..5 {
            bulk.insert_one(doc! { "i" => i });
        }
        let batches = bulk.plan(2, |_| usize::MAX);
        let sizes: Vec<_> = batches.iter().map(|b| b.indices.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(batches[2].indices, vec![4]);
    }

    #[test]
    fn test_ensure_id_prepends() {
        let generator = ObjectIdGenerator::new();
        let mut doc = doc! { "name" => "Ada" };
        let id = ensure_id(&mut doc, &generator);
        assert_eq!(doc.first_key(), Some("_id"));
        assert_eq!(doc.get("_id"), Some(&id));

        let mut doc = doc! { "_id" => 5 };
        assert_eq!(ensure_id(&mut doc, &generator), Bson::Int32(5));
    }
}
