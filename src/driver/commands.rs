//! Command Builders
//!
//! 옵션 구조체를 서버 명령 문서로 변환
//!
//! 쓰기 명령(`insert`, `update`, `delete`)은 본문과 함께 kind 1 문서 시퀀스를
//! 돌려준다. 나머지는 본문 문서 하나만 만든다. `$db`는 실행기가 붙인다.

use crate::doc;
use crate::wire::bson::{Bson, Document};
use crate::wire::DocumentSequence;

use super::options::{
    AggregateOptions, CountOptions, FindOneAndUpdateOptions, FindOptions, IndexModel,
};

// ============================================================================
// Write statements
// ============================================================================

/// `updates` 배열의 항목
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    /// 필터
    pub filter: Document,
    /// 갱신 연산자 문서, 대체 문서 또는 파이프라인
    pub update: Bson,
    /// upsert 여부
    pub upsert: bool,
    /// 일치하는 모든 문서 갱신
    pub multi: bool,
}

impl UpdateStatement {
    /// `{q, u, upsert, multi}` 문서로 변환
    pub fn to_document(&self) -> Document {
        doc! {
            "q" => self.filter.clone(),
            "u" => self.update.clone(),
            "upsert" => self.upsert,
            "multi" => self.multi,
        }
    }
}

/// `deletes` 배열의 항목
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    /// 필터
    pub filter: Document,
    /// 0이면 전부, 1이면 하나만 삭제
    pub limit: i32,
}

impl DeleteStatement {
    /// `{q, limit}` 문서로 변환
    pub fn to_document(&self) -> Document {
        doc! { "q" => self.filter.clone(), "limit" => self.limit }
    }
}

// ============================================================================
// CRUD
// ============================================================================

/// `find`
pub fn find(collection: &str, filter: Document, options: &FindOptions) -> Document {
    let mut cmd = doc! { "find" => collection, "filter" => filter };
    if let Some(sort) = &options.sort {
        cmd.insert("sort", sort.clone());
    }
    if let Some(projection) = &options.projection {
        cmd.insert("projection", projection.clone());
    }
    if let Some(skip) = options.skip {
        cmd.insert("skip", skip);
    }
    if let Some(limit) = options.limit {
        cmd.insert("limit", limit);
    }
    if let Some(batch_size) = options.batch_size {
        cmd.insert("batchSize", batch_size);
    }
    if let Some(hint) = &options.hint {
        cmd.insert("hint", hint.clone());
    }
    if let Some(single_batch) = options.single_batch {
        cmd.insert("singleBatch", single_batch);
    }
    cmd
}

/// `insert`
pub fn insert(
    collection: &str,
    documents: Vec<Document>,
    ordered: bool,
) -> (Document, DocumentSequence) {
    (
        doc! { "insert" => collection, "ordered" => ordered },
        DocumentSequence::new("documents", documents),
    )
}

/// `update`
pub fn update(
    collection: &str,
    updates: &[UpdateStatement],
    ordered: bool,
) -> (Document, DocumentSequence) {
    (
        doc! { "update" => collection, "ordered" => ordered },
        DocumentSequence::new(
            "updates",
            updates.iter().map(UpdateStatement::to_document).collect(),
        ),
    )
}

/// `delete`
pub fn delete(
    collection: &str,
    deletes: &[DeleteStatement],
    ordered: bool,
) -> (Document, DocumentSequence) {
    (
        doc! { "delete" => collection, "ordered" => ordered },
        DocumentSequence::new(
            "deletes",
            deletes.iter().map(DeleteStatement::to_document).collect(),
        ),
    )
}

/// `aggregate`
///
/// 커서 응답을 받도록 항상 `cursor` 필드를 포함한다.
pub fn aggregate(collection: &str, pipeline: Vec<Document>, options: &AggregateOptions) -> Document {
    let mut cursor = Document::new();
    if let Some(batch_size) = options.batch_size {
        cursor.insert("batchSize", batch_size);
    }
    let mut cmd = doc! {
        "aggregate" => collection,
        "pipeline" => pipeline,
        "cursor" => cursor,
    };
    if let Some(allow) = options.allow_disk_use {
        cmd.insert("allowDiskUse", allow);
    }
    cmd
}

/// `findAndModify` (update 형태)
pub fn find_and_modify(
    collection: &str,
    query: Document,
    update: Document,
    options: &FindOneAndUpdateOptions,
) -> Document {
    let mut cmd = doc! {
        "findAndModify" => collection,
        "query" => query,
        "update" => update,
    };
    if let Some(sort) = &options.sort {
        cmd.insert("sort", sort.clone());
    }
    if let Some(projection) = &options.projection {
        cmd.insert("fields", projection.clone());
    }
    if options.upsert {
        cmd.insert("upsert", true);
    }
    if options.return_new {
        cmd.insert("new", true);
    }
    cmd
}

/// `count`
pub fn count(collection: &str, query: Document, options: &CountOptions) -> Document {
    let mut cmd = doc! { "count" => collection, "query" => query };
    if let Some(skip) = options.skip {
        cmd.insert("skip", skip);
    }
    if let Some(limit) = options.limit {
        cmd.insert("limit", limit);
    }
    cmd
}

// ============================================================================
// Cursors
// ============================================================================

/// `getMore`
pub fn get_more(cursor_id: i64, collection: &str, batch_size: Option<i32>) -> Document {
    let mut cmd = doc! { "getMore" => cursor_id, "collection" => collection };
    if let Some(batch_size) = batch_size {
        cmd.insert("batchSize", batch_size);
    }
    cmd
}

/// `killCursors`
pub fn kill_cursors(collection: &str, cursor_ids: &[i64]) -> Document {
    doc! { "killCursors" => collection, "cursors" => cursor_ids.to_vec() }
}

// ============================================================================
// Indexes
// ============================================================================

/// `createIndexes`
pub fn create_indexes(collection: &str, indexes: &[IndexModel]) -> Document {
    let specs: Vec<Document> = indexes
        .iter()
        .map(|model| {
            let mut spec = doc! { "key" => model.keys.clone(), "name" => model.index_name() };
            if model.unique {
                spec.insert("unique", true);
            }
            spec
        })
        .collect();
    doc! { "createIndexes" => collection, "indexes" => specs }
}

/// `listIndexes`
pub fn list_indexes(collection: &str) -> Document {
    doc! { "listIndexes" => collection, "cursor" => Document::new() }
}

/// `dropIndexes`. `"*"` drops every index except `_id`.
pub fn drop_indexes(collection: &str, index: &str) -> Document {
    doc! { "dropIndexes" => collection, "index" => index }
}

// ============================================================================
// Collections & databases
// ============================================================================

/// `listCollections`
pub fn list_collections(filter: Option<Document>, name_only: bool) -> Document {
    let mut cmd = doc! { "listCollections" => 1, "cursor" => Document::new() };
    if let Some(filter) = filter {
        cmd.insert("filter", filter);
    }
    if name_only {
        cmd.insert("nameOnly", true);
    }
    cmd
}

/// `create`
pub fn create(collection: &str) -> Document {
    doc! { "create" => collection }
}

/// `drop`
pub fn drop(collection: &str) -> Document {
    doc! { "drop" => collection }
}

/// `dropDatabase`
pub fn drop_database() -> Document {
    doc! { "dropDatabase" => 1 }
}

/// `listDatabases`
pub fn list_databases(name_only: bool) -> Document {
    let mut cmd = doc! { "listDatabases" => 1 };
    if name_only {
        cmd.insert("nameOnly", true);
    }
    cmd
}

/// `dbStats`
pub fn db_stats() -> Document {
    doc! { "dbStats" => 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_command_fields() {
        let opts = FindOptions::new()
            .with_sort(doc! { "age" => 1 })
            .with_skip(10)
            .with_limit(5)
            .with_batch_size(2)
            .with_single_batch(true);
        let cmd = find("users", doc! { "age" => doc! { "$gt" => 20 } }, &opts);

        assert_eq!(cmd.first_key(), Some("find"));
        assert_eq!(cmd.get_str("find"), Some("users"));
        assert_eq!(cmd.get_i64("skip"), Some(10));
        assert_eq!(cmd.get_i64("limit"), Some(5));
        assert_eq!(cmd.get_i32("batchSize"), Some(2));
        assert_eq!(cmd.get_bool("singleBatch"), Some(true));
        assert!(!cmd.contains_key("projection"));
        assert!(!cmd.contains_key("hint"));
    }

    #[test]
    fn test_find_command_minimal() {
        let cmd = find("users", Document::new(), &FindOptions::default());
        assert_eq!(cmd, doc! { "find" => "users", "filter" => Document::new() });
    }

    #[test]
    fn test_update_statements() {
        let stmt = UpdateStatement {
            filter: doc! { "name" => "Ada" },
            update: Bson::Document(doc! { "$set" => doc! { "age" => 37 } }),
            upsert: false,
            multi: true,
        };
        let (cmd, seq) = update("users", &[stmt], false);
        assert_eq!(cmd, doc! { "update" => "users", "ordered" => false });
        assert_eq!(seq.identifier, "updates");
        assert_eq!(
            seq.documents[0],
            doc! {
                "q" => doc! { "name" => "Ada" },
                "u" => doc! { "$set" => doc! { "age" => 37 } },
                "upsert" => false,
                "multi" => true,
            }
        );
    }

    #[test]
    fn test_delete_statements() {
        let (cmd, seq) = delete(
            "users",
            &[DeleteStatement {
                filter: doc! {},
                limit: 0,
            }],
            true,
        );
        assert_eq!(cmd.get_str("delete"), Some("users"));
        assert_eq!(seq.identifier, "deletes");
        assert_eq!(seq.documents[0].get_i32("limit"), Some(0));
    }

    #[test]
    fn test_aggregate_always_requests_cursor() {
        let cmd = aggregate("orders", vec![doc! { "$match" => doc! {} }], &AggregateOptions::default());
        assert_eq!(cmd.get_document("cursor"), Some(&Document::new()));

        let cmd = aggregate("orders", vec![], &AggregateOptions::new().with_batch_size(50));
        assert_eq!(
            cmd.get_document("cursor").and_then(|c| c.get_i32("batchSize")),
            Some(50)
        );
    }

    #[test]
    fn test_get_more_and_kill_cursors() {
        assert_eq!(
            get_more(42, "users", Some(10)),
            doc! { "getMore" => 42_i64, "collection" => "users", "batchSize" => 10 }
        );
        assert_eq!(
            kill_cursors("users", &[42]),
            doc! { "killCursors" => "users", "cursors" => vec![42_i64] }
        );
    }

    #[test]
    fn test_create_indexes() {
        let cmd = create_indexes(
            "users",
            &[IndexModel::new(doc! { "email" => 1 }).with_unique(true)],
        );
        let specs = cmd.get_array("indexes").unwrap();
        let spec = specs[0].as_document().unwrap();
        assert_eq!(spec.get_str("name"), Some("email_1"));
        assert_eq!(spec.get_bool("unique"), Some(true));
    }

    #[test]
    fn test_find_and_modify() {
        let opts = FindOneAndUpdateOptions {
            return_new: true,
            ..Default::default()
        };
        let cmd = find_and_modify(
            "counters",
            doc! { "_id" => "seq" },
            doc! { "$inc" => doc! { "n" => 1 } },
            &opts,
        );
        assert_eq!(cmd.get_bool("new"), Some(true));
        assert!(!cmd.contains_key("upsert"));
    }
}
