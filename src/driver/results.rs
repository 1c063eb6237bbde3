//! Operation Results
//!
//! 쓰기 연산 결과

use std::collections::BTreeMap;

use crate::wire::bson::{Bson, Document};

/// `insert_one` 결과
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOneResult {
    /// 삽입된 문서의 `_id`
    pub inserted_id: Bson,
}

/// `insert_many` 결과
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InsertManyResult {
    /// 입력 위치 → `_id`
    pub inserted_ids: BTreeMap<usize, Bson>,
}

/// `update_*` / `replace_one` 결과
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateResult {
    /// 필터에 일치한 문서 수
    pub matched_count: u64,
    /// 실제로 변경된 문서 수
    pub modified_count: u64,
    /// upsert로 삽입된 문서의 `_id`
    pub upserted_id: Option<Bson>,
}

impl UpdateResult {
    /// `update` 명령 응답에서 생성
    ///
    /// 서버의 `n`은 upsert된 문서를 포함하므로 일치 수에서 뺀다.
    pub(crate) fn from_reply(reply: &Document) -> Self {
        let upserted = upserted_entries(reply);
        let n = count_field(reply, "n");
        Self {
            matched_count: n.saturating_sub(upserted.len() as u64),
            modified_count: count_field(reply, "nModified"),
            upserted_id: upserted.into_iter().next().map(|(_, id)| id),
        }
    }
}

/// `delete_*` 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeleteResult {
    /// 삭제된 문서 수
    pub deleted_count: u64,
}

impl DeleteResult {
    pub(crate) fn from_reply(reply: &Document) -> Self {
        Self {
            deleted_count: count_field(reply, "n"),
        }
    }
}

/// 숫자 필드를 개수로 읽기 (없으면 0)
pub(crate) fn count_field(reply: &Document, key: &str) -> u64 {
    reply
        .get_number(key)
        .filter(|n| *n > 0.0)
        .map(|n| n as u64)
        .unwrap_or(0)
}

/// `upserted: [{index, _id}]` 파싱
pub(crate) fn upserted_entries(reply: &Document) -> Vec<(usize, Bson)> {
    reply
        .get_array("upserted")
        .unwrap_or_default()
        .iter()
        .filter_map(Bson::as_document)
        .filter_map(|entry| {
            let index = entry.get_number("index")? as usize;
            let id = entry.get("_id")?.clone();
            Some((index, id))
        })
        .collect()
}
