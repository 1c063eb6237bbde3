//! Operation Options
//!
//! 각 연산의 옵션 구조체

use crate::wire::bson::{Bson, Document, Timestamp};

// ============================================================================
// FindOptions - 조회 옵션
// ============================================================================

/// `find` 옵션
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// 정렬
    pub sort: Option<Document>,
    /// 프로젝션
    pub projection: Option<Document>,
    /// 건너뛸 문서 수
    pub skip: Option<i64>,
    /// 최대 반환 문서 수
    pub limit: Option<i64>,
    /// 배치 크기
    pub batch_size: Option<i32>,
    /// 인덱스 힌트 (이름 또는 키 문서)
    pub hint: Option<Bson>,
    /// 커서를 남기지 않는 단일 배치 조회
    pub single_batch: Option<bool>,
}

impl FindOptions {
    /// 기본 옵션
    pub fn new() -> Self {
        Self::default()
    }

    /// 정렬 설정
    pub fn with_sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    /// 프로젝션 설정
    pub fn with_projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    /// skip 설정
    pub fn with_skip(mut self, skip: i64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// limit 설정
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// 배치 크기 설정
    pub fn with_batch_size(mut self, batch_size: i32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// 힌트 설정
    pub fn with_hint(mut self, hint: impl Into<Bson>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// 단일 배치 설정
    pub fn with_single_batch(mut self, single_batch: bool) -> Self {
        self.single_batch = Some(single_batch);
        self
    }
}

// ============================================================================
// AggregateOptions - 집계 옵션
// ============================================================================

/// `aggregate` 옵션
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateOptions {
    /// 첫 배치 및 getMore 배치 크기
    pub batch_size: Option<i32>,
    /// 디스크 사용 허용
    pub allow_disk_use: Option<bool>,
}

impl AggregateOptions {
    /// 기본 옵션
    pub fn new() -> Self {
        Self::default()
    }

    /// 배치 크기 설정
    pub fn with_batch_size(mut self, batch_size: i32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// allowDiskUse 설정
    pub fn with_allow_disk_use(mut self, allow: bool) -> Self {
        self.allow_disk_use = Some(allow);
        self
    }
}

// ============================================================================
// Write options
// ============================================================================

/// `update` / `replace` 옵션
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// 일치하는 문서가 없으면 삽입
    pub upsert: bool,
}

impl UpdateOptions {
    /// upsert 옵션
    pub fn upsert() -> Self {
        Self { upsert: true }
    }
}

/// `insert_many` 옵션
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertManyOptions {
    /// 첫 실패에서 중단할지 여부
    pub ordered: bool,
}

impl Default for InsertManyOptions {
    fn default() -> Self {
        Self { ordered: true }
    }
}

/// `count` 옵션
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountOptions {
    /// 건너뛸 문서 수
    pub skip: Option<i64>,
    /// 최대 개수
    pub limit: Option<i64>,
}

/// `findAndModify` 옵션
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOneAndUpdateOptions {
    /// 여러 문서가 일치할 때 고를 순서
    pub sort: Option<Document>,
    /// 프로젝션
    pub projection: Option<Document>,
    /// 일치하는 문서가 없으면 삽입
    pub upsert: bool,
    /// 수정 후 문서를 반환 (기본값은 수정 전 문서)
    pub return_new: bool,
}

// ============================================================================
// IndexModel - 인덱스 정의
// ============================================================================

/// 인덱스 정의
#[derive(Debug, Clone, PartialEq)]
pub struct IndexModel {
    /// 인덱스 키 (`{field: 1}`)
    pub keys: Document,
    /// 인덱스 이름. 없으면 키에서 생성
    pub name: Option<String>,
    /// 유니크 인덱스
    pub unique: bool,
}

impl IndexModel {
    /// 키로부터 생성
    pub fn new(keys: Document) -> Self {
        Self {
            keys,
            name: None,
            unique: false,
        }
    }

    /// 이름 지정
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 유니크 지정
    pub fn with_unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// 인덱스 이름
    ///
    /// 이름이 없으면 서버와 같은 규칙(`field_1_other_-1`)으로 만든다.
    pub fn index_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.keys
            .iter()
            .map(|(k, v)| match v {
                Bson::String(s) => format!("{}_{}", k, s),
                other => match other.as_number() {
                    Some(n) => format!("{}_{}", k, n as i64),
                    None => format!("{}_{}", k, other),
                },
            })
            .collect::<Vec<_>>()
            .join("_")
    }
}

// ============================================================================
// ChangeStreamOptions - 변경 스트림 옵션
// ============================================================================

/// 변경 스트림 옵션
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeStreamOptions {
    /// `fullDocument` (`"updateLookup"` 등)
    pub full_document: Option<String>,
    /// 이 재개 토큰 이후부터 시작
    pub resume_after: Option<Document>,
    /// 이 연산 시각부터 시작
    pub start_at_operation_time: Option<Timestamp>,
    /// 배치 크기
    pub batch_size: Option<i32>,
}

impl ChangeStreamOptions {
    /// 기본 옵션
    pub fn new() -> Self {
        Self::default()
    }

    /// fullDocument 설정
    pub fn with_full_document(mut self, mode: impl Into<String>) -> Self {
        self.full_document = Some(mode.into());
        self
    }

    /// resumeAfter 설정
    pub fn with_resume_after(mut self, token: Document) -> Self {
        self.resume_after = Some(token);
        self
    }

    /// startAtOperationTime 설정
    pub fn with_start_at_operation_time(mut self, ts: Timestamp) -> Self {
        self.start_at_operation_time = Some(ts);
        self
    }

    /// 배치 크기 설정
    pub fn with_batch_size(mut self, batch_size: i32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_index_name_generation() {
        let model = IndexModel::new(doc! { "email" => 1, "created" => -1 });
        assert_eq!(model.index_name(), "email_1_created_-1");

        let model = IndexModel::new(doc! { "bio" => "text" });
        assert_eq!(model.index_name(), "bio_text");

        let model = IndexModel::new(doc! { "a" => 1 }).with_name("custom");
        assert_eq!(model.index_name(), "custom");
    }

    #[test]
    fn test_find_options_builder() {
        let opts = FindOptions::new()
            .with_sort(doc! { "age" => -1 })
            .with_limit(5)
            .with_batch_size(2)
            .with_hint("age_-1");
        assert_eq!(opts.limit, Some(5));
        assert_eq!(opts.batch_size, Some(2));
        assert_eq!(opts.hint, Some(Bson::String("age_-1".into())));
        assert!(opts.projection.is_none());
    }

    #[test]
    fn test_insert_many_default_is_ordered() {
        assert!(InsertManyOptions::default().ordered);
    }
}
