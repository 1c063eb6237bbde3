//! Client, Database, Collection
//!
//! 명령 문서를 조립해 실행기에 넘기는 얇은 핸들

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::wire::bson::{Bson, Document, ObjectIdGenerator};

use super::bulk::{ensure_id, BulkWrite, BulkWriteResult};
use super::change_stream::ChangeStream;
use super::commands::{self, DeleteStatement, UpdateStatement};
use super::config::ClientConfig;
use super::connection::Connection;
use super::cursor::Cursor;
use super::error::{DriverError, DriverResult};
use super::executor::{check_write_errors, CommandExecutor};
use super::options::{
    AggregateOptions, ChangeStreamOptions, CountOptions, FindOneAndUpdateOptions, FindOptions,
    IndexModel, InsertManyOptions, UpdateOptions,
};
use super::results::{count_field, DeleteResult, InsertManyResult, InsertOneResult, UpdateResult};

/// NamespaceNotFound
const NAMESPACE_NOT_FOUND: i32 = 26;

// ============================================================================
// Client - 클라이언트
// ============================================================================

/// MongoDB 클라이언트
///
/// 연결 하나를 소유하며 복제 비용이 작다. 복제본은 같은 연결과
/// ObjectId 생성기를 공유한다.
#[derive(Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    executor: CommandExecutor,
    id_generator: Arc<ObjectIdGenerator>,
}

impl Client {
    /// URI로 연결
    pub async fn connect(uri: &str) -> DriverResult<Self> {
        let config = ClientConfig::new(uri)?;
        Self::with_config(config).await
    }

    /// 설정으로 연결
    pub async fn with_config(config: ClientConfig) -> DriverResult<Self> {
        let conn = Connection::connect(&config.address, &config).await?;
        info!(address = %config.address, "client connected");
        Ok(Self::from_connection(Arc::new(conn), config))
    }

    /// 이미 핸드셰이크를 마친 연결로 생성
    pub fn from_connection(conn: Arc<Connection>, config: ClientConfig) -> Self {
        Self {
            config: Arc::new(config),
            executor: CommandExecutor::new(conn),
            id_generator: Arc::new(ObjectIdGenerator::new()),
        }
    }

    /// 데이터베이스 핸들
    pub fn database(&self, name: &str) -> Database {
        Database {
            client: self.clone(),
            name: name.to_string(),
        }
    }

    /// URI에 지정된 기본 데이터베이스
    pub fn default_database(&self) -> Option<Database> {
        self.config
            .default_database
            .as_deref()
            .map(|name| self.database(name))
    }

    /// 데이터베이스 목록 (`listDatabases`의 `databases` 배열)
    pub async fn list_databases(&self) -> DriverResult<Vec<Document>> {
        let reply = self
            .executor
            .run_command("admin", commands::list_databases(false))
            .await?;
        Ok(documents_in(&reply, "databases"))
    }

    /// 데이터베이스 이름 목록
    pub async fn list_database_names(&self) -> DriverResult<Vec<String>> {
        let reply = self
            .executor
            .run_command("admin", commands::list_databases(true))
            .await?;
        Ok(documents_in(&reply, "databases")
            .iter()
            .filter_map(|d| d.get_str("name").map(str::to_string))
            .collect())
    }

    /// 연결 종료
    pub async fn close(&self) -> DriverResult<()> {
        self.executor.connection().close().await
    }

    /// 클라이언트 설정
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// 명령 실행기
    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    /// ObjectId 생성기
    pub fn id_generator(&self) -> &Arc<ObjectIdGenerator> {
        &self.id_generator
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.config.address)
            .field("connection", self.executor.connection())
            .finish()
    }
}

// ============================================================================
// Database - 데이터베이스
// ============================================================================

/// 데이터베이스 핸들
#[derive(Debug, Clone)]
pub struct Database {
    client: Client,
    name: String,
}

impl Database {
    /// 데이터베이스 이름
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 컬렉션 핸들
    pub fn collection(&self, name: &str) -> Collection {
        Collection {
            client: self.client.clone(),
            db: self.name.clone(),
            name: name.to_string(),
        }
    }

    /// 임의 명령 실행
    pub async fn run_command(&self, command: Document) -> DriverResult<Document> {
        self.client.executor.run_command(&self.name, command).await
    }

    /// 컬렉션 목록 커서
    pub async fn list_collections(&self, filter: Option<Document>) -> DriverResult<Cursor> {
        let reply = self
            .run_command(commands::list_collections(filter, false))
            .await?;
        Cursor::from_reply(self.client.executor.clone(), &reply, None)
    }

    /// 컬렉션 이름 목록
    pub async fn list_collection_names(&self) -> DriverResult<Vec<String>> {
        let reply = self
            .run_command(commands::list_collections(None, true))
            .await?;
        let cursor = Cursor::from_reply(self.client.executor.clone(), &reply, None)?;
        Ok(cursor
            .try_collect()
            .await?
            .iter()
            .filter_map(|d| d.get_str("name").map(str::to_string))
            .collect())
    }

    /// 컬렉션 생성
    pub async fn create_collection(&self, name: &str) -> DriverResult<()> {
        self.client
            .executor
            .run_write_command(&self.name, commands::create(name))
            .await?;
        Ok(())
    }

    /// 데이터베이스 삭제
    pub async fn drop(&self) -> DriverResult<()> {
        self.client
            .executor
            .run_write_command(&self.name, commands::drop_database())
            .await?;
        Ok(())
    }

    /// `dbStats`
    pub async fn stats(&self) -> DriverResult<Document> {
        self.run_command(commands::db_stats()).await
    }
}

// ============================================================================
// Collection - 컬렉션
// ============================================================================

/// 컬렉션 핸들
#[derive(Debug, Clone)]
pub struct Collection {
    client: Client,
    db: String,
    name: String,
}

impl Collection {
    /// 컬렉션 이름
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `db.collection`
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.db, self.name)
    }

    fn executor(&self) -> &CommandExecutor {
        &self.client.executor
    }

    // ------------------------------------------------------------------------
    // Inserts
    // ------------------------------------------------------------------------

    /// 문서 하나 삽입
    ///
    /// `_id`가 없으면 새 ObjectId를 맨 앞에 붙인다.
    pub async fn insert_one(&self, mut document: Document) -> DriverResult<InsertOneResult> {
        let inserted_id = ensure_id(&mut document, &self.client.id_generator);
        let (cmd, seq) = commands::insert(&self.name, vec![document], true);
        let reply = self
            .executor()
            .run_command_with_sequence(&self.db, cmd, seq)
            .await?;
        check_write_errors(&reply)?;
        debug!(ns = %self.namespace(), id = %inserted_id, "inserted one");
        Ok(InsertOneResult { inserted_id })
    }

    /// 여러 문서 삽입
    ///
    /// 서버의 최대 배치 크기에 맞춰 나뉘어 전송된다. 일부가 실패하면
    /// [`DriverError::BulkWrite`]를 반환한다.
    pub async fn insert_many(
        &self,
        documents: Vec<Document>,
        options: InsertManyOptions,
    ) -> DriverResult<InsertManyResult> {
        let mut bulk = BulkWrite::new(options.ordered).with_id_generator(self.client.id_generator.clone());
        for document in documents {
            bulk.insert_one(document);
        }
        let result = bulk.execute(self.executor(), &self.db, &self.name).await?;
        Ok(InsertManyResult {
            inserted_ids: result.inserted_ids,
        })
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// 조회 커서
    pub async fn find(&self, filter: Document, options: FindOptions) -> DriverResult<Cursor> {
        let mut options = options;
        if options.batch_size.is_none() {
            options.batch_size = self.client.config.default_batch_size;
        }
        let cmd = commands::find(&self.name, filter, &options);
        let reply = self.executor().run_command(&self.db, cmd).await?;
        Cursor::from_reply(self.executor().clone(), &reply, options.batch_size)
    }

    /// 첫 번째 일치 문서
    pub async fn find_one(&self, filter: Document) -> DriverResult<Option<Document>> {
        let options = FindOptions::new().with_limit(1).with_single_batch(true);
        let mut cursor = self.find(filter, options).await?;
        let doc = cursor.next().await?;
        cursor.close().await;
        Ok(doc)
    }

    /// 일치하는 문서 수
    pub async fn count_documents(&self, filter: Document) -> DriverResult<u64> {
        let cmd = commands::count(&self.name, filter, &CountOptions::default());
        let reply = self.executor().run_command(&self.db, cmd).await?;
        Ok(count_field(&reply, "n"))
    }

    /// 집계 커서
    pub async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: AggregateOptions,
    ) -> DriverResult<Cursor> {
        let cmd = commands::aggregate(&self.name, pipeline, &options);
        let reply = self.executor().run_command(&self.db, cmd).await?;
        Cursor::from_reply(self.executor().clone(), &reply, options.batch_size)
    }

    // ------------------------------------------------------------------------
    // Updates & deletes
    // ------------------------------------------------------------------------

    /// 일치하는 첫 문서 갱신
    pub async fn update_one(
        &self,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DriverResult<UpdateResult> {
        self.update(filter, Bson::Document(update), options.upsert, false)
            .await
    }

    /// 일치하는 모든 문서 갱신
    pub async fn update_many(
        &self,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DriverResult<UpdateResult> {
        self.update(filter, Bson::Document(update), options.upsert, true)
            .await
    }

    /// 일치하는 첫 문서 대체
    pub async fn replace_one(
        &self,
        filter: Document,
        replacement: Document,
        options: UpdateOptions,
    ) -> DriverResult<UpdateResult> {
        if replacement.keys().any(|k| k.starts_with('$')) {
            return Err(DriverError::configuration(
                "replacement document must not contain update operators",
            ));
        }
        self.update(filter, Bson::Document(replacement), options.upsert, false)
            .await
    }

    async fn update(
        &self,
        filter: Document,
        update: Bson,
        upsert: bool,
        multi: bool,
    ) -> DriverResult<UpdateResult> {
        let stmt = UpdateStatement {
            filter,
            update,
            upsert,
            multi,
        };
        let (cmd, seq) = commands::update(&self.name, &[stmt], true);
        let reply = self
            .executor()
            .run_command_with_sequence(&self.db, cmd, seq)
            .await?;
        check_write_errors(&reply)?;
        Ok(UpdateResult::from_reply(&reply))
    }

    /// 일치하는 첫 문서 삭제
    pub async fn delete_one(&self, filter: Document) -> DriverResult<DeleteResult> {
        self.delete(filter, 1).await
    }

    /// 일치하는 모든 문서 삭제
    pub async fn delete_many(&self, filter: Document) -> DriverResult<DeleteResult> {
        self.delete(filter, 0).await
    }

    async fn delete(&self, filter: Document, limit: i32) -> DriverResult<DeleteResult> {
        let (cmd, seq) = commands::delete(&self.name, &[DeleteStatement { filter, limit }], true);
        let reply = self
            .executor()
            .run_command_with_sequence(&self.db, cmd, seq)
            .await?;
        check_write_errors(&reply)?;
        Ok(DeleteResult::from_reply(&reply))
    }

    /// 찾아서 갱신하고 문서를 반환
    ///
    /// 기본은 갱신 전 문서이며 `return_new`이면 갱신 후 문서다.
    pub async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        options: FindOneAndUpdateOptions,
    ) -> DriverResult<Option<Document>> {
        let cmd = commands::find_and_modify(&self.name, filter, update, &options);
        let reply = self.executor().run_command(&self.db, cmd).await?;
        check_write_errors(&reply)?;
        match reply.get("value") {
            Some(Bson::Document(doc)) => Ok(Some(doc.clone())),
            Some(Bson::Null) | None => Ok(None),
            Some(other) => Err(DriverError::invalid_response(format!(
                "findAndModify value is a {}",
                other.type_name()
            ))),
        }
    }

    /// 벌크 쓰기 실행
    pub async fn bulk_write(&self, bulk: BulkWrite) -> DriverResult<BulkWriteResult> {
        bulk.with_id_generator(self.client.id_generator.clone())
            .execute(self.executor(), &self.db, &self.name)
            .await
    }

    // ------------------------------------------------------------------------
    // Indexes
    // ------------------------------------------------------------------------

    /// 인덱스 생성. 생성된 인덱스 이름을 반환한다.
    pub async fn create_index(&self, model: IndexModel) -> DriverResult<String> {
        let name = model.index_name();
        let cmd = commands::create_indexes(&self.name, &[model]);
        self.executor().run_write_command(&self.db, cmd).await?;
        Ok(name)
    }

    /// 인덱스 목록 커서
    pub async fn list_indexes(&self) -> DriverResult<Cursor> {
        let reply = self
            .executor()
            .run_command(&self.db, commands::list_indexes(&self.name))
            .await?;
        Cursor::from_reply(self.executor().clone(), &reply, None)
    }

    /// 인덱스 삭제
    pub async fn drop_index(&self, name: &str) -> DriverResult<()> {
        self.executor()
            .run_write_command(&self.db, commands::drop_indexes(&self.name, name))
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Collection management
    // ------------------------------------------------------------------------

    /// 컬렉션 삭제. 없는 컬렉션이면 아무것도 하지 않는다.
    pub async fn drop(&self) -> DriverResult<()> {
        match self
            .executor()
            .run_write_command(&self.db, commands::drop(&self.name))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some(NAMESPACE_NOT_FOUND) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// 변경 스트림 열기
    pub async fn watch(
        &self,
        pipeline: Vec<Document>,
        options: ChangeStreamOptions,
    ) -> DriverResult<ChangeStream> {
        ChangeStream::open(
            self.executor().clone(),
            &self.db,
            &self.name,
            pipeline,
            options,
        )
        .await
    }
}

fn documents_in(reply: &Document, key: &str) -> Vec<Document> {
    reply
        .get_array(key)
        .unwrap_or_default()
        .iter()
        .filter_map(Bson::as_document)
        .cloned()
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
