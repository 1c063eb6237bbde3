//! Driver Module
//!
//! MongoDB 클라이언트 드라이버
//!
//! # Components
//!
//! - 연결: 핸드셰이크, 요청 직렬화 (Connection, ClientConfig)
//! - 명령 실행: `$db` 부착과 응답 검사 (CommandExecutor, commands)
//! - 커서: `getMore` / `killCursors` 기반 배치 조회 (Cursor)
//! - 벌크 쓰기: 종류별 배치 분할과 에러 위치 보고 (BulkWrite)
//! - 변경 스트림: 재개 토큰 기반 자동 재개 (ChangeStream)
//! - 핸들: Client, Database, Collection
//!
//! # Example
//!
//! ```ignore
//! use mongowire::doc;
//! use mongowire::driver::{Client, FindOptions, UpdateOptions};
//!
//! let client = Client::connect("mongodb://localhost:27017/app?appName=demo").await?;
//! let people = client.database("app").collection("people");
//!
//! // 삽입 (`_id` 자동 생성)
//! let inserted = people.insert_one(doc! { "name" => "Ada", "age" => 36 }).await?;
//!
//! // 조회
//! let mut cursor = people
//!     .find(doc! { "age" => doc! { "$gt" => 30 } }, FindOptions::new().with_batch_size(100))
//!     .await?;
//! while let Some(person) = cursor.next().await? {
//!     println!("{}", person);
//! }
//!
//! // 갱신
//! people
//!     .update_one(
//!         doc! { "_id" => inserted.inserted_id },
//!         doc! { "$set" => doc! { "age" => 37 } },
//!         UpdateOptions::default(),
//!     )
//!     .await?;
//!
//! client.close().await?;
//! ```
//!
//! # Bulk Write Example
//!
//! ```ignore
//! use mongowire::driver::BulkWrite;
//!
//! let mut bulk = BulkWrite::new(false);
//! bulk.insert_one(doc! { "sku" => "a-1" })
//!     .update_many(doc! { "sku" => "b-2" }, doc! { "$inc" => doc! { "qty" => 1 } }, false)
//!     .delete_one(doc! { "sku" => "c-3" });
//!
//! match people.bulk_write(bulk).await {
//!     Ok(result) => println!("inserted {}", result.inserted_count),
//!     Err(DriverError::BulkWrite(failure)) => {
//!         for err in &failure.write_errors {
//!             eprintln!("op {} failed: {}", err.index, err.message);
//!         }
//!     }
//!     Err(e) => return Err(e),
//! }
//! ```

pub mod commands;
mod bulk;
mod change_stream;
mod client;
mod config;
mod connection;
mod cursor;
mod error;
mod executor;
mod options;
mod results;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use bulk::{
    BulkWrite, BulkWriteError, BulkWriteFailure, BulkWriteResult, WriteConcernFailure, WriteModel,
};
pub use change_stream::ChangeStream;
pub use client::{Client, Collection, Database};
pub use commands::{DeleteStatement, UpdateStatement};
pub use config::{
    ClientConfig, ClientConfigBuilder, ConnectionString, Credentials, ServerAddress,
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_PORT,
};
pub use connection::{AsyncStream, Connection, ConnectionState};
pub use cursor::Cursor;
pub use error::{DriverError, DriverResult};
pub use executor::{CommandExecutor, WriteErrorEntry};
pub use options::{
    AggregateOptions, ChangeStreamOptions, CountOptions, FindOneAndUpdateOptions, FindOptions,
    IndexModel, InsertManyOptions, UpdateOptions,
};
pub use results::{DeleteResult, InsertManyResult, InsertOneResult, UpdateResult};
