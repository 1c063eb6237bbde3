//! # mongowire
//!
//! A MongoDB client driver that speaks BSON and OP_MSG directly over a socket.
//!
//! ## Features
//!
//! - **BSON** - Complete encoder/decoder with key-order-preserving documents
//! - **Extended JSON** - Canonical and relaxed sentinels in, canonical out
//! - **OP_MSG** - Body and document-sequence sections, CRC-32C checksums, moreToCome chains
//! - **Async/Await** - Built on Tokio; one request in flight per connection
//! - **Cursors** - Batched results with `getMore`, best-effort `killCursors` on drop
//! - **Bulk writes** - Ordered and unordered batches with per-operation error positions
//! - **Change streams** - Resume-token tracking and automatic single resume
//!
//! ## Quick Start
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! mongowire = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use mongowire::{doc, Client, FindOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::connect("mongodb://localhost:27017/?appName=quickstart").await?;
//!     let people = client.database("app").collection("people");
//!
//!     let inserted = people.insert_one(doc! { "name" => "Ada", "age" => 36 }).await?;
//!     println!("inserted {}", inserted.inserted_id);
//!
//!     let mut cursor = people.find(doc! {}, FindOptions::new().with_batch_size(50)).await?;
//!     while let Some(person) = cursor.next().await? {
//!         println!("{}", person);
//!     }
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Extended JSON
//!
//! ```rust
//! use mongowire::wire::bson::{document_from_extended_json, Bson};
//!
//! let doc = document_from_extended_json(r#"{"n": {"$numberLong": "42"}}"#).unwrap();
//! assert_eq!(doc.get("n"), Some(&Bson::Int64(42)));
//! ```
//!
//! ## Configuration
//!
//! Customize connection behavior with [`ClientConfig`]:
//!
//! ```rust
//! use mongowire::ClientConfig;
//! use std::time::Duration;
//!
//! let config = ClientConfig::builder("mongodb://db.internal:27017/app")
//!     .unwrap()
//!     .with_app_name("billing")
//!     .with_connect_timeout(Duration::from_secs(3))
//!     .with_default_batch_size(500)
//!     .build();
//! assert_eq!(config.address.port, 27017);
//! ```
//!
//! ## Error Handling
//!
//! All driver operations return [`DriverResult`]:
//!
//! ```rust,no_run
//! # use mongowire::{doc, Client, DriverError};
//! # async fn example(client: Client) {
//! match client.database("app").run_command(doc! { "ping" => 1 }).await {
//!     Ok(reply) => println!("{}", reply),
//!     Err(DriverError::CommandFailed { code, message, .. }) => eprintln!("{}: {}", code, message),
//!     Err(e) if e.is_connection_fatal() => eprintln!("reconnect needed: {}", e),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`driver`] - Connection, commands, cursors, bulk writes, change streams
//! - [`wire`] - BSON, Extended JSON and OP_MSG framing
//!

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod driver;
pub mod wire;

// Re-exports for convenience
pub use driver::{
    BulkWrite, BulkWriteFailure, BulkWriteResult, ChangeStream, ChangeStreamOptions, Client,
    ClientConfig, ClientConfigBuilder, Collection, CommandExecutor, Connection, Cursor, Database,
    DriverError, DriverResult, FindOptions, ServerAddress, UpdateOptions,
};

pub use wire::bson::{Bson, Document, ObjectId};
pub use wire::{WireError, WireResult};
