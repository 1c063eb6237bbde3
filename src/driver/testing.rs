//! In-process mock server for tests.
//!
//! Speaks OP_MSG over a `tokio::io::duplex` pipe. Each received command is
//! recorded, then handed to a handler closure that scripts the reply.

use std::sync::Arc;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio_util::codec::{Encoder, Framed};
use tracing_subscriber::EnvFilter;

use crate::doc;
use crate::wire::bson::{Bson, Document};
use crate::wire::message::flags;
use crate::wire::{MessageCodec, OpMsg};

use super::config::ClientConfig;
use super::connection::Connection;

/// What the mock sends back for one request.
pub(crate) enum Reply {
    /// One frame answering the request
    Doc(Document),
    /// One frame with a `responseTo` that answers nothing
    WrongResponseTo(Document),
    /// Several frames chained with moreToCome
    Chain(Vec<Document>),
    /// A frame cut short, then EOF
    Truncated(Document),
    /// Drop the stream
    Close,
    /// Never answer
    Hang,
}

/// Scripted server half of a duplex pipe.
pub(crate) struct MockServer {
    received: Arc<Mutex<Vec<OpMsg>>>,
    task: JoinHandle<()>,
}

impl MockServer {
    /// Serve `io` until the client goes away. `handler` sees every command,
    /// including the handshake.
    pub(crate) fn serve<F>(io: DuplexStream, mut handler: F) -> Self
    where
        F: FnMut(&Document) -> Reply + Send + 'static,
    {
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = received.clone();

        let task = tokio::spawn(async move {
            let mut framed = Framed::new(io, MessageCodec::new());
            let mut next_id = 1000;

            while let Some(Ok(msg)) = framed.next().await {
                let request_id = msg.header().request_id;
                let body = msg.merged_body();
                log.lock().push(msg);

                match handler(&body) {
                    Reply::Doc(doc) => {
                        next_id += 1;
                        let reply = OpMsg::new(next_id, request_id, 0, doc, vec![]);
                        if framed.send(reply).await.is_err() {
                            return;
                        }
                    }
                    Reply::WrongResponseTo(doc) => {
                        next_id += 1;
                        let reply = OpMsg::new(next_id, request_id + 100, 0, doc, vec![]);
                        if framed.send(reply).await.is_err() {
                            return;
                        }
                    }
                    Reply::Chain(docs) => {
                        let mut answer_to = request_id;
                        let last = docs.len().saturating_sub(1);
                        for (i, doc) in docs.into_iter().enumerate() {
                            next_id += 1;
                            let flag_bits = if i < last { flags::MORE_TO_COME } else { 0 };
                            let reply = OpMsg::new(next_id, answer_to, flag_bits, doc, vec![]);
                            if framed.send(reply).await.is_err() {
                                return;
                            }
                            answer_to = next_id;
                        }
                    }
                    Reply::Truncated(doc) => {
                        next_id += 1;
                        let mut frame = BytesMut::new();
                        let reply = OpMsg::new(next_id, request_id, 0, doc, vec![]);
                        if MessageCodec::new().encode(reply, &mut frame).is_err() {
                            return;
                        }
                        let mut io = framed.into_inner();
                        let _ = io.write_all(&frame[..frame.len() - 3]).await;
                        let _ = io.shutdown().await;
                        return;
                    }
                    Reply::Close => return,
                    Reply::Hang => std::future::pending::<()>().await,
                }
            }
        });

        Self { received, task }
    }

    /// Connect a client through a fresh pipe. The handshake is answered with
    /// [`hello_reply`]; `handler` sees only the commands after it.
    pub(crate) async fn connect<F>(handler: F) -> (Arc<Connection>, MockServer)
    where
        F: FnMut(&Document) -> Reply + Send + 'static,
    {
        Self::connect_with_hello(hello_reply(), handler).await
    }

    /// Like [`MockServer::connect`], answering the handshake with `hello`.
    pub(crate) async fn connect_with_hello<F>(
        hello: Document,
        mut handler: F,
    ) -> (Arc<Connection>, MockServer)
    where
        F: FnMut(&Document) -> Reply + Send + 'static,
    {
        init_tracing();
        let (client, server_io) = tokio::io::duplex(1 << 20);
        let server = Self::serve(server_io, move |cmd| {
            if is_handshake(cmd) {
                Reply::Doc(hello.clone())
            } else {
                handler(cmd)
            }
        });
        let conn = Connection::from_stream(client, &ClientConfig::default())
            .await
            .expect("mock handshake");
        (Arc::new(conn), server)
    }

    /// Every command received, including the handshake, with document
    /// sequences folded into their bodies.
    pub(crate) fn all_commands(&self) -> Vec<Document> {
        self.received.lock().iter().map(OpMsg::merged_body).collect()
    }

    /// Commands received after the handshake.
    pub(crate) fn commands(&self) -> Vec<Document> {
        self.all_commands()
            .into_iter()
            .filter(|c| !is_handshake(c))
            .collect()
    }

    /// Names of the commands received after the handshake.
    pub(crate) fn command_names(&self) -> Vec<String> {
        self.commands()
            .iter()
            .filter_map(|c| c.first_key().map(str::to_string))
            .collect()
    }

    /// Raw messages received, in order.
    pub(crate) fn messages(&self) -> Vec<OpMsg> {
        self.received.lock().clone()
    }

    /// Request ids of every message received.
    pub(crate) fn request_ids(&self) -> Vec<i32> {
        self.received
            .lock()
            .iter()
            .map(|m| m.header().request_id)
            .collect()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Send log output to the test harness, filtered by `RUST_LOG`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn is_handshake(cmd: &Document) -> bool {
    matches!(cmd.first_key(), Some("hello") | Some("isMaster"))
}

/// A handshake reply from a modern standalone server.
pub(crate) fn hello_reply() -> Document {
    doc! {
        "isWritablePrimary" => true,
        "maxBsonObjectSize" => 16_777_216,
        "maxMessageSizeBytes" => 48_000_000,
        "maxWriteBatchSize" => 100_000,
        "localTime" => crate::wire::bson::DateTime::now(),
        "connectionId" => 7,
        "minWireVersion" => 0,
        "maxWireVersion" => 21,
        "ok" => 1.0,
    }
}

/// [`hello_reply`] with smaller server limits.
pub(crate) fn hello_with_limits(max_message_size: i64, max_write_batch_size: i64) -> Document {
    let mut hello = hello_reply();
    hello.insert("maxMessageSizeBytes", max_message_size);
    hello.insert("maxWriteBatchSize", max_write_batch_size);
    hello
}

/// `doc` with `ok: 1.0` appended.
pub(crate) fn ok(mut doc: Document) -> Document {
    doc.insert("ok", 1.0);
    doc
}

/// A command failure reply.
pub(crate) fn failure(code: i32, code_name: &str, errmsg: &str) -> Document {
    doc! { "ok" => 0.0, "errmsg" => errmsg, "code" => code, "codeName" => code_name }
}

/// A cursor reply carrying `firstBatch` or `nextBatch`.
pub(crate) fn cursor_reply(id: i64, ns: &str, batch: Vec<Document>, first: bool) -> Document {
    let key = if first { "firstBatch" } else { "nextBatch" };
    let batch: Vec<Bson> = batch.into_iter().map(Bson::Document).collect();
    ok(doc! { "cursor" => doc! { key => batch, "id" => id, "ns" => ns } })
}
