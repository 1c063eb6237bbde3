//! Change Stream
//!
//! `$changeStream` 집계 커서 위의 재개 가능한 이벤트 스트림

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::doc;
use crate::wire::bson::{Document, Timestamp};

use super::commands;
use super::cursor::Cursor;
use super::error::{DriverError, DriverResult};
use super::executor::CommandExecutor;
use super::options::{AggregateOptions, ChangeStreamOptions};

/// 변경 스트림
///
/// 각 이벤트의 `_id`를 재개 토큰으로 보관하고, 재개 가능한 에러를 받으면
/// 그 토큰으로 한 번 다시 연다. 배치를 다 읽으면 서버가 준
/// `postBatchResumeToken`이 재개 토큰이 된다.
#[derive(Debug)]
pub struct ChangeStream {
    executor: CommandExecutor,
    db: String,
    collection: String,
    pipeline: Vec<Document>,
    options: ChangeStreamOptions,
    cursor: Cursor,
    resume_token: Option<Document>,
    operation_time: Option<Timestamp>,
}

impl ChangeStream {
    /// 변경 스트림 열기
    pub async fn open(
        executor: CommandExecutor,
        db: &str,
        collection: &str,
        pipeline: Vec<Document>,
        options: ChangeStreamOptions,
    ) -> DriverResult<Self> {
        let (cursor, operation_time) =
            Self::start(&executor, db, collection, &pipeline, &options).await?;
        let resume_token = options.resume_after.clone();

        let mut stream = Self {
            executor,
            db: db.to_string(),
            collection: collection.to_string(),
            pipeline,
            options,
            cursor,
            resume_token,
            operation_time,
        };
        stream.cache_post_batch_token();
        Ok(stream)
    }

    async fn start(
        executor: &CommandExecutor,
        db: &str,
        collection: &str,
        pipeline: &[Document],
        options: &ChangeStreamOptions,
    ) -> DriverResult<(Cursor, Option<Timestamp>)> {
        let mut stages = Vec::with_capacity(pipeline.len() + 1);
        stages.push(doc! { "$changeStream" => change_stream_stage(options) });
        stages.extend(pipeline.iter().cloned());

        let agg_options = AggregateOptions {
            batch_size: options.batch_size,
            allow_disk_use: None,
        };
        let cmd = commands::aggregate(collection, stages, &agg_options);
        let reply = executor.run_command(db, cmd).await?;
        let operation_time = reply.get("operationTime").and_then(|t| t.as_timestamp());
        let cursor = Cursor::from_reply(executor.clone(), &reply, options.batch_size)?;

        debug!(ns = %cursor.namespace(), cursor_id = cursor.id(), "change stream opened");
        Ok((cursor, operation_time))
    }

    /// 다음 변경 이벤트
    ///
    /// 서버가 커서를 닫으면(`invalidate` 이후 등) `Ok(None)`을 반환한다.
    pub async fn next(&mut self) -> DriverResult<Option<Document>> {
        let mut resumed = false;
        loop {
            match self.cursor.next().await {
                Ok(Some(event)) => {
                    let token = event
                        .get_document("_id")
                        .cloned()
                        .ok_or_else(|| {
                            DriverError::invalid_response("change event has no _id resume token")
                        })?;
                    self.resume_token = Some(token);
                    self.cache_post_batch_token();
                    return Ok(Some(event));
                }
                Ok(None) => {
                    self.cache_post_batch_token();
                    return Ok(None);
                }
                Err(e) if e.is_resumable() && !resumed => {
                    self.cache_post_batch_token();
                    warn!(
                        ns = %self.cursor.namespace(),
                        error = %e,
                        has_token = self.resume_token.is_some(),
                        "resuming change stream"
                    );
                    resumed = true;
                    self.resume().await?;
                }
                Err(e) => {
                    self.cache_post_batch_token();
                    return Err(e);
                }
            }
        }
    }

    /// 버퍼가 비었으면 마지막 배치의 `postBatchResumeToken`을 재개 토큰으로 삼는다.
    fn cache_post_batch_token(&mut self) {
        if self.cursor.buffered() > 0 {
            return;
        }
        if let Some(token) = self.cursor.post_batch_resume_token() {
            self.resume_token = Some(token.clone());
        }
    }

    async fn resume(&mut self) -> DriverResult<()> {
        self.cursor.close().await;

        let mut options = self.options.clone();
        match &self.resume_token {
            Some(token) => {
                options.resume_after = Some(token.clone());
                options.start_at_operation_time = None;
            }
            None => {
                options.resume_after = None;
                if options.start_at_operation_time.is_none() {
                    options.start_at_operation_time = self.operation_time;
                }
            }
        }

        let (cursor, operation_time) = Self::start(
            &self.executor,
            &self.db,
            &self.collection,
            &self.pipeline,
            &options,
        )
        .await?;
        self.cursor = cursor;
        if operation_time.is_some() {
            self.operation_time = operation_time;
        }
        self.cache_post_batch_token();
        Ok(())
    }

    /// 현재 재개 토큰 (마지막 이벤트의 `_id` 또는 `postBatchResumeToken`)
    pub fn resume_token(&self) -> Option<&Document> {
        self.resume_token.as_ref()
    }

    /// 하위 커서 닫기
    pub async fn close(&mut self) {
        self.cursor.close().await;
    }

    /// 백그라운드 태스크가 이벤트를 채널로 보내는 스트림으로 변환
    ///
    /// 에러는 마지막 항목으로 전달된다. 수신 측이 버려지면 진행 중인 요청이
    /// 끝난 뒤 커서를 닫고 태스크가 끝난다.
    pub fn into_stream(mut self, capacity: usize) -> ReceiverStream<DriverResult<Document>> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(async move {
            while !tx.is_closed() {
                match self.next().await {
                    Ok(Some(event)) => {
                        if tx.send(Ok(event)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            }
            self.close().await;
        });
        ReceiverStream::new(rx)
    }
}

fn change_stream_stage(options: &ChangeStreamOptions) -> Document {
    let mut stage = Document::new();
    if let Some(mode) = &options.full_document {
        stage.insert("fullDocument", mode.as_str());
    }
    if let Some(token) = &options.resume_after {
        stage.insert("resumeAfter", token.clone());
    }
    if let Some(ts) = options.start_at_operation_time {
        stage.insert("startAtOperationTime", ts);
    }
    stage
}
