//! Connection
//!
//! 단일 스트림 위의 OP_MSG 연결. 핸드셰이크, 요청 직렬화, 응답 상관관계 검사를 담당합니다.

use std::sync::atomic::{AtomicI32, Ordering};

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::wire::bson::Document;
use crate::wire::message::flags;
use crate::wire::{
    hello_command, DocumentSequence, HelloReply, MessageCodec, OpMsg, WireError, WireResult,
};

use super::config::{ClientConfig, ServerAddress};
use super::error::{DriverError, DriverResult};

/// 연결이 감쌀 수 있는 바이트 스트림
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// 핸드셰이크 완료, 요청 가능
    Ready,
    /// 프로토콜 오류 또는 취소로 사용 불가
    Failed,
    /// 정상 종료됨
    Closed,
}

/// 스트림과 버퍼. 한 번에 하나의 왕복만 접근합니다.
struct Io {
    stream: Box<dyn AsyncStream>,
    codec: MessageCodec,
    read_buffer: BytesMut,
    write_buffer: BytesMut,
}

impl Io {
    fn new(stream: Box<dyn AsyncStream>, max_message_size: usize) -> Self {
        Self {
            stream,
            codec: MessageCodec::with_max_size(max_message_size),
            read_buffer: BytesMut::with_capacity(8192),
            write_buffer: BytesMut::with_capacity(8192),
        }
    }

    /// 요청을 쓰기 버퍼에 인코딩합니다. 실패해도 스트림에는 아무것도 쓰지 않습니다.
    fn encode_request(
        &mut self,
        request_id: i32,
        flag_bits: u32,
        command: &Document,
        sequences: &[DocumentSequence],
    ) -> DriverResult<()> {
        self.write_buffer.clear();
        let msg = OpMsg::new(request_id, 0, flag_bits, command.clone(), sequences.to_vec());
        self.codec
            .encode(msg, &mut self.write_buffer)
            .map_err(|e| match e {
                WireError::MessageTooLarge { size, max } => {
                    DriverError::MessageTooLarge { size, max }
                }
                other => other.into(),
            })
    }

    /// 인코딩된 요청을 쓰고, moreToCome 체인이 끝날 때까지 응답 본문을 모읍니다.
    async fn round_trip(&mut self, request_id: i32) -> DriverResult<Vec<Document>> {
        self.stream
            .write_all(&self.write_buffer)
            .await
            .map_err(|e| DriverError::send_failed(e.to_string()))?;
        self.stream
            .flush()
            .await
            .map_err(|e| DriverError::send_failed(e.to_string()))?;

        let mut bodies = Vec::new();
        let mut expected = request_id;
        loop {
            let reply = self.read_frame().await?;
            let header = *reply.header();
            if header.response_to != expected {
                return Err(DriverError::protocol(format!(
                    "responseTo {} does not match request {}",
                    header.response_to, expected
                )));
            }
            let more = reply.more_to_come();
            bodies.push(reply.merged_body());
            if !more {
                return Ok(bodies);
            }
            expected = header.request_id;
        }
    }

    async fn read_frame(&mut self) -> WireResult<OpMsg> {
        loop {
            if let Some(msg) = self.codec.decode(&mut self.read_buffer)? {
                return Ok(msg);
            }

            if self.stream.read_buf(&mut self.read_buffer).await? == 0 {
                if self.read_buffer.is_empty() {
                    return Err(WireError::ConnectionClosed);
                }
                // 남은 바이트는 잘린 프레임
                return self
                    .codec
                    .decode_eof(&mut self.read_buffer)?
                    .ok_or(WireError::ConnectionClosed);
            }
        }
    }
}

/// 진행 중인 왕복이 취소되면 연결을 Failed로 표시합니다.
struct InFlight<'a> {
    state: &'a Mutex<ConnectionState>,
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            mark_failed(self.state);
        }
    }
}

/// Ready인 연결만 Failed로 바꿉니다. Closed는 그대로 둡니다.
fn mark_failed(state: &Mutex<ConnectionState>) {
    let mut state = state.lock();
    if *state == ConnectionState::Ready {
        *state = ConnectionState::Failed;
    }
}

/// OP_MSG 연결
///
/// 여러 태스크가 공유할 수 있지만(`Arc<Connection>`), 요청은 한 번에 하나씩만
/// 전송되고 응답을 받은 뒤에 다음 요청이 나갑니다.
pub struct Connection {
    io: tokio::sync::Mutex<Io>,
    state: Mutex<ConnectionState>,
    shutdown: CancellationToken,
    next_request_id: AtomicI32,
    hello: HelloReply,
    address: String,
}

impl Connection {
    /// TCP로 서버에 연결하고 핸드셰이크를 수행합니다.
    pub async fn connect(address: &ServerAddress, config: &ClientConfig) -> DriverResult<Self> {
        let target = address.to_socket_addr();
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&target))
            .await
            .map_err(|_| {
                DriverError::connection_failed(format!(
                    "Timed out connecting to {} after {:?}",
                    target, config.connect_timeout
                ))
            })?
            .map_err(|e| {
                DriverError::connection_failed(format!("Failed to connect to {}: {}", target, e))
            })?;

        // Enable TCP nodelay for lower latency
        stream.set_nodelay(true).ok();

        Self::handshake(Box::new(stream), target, config).await
    }

    /// 임의의 스트림을 감싸고 핸드셰이크를 수행합니다.
    pub async fn from_stream<S>(stream: S, config: &ClientConfig) -> DriverResult<Self>
    where
        S: AsyncStream + 'static,
    {
        Self::handshake(Box::new(stream), "stream".to_string(), config).await
    }

    async fn handshake(
        stream: Box<dyn AsyncStream>,
        address: String,
        config: &ClientConfig,
    ) -> DriverResult<Self> {
        let mut io = Io::new(stream, config.max_message_size);
        let probe = config.credentials.as_ref().map(|c| c.sasl_probe_user());
        let cmd = hello_command(
            config.app_name.as_deref(),
            config.use_legacy_hello,
            probe.as_deref(),
        );

        io.encode_request(1, 0, &cmd, &[])
            .map_err(|e| DriverError::handshake_failed(e.to_string()))?;
        let reply = io
            .round_trip(1)
            .await
            .map_err(|e| DriverError::handshake_failed(e.to_string()))?
            .pop()
            .ok_or_else(|| DriverError::handshake_failed("empty hello reply"))?;
        let hello = HelloReply::from_document(reply)
            .map_err(|e| DriverError::handshake_failed(e.to_string()))?;

        io.codec
            .set_max_message_size(hello.max_message_size_bytes as usize);

        info!(
            address = %address,
            max_wire_version = hello.max_wire_version,
            connection_id = ?hello.connection_id,
            "connection established"
        );

        Ok(Self {
            io: tokio::sync::Mutex::new(io),
            state: Mutex::new(ConnectionState::Ready),
            shutdown: CancellationToken::new(),
            next_request_id: AtomicI32::new(2),
            hello,
            address,
        })
    }

    /// 명령을 보내고 응답 본문을 반환합니다.
    ///
    /// 명령 문서는 `$db`를 이미 포함해야 합니다.
    pub async fn send(&self, command: &Document) -> DriverResult<Document> {
        self.send_with_sequences(command, &[]).await
    }

    /// kind-1 문서 시퀀스와 함께 명령을 보냅니다.
    pub async fn send_with_sequences(
        &self,
        command: &Document,
        sequences: &[DocumentSequence],
    ) -> DriverResult<Document> {
        let mut bodies = self.exchange(0, command, sequences).await?;
        bodies
            .pop()
            .ok_or_else(|| DriverError::invalid_response("empty reply"))
    }

    /// exhaustAllowed로 명령을 보내고 moreToCome 체인의 모든 응답을 반환합니다.
    pub async fn send_exhaust(&self, command: &Document) -> DriverResult<Vec<Document>> {
        self.exchange(flags::EXHAUST_ALLOWED, command, &[]).await
    }

    async fn exchange(
        &self,
        flag_bits: u32,
        command: &Document,
        sequences: &[DocumentSequence],
    ) -> DriverResult<Vec<Document>> {
        let mut io = tokio::select! {
            io = self.io.lock() => io,
            _ = self.shutdown.cancelled() => return Err(DriverError::Closed),
        };
        self.ensure_ready()?;

        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        debug!(
            command = command.first_key().unwrap_or(""),
            request_id,
            db = command.get_str("$db").unwrap_or(""),
            "sending command"
        );

        // 인코딩 실패는 아무것도 쓰지 않았으므로 연결을 그대로 둔다.
        io.encode_request(request_id, flag_bits, command, sequences)?;

        let mut guard = InFlight {
            state: &self.state,
            armed: true,
        };
        let result = tokio::select! {
            result = io.round_trip(request_id) => result,
            _ = self.shutdown.cancelled() => Err(DriverError::Closed),
        };
        guard.armed = false;

        match &result {
            Ok(bodies) => debug!(request_id, frames = bodies.len(), "reply received"),
            Err(DriverError::Closed) => debug!(request_id, "request abandoned by close"),
            Err(e) => {
                warn!(request_id, error = %e, "connection failed");
                mark_failed(&self.state);
            }
        }
        result
    }

    fn ensure_ready(&self) -> DriverResult<()> {
        match *self.state.lock() {
            ConnectionState::Ready => Ok(()),
            ConnectionState::Failed | ConnectionState::Closed => Err(DriverError::Closed),
        }
    }

    /// 연결 종료
    ///
    /// 진행 중인 요청과 대기 중인 요청은 `Closed`로 실패하고, 이후의 요청도
    /// `Closed`로 실패합니다.
    pub async fn close(&self) -> DriverResult<()> {
        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Closed {
                return Ok(());
            }
            *state = ConnectionState::Closed;
        }
        self.shutdown.cancel();

        let mut io = self.io.lock().await;
        if let Err(e) = io.stream.shutdown().await {
            warn!(address = %self.address, error = %e, "shutdown failed");
        }
        info!(address = %self.address, "connection closed");
        Ok(())
    }

    /// 핸드셰이크 응답
    pub fn hello(&self) -> &HelloReply {
        &self.hello
    }

    /// 연결 상태
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// 요청 가능 여부
    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// 서버 주소
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .field("state", &self.state())
            .field("max_wire_version", &self.hello.max_wire_version)
            .finish()
    }
}
