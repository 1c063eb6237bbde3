//! Client configuration
//!
//! 클라이언트 설정 및 연결 문자열 파싱

use std::fmt;
use std::time::Duration;

use crate::wire::message::DEFAULT_MAX_MESSAGE_SIZE;

use super::error::{DriverError, DriverResult};

/// 기본 포트
pub const DEFAULT_PORT: u16 = 27017;

const SCHEME: &str = "mongodb://";

// ============================================================================
// ServerAddress - 서버 주소
// ============================================================================

/// 서버 주소
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    /// 호스트
    pub host: String,
    /// 포트
    pub port: u16,
}

impl ServerAddress {
    /// 새 서버 주소 생성
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// URI에서 파싱 (첫 번째 호스트 사용)
    pub fn from_uri(uri: &str) -> DriverResult<Self> {
        ConnectionString::parse(uri).map(|cs| cs.hosts[0].clone())
    }

    /// `host`, `host:port` 또는 `[v6]:port` 파싱
    fn parse_host(s: &str) -> DriverResult<Self> {
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, after) = rest
                .split_once(']')
                .ok_or_else(|| DriverError::configuration(format!("Invalid IPv6 host: {}", s)))?;
            match after.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if after.is_empty() => (host, None),
                None => {
                    return Err(DriverError::configuration(format!("Invalid host: {}", s)));
                }
            }
        } else {
            match s.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (s, None),
            }
        };

        if host.is_empty() {
            return Err(DriverError::configuration("Empty host"));
        }
        let port = match port {
            Some(p) => p
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| DriverError::configuration(format!("Invalid port: {}", p)))?,
            None => DEFAULT_PORT,
        };
        Ok(Self::new(host, port))
    }

    /// 소켓 주소로 변환
    pub fn to_socket_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_socket_addr())
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

// ============================================================================
// Credentials - 인증 정보
// ============================================================================

/// 인증 정보
///
/// 인증은 수행하지 않으며, 핸드셰이크의 `saslSupportedMechs` 조회에만 사용됩니다.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// 사용자명
    pub username: String,
    /// 비밀번호
    pub password: Option<String>,
    /// 인증 데이터베이스
    pub source: String,
}

impl Credentials {
    /// 새 인증 정보 생성
    pub fn new(username: impl Into<String>, password: Option<String>) -> Self {
        Self {
            username: username.into(),
            password,
            source: "admin".to_string(),
        }
    }

    /// `saslSupportedMechs`에 보낼 `<source>.<username>`
    pub fn sasl_probe_user(&self) -> String {
        format!("{}.{}", self.source, self.username)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("source", &self.source)
            .finish()
    }
}

// ============================================================================
// ConnectionString - 연결 문자열
// ============================================================================

/// 파싱된 `mongodb://` 연결 문자열
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionString {
    /// 호스트 목록 (최소 1개)
    pub hosts: Vec<ServerAddress>,
    /// 기본 데이터베이스
    pub database: Option<String>,
    /// 인증 정보
    pub credentials: Option<Credentials>,
    /// `appName` 옵션
    pub app_name: Option<String>,
    /// `connectTimeoutMS` 옵션
    pub connect_timeout: Option<Duration>,
}

impl ConnectionString {
    /// `mongodb://[user:pass@]host[:port][,host...][/db][?opts]` 또는 `host:port` 파싱
    pub fn parse(uri: &str) -> DriverResult<Self> {
        let rest = match uri.strip_prefix(SCHEME) {
            Some(rest) => rest,
            None if uri.contains("://") => {
                return Err(DriverError::configuration(format!(
                    "Unsupported scheme in {}",
                    uri
                )));
            }
            None => uri,
        };

        let (main, query) = match rest.split_once('?') {
            Some((main, query)) => (main, Some(query)),
            None => (rest, None),
        };

        let (userinfo, location) = match main.rfind('@') {
            Some(at) => (Some(&main[..at]), &main[at + 1..]),
            None => (None, main),
        };

        let (host_list, path) = match location.split_once('/') {
            Some((hosts, path)) => (hosts, Some(path)),
            None => (location, None),
        };

        let hosts = host_list
            .split(',')
            .map(ServerAddress::parse_host)
            .collect::<DriverResult<Vec<_>>>()?;

        let database = match path {
            Some(p) if !p.is_empty() => Some(decode(p)?),
            _ => None,
        };

        let mut credentials = match userinfo {
            Some(info) => {
                let (user, pass) = match info.split_once(':') {
                    Some((u, p)) => (u, Some(decode(p)?)),
                    None => (info, None),
                };
                if user.is_empty() {
                    return Err(DriverError::configuration("Empty username"));
                }
                let mut creds = Credentials::new(decode(user)?, pass);
                if let Some(db) = &database {
                    creds.source = db.clone();
                }
                Some(creds)
            }
            None => None,
        };

        let mut app_name = None;
        let mut connect_timeout = None;
        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                DriverError::configuration(format!("Option without value: {}", pair))
            })?;
            let value = decode(value)?;
            match key.to_ascii_lowercase().as_str() {
                "appname" => app_name = Some(value),
                "connecttimeoutms" => {
                    let ms = value.parse::<u64>().map_err(|_| {
                        DriverError::configuration(format!("Invalid connectTimeoutMS: {}", value))
                    })?;
                    connect_timeout = Some(Duration::from_millis(ms));
                }
                "authsource" => {
                    if let Some(creds) = credentials.as_mut() {
                        creds.source = value;
                    }
                }
                _ => tracing::debug!(option = key, "ignoring unsupported connection option"),
            }
        }

        Ok(Self {
            hosts,
            database,
            credentials,
            app_name,
            connect_timeout,
        })
    }
}

fn decode(s: &str) -> DriverResult<String> {
    urlencoding::decode(s)
        .map(|c| c.into_owned())
        .map_err(|_| DriverError::configuration(format!("Invalid percent-encoding: {}", s)))
}

// ============================================================================
// ClientConfig - 클라이언트 설정
// ============================================================================

/// 클라이언트 설정
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// 서버 주소
    pub address: ServerAddress,
    /// 기본 데이터베이스
    pub default_database: Option<String>,
    /// 애플리케이션 이름 (핸드셰이크 메타데이터)
    pub app_name: Option<String>,
    /// 인증 정보
    pub credentials: Option<Credentials>,
    /// TCP 연결 타임아웃
    pub connect_timeout: Duration,
    /// 최대 메시지 크기 (핸드셰이크 전)
    pub max_message_size: usize,
    /// 커서 기본 배치 크기
    pub default_batch_size: Option<i32>,
    /// `hello` 대신 `isMaster` 사용
    pub use_legacy_hello: bool,
}

impl ClientConfig {
    /// 새 설정 생성
    pub fn new(uri: &str) -> DriverResult<Self> {
        let cs = ConnectionString::parse(uri)?;
        if cs.hosts.len() > 1 {
            tracing::debug!(
                hosts = cs.hosts.len(),
                "multiple hosts given, using the first"
            );
        }
        let address = cs.hosts[0].clone();

        Ok(Self {
            address,
            default_database: cs.database,
            app_name: cs.app_name,
            credentials: cs.credentials,
            connect_timeout: cs.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            ..Self::default()
        })
    }

    /// 빌더 시작
    pub fn builder(uri: &str) -> DriverResult<ClientConfigBuilder> {
        let config = Self::new(uri)?;
        Ok(ClientConfigBuilder { config })
    }
}

/// 기본 연결 타임아웃
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: ServerAddress::default(),
            default_database: None,
            app_name: None,
            credentials: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            default_batch_size: None,
            use_legacy_hello: false,
        }
    }
}

// ============================================================================
// ClientConfigBuilder - 설정 빌더
// ============================================================================

/// 클라이언트 설정 빌더
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// 애플리케이션 이름 설정
    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.config.app_name = Some(name.into());
        self
    }

    /// 기본 데이터베이스 설정
    pub fn with_default_database(mut self, db: impl Into<String>) -> Self {
        self.config.default_database = Some(db.into());
        self
    }

    /// 인증 정보 설정
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.config.credentials = Some(credentials);
        self
    }

    /// 연결 타임아웃 설정
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// 최대 메시지 크기 설정
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// 기본 배치 크기 설정
    pub fn with_default_batch_size(mut self, size: i32) -> Self {
        self.config.default_batch_size = Some(size);
        self
    }

    /// 레거시 `isMaster` 핸드셰이크 사용
    pub fn with_legacy_hello(mut self, legacy: bool) -> Self {
        self.config.use_legacy_hello = legacy;
        self
    }

    /// 빌드
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_host_port() {
        let addr = ServerAddress::from_uri("db.local:27018").unwrap();
        assert_eq!(addr, ServerAddress::new("db.local", 27018));

        let addr = ServerAddress::from_uri("db.local").unwrap();
        assert_eq!(addr.port, DEFAULT_PORT);
    }

    #[test]
    fn test_full_connection_string() {
        let cs = ConnectionString::parse(
            "mongodb://alice:p%40ss@h1:27017,h2:27018/inventory?appName=shop&connectTimeoutMS=2500",
        )
        .unwrap();

        assert_eq!(cs.hosts.len(), 2);
        assert_eq!(cs.hosts[1], ServerAddress::new("h2", 27018));
        assert_eq!(cs.database.as_deref(), Some("inventory"));
        assert_eq!(cs.app_name.as_deref(), Some("shop"));
        assert_eq!(cs.connect_timeout, Some(Duration::from_millis(2500)));

        let creds = cs.credentials.unwrap();
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.password.as_deref(), Some("p@ss"));
        assert_eq!(creds.source, "inventory");
        assert_eq!(creds.sasl_probe_user(), "inventory.alice");
    }

    #[test]
    fn test_auth_source_option() {
        let cs = ConnectionString::parse("mongodb://bob@localhost/app?authSource=admin").unwrap();
        assert_eq!(cs.credentials.unwrap().source, "admin");
    }

    #[test]
    fn test_ipv6_host() {
        let addr = ServerAddress::from_uri("mongodb://[::1]:27019").unwrap();
        assert_eq!(addr.host, "::1");
        assert_eq!(addr.port, 27019);
        assert_eq!(addr.to_string(), "[::1]:27019");
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            ServerAddress::from_uri("mongodb://host:notaport"),
            Err(DriverError::Configuration(_))
        ));
        assert!(ServerAddress::from_uri("mongodb://").is_err());
        assert!(ServerAddress::from_uri("http://host").is_err());
        assert!(ConnectionString::parse("mongodb://h/?connectTimeoutMS=abc").is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("u", Some("secret".into()));
        let s = format!("{:?}", creds);
        assert!(!s.contains("secret"));
    }

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::builder("mongodb://localhost/?appName=fromuri")
            .unwrap()
            .with_app_name("override")
            .with_default_batch_size(50)
            .with_legacy_hello(true)
            .build();

        assert_eq!(config.app_name.as_deref(), Some("override"));
        assert_eq!(config.default_batch_size, Some(50));
        assert!(config.use_legacy_hello);
        assert_eq!(config.address, ServerAddress::new("localhost", DEFAULT_PORT));
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }
}
