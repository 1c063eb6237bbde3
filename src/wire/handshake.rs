//! Connection handshake.
//!
//! The first command on every connection is `hello` (or the legacy
//! `isMaster`) against the `admin` database. The client describes itself in
//! a `client` metadata document and the server answers with its limits and
//! supported wire version range.

use super::bson::{Bson, Document};
use super::error::HandshakeError;
use crate::doc;

/// Lowest wire version that speaks OP_MSG (server 3.6).
pub const MIN_WIRE_VERSION: i32 = 6;

/// Driver name reported in client metadata.
pub const DRIVER_NAME: &str = "mongowire";

/// Driver version reported in client metadata.
pub const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default `maxBsonObjectSize` when the server omits it.
pub const DEFAULT_MAX_BSON_OBJECT_SIZE: i64 = 16 * 1024 * 1024;

/// Default `maxMessageSizeBytes` when the server omits it.
pub const DEFAULT_MAX_MESSAGE_SIZE_BYTES: i64 = 48_000_000;

/// Default `maxWriteBatchSize` when the server omits it.
pub const DEFAULT_MAX_WRITE_BATCH_SIZE: i64 = 100_000;

/// Build the handshake command.
///
/// `sasl_user` is `"<authSource>.<username>"`; when present the server
/// lists the mechanisms that user may authenticate with.
pub fn hello_command(app_name: Option<&str>, legacy: bool, sasl_user: Option<&str>) -> Document {
    let mut cmd = if legacy {
        doc! { "isMaster" => 1, "helloOk" => true }
    } else {
        doc! { "hello" => 1 }
    };
    cmd.insert("client", client_metadata(app_name));
    if let Some(user) = sasl_user {
        cmd.insert("saslSupportedMechs", user);
    }
    cmd.insert("$db", "admin");
    cmd
}

/// Client metadata sent once per connection.
pub fn client_metadata(app_name: Option<&str>) -> Document {
    let mut meta = Document::new();
    if let Some(name) = app_name {
        meta.insert("application", doc! { "name" => name });
    }
    meta.insert(
        "driver",
        doc! { "name" => DRIVER_NAME, "version" => DRIVER_VERSION },
    );
    meta.insert(
        "os",
        doc! {
            "type" => std::env::consts::OS,
            "architecture" => std::env::consts::ARCH,
        },
    );
    meta.insert("platform", "Rust/tokio");
    meta
}

/// Server facts from the handshake reply.
#[derive(Debug, Clone, PartialEq)]
pub struct HelloReply {
    /// Whether the server accepts writes
    pub is_writable_primary: bool,
    /// Largest document the server accepts
    pub max_bson_object_size: i64,
    /// Largest message the server accepts
    pub max_message_size_bytes: i64,
    /// Most write operations per command
    pub max_write_batch_size: i64,
    /// Lowest supported wire version
    pub min_wire_version: i32,
    /// Highest supported wire version
    pub max_wire_version: i32,
    /// Server-side connection id
    pub connection_id: Option<i64>,
    /// Mechanisms offered for the probed user
    pub sasl_supported_mechs: Vec<String>,
    /// The full reply document
    pub raw: Document,
}

impl HelloReply {
    /// Interpret a handshake reply.
    pub fn from_document(doc: Document) -> Result<Self, HandshakeError> {
        if doc.get_number("ok") != Some(1.0) {
            return Err(HandshakeError::Rejected {
                code: doc.get_number("code").map(|c| c as i32).unwrap_or(0),
                message: doc.get_str("errmsg").unwrap_or("hello failed").to_string(),
            });
        }

        let max_wire_version = doc
            .get_number("maxWireVersion")
            .map(|v| v as i32)
            .ok_or_else(|| HandshakeError::InvalidReply("missing maxWireVersion".into()))?;
        let min_wire_version = doc.get_number("minWireVersion").map(|v| v as i32).unwrap_or(0);
        if max_wire_version < MIN_WIRE_VERSION {
            return Err(HandshakeError::IncompatibleWireVersion {
                min: min_wire_version,
                max: max_wire_version,
                required: MIN_WIRE_VERSION,
            });
        }

        let limit = |key: &str, default: i64| {
            doc.get_number(key)
                .map(|v| v as i64)
                .filter(|v| *v > 0)
                .unwrap_or(default)
        };

        let is_writable_primary = doc
            .get_bool("isWritablePrimary")
            .or_else(|| doc.get_bool("ismaster"))
            .unwrap_or(false);

        let sasl_supported_mechs = doc
            .get_array("saslSupportedMechs")
            .map(|mechs| {
                mechs
                    .iter()
                    .filter_map(Bson::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            is_writable_primary,
            max_bson_object_size: limit("maxBsonObjectSize", DEFAULT_MAX_BSON_OBJECT_SIZE),
            max_message_size_bytes: limit("maxMessageSizeBytes", DEFAULT_MAX_MESSAGE_SIZE_BYTES),
            max_write_batch_size: limit("maxWriteBatchSize", DEFAULT_MAX_WRITE_BATCH_SIZE),
            min_wire_version,
            max_wire_version,
            connection_id: doc.get_number("connectionId").map(|v| v as i64),
            sasl_supported_mechs,
            raw: doc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_command_shape() {
        let cmd = hello_command(Some("inventory"), false, None);
        assert_eq!(cmd.first_key(), Some("hello"));
        assert_eq!(cmd.get_str("$db"), Some("admin"));
        let client = cmd.get_document("client").unwrap();
        assert_eq!(
            client.get_document("application").and_then(|a| a.get_str("name")),
            Some("inventory")
        );
        assert_eq!(
            client.get_document("driver").and_then(|d| d.get_str("name")),
            Some(DRIVER_NAME)
        );
        assert!(!cmd.contains_key("saslSupportedMechs"));
    }

    #[test]
    fn test_legacy_hello() {
        let cmd = hello_command(None, true, Some("admin.alice"));
        assert_eq!(cmd.first_key(), Some("isMaster"));
        assert_eq!(cmd.get_bool("helloOk"), Some(true));
        assert_eq!(cmd.get_str("saslSupportedMechs"), Some("admin.alice"));
        assert!(!cmd.get_document("client").unwrap().contains_key("application"));
    }

    #[test]
    fn test_reply_parsing() {
        let reply = HelloReply::from_document(doc! {
            "isWritablePrimary" => true,
            "maxBsonObjectSize" => 16_777_216,
            "maxMessageSizeBytes" => 48_000_000,
            "maxWriteBatchSize" => 100_000,
            "minWireVersion" => 0,
            "maxWireVersion" => 21,
            "connectionId" => 42,
            "saslSupportedMechs" => vec!["SCRAM-SHA-256"],
            "ok" => 1.0,
        })
        .unwrap();

        assert!(reply.is_writable_primary);
        assert_eq!(reply.max_write_batch_size, 100_000);
        assert_eq!(reply.max_wire_version, 21);
        assert_eq!(reply.connection_id, Some(42));
        assert_eq!(reply.sasl_supported_mechs, vec!["SCRAM-SHA-256".to_string()]);
    }

    #[test]
    fn test_reply_defaults() {
        let reply = HelloReply::from_document(doc! { "ok" => 1, "maxWireVersion" => 8 }).unwrap();
        assert_eq!(reply.max_bson_object_size, DEFAULT_MAX_BSON_OBJECT_SIZE);
        assert_eq!(reply.max_write_batch_size, DEFAULT_MAX_WRITE_BATCH_SIZE);
        assert!(!reply.is_writable_primary);
    }

    #[test]
    fn test_reply_not_ok() {
        let err = HelloReply::from_document(doc! {
            "ok" => 0.0,
            "errmsg" => "no such cmd",
            "code" => 59,
        })
        .unwrap_err();
        assert_eq!(
            err,
            HandshakeError::Rejected {
                code: 59,
                message: "no such cmd".into()
            }
        );
    }

    #[test]
    fn test_old_server_rejected() {
        let err = HelloReply::from_document(doc! { "ok" => 1, "maxWireVersion" => 5 }).unwrap_err();
        assert!(matches!(err, HandshakeError::IncompatibleWireVersion { max: 5, .. }));
    }

    #[test]
    fn test_missing_wire_version() {
        let err = HelloReply::from_document(doc! { "ok" => 1 }).unwrap_err();
        assert!(matches!(err, HandshakeError::InvalidReply(_)));
    }
}
