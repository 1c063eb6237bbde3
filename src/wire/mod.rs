//! # Wire Protocol Implementation
//!
//! Low-level building blocks for talking to a MongoDB server.
//!
//! ## Overview
//!
//! Every request and reply is an OP_MSG frame (opcode 2013) whose sections
//! carry BSON documents. This module provides:
//!
//! - **BSON** - Binary document format and the Extended JSON bridge
//! - **Messages** - OP_MSG build/parse, document sequences, checksums
//! - **Handshake** - `hello` command and reply interpretation
//! - **Codec** - Async message framing for Tokio
//!
//! ## Submodules
//!
//! - [`bson`] - Document model, encoder/decoder, ObjectId, Extended JSON
//! - [`message`] - OP_MSG frames
//! - [`handshake`] - Client metadata and `hello`
//! - [`codec`] - Tokio codec for async I/O
//! - [`error`] - Protocol error types
//!
//! ## Note
//!
//! Most users should use the high-level [`crate::driver`] module instead of
//! framing messages directly.

pub mod bson;
pub mod codec;
pub mod error;
pub mod handshake;
pub mod message;

pub use codec::MessageCodec;
pub use error::{HandshakeError, WireError, WireResult};
pub use handshake::{hello_command, HelloReply, MIN_WIRE_VERSION};
pub use message::{flags, DocumentSequence, MessageHeader, OpMsg, Section, OP_MSG};
