//! Wire protocol for the spriteforge IPC channels.
//!
//! Defines the typed request/response/update message catalogue, the
//! [`GenerationStage`] vocabulary shared with the progress tracker, and
//! the MessagePack codec used on both the command and event channels.
//!
//! Version: 1.0
//! Serialization: MessagePack (self-describing maps with a `type` key)
//! Transport: TCP (request-reply command channel + broadcast event channel)

pub mod codec;
pub mod messages;
pub mod stage;

pub use codec::{decode_request, decode_response, decode_update, encode, ProtocolError};
pub use messages::{ModelInfo, ModelKind, Request, Response, Update};
pub use stage::GenerationStage;

/// Semantic protocol version, carried in `Response::StatusInfo`.
/// Breaking wire changes must bump this.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Default bind address for the request-reply command channel.
pub const DEFAULT_COMMAND_ADDR: &str = "127.0.0.1:5555";

/// Default bind address for the publish-subscribe event channel.
pub const DEFAULT_EVENT_ADDR: &str = "127.0.0.1:5556";
