//! MessagePack codec with role-scoped decoders.
//!
//! Every message is encoded as a self-describing MessagePack map whose
//! `type` key carries the variant discriminator. Decoding is scoped per
//! channel role: a `Response` arriving on the update channel (or any
//! unknown `type` value) fails with a typed [`ProtocolError`] instead of
//! being silently coerced or dropped.

use serde::Serialize;

use crate::messages::{Request, Response, Update};

/// Errors produced by the wire codec.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Failed to serialize a message to MessagePack.
    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// The payload was not a well-formed message of the expected family.
    /// Covers malformed MessagePack, missing fields, and unknown or
    /// cross-family `type` discriminators.
    #[error("failed to decode {family} message: {source}")]
    Decode {
        /// Which role-scoped decoder rejected the payload.
        family: &'static str,
        #[source]
        source: rmp_serde::decode::Error,
    },
}

/// Encode any protocol message to MessagePack bytes.
///
/// Uses named (map) struct encoding so the result is a self-describing
/// map — new optional keys can be added without breaking older decoders.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(rmp_serde::to_vec_named(message)?)
}

/// Decode a command-channel request.
pub fn decode_request(data: &[u8]) -> Result<Request, ProtocolError> {
    rmp_serde::from_slice(data).map_err(|source| ProtocolError::Decode {
        family: "request",
        source,
    })
}

/// Decode a command-channel response.
pub fn decode_response(data: &[u8]) -> Result<Response, ProtocolError> {
    rmp_serde::from_slice(data).map_err(|source| ProtocolError::Decode {
        family: "response",
        source,
    })
}

/// Decode an event-channel update.
pub fn decode_update(data: &[u8]) -> Result<Update, ProtocolError> {
    rmp_serde::from_slice(data).map_err(|source| ProtocolError::Decode {
        family: "update",
        source,
    })
}
