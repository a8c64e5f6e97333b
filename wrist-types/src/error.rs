//! Error types for the hawrist codec.

use thiserror::Error;

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// JSON deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// A request did not serialize to a JSON object
    #[error("request is not a JSON object: {0}")]
    NotAnObject(String),

    /// Frame is valid JSON but not a recognised message
    #[error("unrecognised frame: {0}")]
    UnrecognisedFrame(String),

    /// Entity id does not have the `<domain>.<object_id>` shape
    #[error("invalid entity id: {0:?}")]
    InvalidEntityId(String),

    /// Invalid data format
    #[error("invalid data: {0}")]
    InvalidData(String),
}
