//! Error types for engage-types.

use thiserror::Error;

/// Errors that can occur when building or decoding engage-sync types.
#[derive(Debug, Error)]
pub enum TypesError {
    /// Digest string is empty or contains non-hex characters.
    #[error("invalid digest: {0:?}")]
    InvalidDigest(String),

    /// JSON encoding failed
    #[error("json encoding failed: {0}")]
    JsonEncode(#[source] serde_json::Error),

    /// JSON decoding failed
    #[error("json decoding failed: {0}")]
    JsonDecode(#[source] serde_json::Error),

    /// MessagePack encoding failed
    #[error("record encoding failed: {0}")]
    RecordEncode(#[source] rmp_serde::encode::Error),

    /// MessagePack decoding failed
    #[error("record decoding failed: {0}")]
    RecordDecode(#[source] rmp_serde::decode::Error),
}
