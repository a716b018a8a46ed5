//! BatchEnvelope - the wire body of one event delivery attempt.

use serde::{Deserialize, Serialize};

use crate::{EventRecord, SequenceNumber, SessionId, TypesError};

/// A batch of events wrapped with session metadata.
///
/// The server deduplicates resent batches by `(session_token, seqnum)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEnvelope {
    /// Session that produced the batch.
    pub session_token: SessionId,
    /// Host application's user identifier.
    pub user: String,
    /// Host application version.
    pub app_version: String,
    /// Events in ascending sequence order.
    pub data: Vec<EventRecord>,
}

impl BatchEnvelope {
    /// Encode as JSON.
    pub fn to_json(&self) -> Result<Vec<u8>, TypesError> {
        serde_json::to_vec(self).map_err(TypesError::JsonEncode)
    }

    /// Decode from JSON.
    pub fn from_json(bytes: &[u8]) -> Result<Self, TypesError> {
        serde_json::from_slice(bytes).map_err(TypesError::JsonDecode)
    }

    /// Sequence numbers carried by this batch, in order.
    pub fn sequences(&self) -> Vec<SequenceNumber> {
        self.data.iter().map(|event| event.sequence).collect()
    }
}
