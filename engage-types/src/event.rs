//! Behavioral events queued for delivery.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{SequenceNumber, Timestamp, TypesError};

/// Ordered key/value pairs attached to an event.
///
/// Insertion order is preserved through persistence and on the wire.
pub type Attributes = IndexMap<String, serde_json::Value>;

/// One queued event.
///
/// Field order is part of the wire contract: `type`, `time`, `parameters`,
/// `payload`, `seqnum`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Event type, e.g. `"event"`, `"purchase"`, `"device_update"`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// When the event was generated.
    #[serde(rename = "time")]
    pub timestamp: Timestamp,
    /// Type-specific parameters.
    #[serde(default)]
    pub parameters: Attributes,
    /// Free-form payload supplied by the host application.
    #[serde(default)]
    pub payload: Attributes,
    /// Delivery order, assigned at enqueue time.
    #[serde(rename = "seqnum")]
    pub sequence: SequenceNumber,
}

impl EventRecord {
    /// Encode as a MessagePack record for the durable log.
    pub fn to_record_bytes(&self) -> Result<Vec<u8>, TypesError> {
        rmp_serde::to_vec_named(self).map_err(TypesError::RecordEncode)
    }

    /// Decode a MessagePack record from the durable log.
    pub fn from_record_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        rmp_serde::from_slice(bytes).map_err(TypesError::RecordDecode)
    }

    /// Size of this event's JSON encoding, used for batch byte limits.
    pub fn encoded_len(&self) -> usize {
        // String keys only, so JSON encoding cannot fail.
        serde_json::to_vec(self).map_or(0, |bytes| bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> EventRecord {
        let mut parameters = Attributes::new();
        parameters.insert("name".into(), json!("level_up"));
        let mut payload = Attributes::new();
        payload.insert("zeta".into(), json!(1));
        payload.insert("alpha".into(), json!("two"));

        EventRecord {
            event_type: "event".into(),
            timestamp: Timestamp::from_millis(1_700_000_000_000),
            parameters,
            payload,
            sequence: SequenceNumber::new(7),
        }
    }

    #[test]
    fn json_field_order_is_stable() {
        let json = serde_json::to_string(&sample()).unwrap();
        let type_pos = json.find("\"type\"").unwrap();
        let time_pos = json.find("\"time\"").unwrap();
        let params_pos = json.find("\"parameters\"").unwrap();
        let payload_pos = json.find("\"payload\"").unwrap();
        let seq_pos = json.find("\"seqnum\"").unwrap();

        assert!(type_pos < time_pos);
        assert!(time_pos < params_pos);
        assert!(params_pos < payload_pos);
        assert!(payload_pos < seq_pos);
    }

    #[test]
    fn payload_keeps_insertion_order() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(json.find("\"zeta\"").unwrap() < json.find("\"alpha\"").unwrap());
    }

    #[test]
    fn record_bytes_preserve_attribute_order() {
        let event = sample();
        let decoded = EventRecord::from_record_bytes(&event.to_record_bytes().unwrap()).unwrap();

        assert_eq!(decoded, event);
        let keys: Vec<_> = decoded.payload.keys().cloned().collect();
        assert_eq!(keys, vec!["zeta".to_string(), "alpha".to_string()]);
    }

    #[test]
    fn garbage_record_is_rejected() {
        let result = EventRecord::from_record_bytes(&[0xc1, 0xff, 0x00]);
        assert!(matches!(result, Err(TypesError::RecordDecode(_))));
    }

    #[test]
    fn encoded_len_matches_json() {
        let event = sample();
        assert_eq!(event.encoded_len(), serde_json::to_vec(&event).unwrap().len());
    }
}
