//! Local data channel payloads.
//!
//! The device host emits three kinds of JSON documents:
//!
//! ```text
//! {"bluno_mapping": [{"num": 1, "username": "alice"}, ...]}   once per stream
//! {"packets": [{"bluno": 1, "movement": 0, ...}, ...]}        repeating
//! {"timestamps": [...]}                                       clock sync replies
//! ```
//!
//! Anything else is rejected rather than guessed at.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use wearlink_core::config::ManifestEntry;

use super::error::ProtocolError;

const MANIFEST_KEY: &str = "bluno_mapping";
const PACKETS_KEY: &str = "packets";
const TIMESTAMPS_KEY: &str = "timestamps";

/// One telemetry reading: an insertion-ordered field map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TelemetryItem(Map<String, Value>);

impl TelemetryItem {
    pub const fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Field names in arrival order.
    pub fn header(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    /// Device number used for routing.
    pub fn device_id(&self, field: &str) -> Result<u32, ProtocolError> {
        self.0
            .get(field)
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| ProtocolError::MissingDeviceId {
                field: field.to_string(),
            })
    }

    /// Whether a boolean discriminator field is set.
    pub fn is_flagged(&self, field: &str) -> bool {
        matches!(self.0.get(field), Some(Value::Bool(true)))
    }

    pub fn classification(&self, field: &str) -> Option<i64> {
        self.0.get(field).and_then(Value::as_i64)
    }

    /// Values of `header`'s fields, in header order, rendered as CSV cells.
    pub fn row(&self, header: &[String]) -> Vec<String> {
        header
            .iter()
            .map(|field| self.0.get(field).map_or_else(String::new, cell))
            .collect()
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A classified document from the local data channel.
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    Manifest(Vec<ManifestEntry>),
    Packets(Vec<TelemetryItem>),
    Timestamps(Value),
}

impl BusMessage {
    /// Classify a parsed document by its single top-level key.
    pub fn classify(value: Value) -> Result<Self, ProtocolError> {
        let Value::Object(mut obj) = value else {
            return Err(ProtocolError::UnknownShape {
                detail: format!("expected an object, got {}", kind_of(&value)),
            });
        };

        let present: Vec<&str> = [MANIFEST_KEY, PACKETS_KEY, TIMESTAMPS_KEY]
            .into_iter()
            .filter(|k| obj.contains_key(*k))
            .collect();

        match present.as_slice() {
            [MANIFEST_KEY] => {
                let raw = obj.remove(MANIFEST_KEY).unwrap_or(Value::Null);
                serde_json::from_value(raw)
                    .map(Self::Manifest)
                    .map_err(|e| ProtocolError::Malformed {
                        kind: "manifest",
                        reason: e.to_string(),
                    })
            }
            [PACKETS_KEY] => {
                let raw = obj.remove(PACKETS_KEY).unwrap_or(Value::Null);
                serde_json::from_value(raw)
                    .map(Self::Packets)
                    .map_err(|e| ProtocolError::Malformed {
                        kind: "packets",
                        reason: e.to_string(),
                    })
            }
            [TIMESTAMPS_KEY] => Ok(Self::Timestamps(
                obj.remove(TIMESTAMPS_KEY).unwrap_or(Value::Null),
            )),
            [] => Err(ProtocolError::UnknownShape {
                detail: format!(
                    "no known key among [{}]",
                    obj.keys().cloned().collect::<Vec<_>>().join(", ")
                ),
            }),
            several => Err(ProtocolError::UnknownShape {
                detail: format!("ambiguous keys [{}]", several.join(", ")),
            }),
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Manifest(_) => "manifest",
            Self::Packets(_) => "packets",
            Self::Timestamps(_) => "timestamps",
        }
    }
}

const fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(value: Value) -> TelemetryItem {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn manifest_is_classified() {
        let msg = BusMessage::classify(json!({
            "bluno_mapping": [{"num": 1, "username": "alice"}, {"num": 2, "username": "bob"}]
        }))
        .unwrap();
        let BusMessage::Manifest(entries) = msg else {
            panic!("expected manifest");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].label(), "alice_1");
    }

    #[test]
    fn packets_are_classified_in_order() {
        let msg = BusMessage::classify(json!({
            "packets": [{"bluno": 2, "x": 1}, {"bluno": 1, "x": 2}]
        }))
        .unwrap();
        assert_eq!(msg.kind(), "packets");
        let BusMessage::Packets(items) = msg else {
            panic!("expected packets");
        };
        assert_eq!(items[0].device_id("bluno").unwrap(), 2);
        assert_eq!(items[1].device_id("bluno").unwrap(), 1);
    }

    #[test]
    fn timestamps_pass_through() {
        let msg = BusMessage::classify(json!({"timestamps": [{"t_one": 5, "num": 1}]})).unwrap();
        assert_eq!(msg, BusMessage::Timestamps(json!([{"t_one": 5, "num": 1}])));
    }

    #[test]
    fn unknown_shapes_are_rejected() {
        for value in [
            json!({"cmd": "pause"}),
            json!({}),
            json!([1, 2]),
            json!("packets"),
            json!({"packets": [], "timestamps": []}),
        ] {
            assert!(matches!(
                BusMessage::classify(value),
                Err(ProtocolError::UnknownShape { .. })
            ));
        }
    }

    #[test]
    fn malformed_known_shapes_are_reported() {
        assert!(matches!(
            BusMessage::classify(json!({"packets": [1, 2]})),
            Err(ProtocolError::Malformed { kind: "packets", .. })
        ));
        assert!(matches!(
            BusMessage::classify(json!({"bluno_mapping": [{"num": "one"}]})),
            Err(ProtocolError::Malformed { kind: "manifest", .. })
        ));
    }

    #[test]
    fn field_order_survives_into_rows() {
        let item = item(json!({"bluno": 1, "z": -3, "a": "left", "flag": false, "gap": null}));
        let header = item.header();
        assert_eq!(header, vec!["bluno", "z", "a", "flag", "gap"]);
        assert_eq!(item.row(&header), vec!["1", "-3", "left", "false", ""]);
    }

    #[test]
    fn row_follows_given_header() {
        let item = item(json!({"b": 2, "a": 1}));
        let header = vec!["a".to_string(), "missing".to_string(), "b".to_string()];
        assert_eq!(item.row(&header), vec!["1", "", "2"]);
    }

    #[test]
    fn device_id_requires_unsigned_integer() {
        assert!(item(json!({"bluno": -1})).device_id("bluno").is_err());
        assert!(item(json!({"bluno": "1"})).device_id("bluno").is_err());
        assert!(item(json!({"other": 1})).device_id("bluno").is_err());
        assert_eq!(item(json!({"device_id": 3})).device_id("device_id").unwrap(), 3);
    }

    #[test]
    fn discriminator_and_classification() {
        let aux = item(json!({"muscle_sensor": true, "movement": 1}));
        assert!(aux.is_flagged("muscle_sensor"));
        assert_eq!(aux.classification("movement"), Some(1));

        let imu = item(json!({"muscle_sensor": false}));
        assert!(!imu.is_flagged("muscle_sensor"));
        assert_eq!(imu.classification("movement"), None);
    }
}
