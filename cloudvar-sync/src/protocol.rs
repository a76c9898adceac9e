//! JSON wire protocol between the engine and the cloud data server.
//!
//! Every frame is one JSON object with a `type` tag and a `payload`:
//! ```text
//! client → server   {"type": "update_public_variable", "payload": [{"cvid": "c1", "value": 5}]}
//!                   {"type": "update_list",            "payload": {"c9": [{"action": "push", "value": "x"}]}}
//! server → client   {"type": "snapshot",               "payload": {"public_variables": [...], ...}}
//!                   {"type": "list_update",            "payload": {"c9": [...]}}
//!                   {"type": "update_rejected",        "payload": {"kind": "update_list", "reason": "..."}}
//! ```
//!
//! Update payloads are kept as raw [`serde_json::Value`] here; each data group
//! decodes its own payload shape so that one bad item does not poison the
//! whole frame.

use crate::data::DataInfo;
use crate::error::CloudError;
use serde::{Deserialize, Serialize};

/// Kinds of frames the client sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendMessageKind {
    UpdatePublicVariable,
    UpdatePrivateVariable,
    UpdateList,
}

/// A frame from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    #[serde(rename = "type")]
    pub kind: SendMessageKind,
    pub payload: serde_json::Value,
}

impl OutgoingMessage {
    pub fn new(kind: SendMessageKind, payload: serde_json::Value) -> Self {
        Self { kind, payload }
    }

    pub fn encode(&self) -> Result<String, CloudError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, CloudError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Initial state of all three groups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotPayload {
    pub public_variables: Vec<DataInfo>,
    pub private_variables: Vec<DataInfo>,
    pub lists: Vec<DataInfo>,
}

/// A frame from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full state; sent once after the connection opens.
    Snapshot(SnapshotPayload),
    /// Authoritative public variable updates, ours included.
    PublicVariableUpdate(serde_json::Value),
    PrivateVariableUpdate(serde_json::Value),
    ListUpdate(serde_json::Value),
    /// The oldest outstanding batch of `kind` was refused as a whole.
    UpdateRejected { kind: SendMessageKind, reason: String },
}

impl ServerMessage {
    pub fn encode(&self) -> Result<String, CloudError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, CloudError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outgoing_envelope() {
        let msg = OutgoingMessage::new(
            SendMessageKind::UpdatePublicVariable,
            json!([{"cvid": "c1", "value": 5}]),
        );
        let text = msg.encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({"type": "update_public_variable", "payload": [{"cvid": "c1", "value": 5}]})
        );
        assert_eq!(OutgoingMessage::decode(&text).unwrap(), msg);
    }

    #[test]
    fn test_decode_snapshot_with_missing_groups() {
        let msg = ServerMessage::decode(
            r#"{"type":"snapshot","payload":{"lists":[{"cvid":"l1","name":"names","value":["a"]}]}}"#,
        )
        .unwrap();
        let ServerMessage::Snapshot(snapshot) = msg else {
            panic!("expected snapshot");
        };
        assert!(snapshot.public_variables.is_empty());
        assert_eq!(snapshot.lists[0].name, "names");
        assert_eq!(snapshot.lists[0].value, json!(["a"]));
    }

    #[test]
    fn test_decode_update_rejected() {
        let msg = ServerMessage::decode(
            r#"{"type":"update_rejected","payload":{"kind":"update_list","reason":"rate limited"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ServerMessage::UpdateRejected {
                kind: SendMessageKind::UpdateList,
                reason: "rate limited".into(),
            }
        );
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let err = ServerMessage::decode(r#"{"type":"ping","payload":null}"#).unwrap_err();
        assert!(matches!(err, CloudError::Protocol(_)));
    }

    #[test]
    fn test_server_message_roundtrip() {
        let msg = ServerMessage::ListUpdate(json!({"l1": [{"action": "pop"}]}));
        assert_eq!(ServerMessage::decode(&msg.encode().unwrap()).unwrap(), msg);
    }
}
