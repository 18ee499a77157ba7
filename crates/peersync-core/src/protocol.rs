//! Peer protocol messages
//!
//! Messages are JSON objects tagged by a `type` field:
//!
//! ```json
//! {"type": "sync:change", "org_id": "org", "resource_type": "member", ...}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::VectorClock;
use crate::error::Result;
use crate::models::QueueAction;

/// Every message exchanged between peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncMessage {
    #[serde(rename = "sync:request")]
    Request(SyncRequest),
    #[serde(rename = "sync:response")]
    Response(SyncResponse),
    #[serde(rename = "sync:change")]
    Change(SyncChange),
    #[serde(rename = "sync:conflict")]
    Conflict(SyncConflictNotice),
}

impl SyncMessage {
    /// Wire name of the message type
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "sync:request",
            Self::Response(_) => "sync:response",
            Self::Change(_) => "sync:change",
            Self::Conflict(_) => "sync:conflict",
        }
    }

    /// Organization the message belongs to
    #[must_use]
    pub fn org_id(&self) -> &str {
        match self {
            Self::Request(request) => &request.org_id,
            Self::Response(response) => &response.org_id,
            Self::Change(change) => &change.org_id,
            Self::Conflict(notice) => &notice.org_id,
        }
    }

    /// Encode as JSON text
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from JSON text; unknown message types are rejected
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Ask peers for everything touched since `last_sync_time`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub org_id: String,
    /// Unix ms; zero asks for everything
    #[serde(default)]
    pub last_sync_time: i64,
    /// Empty means every type
    #[serde(default)]
    pub resource_types: Vec<String>,
}

/// Reply to a [`SyncRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub org_id: String,
    #[serde(default)]
    pub resources: Vec<ResourceSnapshot>,
}

/// Current state of one resource inside a [`SyncResponse`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub resource_type: String,
    pub resource_id: String,
    #[serde(default)]
    pub data: Value,
    pub version: i64,
    #[serde(default)]
    pub vector_clock: VectorClock,
    /// Unix ms of the responder's last touch
    #[serde(default)]
    pub updated_at: i64,
}

/// One signed local mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncChange {
    pub org_id: String,
    pub resource_type: String,
    pub resource_id: String,
    pub action: QueueAction,
    #[serde(default)]
    pub data: Value,
    pub version: i64,
    #[serde(default)]
    pub vector_clock: VectorClock,
    pub author_did: String,
    /// Unix ms when the author made the change
    pub timestamp: i64,
    pub signature: String,
}

#[derive(Serialize)]
struct SigningView<'a> {
    org_id: &'a str,
    resource_type: &'a str,
    resource_id: &'a str,
    action: QueueAction,
    data: &'a Value,
    version: i64,
    vector_clock: &'a VectorClock,
    author_did: &'a str,
    timestamp: i64,
}

impl SyncChange {
    /// Bytes covered by the signature: every field except `signature`,
    /// as JSON with object keys in sorted order
    pub fn signing_payload(&self) -> Result<Vec<u8>> {
        let view = SigningView {
            org_id: &self.org_id,
            resource_type: &self.resource_type,
            resource_id: &self.resource_id,
            action: self.action,
            data: &self.data,
            version: self.version,
            vector_clock: &self.vector_clock,
            author_did: &self.author_did,
            timestamp: self.timestamp,
        };
        Ok(serde_json::to_vec(&view)?)
    }
}

/// Announcement that a resource needs attention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflictNotice {
    pub org_id: String,
    pub resource_type: String,
    pub resource_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn change() -> SyncChange {
        SyncChange {
            org_id: "org".into(),
            resource_type: "member".into(),
            resource_id: "m_1".into(),
            action: QueueAction::Update,
            data: json!({"name": "Bob", "age": 3}),
            version: 2,
            vector_clock: [("bob", 1_u64)].into_iter().collect(),
            author_did: "did:bob".into(),
            timestamp: 1_700,
            signature: "sig".into(),
        }
    }

    #[test]
    fn messages_are_tagged_by_type() {
        let message = SyncMessage::Conflict(SyncConflictNotice {
            org_id: "org".into(),
            resource_type: "knowledge".into(),
            resource_id: "kb_1".into(),
        });
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "type": "sync:conflict",
                "org_id": "org",
                "resource_type": "knowledge",
                "resource_id": "kb_1"
            })
        );
        assert_eq!(message.kind(), "sync:conflict");
        assert_eq!(message.org_id(), "org");
    }

    #[test]
    fn change_decodes_from_wire_shape() {
        let raw = r#"{
            "type": "sync:change",
            "org_id": "org",
            "resource_type": "member",
            "resource_id": "m_1",
            "action": "update",
            "data": {"name": "Bob"},
            "version": 2,
            "vector_clock": {"bob": 1},
            "author_did": "did:bob",
            "timestamp": 1700,
            "signature": "sig"
        }"#;
        let SyncMessage::Change(decoded) = SyncMessage::from_json(raw).unwrap() else {
            panic!("expected a change");
        };
        assert_eq!(decoded.vector_clock.get("bob"), 1);
        assert_eq!(decoded.action, QueueAction::Update);
    }

    #[test]
    fn malformed_clock_in_change_decodes_as_empty() {
        let mut value = serde_json::to_value(SyncMessage::Change(change())).unwrap();
        value["vector_clock"] = json!("nonsense");
        let SyncMessage::Change(decoded) = serde_json::from_value(value).unwrap() else {
            panic!("expected a change");
        };
        assert!(decoded.vector_clock.is_empty());
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        assert!(SyncMessage::from_json(r#"{"type": "sync:gossip", "org_id": "org"}"#).is_err());
    }

    #[test]
    fn signing_payload_ignores_signature() {
        let original = change();
        let mut resigned = change();
        resigned.signature = "other".into();
        assert_eq!(
            original.signing_payload().unwrap(),
            resigned.signing_payload().unwrap()
        );

        let mut edited = change();
        edited.data = json!({"name": "Eve"});
        assert_ne!(
            original.signing_payload().unwrap(),
            edited.signing_payload().unwrap()
        );
    }

    #[test]
    fn signing_payload_has_sorted_data_keys() {
        let payload = String::from_utf8(change().signing_payload().unwrap()).unwrap();
        assert!(payload.contains(r#""data":{"age":3,"name":"Bob"}"#));
        assert!(!payload.contains("signature"));
    }
}
