//! Wire messages exchanged between the editor and the agent.
//!
//! Every message travels as a JSON envelope `{"type": ..., "payload": ...}`
//! over an ordered, at-least-once channel. Receivers de-duplicate by diff id
//! or turn id.

use crate::diff::{Diff, DiffId};
use crate::error::{Result, StoryError};
use serde::{Deserialize, Serialize};

/// How the editor disposed of a suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Applied,
    Rejected,
    /// The original span was gone at accept time; the diff was discarded.
    Stale,
}

/// A synchronization message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
#[serde(rename_all_fields = "camelCase")]
pub enum SyncMessage {
    /// Editor → agent: the full current text.
    DocumentUpdate {
        text: String,
        #[serde(default)]
        version: u64,
    },
    /// Agent → editor: a validated suggestion.
    DiffProposal { diff: Diff },
    /// Agent → editor: spoken form of a turn, sent before audio completes.
    AgentUtterance { text: String, turn_id: String },
    /// Agent → editor: mirror is stale, please send a fresh `DocumentUpdate`.
    ResyncRequest,
    /// Editor → agent: what happened to a suggestion.
    DiffResolution {
        diff_id: DiffId,
        resolution: Resolution,
    },
}

impl SyncMessage {
    /// Wire name of the message type.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DocumentUpdate { .. } => "document_update",
            Self::DiffProposal { .. } => "diff_proposal",
            Self::AgentUtterance { .. } => "agent_utterance",
            Self::ResyncRequest => "resync_request",
            Self::DiffResolution { .. } => "diff_resolution",
        }
    }

    /// Serialize to envelope bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| StoryError::Sync(format!("failed to encode {}: {e}", self.kind())))
    }

    /// Parse envelope bytes.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed JSON or an unknown message type.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| StoryError::Sync(format!("failed to decode sync message: {e}")))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::diff::propose;
    use serde_json::json;

    #[test]
    fn envelope_has_type_and_payload() {
        let msg = SyncMessage::AgentUtterance {
            text: "Good.".into(),
            turn_id: "t1".into(),
        };
        let value: serde_json::Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "agent_utterance", "payload": {"text": "Good.", "turnId": "t1"}})
        );
    }

    #[test]
    fn resync_request_has_no_payload() {
        let value = serde_json::to_value(SyncMessage::ResyncRequest).unwrap();
        assert_eq!(value, json!({"type": "resync_request"}));
        let parsed = SyncMessage::decode(br#"{"type":"resync_request"}"#).unwrap();
        assert_eq!(parsed, SyncMessage::ResyncRequest);
    }

    #[test]
    fn decodes_frontend_document_update() {
        let parsed =
            SyncMessage::decode(br#"{"type":"document_update","payload":{"text":"Hi.","version":3}}"#)
                .unwrap();
        assert_eq!(
            parsed,
            SyncMessage::DocumentUpdate {
                text: "Hi.".into(),
                version: 3
            }
        );
    }

    #[test]
    fn proposal_round_trips_through_bytes() {
        let msg = SyncMessage::DiffProposal {
            diff: propose("Hi.", "(happy) Hi.", "warmer"),
        };
        let parsed = SyncMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(parsed.kind(), "diff_proposal");
    }

    #[test]
    fn resolution_uses_camel_case_id() {
        let msg = SyncMessage::DiffResolution {
            diff_id: DiffId::from("d1"),
            resolution: Resolution::Stale,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["payload"]["diffId"], "d1");
        assert_eq!(value["payload"]["resolution"], "stale");
    }

    #[test]
    fn unknown_type_is_a_sync_error() {
        let err = SyncMessage::decode(br#"{"type":"story_delete","payload":{}}"#).unwrap_err();
        assert!(matches!(err, StoryError::Sync(_)));
        assert!(SyncMessage::decode(b"not json").is_err());
    }
}
