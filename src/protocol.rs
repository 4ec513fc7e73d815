// SPDX-License-Identifier: AGPL-3.0-or-later

//! The wire codec: a small tagged-union protocol of text-framed messages (spec
//! §4.5, §6.1). One message decodes per transport frame; decode failure
//! produces a single `ERROR` reply and the session continues, it never
//! closes the connection.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ot::Operation;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "JOIN_DOCUMENT")]
    JoinDocument { #[serde(rename = "docId")] doc_id: String },
    #[serde(rename = "APPLY_OP")]
    ApplyOp { op: Operation },
    #[serde(rename = "CURSOR_UPDATE")]
    CursorUpdate { position: usize },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "SYNC_STATE")]
    SyncState {
        content: String,
        version: u64,
        cursors: HashMap<String, usize>,
    },
    #[serde(rename = "ACK_OP")]
    AckOp {
        #[serde(rename = "opId")]
        op_id: String,
        #[serde(rename = "newVersion")]
        new_version: u64,
    },
    #[serde(rename = "BROADCAST_OP")]
    BroadcastOp { op: Operation },
    #[serde(rename = "CURSOR_UPDATE")]
    CursorUpdate {
        #[serde(rename = "userId")]
        user_id: String,
        position: usize,
    },
    #[serde(rename = "USER_JOINED")]
    UserJoined { #[serde(rename = "userId")] user_id: String },
    #[serde(rename = "USER_LEFT")]
    UserLeft { #[serde(rename = "userId")] user_id: String },
    #[serde(rename = "ERROR")]
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        kind: Option<&'static str>,
    },
}

impl ServerMessage {
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).expect("ServerMessage always serializes")
    }
}

/// Decodes exactly one client message from a transport frame. Callers turn a
/// decode failure into a single `ERROR{"Invalid message format"}` reply.
pub fn decode(frame: &str) -> Result<ClientMessage, serde_json::Error> {
    serde_json::from_str(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_join_document() {
        let frame = r#"{"type":"JOIN_DOCUMENT","docId":"abc"}"#;
        match decode(frame).unwrap() {
            ClientMessage::JoinDocument { doc_id } => assert_eq!(doc_id, "abc"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn decodes_apply_op() {
        let frame = r#"{"type":"APPLY_OP","op":{"opId":"1","docId":"d","userId":"u","baseVersion":0,"position":0,"type":"insert","text":"x"}}"#;
        match decode(frame).unwrap() {
            ClientMessage::ApplyOp { op } => assert_eq!(op.op_id, "1"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_frame() {
        assert!(decode("not json").is_err());
    }

    #[test]
    fn serializes_ack_op_with_camel_case_fields() {
        let msg = ServerMessage::AckOp {
            op_id: "1".to_string(),
            new_version: 3,
        };
        assert_eq!(msg.to_text(), r#"{"type":"ACK_OP","opId":"1","newVersion":3}"#);
    }

    #[test]
    fn error_without_kind_omits_the_field() {
        let msg = ServerMessage::Error {
            message: "bad".to_string(),
            kind: None,
        };
        assert_eq!(msg.to_text(), r#"{"type":"ERROR","message":"bad"}"#);
    }
}
