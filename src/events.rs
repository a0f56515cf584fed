//! Wire events with `{ type, payload }` envelopes.
//!
//! The event set is closed: every inbound and outbound event is a variant
//! of `ClientEvent` / `ServerEvent` with a strongly-typed payload, so there
//! is exactly one place to see the whole protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Attachment, MessageKind, ParticipantRole, StoredMessage};

/// Client → Server events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Must be the first event on a connection.
    #[serde(rename_all = "camelCase")]
    Authenticate { token: String },
    #[serde(rename_all = "camelCase")]
    Join { group_id: String },
    #[serde(rename_all = "camelCase")]
    Leave { group_id: String },
    SendMessage(SendMessage),
    #[serde(rename_all = "camelCase")]
    Typing { group_id: String },
    #[serde(rename_all = "camelCase")]
    StopTyping { group_id: String },
    #[serde(rename_all = "camelCase")]
    React {
        group_id: String,
        message_id: String,
        emoji: String,
    },
    #[serde(rename_all = "camelCase")]
    MarkRead {
        group_id: String,
        message_id: String,
    },
}

/// Payload for the send-message intent.
///
/// `client_msg_id` is echoed back in the ack so a client can correlate a
/// retry with a previous attempt; the server does not deduplicate on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_msg_id: Option<String>,
    pub group_id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
}

/// Server → Client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    Authenticated { user_id: String },
    #[serde(rename_all = "camelCase")]
    Joined { group_id: String },
    #[serde(rename_all = "camelCase")]
    Left { group_id: String },
    MessageReceived(StoredMessage),
    #[serde(rename_all = "camelCase")]
    UserTyping { group_id: String, user_id: String },
    #[serde(rename_all = "camelCase")]
    UserStoppedTyping { group_id: String, user_id: String },
    #[serde(rename_all = "camelCase")]
    ReactionAdded {
        group_id: String,
        message_id: String,
        user_id: String,
        emoji: String,
    },
    #[serde(rename_all = "camelCase")]
    MessageRead {
        group_id: String,
        message_id: String,
        user_id: String,
    },
    #[serde(rename_all = "camelCase")]
    GroupUpdated { group_id: String },
    Notification(UserNotification),
    Ack(Ack),
    #[serde(rename_all = "camelCase")]
    Error { code: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Ok,
    Error,
}

/// Server response to a client intent, sent only to the originating
/// connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_msg_id: Option<String>,
    pub status: AckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Per-user, cross-group notifications. Addressed by user id through the
/// fan-out, never by room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum UserNotification {
    #[serde(rename_all = "camelCase")]
    GroupInvite {
        group_id: String,
        group_name: String,
        invited_by: String,
        role: ParticipantRole,
    },
}

/// Published on the in-process bus after every successful append.
/// Subscribers (the last-message projection, activity counters, ...) react
/// after the fact; nothing on this bus can fail or roll back the append.
#[derive(Debug, Clone)]
pub struct AppendEvent {
    pub message: StoredMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_envelope_shape() {
        let json = r#"{"type":"join","payload":{"groupId":"g1"}}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            ClientEvent::Join {
                group_id: "g1".into()
            }
        );
    }

    #[test]
    fn send_message_round_trip() {
        let event = ClientEvent::SendMessage(SendMessage {
            client_msg_id: Some("c-1".into()),
            group_id: "g1".into(),
            text: "hello".into(),
            kind: None,
            attachments: None,
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"sendMessage""#));
        assert!(json.contains(r#""clientMsgId":"c-1""#));
        let back: ClientEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn server_error_event_shape() {
        let event = ServerEvent::Error {
            code: "FORBIDDEN".into(),
            message: "not a participant".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["payload"]["code"], "FORBIDDEN");
    }
}
