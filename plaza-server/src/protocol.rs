//! Wire vocabulary between clients and the relay.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<name>", "data": <payload>}`. Event names are camelCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::{ConnId, UserRecord};

/// Sender name carried by relay-originated notices.
pub const SYSTEM_SENDER: &str = "system";

/// Frames a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Claim a display name.
    Join(String),
    /// Say something to everyone.
    PublicMessage(String),
    /// Say something to one user, addressed by connection id.
    PrivateMessage(PrivateMessageRequest),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PrivateMessageRequest {
    pub to: ConnId,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Public,
    Private,
    System,
}

/// A chat line as delivered to clients. Built per send, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub sender: String,
    /// Recipient's display name; only set on private messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
}

impl ChatMessage {
    pub fn public(sender: impl Into<String>, body: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            sender: sender.into(),
            to: None,
            body: body.into(),
            timestamp,
            kind: MessageKind::Public,
        }
    }

    pub fn private(
        sender: impl Into<String>,
        to: impl Into<String>,
        body: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            sender: sender.into(),
            to: Some(to.into()),
            body: body.into(),
            timestamp,
            kind: MessageKind::Private,
        }
    }

    pub fn system(body: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            sender: SYSTEM_SENDER.to_string(),
            to: None,
            body: body.into(),
            timestamp,
            kind: MessageKind::System,
        }
    }
}

/// Frames the relay sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum OutboundEvent {
    /// First frame on every connection: the id other users address it by.
    Connected { id: ConnId },
    /// Join accepted. Sent only to the joiner.
    UserJoined { users: Vec<UserRecord> },
    /// Join rejected because the name is in use.
    UsernameTaken,
    /// Join rejected because the name is malformed.
    InvalidName { reason: String },
    /// Full presence list after someone joined or left.
    UsersUpdate(Vec<UserRecord>),
    PublicMessage(ChatMessage),
    PrivateMessage(ChatMessage),
    /// A request failed; only the requester sees this.
    Error(String),
}

impl OutboundEvent {
    /// Event name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::Connected { .. } => "connected",
            OutboundEvent::UserJoined { .. } => "userJoined",
            OutboundEvent::UsernameTaken => "usernameTaken",
            OutboundEvent::InvalidName { .. } => "invalidName",
            OutboundEvent::UsersUpdate(_) => "usersUpdate",
            OutboundEvent::PublicMessage(_) => "publicMessage",
            OutboundEvent::PrivateMessage(_) => "privateMessage",
            OutboundEvent::Error(_) => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 18, 30, 0).unwrap()
    }

    #[test]
    fn parses_client_frames() {
        let join: ClientEvent = serde_json::from_str(r#"{"event":"join","data":"ana"}"#).unwrap();
        assert_eq!(join, ClientEvent::Join("ana".into()));

        let public: ClientEvent =
            serde_json::from_str(r#"{"event":"publicMessage","data":"hola"}"#).unwrap();
        assert_eq!(public, ClientEvent::PublicMessage("hola".into()));

        let private: ClientEvent = serde_json::from_str(
            r#"{"event":"privateMessage","data":{"to":"c7","message":"psst"}}"#,
        )
        .unwrap();
        assert_eq!(
            private,
            ClientEvent::PrivateMessage(PrivateMessageRequest {
                to: ConnId::new(7),
                message: "psst".into(),
            })
        );
    }

    #[test]
    fn rejects_unknown_or_malformed_frames() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"shout","data":"x"}"#).is_err());
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"join","data":5}"#).is_err());
        assert!(
            serde_json::from_str::<ClientEvent>(
                r#"{"event":"privateMessage","data":{"to":"nobody","message":"x"}}"#
            )
            .is_err()
        );
        assert!(serde_json::from_str::<ClientEvent>("not json").is_err());
    }

    #[test]
    fn public_message_frame_shape() {
        let event = OutboundEvent::PublicMessage(ChatMessage::public("ana", "hola", ts()));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "publicMessage",
                "data": {
                    "sender": "ana",
                    "body": "hola",
                    "timestamp": "2024-03-09T18:30:00Z",
                    "kind": "public",
                }
            })
        );
        assert_eq!(value["event"], event.name());
    }

    #[test]
    fn private_message_carries_recipient_name() {
        let event = OutboundEvent::PrivateMessage(ChatMessage::private("ana", "beto", "hi", ts()));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["data"]["to"], "beto");
        assert_eq!(value["data"]["kind"], "private");
    }

    #[test]
    fn presence_frames_list_users() {
        let users = vec![UserRecord {
            id: ConnId::new(3),
            name: "ana".into(),
            join_time: ts(),
        }];
        let value = serde_json::to_value(OutboundEvent::UsersUpdate(users.clone())).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "usersUpdate",
                "data": [{"id": "c3", "username": "ana", "joinTime": "2024-03-09T18:30:00Z"}]
            })
        );

        let joined = serde_json::to_value(OutboundEvent::UserJoined { users }).unwrap();
        assert_eq!(joined["data"]["users"][0]["username"], "ana");
    }

    #[test]
    fn unit_and_system_frames() {
        let taken = serde_json::to_value(OutboundEvent::UsernameTaken).unwrap();
        assert_eq!(taken, json!({"event": "usernameTaken"}));

        let notice = ChatMessage::system("ana joined the chat", ts());
        assert_eq!(notice.sender, SYSTEM_SENDER);
        assert_eq!(notice.kind, MessageKind::System);
        assert!(notice.to.is_none());
    }
}
