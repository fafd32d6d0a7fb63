use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::types::{ParticipantId, RoomId};

/// A direct message as shown to clients, over HTTP and on the live channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: Uuid,
    pub content: String,
    pub sender_id: ParticipantId,
    pub receiver_id: ParticipantId,
    /// Team name of the sender, from the participant directory
    pub sender_name: String,
    /// Server-assigned creation time; the canonical ordering key
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
}

/// Events sent by a client over the duplex channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinRoom(RoomId),
    LeaveRoom(RoomId),
    SendMessage(SendMessage),
    Typing(Typing),
    MarkRead(MarkRead),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub room_id: RoomId,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typing {
    pub room_id: RoomId,
    pub is_typing: bool,
    /// Accepted for compatibility; the server labels the event from its own directory.
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRead {
    pub room_id: RoomId,
}

/// Events pushed by the server over the duplex channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// A message was persisted in one of the connection's rooms
    NewMessage(MessageView),
    /// Acknowledgement of a `send-message` to the connection that sent it
    MessageSent(MessageView),
    UserTyping(TypingNotice),
    MessagesRead(ReadReceipt),
    Error(ErrorNotice),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub room_id: RoomId,
    pub is_typing: bool,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub room_id: RoomId,
    pub reader_id: ParticipantId,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub message: String,
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorNotice {
            message: message.into(),
        })
    }

    /// Wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::NewMessage(_) => "new-message",
            ServerEvent::MessageSent(_) => "message-sent",
            ServerEvent::UserTyping(_) => "user-typing",
            ServerEvent::MessagesRead(_) => "messages-read",
            ServerEvent::Error(_) => "error",
        }
    }

    /// Serialize to a JSON text frame
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl ClientEvent {
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a JSON text frame from a client
    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn room_id(&self) -> &RoomId {
        match self {
            ClientEvent::JoinRoom(room) | ClientEvent::LeaveRoom(room) => room,
            ClientEvent::SendMessage(m) => &m.room_id,
            ClientEvent::Typing(t) => &t.room_id,
            ClientEvent::MarkRead(m) => &m.room_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::resolve;

    #[test]
    fn test_client_frame_shape() {
        let a = ParticipantId::new();
        let b = ParticipantId::new();
        let room = resolve(a, b);

        let text = format!(r#"{{"event":"join-room","data":"{room}"}}"#);
        let event = ClientEvent::from_text(&text).unwrap();
        assert_eq!(event, ClientEvent::JoinRoom(room.clone()));

        let text = format!(
            r#"{{"event":"typing","data":{{"roomId":"{room}","isTyping":true,"displayName":"Eagles"}}}}"#
        );
        match ClientEvent::from_text(&text).unwrap() {
            ClientEvent::Typing(t) => {
                assert!(t.is_typing);
                assert_eq!(t.room_id, room);
                assert_eq!(t.display_name.as_deref(), Some("Eagles"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_client_frame_with_bad_room_is_rejected() {
        let text = r#"{"event":"join-room","data":"someone-elses-room"}"#;
        assert!(matches!(
            ClientEvent::from_text(text),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_server_frame_shape() {
        let sender = ParticipantId::new();
        let receiver = ParticipantId::new();
        let event = ServerEvent::NewMessage(MessageView {
            id: Uuid::new_v4(),
            content: "hi".into(),
            sender_id: sender,
            receiver_id: receiver,
            sender_name: "Eagles".into(),
            timestamp: Utc::now(),
            is_read: false,
        });

        let value: serde_json::Value = serde_json::from_str(&event.to_text().unwrap()).unwrap();
        assert_eq!(value["event"], "new-message");
        assert_eq!(value["data"]["senderId"], sender.to_string());
        assert_eq!(value["data"]["isRead"], false);
        assert_eq!(event.name(), "new-message");
    }
}
