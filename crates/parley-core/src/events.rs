//! Chat events as they travel over the wire.
//!
//! Every frame is a JSON object discriminated by `type`. All kinds share the
//! same field set; fields that do not apply to a kind are omitted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, MessageId, UserId};

/// Discriminator carried in the `type` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Sent once to a connection right after it is registered.
    ConnectionSuccess,
    /// Online/offline notice.
    Presence,
    /// Client asks the hub to deliver a message.
    MessageSend,
    /// A persisted message, fanned out by the hub.
    MessageReceived,
    /// Hub-originated failure notice.
    Error,
    /// Any `type` value this build does not recognize.
    #[serde(other)]
    Unknown,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionSuccess => "connection_success",
            Self::Presence => "presence",
            Self::MessageSend => "message_send",
            Self::MessageReceived => "message_received",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

/// A single chat event.
///
/// `sender_id` defaults to `0` when a client omits it; the read pump always
/// overwrites it with the authenticated user before the hub sees the event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ChatEvent {
    fn new(kind: EventKind, sender_id: UserId, content: impl Into<String>) -> Self {
        Self {
            kind,
            sender_id,
            receiver_id: None,
            conversation_id: None,
            content: content.into(),
            message_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Acknowledgement for a freshly registered connection.
    pub fn connection_success(user_id: UserId) -> Self {
        let mut event = Self::new(EventKind::ConnectionSuccess, user_id, "connected");
        event.receiver_id = Some(user_id);
        event
    }

    pub fn presence(user_id: UserId, status: PresenceStatus) -> Self {
        Self::new(EventKind::Presence, user_id, status.as_str())
    }

    /// A direct message from `sender_id` to `receiver_id`.
    pub fn message_send(sender_id: UserId, receiver_id: UserId, content: impl Into<String>) -> Self {
        let mut event = Self::new(EventKind::MessageSend, sender_id, content);
        event.receiver_id = Some(receiver_id);
        event
    }

    /// A message addressed to every member of an existing conversation.
    pub fn group_send(
        sender_id: UserId,
        conversation_id: ConversationId,
        content: impl Into<String>,
    ) -> Self {
        let mut event = Self::new(EventKind::MessageSend, sender_id, content);
        event.conversation_id = Some(conversation_id);
        event
    }

    pub fn message_received(
        sender_id: UserId,
        receiver_id: Option<UserId>,
        conversation_id: ConversationId,
        message_id: MessageId,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: EventKind::MessageReceived,
            sender_id,
            receiver_id,
            conversation_id: Some(conversation_id),
            content: content.into(),
            message_id: Some(message_id),
            timestamp,
        }
    }

    /// Failure notice addressed to `user_id`.
    pub fn error(user_id: UserId, reason: impl Into<String>) -> Self {
        let mut event = Self::new(EventKind::Error, user_id, reason);
        event.receiver_id = Some(user_id);
        event
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
