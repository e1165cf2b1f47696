/// Shared types at the core's boundaries: transport events in, view events out
use crate::identity::{name_matches, ParticipantId};
use crate::message_store::{Message, MessageId, MessageStatus};
use crate::presence::PresenceState;
use crate::Timestamp;
use serde::{Deserialize, Serialize};

const MAX_PREVIEW_LEN: usize = 50;

/// Events arriving from the network transport, in no guaranteed order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportEvent {
    PresenceOnline {
        participant_id: ParticipantId,
    },
    PresenceOffline {
        participant_id: ParticipantId,
        at: Timestamp,
    },
    MessageReceived {
        sender_id: ParticipantId,
        body: String,
        sent_at: Timestamp,
    },
    DeliveredAck {
        message_id: MessageId,
    },
    ReadAck {
        message_id: MessageId,
    },
}

impl TransportEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportEvent::PresenceOnline { .. } => "presence_online",
            TransportEvent::PresenceOffline { .. } => "presence_offline",
            TransportEvent::MessageReceived { .. } => "message_received",
            TransportEvent::DeliveredAck { .. } => "delivered_ack",
            TransportEvent::ReadAck { .. } => "read_ack",
        }
    }
}

/// Real-time events streamed to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A message was sent or received
    MessageAppended { message: Message },
    /// A message moved forward in its delivery lifecycle
    StatusChanged {
        message_id: MessageId,
        conversation_id: ParticipantId,
        status: MessageStatus,
    },
    PresenceChanged {
        participant_id: ParticipantId,
        presence: PresenceState,
    },
    UnreadChanged {
        participant_id: ParticipantId,
        count: u32,
    },
    ConversationOpened { participant_id: ParticipantId },
    ConversationClosed { participant_id: ParticipantId },
}

/// One row of the contact list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactView {
    pub id: ParticipantId,
    pub name: String,
    pub avatar_ref: Option<String>,
    pub presence: PresenceState,
    pub unread_count: u32,
    /// Body of the last message, truncated
    pub last_preview: Option<String>,
}

/// One bubble of the active thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: MessageId,
    pub body: String,
    pub timestamp: Timestamp,
    pub status: MessageStatus,
    pub is_local: bool,
}

impl From<&Message> for MessageView {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            body: message.body.clone(),
            timestamp: message.created_at,
            status: message.status,
            is_local: message.is_local(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveConversation {
    pub counterparty: ParticipantId,
    pub messages: Vec<MessageView>,
}

/// Read-only view model republished after every state change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewSnapshot {
    /// Bumped by one on every publish
    pub revision: u64,
    /// Counterparties in registration order
    pub contacts: Vec<ContactView>,
    pub active: Option<ActiveConversation>,
}

impl ViewSnapshot {
    pub fn contact(&self, id: &ParticipantId) -> Option<&ContactView> {
        self.contacts.iter().find(|c| &c.id == id)
    }

    pub fn unread(&self, id: &ParticipantId) -> u32 {
        self.contact(id).map(|c| c.unread_count).unwrap_or(0)
    }

    /// Contacts whose name contains `term`, ignoring case
    pub fn search(&self, term: &str) -> Vec<&ContactView> {
        self.contacts
            .iter()
            .filter(|c| name_matches(&c.name, term))
            .collect()
    }
}

/// Truncate content for preview display
pub fn truncate_preview(content: &str) -> String {
    if content.chars().count() <= MAX_PREVIEW_LEN {
        content.to_string()
    } else {
        let mut preview: String = content.chars().take(MAX_PREVIEW_LEN - 3).collect();
        preview.push_str("...");
        preview
    }
}
