/// Error types for the chat core
use crate::identity::ParticipantId;
use crate::message_store::{MessageId, MessageStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Unknown identity: {0}")]
    UnknownIdentity(ParticipantId),

    #[error("Duplicate identity: {0}")]
    DuplicateIdentity(ParticipantId),

    #[error("Unknown message: {0}")]
    UnknownMessage(MessageId),

    #[error("Invalid status transition for message {id}: {from} -> {to}")]
    InvalidTransition {
        id: MessageId,
        from: MessageStatus,
        to: MessageStatus,
    },

    #[error("Message body is empty")]
    EmptyBody,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Chat session is closed")]
    SessionClosed,
}

impl ChatError {
    /// Errors a transport may legitimately trigger by referencing state from a
    /// prior session or a since-removed counterparty.
    pub fn is_transport_recoverable(&self) -> bool {
        matches!(
            self,
            ChatError::UnknownIdentity(_) | ChatError::UnknownMessage(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
