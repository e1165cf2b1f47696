/// Duet - one-to-one chat core
///
/// Message identity and ordering, the delivery/read lifecycle, per-contact
/// unread counts and presence reconciliation over a transport that may be
/// slow, reordered or disconnected.

pub mod cli_app;
pub mod config;
pub mod contact_store;
pub mod delivery;
pub mod demo;
pub mod error;
pub mod identity;
pub mod message_store;
pub mod messenger_types;
pub mod presence;
pub mod session;
pub mod transport;
pub mod unread;
pub mod utils;

/// Wall-clock instant used for message and presence timestamps
pub type Timestamp = chrono::DateTime<chrono::Utc>;

pub use config::Config;
pub use delivery::{Ack, DeliveryStateMachine};
pub use error::{ChatError, Result};
pub use identity::{IdentityRegistry, Participant, ParticipantId};
pub use message_store::{ConversationView, Message, MessageId, MessageStatus, MessageStore, StoreEvent};
pub use messenger_types::{SessionEvent, TransportEvent, ViewSnapshot};
pub use presence::{PresenceState, PresenceStatus, PresenceTracker};
pub use session::{ChatSession, Ingress, SessionHandle};
pub use transport::Transport;
pub use unread::UnreadCounter;
