/// Delivery lifecycle: `Sent -> Delivered -> Read`
///
/// Acknowledgments may be retransmitted or reordered by the transport, so
/// every ack is idempotent: an ack that would not move the message forward is
/// a no-op. A read ack may skip `Delivered`, since reading implies delivery.
use crate::error::{ChatError, Result};
use crate::message_store::{MessageId, MessageStatus, MessageStore, StoreEvent};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Transport acknowledgment kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ack {
    Delivered,
    Read,
}

impl Ack {
    /// Status a message reaches once this ack is applied
    pub fn target(&self) -> MessageStatus {
        match self {
            Ack::Delivered => MessageStatus::Delivered,
            Ack::Read => MessageStatus::Read,
        }
    }
}

/// Drives status transitions through the `MessageStore`
#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryStateMachine;

impl DeliveryStateMachine {
    pub fn new() -> Self {
        Self
    }

    pub fn on_delivered_ack(
        &self,
        store: &mut MessageStore,
        id: MessageId,
    ) -> Result<Option<StoreEvent>> {
        self.apply(store, id, Ack::Delivered)
    }

    pub fn on_read_ack(&self, store: &mut MessageStore, id: MessageId) -> Result<Option<StoreEvent>> {
        self.apply(store, id, Ack::Read)
    }

    /// Apply an ack. Returns the store event when the status advanced and
    /// `None` when the message was already at least that far along.
    pub fn apply(
        &self,
        store: &mut MessageStore,
        id: MessageId,
        ack: Ack,
    ) -> Result<Option<StoreEvent>> {
        let current = store.by_id(id)?.status;
        let target = ack.target();
        if current >= target {
            debug!("Ignoring {:?} ack for message {} already {}", ack, id, current);
            return Ok(None);
        }

        match store.set_status(id, target) {
            Ok(event) => Ok(Some(event)),
            Err(e @ ChatError::InvalidTransition { .. }) => {
                error!("Delivery state machine produced a backward transition: {}", e);
                debug_assert!(false, "{}", e);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}
