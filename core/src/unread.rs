/// Per-counterparty unread counts
///
/// For a closed conversation the count equals its inbound messages not yet
/// `Read`. The open conversation is pinned at zero: anything arriving in it is
/// marked read on the spot.
use crate::delivery::DeliveryStateMachine;
use crate::error::Result;
use crate::identity::ParticipantId;
use crate::message_store::{MessageStatus, MessageStore, StoreEvent};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct UnreadCounter {
    counts: HashMap<ParticipantId, u32>,
    open: Option<ParticipantId>,
    delivery: DeliveryStateMachine,
}

impl UnreadCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, counterparty: &ParticipantId) -> u32 {
        self.counts.get(counterparty).copied().unwrap_or(0)
    }

    pub fn current_conversation(&self) -> Option<&ParticipantId> {
        self.open.as_ref()
    }

    pub fn is_open(&self, counterparty: &ParticipantId) -> bool {
        self.open.as_ref() == Some(counterparty)
    }

    /// Status an inbound message should be stored with. Arrivals in the open
    /// conversation are read on the spot, so they never show up unread.
    pub fn arrival_status(&self, conversation_id: &ParticipantId) -> MessageStatus {
        if self.is_open(conversation_id) {
            MessageStatus::Read
        } else {
            MessageStatus::Delivered
        }
    }

    /// React to a store change. Returns the follow-up events caused by
    /// marking messages read in the open conversation.
    pub fn on_store_event(
        &mut self,
        store: &mut MessageStore,
        event: &StoreEvent,
    ) -> Result<Vec<StoreEvent>> {
        let mut follow_up = Vec::new();
        match event {
            StoreEvent::Appended(message) if message.is_inbound() => {
                if self.is_open(&message.conversation_id) {
                    if let Some(read) = self.delivery.on_read_ack(store, message.id)? {
                        follow_up.push(read);
                    }
                } else if message.status != MessageStatus::Read {
                    *self
                        .counts
                        .entry(message.conversation_id.clone())
                        .or_insert(0) += 1;
                }
            }
            StoreEvent::StatusChanged { message, from }
                if message.is_inbound()
                    && message.status == MessageStatus::Read
                    && *from != MessageStatus::Read
                    && !self.is_open(&message.conversation_id) =>
            {
                // Read elsewhere (e.g. by a stray read ack)
                if let Some(count) = self.counts.get_mut(&message.conversation_id) {
                    *count = count.saturating_sub(1);
                }
            }
            _ => {}
        }
        Ok(follow_up)
    }

    /// Mark `counterparty` open: its count drops to zero and every inbound
    /// message in it that is not yet read is marked read.
    pub fn open_conversation(
        &mut self,
        store: &mut MessageStore,
        counterparty: &ParticipantId,
    ) -> Result<Vec<StoreEvent>> {
        let pending: Vec<_> = store
            .messages_in(counterparty)?
            .filter(|m| m.is_inbound() && m.status != MessageStatus::Read)
            .map(|m| m.id)
            .collect();

        self.open = Some(counterparty.clone());
        self.counts.insert(counterparty.clone(), 0);

        let events = store.set_status_batch(&pending, MessageStatus::Read)?;
        debug!("Opened conversation {} ({} marked read)", counterparty, events.len());
        Ok(events)
    }

    /// Clear the open marker; unread accumulation resumes everywhere.
    pub fn close_conversation(&mut self) -> Option<ParticipantId> {
        self.open.take()
    }

    /// Count recomputed from the store, for reconciliation checks
    pub fn derived_count(store: &MessageStore, counterparty: &ParticipantId) -> Result<u32> {
        Ok(store
            .messages_in(counterparty)?
            .filter(|m| m.is_inbound() && m.status != MessageStatus::Read)
            .count() as u32)
    }
}
