/// Append-only message log, one ordered thread per counterparty
///
/// The store is the single writer of message status. Every append or status
/// change is published twice: as a `StoreEvent` on a broadcast channel, and
/// as a fresh ordered snapshot on the affected conversation's watch channel so
/// holders of a `ConversationView` see it without querying again.
use crate::error::{ChatError, Result};
use crate::identity::{IdentityRegistry, ParticipantId};
use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::debug;

const STORE_EVENT_CAPACITY: usize = 1024;

/// Session-local message id, assigned monotonically and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(u64);

impl MessageId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery status, ordered `Sent < Delivered < Read`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat message. Only `status` changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// The counterparty this one-to-one thread belongs to
    pub conversation_id: ParticipantId,
    pub sender_id: ParticipantId,
    pub body: String,
    pub created_at: Timestamp,
    pub status: MessageStatus,
}

impl Message {
    pub fn is_local(&self) -> bool {
        self.sender_id.is_local()
    }

    pub fn is_inbound(&self) -> bool {
        !self.is_local()
    }

    fn sort_key(&self) -> (Timestamp, MessageId) {
        (self.created_at, self.id)
    }
}

/// Change notification published by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Appended(Message),
    /// `message` carries the new status
    StatusChanged { message: Message, from: MessageStatus },
}

impl StoreEvent {
    pub fn message(&self) -> &Message {
        match self {
            StoreEvent::Appended(message) => message,
            StoreEvent::StatusChanged { message, .. } => message,
        }
    }
}

/// Ordered messages of one conversation at a point in time
pub type ConversationSnapshot = Arc<Vec<Message>>;

/// Live view over one conversation. Always reflects the latest committed
/// thread; `changed` resolves when an append or status change lands in it.
#[derive(Debug, Clone)]
pub struct ConversationView {
    rx: watch::Receiver<ConversationSnapshot>,
}

impl ConversationView {
    /// Latest ordered messages; marks the current version as seen
    pub fn current(&mut self) -> ConversationSnapshot {
        self.rx.borrow_and_update().clone()
    }

    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Wait for the next change. Fails once the store has been dropped.
    pub async fn changed(&mut self) -> Result<ConversationSnapshot> {
        self.rx
            .changed()
            .await
            .map_err(|_| ChatError::SessionClosed)?;
        Ok(self.rx.borrow_and_update().clone())
    }
}

struct Thread {
    /// Ids ordered by `(created_at, id)`
    order: Vec<MessageId>,
    live: watch::Sender<ConversationSnapshot>,
}

impl Thread {
    fn new() -> Self {
        let (live, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            order: Vec::new(),
            live,
        }
    }
}

/// Owner of every message record
pub struct MessageStore {
    next_id: u64,
    messages: HashMap<MessageId, Message>,
    threads: HashMap<ParticipantId, Thread>,
    events: broadcast::Sender<StoreEvent>,
}

impl MessageStore {
    /// Create a store with one empty thread per registered counterparty
    pub fn new(registry: &IdentityRegistry) -> Self {
        let (events, _) = broadcast::channel(STORE_EVENT_CAPACITY);
        let mut store = Self {
            next_id: 1,
            messages: HashMap::new(),
            threads: HashMap::new(),
            events,
        };
        for participant in registry.all() {
            store.track(participant.id.clone());
        }
        store
    }

    /// Open a thread for a newly registered counterparty
    pub fn track(&mut self, counterparty: ParticipantId) {
        self.threads.entry(counterparty).or_insert_with(Thread::new);
    }

    /// Append a message. Local messages start at `Sent`; inbound ones have
    /// already reached us and start at `Delivered`.
    pub fn append(
        &mut self,
        sender_id: ParticipantId,
        conversation_id: ParticipantId,
        body: String,
        created_at: Timestamp,
    ) -> Result<Message> {
        let status = if sender_id.is_local() {
            MessageStatus::Sent
        } else {
            MessageStatus::Delivered
        };
        self.append_with_status(sender_id, conversation_id, body, created_at, status)
    }

    /// Append a message that is already past its initial status, e.g. an
    /// inbound message landing in the conversation the user has open. The
    /// first thing subscribers see is `status`.
    pub fn append_with_status(
        &mut self,
        sender_id: ParticipantId,
        conversation_id: ParticipantId,
        body: String,
        created_at: Timestamp,
        status: MessageStatus,
    ) -> Result<Message> {
        if !self.threads.contains_key(&conversation_id) {
            return Err(ChatError::UnknownIdentity(conversation_id));
        }
        if !sender_id.is_local() && sender_id != conversation_id {
            return Err(ChatError::UnknownIdentity(sender_id));
        }

        let id = MessageId(self.next_id);
        self.next_id += 1;

        let message = Message {
            id,
            conversation_id: conversation_id.clone(),
            sender_id,
            body,
            created_at,
            status,
        };
        let key = message.sort_key();
        self.messages.insert(id, message.clone());

        let messages = &self.messages;
        let thread = self
            .threads
            .get_mut(&conversation_id)
            .ok_or_else(|| ChatError::UnknownIdentity(conversation_id.clone()))?;
        let pos = thread
            .order
            .partition_point(|other| messages[other].sort_key() <= key);
        thread.order.insert(pos, id);

        debug!("Appended message {} to conversation {}", id, conversation_id);
        self.refresh(&conversation_id);
        self.broadcast(StoreEvent::Appended(message.clone()));
        Ok(message)
    }

    /// Move a message strictly forward. Anything else is an `InvalidTransition`.
    pub fn set_status(&mut self, id: MessageId, status: MessageStatus) -> Result<StoreEvent> {
        let message = self
            .messages
            .get_mut(&id)
            .ok_or(ChatError::UnknownMessage(id))?;
        let from = message.status;
        if status <= from {
            return Err(ChatError::InvalidTransition {
                id,
                from,
                to: status,
            });
        }
        message.status = status;

        let event = StoreEvent::StatusChanged {
            message: message.clone(),
            from,
        };
        let conversation_id = message.conversation_id.clone();
        debug!("Message {} status {} -> {}", id, from, status);
        self.refresh(&conversation_id);
        self.broadcast(event.clone());
        Ok(event)
    }

    /// Move several messages forward to `status` at once. Nothing changes
    /// unless every transition is valid. Each affected thread is republished
    /// once, after all of them are applied.
    pub fn set_status_batch(
        &mut self,
        ids: &[MessageId],
        status: MessageStatus,
    ) -> Result<Vec<StoreEvent>> {
        for &id in ids {
            let from = self.by_id(id)?.status;
            if status <= from {
                return Err(ChatError::InvalidTransition {
                    id,
                    from,
                    to: status,
                });
            }
        }

        let mut events = Vec::with_capacity(ids.len());
        let mut touched: Vec<ParticipantId> = Vec::new();
        for &id in ids {
            let message = self
                .messages
                .get_mut(&id)
                .ok_or(ChatError::UnknownMessage(id))?;
            // Repeated id
            if message.status >= status {
                continue;
            }
            let from = message.status;
            message.status = status;
            if !touched.contains(&message.conversation_id) {
                touched.push(message.conversation_id.clone());
            }
            events.push(StoreEvent::StatusChanged {
                message: message.clone(),
                from,
            });
        }

        debug!("Moved {} messages to {}", events.len(), status);
        for conversation_id in &touched {
            self.refresh(conversation_id);
        }
        for event in &events {
            self.broadcast(event.clone());
        }
        Ok(events)
    }

    pub fn by_id(&self, id: MessageId) -> Result<&Message> {
        self.messages.get(&id).ok_or(ChatError::UnknownMessage(id))
    }

    /// Live ordered view over one conversation
    pub fn conversation_of(&self, counterparty: &ParticipantId) -> Result<ConversationView> {
        let thread = self.thread(counterparty)?;
        Ok(ConversationView {
            rx: thread.live.subscribe(),
        })
    }

    /// Ordered messages of one conversation, borrowed from the store
    pub fn messages_in<'a>(
        &'a self,
        counterparty: &ParticipantId,
    ) -> Result<impl Iterator<Item = &'a Message> + 'a> {
        let thread = self.thread(counterparty)?;
        Ok(thread.order.iter().map(move |id| &self.messages[id]))
    }

    pub fn last_in(&self, counterparty: &ParticipantId) -> Result<Option<&Message>> {
        let thread = self.thread(counterparty)?;
        Ok(thread.order.last().map(|id| &self.messages[id]))
    }

    /// Subscribe to every append and status change
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn thread(&self, counterparty: &ParticipantId) -> Result<&Thread> {
        self.threads
            .get(counterparty)
            .ok_or_else(|| ChatError::UnknownIdentity(counterparty.clone()))
    }

    /// Push the current thread contents to its live views
    fn refresh(&self, conversation_id: &ParticipantId) {
        if let Some(thread) = self.threads.get(conversation_id) {
            let snapshot: Vec<Message> = thread
                .order
                .iter()
                .map(|id| self.messages[id].clone())
                .collect();
            thread.live.send_replace(Arc::new(snapshot));
        }
    }

    fn broadcast(&self, event: StoreEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Participant;
    use chrono::{Duration, Utc};

    fn store() -> MessageStore {
        let mut reg = IdentityRegistry::new(Participant::local("Me"));
        reg.register(Participant::new("a", "A")).unwrap();
        reg.register(Participant::new("b", "B")).unwrap();
        MessageStore::new(&reg)
    }

    fn a() -> ParticipantId {
        ParticipantId::new("a")
    }

    #[test]
    fn test_append_assigns_monotonic_ids_and_initial_status() {
        let mut store = store();
        let now = Utc::now();

        let m1 = store
            .append(ParticipantId::local(), a(), "hi".into(), now)
            .unwrap();
        let m2 = store.append(a(), a(), "hey".into(), now).unwrap();

        assert!(m2.id > m1.id);
        assert_eq!(m1.status, MessageStatus::Sent);
        assert_eq!(m2.status, MessageStatus::Delivered);
        assert!(m1.is_local());
        assert!(m2.is_inbound());
    }

    #[test]
    fn test_append_to_unknown_conversation() {
        let mut store = store();
        let err = store
            .append(ParticipantId::local(), "zed".into(), "hi".into(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, ChatError::UnknownIdentity(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_append_rejects_foreign_sender() {
        let mut store = store();
        let err = store
            .append("b".into(), a(), "not yours".into(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, ChatError::UnknownIdentity(id) if id.as_str() == "b"));
    }

    #[test]
    fn test_conversation_order_with_skewed_clocks() {
        let mut store = store();
        let now = Utc::now();

        let late = store.append(a(), a(), "late".into(), now).unwrap();
        let early = store
            .append(a(), a(), "early".into(), now - Duration::seconds(30))
            .unwrap();
        let tie = store
            .append(ParticipantId::local(), a(), "tie".into(), now)
            .unwrap();

        let order: Vec<_> = store.messages_in(&a()).unwrap().map(|m| m.id).collect();
        assert_eq!(order, vec![early.id, late.id, tie.id]);
    }

    #[test]
    fn test_set_status_forward_only() {
        let mut store = store();
        let m = store
            .append(ParticipantId::local(), a(), "hi".into(), Utc::now())
            .unwrap();

        store.set_status(m.id, MessageStatus::Delivered).unwrap();
        let err = store.set_status(m.id, MessageStatus::Sent).unwrap_err();
        assert!(matches!(
            err,
            ChatError::InvalidTransition {
                from: MessageStatus::Delivered,
                to: MessageStatus::Sent,
                ..
            }
        ));
        let err = store.set_status(m.id, MessageStatus::Delivered).unwrap_err();
        assert!(matches!(err, ChatError::InvalidTransition { .. }));

        store.set_status(m.id, MessageStatus::Read).unwrap();
        assert_eq!(store.by_id(m.id).unwrap().status, MessageStatus::Read);
    }

    #[test]
    fn test_append_with_status_is_published_as_given() {
        let mut store = store();
        let mut view = store.conversation_of(&a()).unwrap();
        let mut rx = store.subscribe();

        let m = store
            .append_with_status(a(), a(), "hey".into(), Utc::now(), MessageStatus::Read)
            .unwrap();

        assert_eq!(m.status, MessageStatus::Read);
        assert_eq!(rx.try_recv().unwrap(), StoreEvent::Appended(m.clone()));
        assert!(rx.try_recv().is_err());
        assert_eq!(view.current()[0].status, MessageStatus::Read);
    }

    #[test]
    fn test_set_status_batch_republishes_once() {
        let mut store = store();
        let ids: Vec<_> = (0..50)
            .map(|i| {
                store
                    .append(a(), a(), format!("m{}", i), Utc::now())
                    .unwrap()
                    .id
            })
            .collect();
        let mut view = store.conversation_of(&a()).unwrap();
        view.current();
        let mut rx = store.subscribe();

        let events = store.set_status_batch(&ids, MessageStatus::Read).unwrap();
        assert_eq!(events.len(), 50);
        assert!(view.has_changed());
        assert!(view.current().iter().all(|m| m.status == MessageStatus::Read));
        assert!(!view.has_changed());
        for _ in 0..50 {
            assert!(matches!(
                rx.try_recv().unwrap(),
                StoreEvent::StatusChanged {
                    from: MessageStatus::Delivered,
                    ..
                }
            ));
        }
    }

    #[test]
    fn test_set_status_batch_is_all_or_nothing() {
        let mut store = store();
        let pending = store.append(a(), a(), "one".into(), Utc::now()).unwrap();
        let read = store.append(a(), a(), "two".into(), Utc::now()).unwrap();
        store.set_status(read.id, MessageStatus::Read).unwrap();

        let err = store
            .set_status_batch(&[pending.id, read.id], MessageStatus::Read)
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidTransition { id, .. } if id == read.id));
        assert_eq!(store.by_id(pending.id).unwrap().status, MessageStatus::Delivered);

        let events = store
            .set_status_batch(&[pending.id, pending.id], MessageStatus::Read)
            .unwrap();
        assert_eq!(events.len(), 1);
        assert!(store.set_status_batch(&[], MessageStatus::Read).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_message() {
        let mut store = store();
        let ghost = MessageId::new(99);
        assert!(matches!(store.by_id(ghost), Err(ChatError::UnknownMessage(_))));
        assert!(matches!(
            store.set_status(ghost, MessageStatus::Read),
            Err(ChatError::UnknownMessage(_))
        ));
    }

    #[test]
    fn test_live_view_observes_changes() {
        let mut store = store();
        let mut view = store.conversation_of(&a()).unwrap();
        assert!(view.current().is_empty());

        let m = store
            .append(ParticipantId::local(), a(), "hi".into(), Utc::now())
            .unwrap();
        assert!(view.has_changed());
        assert_eq!(view.current()[0].id, m.id);

        store.set_status(m.id, MessageStatus::Read).unwrap();
        assert!(view.has_changed());
        assert_eq!(view.current()[0].status, MessageStatus::Read);
    }

    #[test]
    fn test_unrelated_write_leaves_view_untouched() {
        let mut store = store();
        store
            .append(ParticipantId::local(), a(), "one".into(), Utc::now())
            .unwrap();
        let mut view = store.conversation_of(&a()).unwrap();
        let before = view.current();

        store
            .append(ParticipantId::local(), "b".into(), "other".into(), Utc::now())
            .unwrap();
        assert!(!view.has_changed());
        assert_eq!(view.current(), before);
    }

    #[tokio::test]
    async fn test_subscribe_receives_events() {
        let mut store = store();
        let mut rx = store.subscribe();

        let m = store
            .append(ParticipantId::local(), a(), "hi".into(), Utc::now())
            .unwrap();
        store.set_status(m.id, MessageStatus::Delivered).unwrap();

        assert_eq!(rx.recv().await.unwrap(), StoreEvent::Appended(m.clone()));
        match rx.recv().await.unwrap() {
            StoreEvent::StatusChanged { message, from } => {
                assert_eq!(message.id, m.id);
                assert_eq!(from, MessageStatus::Sent);
                assert_eq!(message.status, MessageStatus::Delivered);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
