/// Chat session: the single owner of all chat state
///
/// `ChatSession` applies user intents and transport events synchronously.
/// `ChatSession::spawn` moves it into a task that drains one command channel,
/// so intents, acks and presence events are applied in arrival order, one at
/// a time. Readers get the latest committed `ViewSnapshot` from a watch
/// channel without going through the loop.
use crate::config::Config;
use crate::delivery::DeliveryStateMachine;
use crate::error::{ChatError, Result};
use crate::identity::{name_matches, IdentityRegistry, Participant, ParticipantId};
use crate::message_store::{ConversationView, Message, MessageId, MessageStore, StoreEvent};
use crate::messenger_types::{
    truncate_preview, ActiveConversation, ContactView, MessageView, SessionEvent, TransportEvent,
    ViewSnapshot,
};
use crate::presence::{PresenceState, PresenceTracker};
use crate::transport::Transport;
use crate::unread::UnreadCounter;
use crate::utils::event_emitter::EventEmitter;
use crate::Timestamp;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub struct ChatSession {
    id: Uuid,
    registry: IdentityRegistry,
    presence: PresenceTracker,
    store: MessageStore,
    unread: UnreadCounter,
    delivery: DeliveryStateMachine,
    transport: Arc<dyn Transport>,
    emitter: EventEmitter,
    snapshots: watch::Sender<ViewSnapshot>,
    revision: u64,
}

impl ChatSession {
    /// Create an empty session for `local`
    pub fn new(local: Participant, transport: Arc<dyn Transport>, event_capacity: usize) -> Self {
        let id = Uuid::new_v4();
        let registry = IdentityRegistry::new(local);
        let presence = PresenceTracker::new(&registry);
        let store = MessageStore::new(&registry);
        let (snapshots, _) = watch::channel(ViewSnapshot::default());

        info!("Created new chat session with ID: {}", id);

        Self {
            id,
            registry,
            presence,
            store,
            unread: UnreadCounter::new(),
            delivery: DeliveryStateMachine::new(),
            transport,
            emitter: EventEmitter::new(id.to_string(), event_capacity),
            snapshots,
            revision: 0,
        }
    }

    /// Create a session and register every configured contact
    pub fn from_config(config: &Config, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let mut session = Self::new(config.local.clone(), transport, config.event_capacity);
        for contact in &config.contacts {
            session.register(contact.clone())?;
        }
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn local(&self) -> &Participant {
        self.registry.local()
    }

    /// Add a counterparty to the directory
    pub fn register(&mut self, participant: Participant) -> Result<()> {
        let id = participant.id.clone();
        self.registry.register(participant)?;
        self.presence.track(id.clone());
        self.store.track(id.clone());
        debug!("Registered counterparty {}", id);
        self.publish();
        Ok(())
    }

    // ==================== Intents ====================

    /// Append a local message and hand it to the transport. Returns once the
    /// message is appended; delivery is reconciled later through acks.
    pub fn send_message(&mut self, conversation_id: &ParticipantId, body: &str) -> Result<Message> {
        if body.trim().is_empty() {
            return Err(ChatError::EmptyBody);
        }
        self.registry.lookup(conversation_id)?;

        let created_at = self.next_local_stamp(conversation_id)?;
        let message = self.store.append(
            self.registry.local().id.clone(),
            conversation_id.clone(),
            body.to_string(),
            created_at,
        )?;
        self.commit(vec![StoreEvent::Appended(message.clone())])?;
        self.transport.dispatch(&message);
        self.publish();
        Ok(message)
    }

    /// Append a local message from earlier history without handing it to the
    /// transport. Its status moves on through acks like any other message.
    pub fn replay_local(
        &mut self,
        conversation_id: &ParticipantId,
        body: &str,
        created_at: Timestamp,
    ) -> Result<Message> {
        if body.trim().is_empty() {
            return Err(ChatError::EmptyBody);
        }
        self.registry.lookup(conversation_id)?;

        let message = self.store.append(
            self.registry.local().id.clone(),
            conversation_id.clone(),
            body.to_string(),
            created_at,
        )?;
        self.commit(vec![StoreEvent::Appended(message.clone())])?;
        self.publish();
        Ok(message)
    }

    /// Make `conversation_id` the active conversation and open it
    pub fn select_conversation(&mut self, conversation_id: &ParticipantId) -> Result<()> {
        self.open_conversation(conversation_id)
    }

    /// Open a conversation: its unread count drops to zero and every inbound
    /// message in it is marked read, all before the next snapshot.
    pub fn open_conversation(&mut self, conversation_id: &ParticipantId) -> Result<()> {
        self.registry.lookup(conversation_id)?;

        if let Some(previous) = self.unread.current_conversation().cloned() {
            if &previous != conversation_id {
                self.emitter.emit(SessionEvent::ConversationClosed {
                    participant_id: previous,
                });
            }
        }

        let events = self
            .unread
            .open_conversation(&mut self.store, conversation_id)?;
        self.commit(events)?;
        self.emitter.emit(SessionEvent::ConversationOpened {
            participant_id: conversation_id.clone(),
        });
        self.publish();
        Ok(())
    }

    /// Close the open conversation, if any
    pub fn close_conversation(&mut self) -> Option<ParticipantId> {
        let closed = self.unread.close_conversation();
        if let Some(id) = &closed {
            self.emitter.emit(SessionEvent::ConversationClosed {
                participant_id: id.clone(),
            });
            self.publish();
        }
        closed
    }

    /// Counterparties whose display name contains `term`, ignoring case
    pub fn search(&self, term: &str) -> Vec<Participant> {
        self.registry
            .all()
            .filter(|p| name_matches(&p.display_name, term))
            .cloned()
            .collect()
    }

    // ==================== Transport ====================

    /// Apply an event from the transport. Errors are logged and discarded so
    /// one malformed event never stops the stream. Returns whether state changed.
    pub fn handle_transport_event(&mut self, event: TransportEvent) -> bool {
        let kind = event.kind();
        match self.apply_transport_event(event) {
            Ok(changed) => {
                if changed {
                    self.publish();
                }
                changed
            }
            Err(e) if e.is_transport_recoverable() => {
                warn!("Discarding {} event: {}", kind, e);
                false
            }
            Err(e) => {
                error!("Failed to apply {} event: {}", kind, e);
                self.publish();
                false
            }
        }
    }

    fn apply_transport_event(&mut self, event: TransportEvent) -> Result<bool> {
        match event {
            TransportEvent::PresenceOnline { participant_id } => {
                let changed = self.presence.set_online(&participant_id)?;
                self.emit_presence(participant_id, changed)
            }
            TransportEvent::PresenceOffline { participant_id, at } => {
                let changed = self.presence.set_offline(&participant_id, at)?;
                self.emit_presence(participant_id, changed)
            }
            TransportEvent::MessageReceived {
                sender_id,
                body,
                sent_at,
            } => {
                self.registry.lookup(&sender_id)?;
                let status = self.unread.arrival_status(&sender_id);
                let message = self.store.append_with_status(
                    sender_id.clone(),
                    sender_id,
                    body,
                    sent_at,
                    status,
                )?;
                self.commit(vec![StoreEvent::Appended(message)])?;
                Ok(true)
            }
            TransportEvent::DeliveredAck { message_id } => {
                let event = self.delivery.on_delivered_ack(&mut self.store, message_id)?;
                self.commit_ack(event)
            }
            TransportEvent::ReadAck { message_id } => {
                let event = self.delivery.on_read_ack(&mut self.store, message_id)?;
                self.commit_ack(event)
            }
        }
    }

    fn emit_presence(&mut self, participant_id: ParticipantId, changed: bool) -> Result<bool> {
        if changed {
            let presence = self.presence.get_presence(&participant_id)?;
            self.emitter.emit(SessionEvent::PresenceChanged {
                participant_id,
                presence,
            });
        }
        Ok(changed)
    }

    fn commit_ack(&mut self, event: Option<StoreEvent>) -> Result<bool> {
        match event {
            Some(event) => {
                self.commit(vec![event])?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ==================== Queries ====================

    pub fn presence(&self, id: &ParticipantId) -> Result<PresenceState> {
        self.presence.get_presence(id)
    }

    pub fn conversation(&self, id: &ParticipantId) -> Result<ConversationView> {
        self.store.conversation_of(id)
    }

    pub fn message(&self, id: MessageId) -> Result<&Message> {
        self.store.by_id(id)
    }

    pub fn unread_count(&self, id: &ParticipantId) -> u32 {
        self.unread.count(id)
    }

    pub fn current_conversation(&self) -> Option<&ParticipantId> {
        self.unread.current_conversation()
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> ViewSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<ViewSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.emitter.subscribe()
    }

    // ==================== Internals ====================

    /// Wall-clock stamp for a new local message, never earlier than the
    /// newest message already in the thread. A clock stepping back must not
    /// reorder our own sends.
    fn next_local_stamp(&self, conversation_id: &ParticipantId) -> Result<Timestamp> {
        let now = Utc::now();
        Ok(match self.store.last_in(conversation_id)? {
            Some(last) if last.created_at > now => last.created_at,
            _ => now,
        })
    }

    /// Feed store events to the unread counter until no follow-ups remain,
    /// forwarding each one to subscribers.
    fn commit(&mut self, events: Vec<StoreEvent>) -> Result<()> {
        let mut queue: VecDeque<StoreEvent> = events.into();
        while let Some(event) = queue.pop_front() {
            self.emitter.emit(match &event {
                StoreEvent::Appended(message) => SessionEvent::MessageAppended {
                    message: message.clone(),
                },
                StoreEvent::StatusChanged { message, .. } => SessionEvent::StatusChanged {
                    message_id: message.id,
                    conversation_id: message.conversation_id.clone(),
                    status: message.status,
                },
            });
            queue.extend(self.unread.on_store_event(&mut self.store, &event)?);
        }
        Ok(())
    }

    fn build_snapshot(&self) -> ViewSnapshot {
        let contacts = self
            .registry
            .all()
            .map(|p| ContactView {
                id: p.id.clone(),
                name: p.display_name.clone(),
                avatar_ref: p.avatar_ref.clone(),
                presence: self.presence.get_presence(&p.id).unwrap_or_default(),
                unread_count: self.unread.count(&p.id),
                last_preview: self
                    .store
                    .last_in(&p.id)
                    .ok()
                    .flatten()
                    .map(|m| truncate_preview(&m.body)),
            })
            .collect();

        let active = self.unread.current_conversation().map(|id| ActiveConversation {
            counterparty: id.clone(),
            messages: self
                .store
                .messages_in(id)
                .map(|messages| messages.map(MessageView::from).collect::<Vec<_>>())
                .unwrap_or_default(),
        });

        ViewSnapshot {
            revision: self.revision,
            contacts,
            active,
        }
    }

    fn publish(&mut self) {
        #[cfg(debug_assertions)]
        self.check_unread_conservation();

        self.revision += 1;
        let snapshot = self.build_snapshot();

        let unread_changes: Vec<(ParticipantId, u32)> = {
            let previous = self.snapshots.borrow();
            snapshot
                .contacts
                .iter()
                .filter(|c| previous.unread(&c.id) != c.unread_count)
                .map(|c| (c.id.clone(), c.unread_count))
                .collect()
        };

        self.snapshots.send_replace(snapshot);
        for (participant_id, count) in unread_changes {
            self.emitter.emit(SessionEvent::UnreadChanged {
                participant_id,
                count,
            });
        }
    }

    #[cfg(debug_assertions)]
    fn check_unread_conservation(&self) {
        for participant in self.registry.all() {
            if let Ok(derived) = UnreadCounter::derived_count(&self.store, &participant.id) {
                debug_assert_eq!(
                    self.unread.count(&participant.id),
                    derived,
                    "unread count drifted for {}",
                    participant.id
                );
            }
        }
    }

    // ==================== Event loop ====================

    /// Run the session on its own task. The task returns the session once
    /// `shutdown` is requested or every handle is dropped.
    pub fn spawn(self, command_capacity: usize) -> (SessionHandle, JoinHandle<ChatSession>) {
        let (commands, rx) = mpsc::channel(command_capacity.max(1));
        let handle = SessionHandle {
            session_id: self.id,
            commands,
            snapshots: self.subscribe_snapshots(),
            emitter: self.emitter.clone(),
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) -> ChatSession {
        info!("Chat session {} loop started", self.id);
        while let Some(command) = rx.recv().await {
            match command {
                Command::Shutdown => break,
                other => self.execute(other),
            }
        }
        info!("Chat session {} loop stopped", self.id);
        self
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::Register { participant, reply } => {
                let _ = reply.send(self.register(participant));
            }
            Command::SendMessage {
                conversation_id,
                body,
                reply,
            } => {
                let _ = reply.send(self.send_message(&conversation_id, &body));
            }
            Command::SelectConversation {
                conversation_id,
                reply,
            } => {
                let _ = reply.send(self.select_conversation(&conversation_id));
            }
            Command::OpenConversation {
                conversation_id,
                reply,
            } => {
                let _ = reply.send(self.open_conversation(&conversation_id));
            }
            Command::CloseConversation { reply } => {
                let _ = reply.send(self.close_conversation());
            }
            Command::Presence { id, reply } => {
                let _ = reply.send(self.presence(&id));
            }
            Command::Conversation { id, reply } => {
                let _ = reply.send(self.conversation(&id));
            }
            Command::Message { id, reply } => {
                let _ = reply.send(self.message(id).cloned());
            }
            Command::Transport(event) => {
                self.handle_transport_event(event);
            }
            Command::Flush { reply } => {
                let _ = reply.send(());
            }
            Command::Shutdown => {}
        }
    }
}

pub(crate) enum Command {
    Register {
        participant: Participant,
        reply: oneshot::Sender<Result<()>>,
    },
    SendMessage {
        conversation_id: ParticipantId,
        body: String,
        reply: oneshot::Sender<Result<Message>>,
    },
    SelectConversation {
        conversation_id: ParticipantId,
        reply: oneshot::Sender<Result<()>>,
    },
    OpenConversation {
        conversation_id: ParticipantId,
        reply: oneshot::Sender<Result<()>>,
    },
    CloseConversation {
        reply: oneshot::Sender<Option<ParticipantId>>,
    },
    Presence {
        id: ParticipantId,
        reply: oneshot::Sender<Result<PresenceState>>,
    },
    Conversation {
        id: ParticipantId,
        reply: oneshot::Sender<Result<ConversationView>>,
    },
    Message {
        id: MessageId,
        reply: oneshot::Sender<Result<Message>>,
    },
    Transport(TransportEvent),
    Flush {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Cloneable handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<ViewSnapshot>,
    emitter: EventEmitter,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| ChatError::SessionClosed)?;
        rx.await.map_err(|_| ChatError::SessionClosed)
    }

    pub async fn register(&self, participant: Participant) -> Result<()> {
        self.request(|reply| Command::Register { participant, reply })
            .await?
    }

    pub async fn send_message(
        &self,
        conversation_id: ParticipantId,
        body: impl Into<String>,
    ) -> Result<Message> {
        let body = body.into();
        self.request(|reply| Command::SendMessage {
            conversation_id,
            body,
            reply,
        })
        .await?
    }

    pub async fn select_conversation(&self, conversation_id: ParticipantId) -> Result<()> {
        self.request(|reply| Command::SelectConversation {
            conversation_id,
            reply,
        })
        .await?
    }

    pub async fn open_conversation(&self, conversation_id: ParticipantId) -> Result<()> {
        self.request(|reply| Command::OpenConversation {
            conversation_id,
            reply,
        })
        .await?
    }

    pub async fn close_conversation(&self) -> Result<Option<ParticipantId>> {
        self.request(|reply| Command::CloseConversation { reply })
            .await
    }

    pub async fn presence(&self, id: ParticipantId) -> Result<PresenceState> {
        self.request(|reply| Command::Presence { id, reply }).await?
    }

    pub async fn conversation(&self, id: ParticipantId) -> Result<ConversationView> {
        self.request(|reply| Command::Conversation { id, reply })
            .await?
    }

    pub async fn message(&self, id: MessageId) -> Result<Message> {
        self.request(|reply| Command::Message { id, reply }).await?
    }

    /// Resolves once every command queued before it has been applied
    pub async fn flush(&self) -> Result<()> {
        self.request(|reply| Command::Flush { reply }).await
    }

    /// Latest committed snapshot, read without going through the loop
    pub fn snapshot(&self) -> ViewSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Contacts matching `term`, served from the latest snapshot
    pub fn search(&self, term: &str) -> Vec<ContactView> {
        self.snapshots
            .borrow()
            .search(term)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<ViewSnapshot> {
        self.snapshots.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.emitter.subscribe()
    }

    /// Entry point for the network transport
    pub fn ingress(&self) -> Ingress {
        Ingress {
            commands: self.commands.clone(),
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| ChatError::SessionClosed)
    }
}

/// Funnels transport events into the session loop
#[derive(Clone)]
pub struct Ingress {
    commands: mpsc::Sender<Command>,
}

impl Ingress {
    pub async fn deliver(&self, event: TransportEvent) -> Result<()> {
        self.commands
            .send(Command::Transport(event))
            .await
            .map_err(|_| ChatError::SessionClosed)
    }
}
