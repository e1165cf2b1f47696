/// Event emitter fanning session events out to presentation subscribers
use crate::messenger_types::SessionEvent;
use tokio::sync::broadcast;
use tracing::trace;

pub struct EventEmitter {
    session_id: String,
    tx: broadcast::Sender<SessionEvent>,
}

impl EventEmitter {
    pub fn new(session_id: String, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { session_id, tx }
    }

    /// Publish to every current subscriber. Slow subscribers lag rather than
    /// block the session.
    pub fn emit(&self, event: SessionEvent) {
        trace!(session = %self.session_id, ?event, "emit");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl Clone for EventEmitter {
    fn clone(&self) -> Self {
        Self {
            session_id: self.session_id.clone(),
            tx: self.tx.clone(),
        }
    }
}
