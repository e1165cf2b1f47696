/// Counterparty presence (online / last seen)
use crate::error::{ChatError, Result};
use crate::identity::{IdentityRegistry, ParticipantId};
use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Presence of one counterparty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceState {
    pub status: PresenceStatus,
    /// Set on Online -> Offline, never moves backward
    pub last_seen_at: Option<Timestamp>,
}

impl PresenceState {
    pub fn is_online(&self) -> bool {
        self.status == PresenceStatus::Online
    }
}

impl Default for PresenceState {
    fn default() -> Self {
        Self {
            status: PresenceStatus::Offline,
            last_seen_at: None,
        }
    }
}

/// Two-state machine per counterparty: `Offline(last_seen) <-> Online`
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    states: HashMap<ParticipantId, PresenceState>,
}

impl PresenceTracker {
    /// Start tracking every counterparty already in the registry
    pub fn new(registry: &IdentityRegistry) -> Self {
        let mut tracker = Self::default();
        for participant in registry.all() {
            tracker.track(participant.id.clone());
        }
        tracker
    }

    /// Start tracking a newly registered counterparty in `Offline(None)`
    pub fn track(&mut self, id: ParticipantId) {
        self.states.entry(id).or_default();
    }

    /// Returns whether the state changed.
    pub fn set_online(&mut self, id: &ParticipantId) -> Result<bool> {
        let state = self.state_mut(id)?;
        if state.is_online() {
            return Ok(false);
        }
        state.status = PresenceStatus::Online;
        debug!("{} is online", id);
        Ok(true)
    }

    /// Returns whether the state changed. Offline events older than the
    /// stored `last_seen_at` are discarded, whatever the current status.
    pub fn set_offline(&mut self, id: &ParticipantId, at: Timestamp) -> Result<bool> {
        let state = self.state_mut(id)?;
        if let Some(last_seen) = state.last_seen_at {
            if at < last_seen {
                debug!("Discarding stale offline event for {} ({} < {})", id, at, last_seen);
                return Ok(false);
            }
            if at == last_seen && !state.is_online() {
                return Ok(false);
            }
        }
        let changed = state.is_online() || state.last_seen_at != Some(at);
        state.status = PresenceStatus::Offline;
        state.last_seen_at = Some(at);
        Ok(changed)
    }

    pub fn get_presence(&self, id: &ParticipantId) -> Result<PresenceState> {
        self.states
            .get(id)
            .copied()
            .ok_or_else(|| ChatError::UnknownIdentity(id.clone()))
    }

    fn state_mut(&mut self, id: &ParticipantId) -> Result<&mut PresenceState> {
        self.states
            .get_mut(id)
            .ok_or_else(|| ChatError::UnknownIdentity(id.clone()))
    }
}
