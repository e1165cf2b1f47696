/// Participant identities and the counterparty directory
use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Reserved id of the local participant. Never registered as a counterparty.
pub const LOCAL_PARTICIPANT_ID: &str = "local";

/// Identifier of a chat participant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The reserved id of the local participant
    pub fn local() -> Self {
        Self(LOCAL_PARTICIPANT_ID.to_string())
    }

    pub fn is_local(&self) -> bool {
        self.0 == LOCAL_PARTICIPANT_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A participant, local or remote. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
}

impl Participant {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: ParticipantId::new(id),
            display_name: display_name.into(),
            avatar_ref: None,
        }
    }

    pub fn with_avatar(mut self, avatar_ref: impl Into<String>) -> Self {
        self.avatar_ref = Some(avatar_ref.into());
        self
    }

    /// The local participant with the reserved id
    pub fn local(display_name: impl Into<String>) -> Self {
        Self {
            id: ParticipantId::local(),
            display_name: display_name.into(),
            avatar_ref: None,
        }
    }
}

/// Case-insensitive substring match used by contact search.
/// An empty term matches everything; whitespace is matched literally.
pub fn name_matches(display_name: &str, term: &str) -> bool {
    display_name.to_lowercase().contains(&term.to_lowercase())
}

/// Registry of known counterparties plus the local participant
#[derive(Debug, Clone)]
pub struct IdentityRegistry {
    local: Participant,
    counterparties: Vec<Participant>,
    index: HashMap<ParticipantId, usize>,
}

impl IdentityRegistry {
    pub fn new(local: Participant) -> Self {
        Self {
            local,
            counterparties: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn local(&self) -> &Participant {
        &self.local
    }

    /// Add a counterparty. The reserved local id counts as already taken.
    pub fn register(&mut self, participant: Participant) -> Result<()> {
        if participant.id == self.local.id || self.index.contains_key(&participant.id) {
            return Err(ChatError::DuplicateIdentity(participant.id));
        }
        self.index
            .insert(participant.id.clone(), self.counterparties.len());
        self.counterparties.push(participant);
        Ok(())
    }

    pub fn lookup(&self, id: &ParticipantId) -> Result<&Participant> {
        self.index
            .get(id)
            .map(|&i| &self.counterparties[i])
            .ok_or_else(|| ChatError::UnknownIdentity(id.clone()))
    }

    /// Counterparties in registration order. The iterator is lazy and can be
    /// cloned to restart.
    pub fn all(&self) -> std::slice::Iter<'_, Participant> {
        self.counterparties.iter()
    }

    pub fn len(&self) -> usize {
        self.counterparties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counterparties.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> IdentityRegistry {
        IdentityRegistry::new(Participant::local("Me"))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut reg = registry();
        reg.register(Participant::new("alex", "Alex Johnson")).unwrap();
        reg.register(Participant::new("sarah", "Sarah Miller")).unwrap();

        let alex = reg.lookup(&ParticipantId::new("alex")).unwrap();
        assert_eq!(alex.display_name, "Alex Johnson");
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_duplicate_identity() {
        let mut reg = registry();
        reg.register(Participant::new("alex", "Alex")).unwrap();
        let err = reg.register(Participant::new("alex", "Other Alex")).unwrap_err();
        assert!(matches!(err, ChatError::DuplicateIdentity(id) if id.as_str() == "alex"));
        assert_eq!(reg.lookup(&"alex".into()).unwrap().display_name, "Alex");
    }

    #[test]
    fn test_local_id_is_reserved() {
        let mut reg = registry();
        let err = reg
            .register(Participant::new(LOCAL_PARTICIPANT_ID, "Impostor"))
            .unwrap_err();
        assert!(matches!(err, ChatError::DuplicateIdentity(_)));
        assert!(reg.lookup(&ParticipantId::local()).is_err());
    }

    #[test]
    fn test_unknown_identity() {
        let reg = registry();
        let err = reg.lookup(&"nobody".into()).unwrap_err();
        assert!(matches!(err, ChatError::UnknownIdentity(_)));
    }

    #[test]
    fn test_all_is_ordered_and_restartable() {
        let mut reg = registry();
        for (id, name) in [("c", "Carol"), ("a", "Alice"), ("b", "Bob")] {
            reg.register(Participant::new(id, name)).unwrap();
        }

        let iter = reg.all();
        let first: Vec<_> = iter.clone().map(|p| p.id.as_str()).collect();
        let second: Vec<_> = iter.map(|p| p.id.as_str()).collect();
        assert_eq!(first, vec!["c", "a", "b"]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_name_matches() {
        assert!(name_matches("Sarah Miller", "sar"));
        assert!(name_matches("Sarah Miller", "MILL"));
        assert!(name_matches("Sarah Miller", ""));
        assert!(name_matches("Sarah Miller", "h m"));
        assert!(!name_matches("Sarah Miller", "  "));
        assert!(!name_matches("Sarah Miller", "a "));
        assert!(name_matches("Emma Wilson", "a "));
        assert!(!name_matches("Sarah Miller", "alex"));
    }
}
