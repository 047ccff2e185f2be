use crate::profile::ParticipantId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Canonical identity of a session: the unordered participant pair, stored
/// min/max so both sides resolve to the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey(ParticipantId, ParticipantId);

impl SessionKey {
    pub fn new(a: ParticipantId, b: ParticipantId) -> Self {
        if a.0 <= b.0 {
            Self(a, b)
        } else {
            Self(b, a)
        }
    }
}

/// Audit record tying a relayed copy back to its source message.
#[derive(Debug, Clone)]
pub struct CorrelationEntry {
    pub origin_message_id: i64,
    pub origin_chat_id: i64,
    pub delivered_message_id: i64,
    pub timestamp: DateTime<Utc>,
}

/// An active pairing between two participants.
pub struct Session {
    pub participant_a: ParticipantId,
    pub participant_b: ParticipantId,
    pub created_at: DateTime<Utc>,
    pub message_log: Vec<CorrelationEntry>,
    /// Serializes relays within this session so the log stays ordered while
    /// different sessions relay concurrently.
    pub relay_gate: Arc<Mutex<()>>,
}

impl Session {
    fn new(a: ParticipantId, b: ParticipantId) -> Self {
        Self {
            participant_a: a,
            participant_b: b,
            created_at: Utc::now(),
            message_log: Vec::new(),
            relay_gate: Arc::new(Mutex::new(())),
        }
    }
}

/// Active sessions plus the derived participant -> partner link map. The
/// link map is kept strictly symmetric: both directions are inserted and
/// removed together.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionKey, Session>,
    links: HashMap<ParticipantId, ParticipantId>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the session for a freshly matched pair.
    pub fn create(&mut self, a: ParticipantId, b: ParticipantId) -> SessionKey {
        let key = SessionKey::new(a, b);
        self.sessions.insert(key, Session::new(a, b));
        self.links.insert(a, b);
        self.links.insert(b, a);
        key
    }

    pub fn partner_of(&self, id: ParticipantId) -> Option<ParticipantId> {
        self.links.get(&id).copied()
    }

    pub fn relay_gate(&self, key: SessionKey) -> Option<Arc<Mutex<()>>> {
        self.sessions.get(&key).map(|s| s.relay_gate.clone())
    }

    #[cfg(test)]
    pub fn message_count(&self, key: SessionKey) -> usize {
        self.sessions
            .get(&key)
            .map(|s| s.message_log.len())
            .unwrap_or(0)
    }

    /// Append a correlation entry; silently dropped if the session was torn
    /// down while the relay was in flight.
    pub fn record(&mut self, key: SessionKey, entry: CorrelationEntry) {
        if let Some(session) = self.sessions.get_mut(&key) {
            session.message_log.push(entry);
        }
    }

    /// Tear down the session containing `id`. Idempotent: both links are
    /// dropped even if one side was already gone. Returns the partner, if
    /// any, so the caller can notify them.
    pub fn destroy_for(&mut self, id: ParticipantId) -> Option<ParticipantId> {
        let partner = self.links.remove(&id)?;
        self.links.remove(&partner);
        self.sessions.remove(&SessionKey::new(id, partner));
        Some(partner)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
