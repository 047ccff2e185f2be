use crate::compat;
use crate::error::EngineError;
use crate::profile::{ParticipantId, ParticipantStatus};
use crate::queue::WaitingQueue;
use crate::registry::ProfileRegistry;
use crate::session::{CorrelationEntry, SessionKey, SessionRegistry};
use crate::transport::Transport;
use rand::{rngs::StdRng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const PARTNER_FOUND_NOTICE: &str =
    "Chat partner found! Start chatting now. Use /end to finish the chat.";
pub const PARTNER_LEFT_NOTICE: &str =
    "Your chat partner has ended the conversation. Use /search to find another.";

/// Everything `try_match` must observe atomically: queue, statuses and
/// sessions move together under one lock, so two concurrent searches can
/// never pair the same participant twice. The RNG for the same-gender
/// tie-break lives here too, so matching stays deterministic under a seed.
struct MatchState {
    statuses: HashMap<ParticipantId, ParticipantStatus>,
    queue: WaitingQueue,
    sessions: SessionRegistry,
    rng: StdRng,
}

/// The matchmaking engine: owns all pairing state and drives the
/// `Idle -> Waiting -> Chatting -> Idle` state machine. Outbound notices go
/// through the transport collaborator; inbound events are serialized by the
/// state mutex.
pub struct Engine {
    state: Mutex<MatchState>,
    registry: Arc<ProfileRegistry>,
    transport: Arc<dyn Transport>,
}

impl Engine {
    pub fn new(registry: Arc<ProfileRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self::with_rng(registry, transport, StdRng::from_entropy())
    }

    /// Seeded constructor for deterministic matching in tests.
    pub fn with_rng(
        registry: Arc<ProfileRegistry>,
        transport: Arc<dyn Transport>,
        rng: StdRng,
    ) -> Self {
        Self {
            state: Mutex::new(MatchState {
                statuses: HashMap::new(),
                queue: WaitingQueue::new(),
                sessions: SessionRegistry::new(),
                rng,
            }),
            registry,
            transport,
        }
    }

    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    /// Current lifecycle state of a participant. Waiting and Chatting are
    /// recorded by the engine; otherwise the Idle/SettingUp split follows
    /// profile completeness.
    pub async fn status(&self, id: ParticipantId) -> ParticipantStatus {
        {
            let state = self.state.lock().await;
            match state.statuses.get(&id) {
                Some(status @ (ParticipantStatus::Waiting | ParticipantStatus::Chatting)) => {
                    return *status;
                }
                _ => {}
            }
        }
        if self.registry.is_complete(id).await {
            ParticipantStatus::Idle
        } else {
            ParticipantStatus::SettingUp
        }
    }

    /// Put a participant into the waiting queue and run one matching pass.
    pub async fn request_search(&self, id: ParticipantId) -> Result<(), EngineError> {
        if !self.registry.is_complete(id).await {
            return Err(EngineError::ProfileIncomplete);
        }

        let matched = {
            let mut state = self.state.lock().await;
            match state.statuses.get(&id) {
                Some(ParticipantStatus::Waiting) => return Err(EngineError::AlreadySearching),
                Some(ParticipantStatus::Chatting) => return Err(EngineError::AlreadyChatting),
                _ => {}
            }

            if state.queue.contains(id) {
                return Err(EngineError::AlreadySearching);
            }
            state.queue.enqueue(id);
            state.statuses.insert(id, ParticipantStatus::Waiting);

            self.try_match(&mut state).await
        };

        if let Some((user1, user2)) = matched {
            info!("Matched {} with {}", user1, user2);
            for user in [user1, user2] {
                if let Err(e) = self.transport.notify(user, PARTNER_FOUND_NOTICE).await {
                    warn!("Failed to notify {} about new partner: {}", user, e);
                }
            }
        }

        Ok(())
    }

    /// One matching pass: scan forward from the queue head for the first
    /// compatible partner. When the head finds nobody the queue is left
    /// untouched, head position included, and the pass ends; at most one
    /// match is formed per pass. Unmatched heads block until a compatible
    /// arrival triggers the next pass.
    async fn try_match(
        &self,
        state: &mut MatchState,
    ) -> Option<(ParticipantId, ParticipantId)> {
        if state.queue.len() < 2 {
            return None;
        }

        let waiting: Vec<ParticipantId> = state.queue.iter().collect();
        let (&user1, rest) = waiting.split_first()?;
        let profile1 = self.registry.get(user1).await?;

        for &user2 in rest {
            let Some(profile2) = self.registry.get(user2).await else {
                continue;
            };
            if !compat::is_compatible(&mut state.rng, &profile1, &profile2) {
                continue;
            }

            state.queue.remove(user1);
            state.queue.remove(user2);
            state.statuses.insert(user1, ParticipantStatus::Chatting);
            state.statuses.insert(user2, ParticipantStatus::Chatting);
            state.sessions.create(user1, user2);
            return Some((user1, user2));
        }

        None
    }

    /// Tear down the caller's session and notify the partner. Succeeds for
    /// the initiator even when the partner link is already gone; the second
    /// of two back-to-back calls fails `NotInChat` with no side effects.
    pub async fn end_chat(&self, id: ParticipantId) -> Result<(), EngineError> {
        let partner = {
            let mut state = self.state.lock().await;
            if state.statuses.get(&id) != Some(&ParticipantStatus::Chatting) {
                return Err(EngineError::NotInChat);
            }

            let partner = state.sessions.destroy_for(id);
            state.statuses.insert(id, ParticipantStatus::Idle);
            if let Some(partner) = partner {
                state.statuses.insert(partner, ParticipantStatus::Idle);
            } else {
                // Invariant breach: Chatting without a link. Recover for the
                // initiator and log it.
                warn!("No partner link found while ending chat for {}", id);
            }
            partner
        };

        if let Some(partner) = partner {
            info!("Chat between {} and {} ended", id, partner);
            if let Err(e) = self.transport.notify(partner, PARTNER_LEFT_NOTICE).await {
                warn!("Failed to notify {} about chat end: {}", partner, e);
            }
        }

        Ok(())
    }

    /// Resolve what a relay needs: the partner, the session key and the
    /// session's relay gate. Snapshot taken under the state lock; delivery
    /// itself happens outside it.
    pub(crate) async fn relay_context(
        &self,
        sender: ParticipantId,
    ) -> Result<
        (
            ParticipantId,
            SessionKey,
            Arc<Mutex<()>>,
        ),
        EngineError,
    > {
        let state = self.state.lock().await;
        if state.statuses.get(&sender) != Some(&ParticipantStatus::Chatting) {
            return Err(EngineError::NotInChat);
        }
        let Some(partner) = state.sessions.partner_of(sender) else {
            warn!("No partner link found for chatting sender {}", sender);
            return Err(EngineError::PartnerUnresolved);
        };
        let key = SessionKey::new(sender, partner);
        let gate = state
            .sessions
            .relay_gate(key)
            .ok_or(EngineError::PartnerUnresolved)?;
        Ok((partner, key, gate))
    }

    pub(crate) async fn record_relay(&self, key: SessionKey, entry: CorrelationEntry) {
        let mut state = self.state.lock().await;
        state.sessions.record(key, entry);
    }

    #[cfg(test)]
    pub(crate) async fn message_count(&self, a: ParticipantId, b: ParticipantId) -> usize {
        let state = self.state.lock().await;
        state.sessions.message_count(SessionKey::new(a, b))
    }

    #[cfg(test)]
    pub(crate) async fn waiting_order(&self) -> Vec<ParticipantId> {
        let state = self.state.lock().await;
        state.queue.iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{Gender, ProfileUpdate};
    use crate::transport::mock::MockTransport;

    async fn setup_participant(
        engine: &Engine,
        id: i64,
        age: u8,
        gender: Gender,
        room: &str,
    ) -> ParticipantId {
        let id = ParticipantId(id);
        let registry = engine.registry();
        registry.upsert(id, ProfileUpdate::Age(age)).await.unwrap();
        registry
            .upsert(id, ProfileUpdate::Gender(gender))
            .await
            .unwrap();
        registry
            .upsert(id, ProfileUpdate::Room(room.into()))
            .await
            .unwrap();
        id
    }

    async fn seeded_engine() -> (Arc<Engine>, Arc<MockTransport>) {
        let registry = Arc::new(ProfileRegistry::empty().await);
        let transport = Arc::new(MockTransport::new());
        let engine = Arc::new(Engine::with_rng(
            registry,
            transport.clone(),
            StdRng::seed_from_u64(42),
        ));
        (engine, transport)
    }

    #[tokio::test]
    async fn compatible_pair_is_matched_and_notified() {
        let (engine, transport) = seeded_engine().await;
        let a = setup_participant(&engine, 1001, 25, Gender::Male, "movies").await;
        let b = setup_participant(&engine, 1002, 28, Gender::Female, "movies").await;

        engine.request_search(a).await.unwrap();
        assert_eq!(engine.status(a).await, ParticipantStatus::Waiting);

        engine.request_search(b).await.unwrap();
        assert_eq!(engine.status(a).await, ParticipantStatus::Chatting);
        assert_eq!(engine.status(b).await, ParticipantStatus::Chatting);

        let (partner, _, _) = engine.relay_context(a).await.unwrap();
        assert_eq!(partner, b);
        let (partner, _, _) = engine.relay_context(b).await.unwrap();
        assert_eq!(partner, a);

        assert_eq!(transport.notices_for(a), vec![PARTNER_FOUND_NOTICE]);
        assert_eq!(transport.notices_for(b), vec![PARTNER_FOUND_NOTICE]);
    }

    #[tokio::test]
    async fn different_rooms_stay_waiting() {
        let (engine, transport) = seeded_engine().await;
        let a = setup_participant(&engine, 1001, 25, Gender::Male, "movies").await;
        let b = setup_participant(&engine, 1003, 25, Gender::Female, "books").await;

        engine.request_search(a).await.unwrap();
        engine.request_search(b).await.unwrap();

        assert_eq!(engine.status(a).await, ParticipantStatus::Waiting);
        assert_eq!(engine.status(b).await, ParticipantStatus::Waiting);
        assert_eq!(engine.waiting_order().await, vec![a, b]);
        assert!(transport.notices_for(a).is_empty());
    }

    #[tokio::test]
    async fn incomplete_profile_cannot_search() {
        let (engine, _) = seeded_engine().await;
        let id = ParticipantId(5);
        engine
            .registry()
            .upsert(id, ProfileUpdate::Age(30))
            .await
            .unwrap();

        let err = engine.request_search(id).await;
        assert!(matches!(err, Err(EngineError::ProfileIncomplete)));
        assert_eq!(engine.status(id).await, ParticipantStatus::SettingUp);
    }

    #[tokio::test]
    async fn double_search_is_rejected() {
        let (engine, _) = seeded_engine().await;
        let a = setup_participant(&engine, 1, 25, Gender::Male, "general").await;

        engine.request_search(a).await.unwrap();
        let err = engine.request_search(a).await;
        assert!(matches!(err, Err(EngineError::AlreadySearching)));
        assert_eq!(engine.waiting_order().await, vec![a]);
    }

    #[tokio::test]
    async fn searching_while_chatting_is_rejected() {
        let (engine, _) = seeded_engine().await;
        let a = setup_participant(&engine, 1, 25, Gender::Male, "general").await;
        let b = setup_participant(&engine, 2, 25, Gender::Female, "general").await;

        engine.request_search(a).await.unwrap();
        engine.request_search(b).await.unwrap();

        let err = engine.request_search(a).await;
        assert!(matches!(err, Err(EngineError::AlreadyChatting)));
    }

    #[tokio::test]
    async fn end_chat_resets_both_and_notifies_partner() {
        let (engine, transport) = seeded_engine().await;
        let a = setup_participant(&engine, 1001, 25, Gender::Male, "movies").await;
        let b = setup_participant(&engine, 1002, 28, Gender::Female, "movies").await;

        engine.request_search(a).await.unwrap();
        engine.request_search(b).await.unwrap();

        engine.end_chat(a).await.unwrap();
        assert_eq!(engine.status(a).await, ParticipantStatus::Idle);
        assert_eq!(engine.status(b).await, ParticipantStatus::Idle);
        assert!(transport.notices_for(b).contains(&PARTNER_LEFT_NOTICE.to_string()));

        // Links are gone in both directions.
        assert!(matches!(
            engine.relay_context(a).await,
            Err(EngineError::NotInChat)
        ));
        assert!(matches!(
            engine.relay_context(b).await,
            Err(EngineError::NotInChat)
        ));
    }

    #[tokio::test]
    async fn second_end_chat_fails_without_side_effects() {
        let (engine, transport) = seeded_engine().await;
        let a = setup_participant(&engine, 1, 25, Gender::Male, "music").await;
        let b = setup_participant(&engine, 2, 25, Gender::Female, "music").await;

        engine.request_search(a).await.unwrap();
        engine.request_search(b).await.unwrap();
        engine.end_chat(a).await.unwrap();

        let notices_before = transport.notices_for(b).len();
        let err = engine.end_chat(a).await;
        assert!(matches!(err, Err(EngineError::NotInChat)));
        assert_eq!(transport.notices_for(b).len(), notices_before);
    }

    #[tokio::test]
    async fn head_keeps_queue_position_until_a_partner_arrives() {
        let (engine, _) = seeded_engine().await;
        // Head and second arrival are 20 years apart, so only the third
        // arrival can unblock the head.
        let x = setup_participant(&engine, 1, 20, Gender::Male, "gaming").await;
        let y = setup_participant(&engine, 2, 40, Gender::Male, "gaming").await;
        let z = setup_participant(&engine, 3, 30, Gender::Female, "gaming").await;

        engine.request_search(x).await.unwrap();
        engine.request_search(y).await.unwrap();
        assert_eq!(engine.waiting_order().await, vec![x, y]);

        engine.request_search(z).await.unwrap();
        // FIFO fairness: the earlier arrival x is matched, y keeps waiting.
        assert_eq!(engine.status(x).await, ParticipantStatus::Chatting);
        assert_eq!(engine.status(z).await, ParticipantStatus::Chatting);
        assert_eq!(engine.status(y).await, ParticipantStatus::Waiting);
        assert_eq!(engine.waiting_order().await, vec![y]);
    }

    #[tokio::test]
    async fn no_participant_is_matched_with_itself() {
        let (engine, _) = seeded_engine().await;
        let a = setup_participant(&engine, 9, 25, Gender::Male, "books").await;

        engine.request_search(a).await.unwrap();
        assert_eq!(engine.status(a).await, ParticipantStatus::Waiting);
        assert_eq!(engine.waiting_order().await, vec![a]);
    }

    #[tokio::test]
    async fn concurrent_searches_never_double_match() {
        let (engine, _) = seeded_engine().await;
        let mut ids = Vec::new();
        for i in 0..6 {
            let gender = if i % 2 == 0 {
                Gender::Male
            } else {
                Gender::Female
            };
            ids.push(setup_participant(&engine, 100 + i, 25, gender, "general").await);
        }

        let mut handles = Vec::new();
        for &id in &ids {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move { engine.request_search(id).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // Every participant ended up either Chatting with exactly one
        // partner or still Waiting; nobody is in both worlds.
        let waiting = engine.waiting_order().await;
        for &id in &ids {
            match engine.status(id).await {
                ParticipantStatus::Chatting => {
                    let (partner, _, _) = engine.relay_context(id).await.unwrap();
                    assert_ne!(partner, id);
                    let (back, _, _) = engine.relay_context(partner).await.unwrap();
                    assert_eq!(back, id);
                    assert!(!waiting.contains(&id));
                }
                ParticipantStatus::Waiting => assert!(waiting.contains(&id)),
                other => panic!("unexpected status {:?}", other),
            }
        }
    }
}
