use crate::error::EngineError;
use crate::profile::{ParticipantId, Profile, ProfileKey, ProfileUpdate};
use crate::store::Store;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// Profile registry: the in-memory source of truth for preferences, backed
/// by the SQLite store. Keyed by the anonymized `ProfileKey`, so matchmaking
/// state never leaks raw ids into persistence.
///
/// Profile access uses its own lock, independent of the matchmaking mutex;
/// mutating a profile never contends with `try_match`.
pub struct ProfileRegistry {
    profiles: RwLock<HashMap<ProfileKey, Profile>>,
    store: Arc<Store>,
}

impl ProfileRegistry {
    /// Build the registry by reading every stored profile.
    pub async fn load(store: Arc<Store>) -> Result<Self, EngineError> {
        let profiles = store
            .load_profiles()
            .await
            .map_err(EngineError::Store)?
            .into_iter()
            .collect();
        Ok(Self {
            profiles: RwLock::new(profiles),
            store,
        })
    }

    #[cfg(test)]
    pub async fn empty() -> Self {
        let store = Store::in_memory().await.expect("in-memory store");
        store.init().await.expect("schema init");
        Self {
            profiles: RwLock::new(HashMap::new()),
            store: Arc::new(store),
        }
    }

    pub async fn get(&self, id: ParticipantId) -> Option<Profile> {
        let key = ProfileKey::derive(id);
        self.profiles.read().await.get(&key).cloned()
    }

    pub async fn is_complete(&self, id: ParticipantId) -> bool {
        self.get(id).await.map(|p| p.is_complete()).unwrap_or(false)
    }

    /// Register a participant with an empty profile if unseen. Returns true
    /// when the profile already existed.
    pub async fn ensure_exists(&self, id: ParticipantId) -> Result<bool, EngineError> {
        let key = ProfileKey::derive(id);
        {
            let profiles = self.profiles.read().await;
            if profiles.contains_key(&key) {
                return Ok(true);
            }
        }

        let profile = Profile::default();
        self.profiles
            .write()
            .await
            .insert(key.clone(), profile.clone());
        self.persist(&key, &profile).await;
        Ok(false)
    }

    /// Apply one field update, creating a default profile when absent.
    /// Validation failures leave the record untouched so the setup dialogue
    /// can re-prompt. The mutated profile is returned for stage inspection.
    pub async fn upsert(
        &self,
        id: ParticipantId,
        update: ProfileUpdate,
    ) -> Result<Profile, EngineError> {
        let key = ProfileKey::derive(id);

        let updated = {
            let mut profiles = self.profiles.write().await;
            let profile = profiles.entry(key.clone()).or_default();
            let mut candidate = profile.clone();
            candidate.apply(update)?;
            *profile = candidate.clone();
            candidate
        };

        self.persist(&key, &updated).await;
        Ok(updated)
    }

    /// Write-behind to SQLite. A failed save is logged but never rolls back
    /// the in-memory mutation; the next successful save wins.
    async fn persist(&self, key: &ProfileKey, profile: &Profile) {
        if let Err(e) = self.store.save_profile(key, profile).await {
            warn!("Failed to persist profile {}: {:#}", key, e);
        }
    }
}
