use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Rooms a participant can pick during setup. Matching never crosses rooms.
pub const ROOMS: &[&str] = &["general", "movies", "books", "gaming", "music"];

pub const MIN_AGE: u8 = 18;
pub const MAX_AGE: u8 = 99;

/// Opaque participant identifier handed to us by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub i64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ParticipantId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Storage key for a profile: SHA-256 of the decimal participant id, hex
/// encoded. Raw ids never reach the profile store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileKey(String);

impl ProfileKey {
    pub fn derive(id: ParticipantId) -> Self {
        let digest = Sha256::digest(id.0.to_string().as_bytes());
        let mut hex = String::with_capacity(64);
        for byte in digest {
            hex.push_str(&format!("{:02x}", byte));
        }
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rehydrate a key read back from the store.
    pub fn from_stored(hex: String) -> Self {
        Self(hex)
    }
}

impl fmt::Display for ProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "m" | "male" | "man" => Some(Gender::Male),
            "w" | "f" | "female" | "woman" => Some(Gender::Female),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

/// Progress marker for the setup dialogue: which field is asked for next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetupStage {
    Age,
    Gender,
    Room,
    Complete,
}

/// A participant's matching preferences. Fields fill in one by one during
/// setup and the stage always points at the first missing one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    pub age: Option<u8>,
    pub gender: Option<Gender>,
    pub room: Option<String>,
}

/// One field mutation, validated before it lands in the registry.
#[derive(Debug, Clone)]
pub enum ProfileUpdate {
    Age(u8),
    Gender(Gender),
    Room(String),
}

impl Profile {
    pub fn is_complete(&self) -> bool {
        self.age.is_some() && self.gender.is_some() && self.room.is_some()
    }

    pub fn stage(&self) -> SetupStage {
        if self.age.is_none() {
            SetupStage::Age
        } else if self.gender.is_none() {
            SetupStage::Gender
        } else if self.room.is_none() {
            SetupStage::Room
        } else {
            SetupStage::Complete
        }
    }

    /// Apply a single validated field update.
    pub fn apply(&mut self, update: ProfileUpdate) -> Result<(), EngineError> {
        match update {
            ProfileUpdate::Age(age) => {
                if !(MIN_AGE..=MAX_AGE).contains(&age) {
                    return Err(EngineError::Validation(format!(
                        "age must be between {} and {}",
                        MIN_AGE, MAX_AGE
                    )));
                }
                self.age = Some(age);
            }
            ProfileUpdate::Gender(gender) => {
                self.gender = Some(gender);
            }
            ProfileUpdate::Room(room) => {
                let room = room.trim().to_lowercase();
                if !ROOMS.contains(&room.as_str()) {
                    return Err(EngineError::Validation(format!(
                        "unknown room '{}', pick one of: {}",
                        room,
                        ROOMS.join(", ")
                    )));
                }
                self.room = Some(room);
            }
        }
        Ok(())
    }
}

/// Lifecycle state of a participant, exactly one at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantStatus {
    SettingUp,
    Idle,
    Waiting,
    Chatting,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_key_is_stable_and_distinct() {
        let a = ProfileKey::derive(ParticipantId(1001));
        let b = ProfileKey::derive(ParticipantId(1001));
        let c = ProfileKey::derive(ParticipantId(1002));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn age_outside_range_is_rejected() {
        let mut profile = Profile::default();
        assert!(profile.apply(ProfileUpdate::Age(17)).is_err());
        assert!(profile.apply(ProfileUpdate::Age(100)).is_err());
        assert!(profile.apply(ProfileUpdate::Age(18)).is_ok());
        assert_eq!(profile.age, Some(18));
    }

    #[test]
    fn unknown_room_is_rejected() {
        let mut profile = Profile::default();
        assert!(profile.apply(ProfileUpdate::Room("casino".into())).is_err());
        assert!(profile.apply(ProfileUpdate::Room(" Movies ".into())).is_ok());
        assert_eq!(profile.room.as_deref(), Some("movies"));
    }

    #[test]
    fn stage_follows_missing_fields() {
        let mut profile = Profile::default();
        assert_eq!(profile.stage(), SetupStage::Age);
        profile.apply(ProfileUpdate::Age(25)).unwrap();
        assert_eq!(profile.stage(), SetupStage::Gender);
        profile.apply(ProfileUpdate::Gender(Gender::Male)).unwrap();
        assert_eq!(profile.stage(), SetupStage::Room);
        profile.apply(ProfileUpdate::Room("books".into())).unwrap();
        assert_eq!(profile.stage(), SetupStage::Complete);
        assert!(profile.is_complete());
    }

    #[test]
    fn gender_parsing_accepts_short_forms() {
        assert_eq!(Gender::parse("M"), Some(Gender::Male));
        assert_eq!(Gender::parse("w"), Some(Gender::Female));
        assert_eq!(Gender::parse("female"), Some(Gender::Female));
        assert_eq!(Gender::parse("other"), None);
    }
}
