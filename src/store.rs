use crate::profile::{Gender, Profile, ProfileKey};
use anyhow::{Context, Result};
use sqlx::{sqlite::SqliteConnectOptions, ConnectOptions, Row, SqlitePool};
use std::{path::Path, str::FromStr};

/// SQLite-backed profile store. Read once at startup, written after each
/// profile mutation.
#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Create a new Store instance.
    /// This will automatically create the database file if it doesn't exist.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .log_statements(tracing::log::LevelFilter::Trace);

        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        Ok(Self { pool })
    }

    /// In-memory store for tests. A single connection, since every
    /// `:memory:` connection gets its own database.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;
        Ok(Self { pool })
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS profiles (
                profile_key TEXT PRIMARY KEY,
                age INTEGER,
                gender TEXT,
                room TEXT,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize database schema")?;

        Ok(())
    }

    /// Save or update a profile record under its anonymized key.
    pub async fn save_profile(&self, key: &ProfileKey, profile: &Profile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO profiles (profile_key, age, gender, room, updated_at)
            VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(profile_key) DO UPDATE SET
                age = excluded.age,
                gender = excluded.gender,
                room = excluded.room,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key.as_str())
        .bind(profile.age.map(|a| a as i64))
        .bind(profile.gender.map(|g| g.as_str()))
        .bind(&profile.room)
        .execute(&self.pool)
        .await
        .context("Failed to save profile")?;

        Ok(())
    }

    /// Load every stored profile. Called once at startup to seed the registry.
    pub async fn load_profiles(&self) -> Result<Vec<(ProfileKey, Profile)>> {
        let rows = sqlx::query(
            r#"
            SELECT profile_key, age, gender, room
            FROM profiles
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load profiles")?;

        let mut profiles = Vec::with_capacity(rows.len());

        for row in rows {
            let key = ProfileKey::from_stored(row.try_get("profile_key")?);
            let age: Option<i64> = row.try_get("age")?;
            let gender: Option<String> = row.try_get("gender")?;
            let room: Option<String> = row.try_get("room")?;

            profiles.push((
                key,
                Profile {
                    age: age.map(|a| a as u8),
                    gender: gender.as_deref().and_then(Gender::parse),
                    room,
                },
            ));
        }

        Ok(profiles)
    }
}
