//! Setup sessions: bound installation state between the form step and the
//! OAuth redirect, keyed by the OAuth `state` token.

use chrono::{DateTime, Duration, Utc};
use sqlx::Row;

use super::DbPool;
use crate::error::{GitlinkError, Result};
use crate::installation::InstallationData;
use crate::crypto::{EncryptionKey, RowBinding};
use crate::pipeline::PipelineStage;

const TABLE: &str = "setup_sessions";

/// Minutes a session stays valid after the form is submitted.
pub const SESSION_TTL_MINUTES: i64 = 10;

/// One in-flight installation attempt.
#[derive(Debug, Clone)]
pub struct SetupSession {
    pub state: String,
    pub provider: String,
    pub instance_host: String,
    pub stage: PipelineStage,
    /// Encrypted JSON of the bound [`InstallationData`].
    pub installation_encrypted: Vec<u8>,
    pub installation_nonce: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// External id of the assembled integration
    pub external_id: Option<String>,
}

impl SetupSession {
    /// Decrypts the bound installation data.
    pub fn installation(&self, key: &EncryptionKey) -> Result<InstallationData> {
        let plaintext = key.open(
            &self.installation_encrypted,
            &self.installation_nonce,
            RowBinding::new(TABLE, &self.state),
        )?;

        Ok(serde_json::from_slice(&plaintext)?)
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}

/// Setup session repository.
pub struct SetupSessionRepo;

impl SetupSessionRepo {
    /// Creates a new session for validated installation data. Not yet stored.
    pub fn new_session(
        provider: &str,
        installation: &InstallationData,
        key: &EncryptionKey,
    ) -> Result<SetupSession> {
        let state = Self::generate_state();
        let plaintext = serde_json::to_vec(installation)?;
        let sealed = key.seal(&plaintext, RowBinding::new(TABLE, &state))?;

        let now = Utc::now();
        Ok(SetupSession {
            state,
            provider: provider.to_string(),
            instance_host: installation.url.clone(),
            stage: PipelineStage::OAuthConfigured,
            installation_encrypted: sealed.ciphertext,
            installation_nonce: sealed.nonce,
            created_at: now,
            expires_at: now + Duration::minutes(SESSION_TTL_MINUTES),
            consumed_at: None,
            completed_at: None,
            error_message: None,
            external_id: None,
        })
    }

    /// Stores a session.
    pub async fn create(pool: &DbPool, session: &SetupSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO setup_sessions (
                state, provider, instance_host, stage,
                installation_encrypted, installation_nonce,
                created_at, expires_at, consumed_at, completed_at,
                error_message, external_id
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.state)
        .bind(&session.provider)
        .bind(&session.instance_host)
        .bind(session.stage.as_str())
        .bind(&session.installation_encrypted)
        .bind(&session.installation_nonce)
        .bind(session.created_at.to_rfc3339())
        .bind(session.expires_at.to_rfc3339())
        .bind(session.consumed_at.map(|t| t.to_rfc3339()))
        .bind(session.completed_at.map(|t| t.to_rfc3339()))
        .bind(&session.error_message)
        .bind(&session.external_id)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Gets a session without consuming it (for status polling).
    pub async fn get_by_state(
        pool: &DbPool,
        state: &str,
        provider: &str,
    ) -> Result<Option<SetupSession>> {
        let row = sqlx::query(
            r#"
            SELECT state, provider, instance_host, stage,
                   installation_encrypted, installation_nonce,
                   created_at, expires_at, consumed_at, completed_at,
                   error_message, external_id
            FROM setup_sessions
            WHERE state = ? AND provider = ?
            "#,
        )
        .bind(state)
        .bind(provider)
        .fetch_optional(pool)
        .await?;

        row.map(|r| Self::row_to_session(&r)).transpose()
    }

    /// Atomically validates and consumes a session.
    /// Returns the session if it exists, is unexpired and was not consumed yet.
    pub async fn consume(
        pool: &DbPool,
        state: &str,
        provider: &str,
    ) -> Result<Option<SetupSession>> {
        let now_str = Utc::now().to_rfc3339();

        let mut tx = pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE setup_sessions
            SET consumed_at = ?
            WHERE state = ? AND provider = ? AND consumed_at IS NULL AND expires_at > ?
            "#,
        )
        .bind(&now_str)
        .bind(state)
        .bind(provider)
        .bind(&now_str)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let row = sqlx::query(
            r#"
            SELECT state, provider, instance_host, stage,
                   installation_encrypted, installation_nonce,
                   created_at, expires_at, consumed_at, completed_at,
                   error_message, external_id
            FROM setup_sessions
            WHERE state = ?
            "#,
        )
        .bind(state)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;

        row.map(|r| Self::row_to_session(&r)).transpose()
    }

    /// Marks a session as assembled with the resulting integration id.
    pub async fn mark_completed(pool: &DbPool, state: &str, external_id: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE setup_sessions
            SET completed_at = ?, stage = ?, external_id = ?
            WHERE state = ?
            "#,
        )
        .bind(&now)
        .bind(PipelineStage::Assembled.as_str())
        .bind(external_id)
        .bind(state)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Marks a session as failed. `stage` is where the pipeline stopped.
    pub async fn mark_failed(
        pool: &DbPool,
        state: &str,
        stage: PipelineStage,
        error: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE setup_sessions
            SET stage = ?, error_message = ?
            WHERE state = ?
            "#,
        )
        .bind(stage.as_str())
        .bind(error)
        .bind(state)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes expired sessions.
    pub async fn delete_expired(pool: &DbPool) -> Result<u64> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query("DELETE FROM setup_sessions WHERE expires_at < ?")
            .bind(&now)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Generates a new cryptographically random state token.
    pub fn generate_state() -> String {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<SetupSession> {
        let stage_str: String = row.get("stage");
        let created_at_str: String = row.get("created_at");
        let expires_at_str: String = row.get("expires_at");
        let consumed_at_str: Option<String> = row.get("consumed_at");
        let completed_at_str: Option<String> = row.get("completed_at");

        Ok(SetupSession {
            state: row.get("state"),
            provider: row.get("provider"),
            instance_host: row.get("instance_host"),
            stage: stage_str.parse()?,
            installation_encrypted: row.get("installation_encrypted"),
            installation_nonce: row.get("installation_nonce"),
            created_at: parse_datetime(&created_at_str)?,
            expires_at: parse_datetime(&expires_at_str)?,
            consumed_at: consumed_at_str.map(|s| parse_datetime(&s)).transpose()?,
            completed_at: completed_at_str.map(|s| parse_datetime(&s)).transpose()?,
            error_message: row.get("error_message"),
            external_id: row.get("external_id"),
        })
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            GitlinkError::Database(sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                e.to_string(),
            ))))
        })
}
