//! Access keys: the credentials allowed to submit and read captures.
//!
//! Keys are stored as a salted sha256 digest. The salt is deployment-wide
//! and the digest is deterministic, so authentication is a single indexed
//! lookup on the digest column. Plaintext keys are shown exactly once, at
//! creation time.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct AccessKey {
    pub id: i64,
    pub label: String,
    pub key_digest: String,
    pub created_at: DateTime<Utc>,
    pub canceled_at: Option<DateTime<Utc>>,
}

impl AccessKey {
    /// Hex sha256 digest of salt || key.
    pub fn digest(salt: &str, key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Generate a fresh plaintext key and its digest.
    pub fn generate(salt: &str) -> (String, String) {
        let key = Uuid::new_v4().to_string();
        let digest = Self::digest(salt, &key);
        (key, digest)
    }

    pub async fn create(pool: &PgPool, label: &str, key_digest: &str) -> Result<AccessKey> {
        let access_key = sqlx::query_as::<_, AccessKey>(
            r#"
            INSERT INTO access_keys (label, key_digest)
            VALUES ($1, $2)
            RETURNING id, label, key_digest, created_at, canceled_at
            "#,
        )
        .bind(label)
        .bind(key_digest)
        .fetch_one(pool)
        .await?;

        Ok(access_key)
    }

    /// Look up an active (non-canceled) key by digest. This is the auth
    /// path: a miss means the presented key is unknown or revoked.
    pub async fn find_active_by_digest(pool: &PgPool, key_digest: &str) -> Result<Option<AccessKey>> {
        let access_key = sqlx::query_as::<_, AccessKey>(
            r#"
            SELECT id, label, key_digest, created_at, canceled_at
            FROM access_keys
            WHERE key_digest = $1 AND canceled_at IS NULL
            "#,
        )
        .bind(key_digest)
        .fetch_optional(pool)
        .await?;

        Ok(access_key)
    }

    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<AccessKey>> {
        let access_key = sqlx::query_as::<_, AccessKey>(
            r#"
            SELECT id, label, key_digest, created_at, canceled_at
            FROM access_keys
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(access_key)
    }

    pub async fn list_all(pool: &PgPool) -> Result<Vec<AccessKey>> {
        let access_keys = sqlx::query_as::<_, AccessKey>(
            r#"
            SELECT id, label, key_digest, created_at, canceled_at
            FROM access_keys
            ORDER BY id
            "#,
        )
        .fetch_all(pool)
        .await?;

        Ok(access_keys)
    }

    /// Stamp the revocation timestamp. Returns false when the key was
    /// already canceled.
    pub async fn cancel(pool: &PgPool, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE access_keys
            SET canceled_at = NOW()
            WHERE id = $1 AND canceled_at IS NULL
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
