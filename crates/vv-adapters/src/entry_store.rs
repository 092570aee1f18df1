//! PostgreSQL voice entry and preferences stores
//!
//! Entry creation and DEK minting commit in a single transaction: an
//! encrypted entry can never be observed without its key. The unique
//! constraint on `audio_handle` makes creation idempotent under retries that
//! share the same upload.

use sqlx::{postgres::PgRow, PgPool, Row};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use vv_domain::{UserPreferences, VoiceEntry};
use vv_ports::{
    EntryCreation, EntryStore, EntryStoreError, NewVoiceEntry, PreferencesStore,
    PreferencesStoreError,
};

use crate::dek_store::PostgresDekStore;

pub struct PostgresEntryStore {
    pool: PgPool,
    schema: String,
    deks: Arc<PostgresDekStore>,
}

impl PostgresEntryStore {
    pub fn new(pool: PgPool, schema: &str, deks: Arc<PostgresDekStore>) -> Self {
        Self {
            pool,
            schema: schema.to_string(),
            deks,
        }
    }

    fn row_to_entry(row: &PgRow) -> VoiceEntry {
        VoiceEntry {
            id: row.get("id"),
            user_id: row.get("user_id"),
            audio_handle: row.get("audio_handle"),
            original_filename: row.get("original_filename"),
            duration_seconds: row.get("duration_seconds"),
            is_encrypted: row.get("is_encrypted"),
            encryption_version: row.get("encryption_version"),
            created_at: row.get("created_at"),
        }
    }
}

fn storage_error(e: sqlx::Error) -> EntryStoreError {
    EntryStoreError::Storage {
        message: e.to_string(),
    }
}

impl EntryStore for PostgresEntryStore {
    #[instrument(skip(self, new), fields(entry_id = %new.id, user_id = %new.user_id))]
    async fn create(&self, new: NewVoiceEntry) -> Result<EntryCreation, EntryStoreError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO {schema}.voice_entries
                (id, user_id, audio_handle, original_filename, duration_seconds,
                 is_encrypted, encryption_version, created_at)
            VALUES ($1, $2, $3, $4, $5, TRUE, $6, NOW())
            ON CONFLICT (audio_handle) DO NOTHING
            RETURNING *
            "#,
            schema = self.schema
        ))
        .bind(new.id)
        .bind(new.user_id)
        .bind(&new.audio_handle)
        .bind(&new.original_filename)
        .bind(new.duration_seconds)
        .bind(&new.encryption_version)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_error)?;

        match inserted {
            Some(row) => {
                let entry = Self::row_to_entry(&row);
                self.deks
                    .mint_in_tx(&mut tx, entry.user_id, entry.id)
                    .await
                    .map_err(|e| EntryStoreError::Storage {
                        message: e.to_string(),
                    })?;
                tx.commit().await.map_err(storage_error)?;

                debug!(entry_id = %entry.id, "Voice entry created with DEK");
                Ok(EntryCreation {
                    entry,
                    created: true,
                })
            }
            // A concurrent creator with the same audio handle won; adopt its
            // row instead.
            None => {
                tx.rollback().await.map_err(storage_error)?;
                let row = sqlx::query(&format!(
                    "SELECT * FROM {schema}.voice_entries WHERE audio_handle = $1",
                    schema = self.schema
                ))
                .bind(&new.audio_handle)
                .fetch_one(&self.pool)
                .await
                .map_err(storage_error)?;

                debug!(audio_handle = %new.audio_handle, "Adopted existing voice entry");
                Ok(EntryCreation {
                    entry: Self::row_to_entry(&row),
                    created: false,
                })
            }
        }
    }

    async fn get(&self, entry_id: Uuid) -> Result<Option<VoiceEntry>, EntryStoreError> {
        let row = sqlx::query(&format!(
            "SELECT * FROM {schema}.voice_entries WHERE id = $1",
            schema = self.schema
        ))
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(row.as_ref().map(Self::row_to_entry))
    }
}

// ============================================================================
// User preferences
// ============================================================================

pub struct PostgresPreferencesStore {
    pool: PgPool,
    schema: String,
}

impl PostgresPreferencesStore {
    pub fn new(pool: PgPool, schema: &str) -> Self {
        Self {
            pool,
            schema: schema.to_string(),
        }
    }
}

impl PreferencesStore for PostgresPreferencesStore {
    async fn get(&self, user_id: Uuid) -> Result<Option<UserPreferences>, PreferencesStoreError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT user_id, preferred_language, preferred_llm_model
            FROM {schema}.user_preferences
            WHERE user_id = $1
            "#,
            schema = self.schema
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PreferencesStoreError::Storage {
            message: e.to_string(),
        })?;

        Ok(row.map(|row| UserPreferences {
            user_id: row.get("user_id"),
            preferred_language: row.get("preferred_language"),
            preferred_llm_model: row.get("preferred_llm_model"),
        }))
    }
}
