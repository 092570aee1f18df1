//! PostgreSQL DEK store
//!
//! One wrapped DEK per voice entry, enforced by a unique constraint on
//! `voice_entry_id`. Destroyed keys stay as tombstones: `deleted_at` is set
//! and the wrapped bytes are overwritten with a random sentinel that never
//! unwraps, which is what makes erasure cryptographic rather than physical.

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use vv_domain::{DataEncryptionKey, ErasureRecord};
use vv_ports::{DekRotation, DekStore, DekStoreError, PlaintextDek};

use crate::crypto::{self, Kek, KekRing};

pub struct PostgresDekStore {
    pool: PgPool,
    schema: String,
    keks: Arc<KekRing>,
}

impl PostgresDekStore {
    pub fn new(pool: PgPool, schema: &str, keks: Arc<KekRing>) -> Self {
        Self {
            pool,
            schema: schema.to_string(),
            keks,
        }
    }

    /// Resolve the KEK a row's `encryption_version` names. A miss here means
    /// the ring configuration lost a key that still wraps live rows.
    fn wrapping_kek(&self, encryption_version: &str) -> Result<&Kek, DekStoreError> {
        self.keks
            .get(encryption_version)
            .ok_or_else(|| DekStoreError::Crypto {
                message: format!("KEK '{encryption_version}' is not in the configured ring"),
            })
    }

    /// Mint a wrapped DEK inside an existing transaction. Idempotent on the
    /// unique `voice_entry_id` constraint; on conflict the existing id is
    /// returned. Called from entry creation so the entry and its DEK commit
    /// together.
    pub(crate) async fn mint_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user_id: Uuid,
        voice_entry_id: Uuid,
    ) -> Result<Uuid, DekStoreError> {
        let kek = self.keks.active();
        let dek = crypto::generate_dek();
        let wrapped = crypto::wrap_dek(&dek, kek, &crypto::dek_associated_data(voice_entry_id))
            .map_err(|e| DekStoreError::Crypto {
                message: e.to_string(),
            })?;

        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO {schema}.data_encryption_keys
                (id, user_id, voice_entry_id, encrypted_dek, encryption_version, key_version, created_at)
            VALUES ($1, $2, $3, $4, $5, 1, NOW())
            ON CONFLICT (voice_entry_id) DO NOTHING
            RETURNING id
            "#,
            schema = self.schema
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(voice_entry_id)
        .bind(&wrapped)
        .bind(kek.version())
        .fetch_optional(&mut **tx)
        .await
        .map_err(storage_error)?;

        if let Some(row) = inserted {
            let id: Uuid = row.get("id");
            debug!(voice_entry_id = %voice_entry_id, dek_id = %id, "Minted DEK");
            return Ok(id);
        }

        // Lost the race; adopt the existing row.
        let existing = sqlx::query(&format!(
            "SELECT id FROM {schema}.data_encryption_keys WHERE voice_entry_id = $1",
            schema = self.schema
        ))
        .bind(voice_entry_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(storage_error)?;

        Ok(existing.get("id"))
    }

    fn row_to_dek(row: &PgRow) -> DataEncryptionKey {
        DataEncryptionKey {
            id: row.get("id"),
            user_id: row.get("user_id"),
            voice_entry_id: row.get("voice_entry_id"),
            encrypted_dek: row.get("encrypted_dek"),
            encryption_version: row.get("encryption_version"),
            key_version: row.get("key_version"),
            created_at: row.get("created_at"),
            rotated_at: row.get("rotated_at"),
            deleted_at: row.get("deleted_at"),
        }
    }
}

fn storage_error(e: sqlx::Error) -> DekStoreError {
    DekStoreError::Storage {
        message: e.to_string(),
    }
}

impl DekStore for PostgresDekStore {
    #[instrument(skip(self))]
    async fn load(&self, voice_entry_id: Uuid) -> Result<PlaintextDek, DekStoreError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT encrypted_dek, encryption_version, deleted_at
            FROM {schema}.data_encryption_keys
            WHERE voice_entry_id = $1
            "#,
            schema = self.schema
        ))
        .bind(voice_entry_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?
        .ok_or(DekStoreError::NotFound { voice_entry_id })?;

        let deleted_at: Option<DateTime<Utc>> = row.get("deleted_at");
        if deleted_at.is_some() {
            return Err(DekStoreError::Destroyed { voice_entry_id });
        }

        let encryption_version: String = row.get("encryption_version");
        let kek = self.wrapping_kek(&encryption_version)?;
        let wrapped: Vec<u8> = row.get("encrypted_dek");
        crypto::unwrap_dek(&wrapped, kek, &crypto::dek_associated_data(voice_entry_id)).map_err(
            |e| DekStoreError::Crypto {
                message: e.to_string(),
            },
        )
    }

    async fn get(&self, voice_entry_id: Uuid) -> Result<Option<DataEncryptionKey>, DekStoreError> {
        let row = sqlx::query(&format!(
            "SELECT * FROM {schema}.data_encryption_keys WHERE voice_entry_id = $1",
            schema = self.schema
        ))
        .bind(voice_entry_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(row.as_ref().map(Self::row_to_dek))
    }

    #[instrument(skip(self, reason))]
    async fn destroy(
        &self,
        user_id: Uuid,
        voice_entry_id: Uuid,
        reason: Option<String>,
    ) -> Result<ErasureRecord, DekStoreError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        let updated = sqlx::query(&format!(
            r#"
            UPDATE {schema}.data_encryption_keys
            SET deleted_at = NOW(), encrypted_dek = $2
            WHERE voice_entry_id = $1 AND deleted_at IS NULL
            RETURNING id, deleted_at
            "#,
            schema = self.schema
        ))
        .bind(voice_entry_id)
        .bind(crypto::random_sentinel())
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_error)?;

        let record = match updated {
            Some(row) => {
                let dek_id: Uuid = row.get("id");
                let destroyed_at: DateTime<Utc> = row.get("deleted_at");
                let record = ErasureRecord {
                    id: Uuid::new_v4(),
                    user_id,
                    voice_entry_id,
                    dek_id,
                    reason,
                    destroyed_at,
                };

                sqlx::query(&format!(
                    r#"
                    INSERT INTO {schema}.erasure_audit
                        (id, user_id, voice_entry_id, dek_id, reason, destroyed_at)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                    schema = self.schema
                ))
                .bind(record.id)
                .bind(record.user_id)
                .bind(record.voice_entry_id)
                .bind(record.dek_id)
                .bind(&record.reason)
                .bind(record.destroyed_at)
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;

                info!(
                    voice_entry_id = %voice_entry_id,
                    dek_id = %dek_id,
                    "DEK destroyed; ciphertext is now unreadable"
                );
                record
            }
            // Already a tombstone: return the audit record of the first
            // destruction.
            None => {
                let audit = sqlx::query(&format!(
                    r#"
                    SELECT id, user_id, voice_entry_id, dek_id, reason, destroyed_at
                    FROM {schema}.erasure_audit
                    WHERE voice_entry_id = $1
                    ORDER BY destroyed_at DESC
                    LIMIT 1
                    "#,
                    schema = self.schema
                ))
                .bind(voice_entry_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage_error)?
                .ok_or(DekStoreError::NotFound { voice_entry_id })?;

                debug!(voice_entry_id = %voice_entry_id, "DEK already destroyed");
                ErasureRecord {
                    id: audit.get("id"),
                    user_id: audit.get("user_id"),
                    voice_entry_id: audit.get("voice_entry_id"),
                    dek_id: audit.get("dek_id"),
                    reason: audit.get("reason"),
                    destroyed_at: audit.get("destroyed_at"),
                }
            }
        };

        tx.commit().await.map_err(storage_error)?;
        Ok(record)
    }

    #[instrument(skip(self))]
    async fn rotate(
        &self,
        voice_entry_id: Uuid,
        new_kek_id: &str,
    ) -> Result<DekRotation, DekStoreError> {
        let new_kek = self
            .keks
            .get(new_kek_id)
            .ok_or_else(|| DekStoreError::UnknownKek {
                kek_id: new_kek_id.to_string(),
            })?;

        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        // Row lock serializes concurrent rotations of the same entry.
        let row = sqlx::query(&format!(
            r#"
            SELECT id, encrypted_dek, encryption_version, deleted_at
            FROM {schema}.data_encryption_keys
            WHERE voice_entry_id = $1
            FOR UPDATE
            "#,
            schema = self.schema
        ))
        .bind(voice_entry_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_error)?
        .ok_or(DekStoreError::NotFound { voice_entry_id })?;

        let deleted_at: Option<DateTime<Utc>> = row.get("deleted_at");
        if deleted_at.is_some() {
            return Err(DekStoreError::Destroyed { voice_entry_id });
        }

        // Unwrap under the KEK the row was wrapped with, not the active one
        let current_version: String = row.get("encryption_version");
        let current_kek = self.wrapping_kek(&current_version)?;

        let ad = crypto::dek_associated_data(voice_entry_id);
        let wrapped: Vec<u8> = row.get("encrypted_dek");
        let dek = crypto::unwrap_dek(&wrapped, current_kek, &ad).map_err(|e| {
            DekStoreError::Crypto {
                message: e.to_string(),
            }
        })?;
        let rewrapped = crypto::wrap_dek(&dek, new_kek, &ad).map_err(|e| DekStoreError::Crypto {
            message: e.to_string(),
        })?;

        let updated = sqlx::query(&format!(
            r#"
            UPDATE {schema}.data_encryption_keys
            SET encrypted_dek = $2, key_version = key_version + 1, rotated_at = NOW(),
                encryption_version = $3
            WHERE voice_entry_id = $1
            RETURNING id, key_version, encryption_version, rotated_at
            "#,
            schema = self.schema
        ))
        .bind(voice_entry_id)
        .bind(&rewrapped)
        .bind(new_kek.version())
        .fetch_one(&mut *tx)
        .await
        .map_err(storage_error)?;

        tx.commit().await.map_err(storage_error)?;

        let rotation = DekRotation {
            dek_id: updated.get("id"),
            key_version: updated.get("key_version"),
            encryption_version: updated.get("encryption_version"),
            rotated_at: updated.get("rotated_at"),
        };
        info!(
            voice_entry_id = %voice_entry_id,
            key_version = rotation.key_version,
            from_kek = %current_version,
            to_kek = %rotation.encryption_version,
            "DEK re-wrapped"
        );
        Ok(rotation)
    }
}
