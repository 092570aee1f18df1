//! PostgreSQL transcription store
//!
//! The row state machine is enforced at the storage boundary: claims are
//! status-guarded compare-and-set UPDATEs whose from/to states come from
//! `JobStateMachine::edge`, and the one-primary invariant is the partial
//! unique index `(entry_id) WHERE is_primary`; a lost primary race surfaces
//! as a unique violation, not corrupted state.

use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use vv_domain::{JobStateMachine, JobStatus, JobTransition, Transcription};
use vv_ports::{NewTranscription, PipelineStoreError, TranscriptionStore};

pub struct PostgresTranscriptionStore {
    pool: PgPool,
    schema: String,
}

impl PostgresTranscriptionStore {
    pub fn new(pool: PgPool, schema: &str) -> Self {
        Self {
            pool,
            schema: schema.to_string(),
        }
    }
}

pub(crate) fn storage_error(e: sqlx::Error) -> PipelineStoreError {
    PipelineStoreError::Storage {
        message: e.to_string(),
    }
}

/// SQLSTATE 23505: the partial unique index rejected a second primary.
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(
        e.as_database_error().and_then(|db| db.code()),
        Some(code) if code == "23505"
    )
}

fn row_to_transcription(row: &PgRow) -> Result<Transcription, PipelineStoreError> {
    let status: String = row.get("status");
    let status = JobStatus::parse(&status).map_err(|e| PipelineStoreError::Storage {
        message: e.to_string(),
    })?;
    Ok(Transcription {
        id: row.get("id"),
        entry_id: row.get("entry_id"),
        transcribed_text: row.get("transcribed_text"),
        segments: row.get("segments"),
        status,
        model_used: row.get("model_used"),
        provider: row.get("provider"),
        language_code: row.get("language_code"),
        temperature: row.get("temperature"),
        beam_size: row.get("beam_size"),
        enable_diarization: row.get("enable_diarization"),
        speaker_count: row.get("speaker_count"),
        is_primary: row.get("is_primary"),
        error_message: row.get("error_message"),
        started_at: row.get("transcription_started_at"),
        completed_at: row.get("transcription_completed_at"),
        created_at: row.get("created_at"),
    })
}

impl TranscriptionStore for PostgresTranscriptionStore {
    #[instrument(skip(self, new), fields(transcription_id = %new.id, entry_id = %new.entry_id))]
    async fn insert(&self, new: NewTranscription) -> Result<Transcription, PipelineStoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO {schema}.transcriptions
                (id, entry_id, status, model_used, provider, language_code,
                 temperature, beam_size, enable_diarization, speaker_count,
                 is_primary, created_at)
            VALUES ($1, $2, $10, $3, $4, $5, $6, $7, $8, $9, FALSE, NOW())
            RETURNING *
            "#,
            schema = self.schema
        ))
        .bind(new.id)
        .bind(new.entry_id)
        .bind(&new.model_used)
        .bind(&new.provider)
        .bind(&new.language_code)
        .bind(new.temperature)
        .bind(new.beam_size)
        .bind(new.enable_diarization)
        .bind(new.speaker_count)
        .bind(JobStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)?;

        row_to_transcription(&row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transcription>, PipelineStoreError> {
        let row = sqlx::query(&format!(
            "SELECT * FROM {schema}.transcriptions WHERE id = $1",
            schema = self.schema
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.as_ref().map(row_to_transcription).transpose()
    }

    #[instrument(skip(self))]
    async fn claim(&self, id: Uuid) -> Result<bool, PipelineStoreError> {
        let (from, to) = JobStateMachine::edge(JobTransition::Claim);
        let result = sqlx::query(&format!(
            r#"
            UPDATE {schema}.transcriptions
            SET status = $2, transcription_started_at = NOW()
            WHERE id = $1 AND status = $3
            "#,
            schema = self.schema
        ))
        .bind(id)
        .bind(to.as_str())
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        transcribed_text: Vec<u8>,
        segments: Option<Vec<u8>>,
    ) -> Result<(), PipelineStoreError> {
        let (from, to) = JobStateMachine::edge(JobTransition::Complete);
        let result = sqlx::query(&format!(
            r#"
            UPDATE {schema}.transcriptions
            SET status = $4, transcribed_text = $2, segments = $3,
                transcription_completed_at = NOW()
            WHERE id = $1 AND status = $5
            "#,
            schema = self.schema
        ))
        .bind(id)
        .bind(&transcribed_text)
        .bind(&segments)
        .bind(to.as_str())
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() != 1 {
            return Err(PipelineStoreError::InvalidState {
                id,
                status: "unknown".to_string(),
                expected: from.as_str().to_string(),
            });
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error_message: String) -> Result<(), PipelineStoreError> {
        let (from, to) = JobStateMachine::edge(JobTransition::Fail);
        let result = sqlx::query(&format!(
            r#"
            UPDATE {schema}.transcriptions
            SET status = $3, error_message = $2, transcription_completed_at = NOW()
            WHERE id = $1 AND status = $4
            "#,
            schema = self.schema
        ))
        .bind(id)
        .bind(&error_message)
        .bind(to.as_str())
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() != 1 {
            return Err(PipelineStoreError::InvalidState {
                id,
                status: "unknown".to_string(),
                expected: from.as_str().to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn try_set_primary(&self, id: Uuid, entry_id: Uuid) -> Result<bool, PipelineStoreError> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE {schema}.transcriptions
            SET is_primary = TRUE
            WHERE id = $1 AND status = $3
              AND NOT EXISTS (
                  SELECT 1 FROM {schema}.transcriptions
                  WHERE entry_id = $2 AND is_primary = TRUE
              )
            "#,
            schema = self.schema
        ))
        .bind(id)
        .bind(entry_id)
        .bind(JobStatus::Completed.as_str())
        .execute(&self.pool)
        .await;

        match result {
            Ok(result) => Ok(result.rows_affected() == 1),
            // Two writers raced past the NOT EXISTS guard; the partial unique
            // index picked the winner and this row stays non-primary.
            Err(e) if is_unique_violation(&e) => {
                debug!(transcription_id = %id, "Lost primary race");
                Ok(false)
            }
            Err(e) => Err(storage_error(e)),
        }
    }

    #[instrument(skip(self))]
    async fn promote(&self, id: Uuid, entry_id: Uuid) -> Result<(), PipelineStoreError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        let row = sqlx::query(&format!(
            "SELECT status FROM {schema}.transcriptions WHERE id = $1 AND entry_id = $2 FOR UPDATE",
            schema = self.schema
        ))
        .bind(id)
        .bind(entry_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_error)?
        .ok_or(PipelineStoreError::NotFound { id })?;

        let status: String = row.get("status");
        if status != JobStatus::Completed.as_str() {
            return Err(PipelineStoreError::InvalidState {
                id,
                status,
                expected: JobStatus::Completed.as_str().to_string(),
            });
        }

        sqlx::query(&format!(
            "UPDATE {schema}.transcriptions SET is_primary = FALSE WHERE entry_id = $1 AND is_primary = TRUE",
            schema = self.schema
        ))
        .bind(entry_id)
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        sqlx::query(&format!(
            "UPDATE {schema}.transcriptions SET is_primary = TRUE WHERE id = $1",
            schema = self.schema
        ))
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        tx.commit().await.map_err(storage_error)?;
        Ok(())
    }

    async fn primary_completed(
        &self,
        entry_id: Uuid,
    ) -> Result<Option<Transcription>, PipelineStoreError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT * FROM {schema}.transcriptions
            WHERE entry_id = $1 AND is_primary = TRUE AND status = $2
            "#,
            schema = self.schema
        ))
        .bind(entry_id)
        .bind(JobStatus::Completed.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.as_ref().map(row_to_transcription).transpose()
    }

    async fn next_pending(&self) -> Result<Option<Uuid>, PipelineStoreError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT id FROM {schema}.transcriptions
            WHERE status = $1
            ORDER BY created_at ASC
            LIMIT 1
            "#,
            schema = self.schema
        ))
        .bind(JobStatus::Pending.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(row.map(|row| row.get("id")))
    }
}
