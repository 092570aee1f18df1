//! PostgreSQL cleaned entry store
//!
//! Same storage-boundary state machine as the transcription store (guards
//! bound from `JobStateMachine::edge`), plus the user-edit side channel:
//! `user_edited_text` is written independently and never touches
//! `cleaned_text`, status, or primary selection.

use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use vv_domain::{CleanedEntry, JobStateMachine, JobStatus, JobTransition};
use vv_ports::{CleanupStore, NewCleanedEntry, PipelineStoreError};

use crate::transcription_store::{is_unique_violation, storage_error};

pub struct PostgresCleanupStore {
    pool: PgPool,
    schema: String,
}

impl PostgresCleanupStore {
    pub fn new(pool: PgPool, schema: &str) -> Self {
        Self {
            pool,
            schema: schema.to_string(),
        }
    }
}

fn row_to_cleaned_entry(row: &PgRow) -> Result<CleanedEntry, PipelineStoreError> {
    let status: String = row.get("status");
    let status = JobStatus::parse(&status).map_err(|e| PipelineStoreError::Storage {
        message: e.to_string(),
    })?;
    Ok(CleanedEntry {
        id: row.get("id"),
        voice_entry_id: row.get("voice_entry_id"),
        transcription_id: row.get("transcription_id"),
        user_id: row.get("user_id"),
        cleaned_text: row.get("cleaned_text"),
        user_edited_text: row.get("user_edited_text"),
        user_edited_at: row.get("user_edited_at"),
        model_name: row.get("model_name"),
        temperature: row.get("temperature"),
        top_p: row.get("top_p"),
        prompt_template_id: row.get("prompt_template_id"),
        llm_raw_response: row.get("llm_raw_response"),
        status,
        is_primary: row.get("is_primary"),
        error_message: row.get("error_message"),
        started_at: row.get("processing_started_at"),
        completed_at: row.get("processing_completed_at"),
        created_at: row.get("created_at"),
    })
}

impl CleanupStore for PostgresCleanupStore {
    #[instrument(skip(self, new), fields(cleanup_id = %new.id, voice_entry_id = %new.voice_entry_id))]
    async fn insert(&self, new: NewCleanedEntry) -> Result<CleanedEntry, PipelineStoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO {schema}.cleaned_entries
                (id, voice_entry_id, transcription_id, user_id, model_name,
                 temperature, top_p, prompt_template_id, status, is_primary, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, FALSE, NOW())
            RETURNING *
            "#,
            schema = self.schema
        ))
        .bind(new.id)
        .bind(new.voice_entry_id)
        .bind(new.transcription_id)
        .bind(new.user_id)
        .bind(&new.model_name)
        .bind(new.temperature)
        .bind(new.top_p)
        .bind(new.prompt_template_id)
        .bind(JobStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)?;

        row_to_cleaned_entry(&row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<CleanedEntry>, PipelineStoreError> {
        let row = sqlx::query(&format!(
            "SELECT * FROM {schema}.cleaned_entries WHERE id = $1",
            schema = self.schema
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.as_ref().map(row_to_cleaned_entry).transpose()
    }

    #[instrument(skip(self))]
    async fn claim(&self, id: Uuid) -> Result<bool, PipelineStoreError> {
        let (from, to) = JobStateMachine::edge(JobTransition::Claim);
        let result = sqlx::query(&format!(
            r#"
            UPDATE {schema}.cleaned_entries
            SET status = $2, processing_started_at = NOW()
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
        cleaned_text: Vec<u8>,
        llm_raw_response: String,
    ) -> Result<(), PipelineStoreError> {
        let (from, to) = JobStateMachine::edge(JobTransition::Complete);
        let result = sqlx::query(&format!(
            r#"
            UPDATE {schema}.cleaned_entries
            SET status = $4, cleaned_text = $2, llm_raw_response = $3,
                processing_completed_at = NOW()
            WHERE id = $1 AND status = $5
            "#,
            schema = self.schema
        ))
        .bind(id)
        .bind(&cleaned_text)
        .bind(&llm_raw_response)
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
            UPDATE {schema}.cleaned_entries
            SET status = $3, error_message = $2, processing_completed_at = NOW()
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
    async fn try_set_primary(
        &self,
        id: Uuid,
        voice_entry_id: Uuid,
    ) -> Result<bool, PipelineStoreError> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE {schema}.cleaned_entries
            SET is_primary = TRUE
            WHERE id = $1 AND status = $3
              AND NOT EXISTS (
                  SELECT 1 FROM {schema}.cleaned_entries
                  WHERE voice_entry_id = $2 AND is_primary = TRUE
              )
            "#,
            schema = self.schema
        ))
        .bind(id)
        .bind(voice_entry_id)
        .bind(JobStatus::Completed.as_str())
        .execute(&self.pool)
        .await;

        match result {
            Ok(result) => Ok(result.rows_affected() == 1),
            Err(e) if is_unique_violation(&e) => {
                debug!(cleanup_id = %id, "Lost primary race");
                Ok(false)
            }
            Err(e) => Err(storage_error(e)),
        }
    }

    async fn set_user_edited(
        &self,
        id: Uuid,
        user_edited_text: Vec<u8>,
    ) -> Result<(), PipelineStoreError> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE {schema}.cleaned_entries
            SET user_edited_text = $2, user_edited_at = NOW()
            WHERE id = $1
            "#,
            schema = self.schema
        ))
        .bind(id)
        .bind(&user_edited_text)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() != 1 {
            return Err(PipelineStoreError::NotFound { id });
        }
        Ok(())
    }

    async fn next_pending(&self) -> Result<Option<Uuid>, PipelineStoreError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT id FROM {schema}.cleaned_entries
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
