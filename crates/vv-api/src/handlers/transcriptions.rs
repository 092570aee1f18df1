//! Transcription read & promote endpoints
//!
//! Reads decrypt through a request-scoped DEK cache. An erased entry answers
//! 410 with no decrypted content anywhere in the body.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use vv_domain::{field_tags, JobStatus, TranscriptSegment};
use vv_ports::{EntryStore, TranscriptionStore};
use vv_adapters::DekCache;

use crate::auth::AuthenticatedUser;
use crate::handlers::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Serialize)]
pub struct TranscriptionResponse {
    pub id: Uuid,
    pub entry_id: Uuid,
    pub status: JobStatus,
    pub model_used: String,
    pub provider: String,
    pub language_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beam_size: Option<i32>,
    pub enable_diarization: bool,
    pub speaker_count: i32,
    pub is_primary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcribed_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<TranscriptSegment>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    pub created_at: String,
}

/// GET /api/v1/transcriptions/{id}
#[instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn get_transcription(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TranscriptionResponse>> {
    let row = state
        .transcriptions
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound {
            resource: "Transcription".to_string(),
            id: id.to_string(),
        })?;

    let entry = state
        .entries
        .get(row.entry_id)
        .await?
        .ok_or_else(|| ApiError::NotFound {
            resource: "Voice entry".to_string(),
            id: row.entry_id.to_string(),
        })?;
    if entry.user_id != user.user_id {
        return Err(ApiError::Forbidden {
            message: "Not the owner of this transcription".to_string(),
        });
    }

    // DEKs unwrap once per request and zeroize when the cache drops
    let mut cache = DekCache::new();

    let transcribed_text = match &row.transcribed_text {
        Some(ciphertext) => {
            let plaintext = state
                .codec
                .decrypt_field(&mut cache, entry.id, field_tags::TRANSCRIBED_TEXT, ciphertext)
                .await?;
            Some(String::from_utf8(plaintext).map_err(|_| ApiError::Internal {
                message: "transcript is not valid UTF-8".to_string(),
            })?)
        }
        None => None,
    };

    let segments = match &row.segments {
        Some(ciphertext) => {
            let json = state
                .codec
                .decrypt_field(
                    &mut cache,
                    entry.id,
                    field_tags::TRANSCRIPTION_SEGMENTS,
                    ciphertext,
                )
                .await?;
            Some(
                serde_json::from_slice(&json).map_err(|e| ApiError::Internal {
                    message: format!("segment payload is malformed: {e}"),
                })?,
            )
        }
        None => None,
    };

    Ok(Json(TranscriptionResponse {
        id: row.id,
        entry_id: row.entry_id,
        status: row.status,
        model_used: row.model_used,
        provider: row.provider,
        language_code: row.language_code,
        temperature: row.temperature,
        beam_size: row.beam_size,
        enable_diarization: row.enable_diarization,
        speaker_count: row.speaker_count,
        is_primary: row.is_primary,
        error_message: row.error_message,
        transcribed_text,
        segments,
        started_at: row.started_at.map(|t| t.to_rfc3339()),
        completed_at: row.completed_at.map(|t| t.to_rfc3339()),
        created_at: row.created_at.to_rfc3339(),
    }))
}

#[derive(Serialize)]
pub struct PromoteResponse {
    pub transcription_id: Uuid,
    pub is_primary: bool,
}

/// POST /api/v1/transcriptions/{id}/promote
///
/// Atomically demotes the current primary and promotes this completed row.
#[instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn promote_transcription(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PromoteResponse>> {
    let row = state
        .transcriptions
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound {
            resource: "Transcription".to_string(),
            id: id.to_string(),
        })?;

    let entry = state
        .entries
        .get(row.entry_id)
        .await?
        .ok_or_else(|| ApiError::NotFound {
            resource: "Voice entry".to_string(),
            id: row.entry_id.to_string(),
        })?;
    if entry.user_id != user.user_id {
        return Err(ApiError::Forbidden {
            message: "Not the owner of this transcription".to_string(),
        });
    }

    state.transcriptions.promote(id, row.entry_id).await?;

    Ok(Json(PromoteResponse {
        transcription_id: id,
        is_primary: true,
    }))
}
