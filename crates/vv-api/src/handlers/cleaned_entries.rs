//! Cleaned entry read & user-edit endpoints
//!
//! Readers prefer `user_edited_text` over `cleaned_text` when both exist.
//! Writing the user edit is a side channel: it never changes `cleaned_text`,
//! status, or primary selection.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use vv_adapters::DekCache;
use vv_domain::{field_tags, CleanedEntry, JobStatus};
use vv_ports::CleanupStore;

use crate::auth::AuthenticatedUser;
use crate::handlers::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Serialize)]
pub struct CleanedEntryResponse {
    pub id: Uuid,
    pub voice_entry_id: Uuid,
    pub transcription_id: Uuid,
    pub status: JobStatus,
    pub model_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_template_id: Option<i32>,
    pub is_primary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// The text a client should display: the user edit when present,
    /// otherwise the model output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleaned_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_edited_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_edited_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_raw_response: Option<String>,
    pub created_at: String,
}

async fn owned_cleaned_entry(
    state: &AppState,
    id: Uuid,
    user_id: Uuid,
) -> ApiResult<CleanedEntry> {
    let row = state
        .cleanups
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound {
            resource: "Cleaned entry".to_string(),
            id: id.to_string(),
        })?;
    if row.user_id != user_id {
        return Err(ApiError::Forbidden {
            message: "Not the owner of this cleaned entry".to_string(),
        });
    }
    Ok(row)
}

/// GET /api/v1/cleaned-entries/{id}
#[instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn get_cleaned_entry(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CleanedEntryResponse>> {
    let row = owned_cleaned_entry(&state, id, user.user_id).await?;

    let mut cache = DekCache::new();
    let cleaned_text = match &row.cleaned_text {
        Some(ciphertext) => Some(decrypt_text(
            &state,
            &mut cache,
            row.voice_entry_id,
            field_tags::CLEANED_TEXT,
            ciphertext,
        )
        .await?),
        None => None,
    };
    let user_edited_text = match &row.user_edited_text {
        Some(ciphertext) => Some(decrypt_text(
            &state,
            &mut cache,
            row.voice_entry_id,
            field_tags::USER_EDITED_TEXT,
            ciphertext,
        )
        .await?),
        None => None,
    };

    let text = user_edited_text.clone().or_else(|| cleaned_text.clone());

    Ok(Json(CleanedEntryResponse {
        id: row.id,
        voice_entry_id: row.voice_entry_id,
        transcription_id: row.transcription_id,
        status: row.status,
        model_name: row.model_name,
        temperature: row.temperature,
        top_p: row.top_p,
        prompt_template_id: row.prompt_template_id,
        is_primary: row.is_primary,
        error_message: row.error_message,
        text,
        cleaned_text,
        user_edited_text,
        user_edited_at: row.user_edited_at.map(|t| t.to_rfc3339()),
        llm_raw_response: row.llm_raw_response,
        created_at: row.created_at.to_rfc3339(),
    }))
}

async fn decrypt_text(
    state: &AppState,
    cache: &mut DekCache,
    voice_entry_id: Uuid,
    field_tag: &str,
    ciphertext: &[u8],
) -> ApiResult<String> {
    let plaintext = state
        .codec
        .decrypt_field(cache, voice_entry_id, field_tag, ciphertext)
        .await?;
    String::from_utf8(plaintext).map_err(|_| ApiError::Internal {
        message: "decrypted text is not valid UTF-8".to_string(),
    })
}

#[derive(Debug, Deserialize)]
pub struct UserEditRequest {
    pub user_edited_text: String,
}

#[derive(Serialize)]
pub struct UserEditResponse {
    pub id: Uuid,
    pub user_edited_at: String,
}

/// PATCH /api/v1/cleaned-entries/{id}
#[instrument(skip(state, user, body), fields(user_id = %user.user_id))]
pub async fn edit_cleaned_entry(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UserEditRequest>,
) -> ApiResult<Json<UserEditResponse>> {
    let row = owned_cleaned_entry(&state, id, user.user_id).await?;

    if body.user_edited_text.is_empty() {
        return Err(ApiError::BadRequest {
            message: "user_edited_text is empty".to_string(),
        });
    }

    let mut cache = DekCache::new();
    let ciphertext = state
        .codec
        .encrypt_field(
            &mut cache,
            row.voice_entry_id,
            field_tags::USER_EDITED_TEXT,
            body.user_edited_text.as_bytes(),
        )
        .await?;

    state.cleanups.set_user_edited(id, ciphertext).await?;

    let updated = owned_cleaned_entry(&state, id, user.user_id).await?;
    info!(cleanup_id = %id, "User edit recorded");

    Ok(Json(UserEditResponse {
        id,
        user_edited_at: updated
            .user_edited_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_default(),
    }))
}
