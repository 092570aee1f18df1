//! Pipeline trigger endpoints
//!
//! `POST /entries/{id}/transcribe` and `POST /entries/{id}/cleanup` validate
//! the request against the chosen provider's parameter schema, merge the
//! owner's preferences, enqueue the pending row, and kick the worker. Both
//! answer 202 with the new row id.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use uuid::Uuid;

use vv_domain::{languages, validate_parameters, DomainError, VoiceEntry};
use vv_ports::{
    CleanupStore, EntryStore, NewCleanedEntry, NewTranscription, PreferencesStore, TemplateStore,
    TranscriptionStore,
};

use crate::auth::AuthenticatedUser;
use crate::handlers::{ApiError, ApiResult};
use crate::state::AppState;

async fn owned_entry(
    state: &AppState,
    entry_id: Uuid,
    user_id: Uuid,
) -> ApiResult<VoiceEntry> {
    let entry = state
        .entries
        .get(entry_id)
        .await?
        .ok_or_else(|| ApiError::NotFound {
            resource: "Voice entry".to_string(),
            id: entry_id.to_string(),
        })?;
    if entry.user_id != user_id {
        return Err(ApiError::Forbidden {
            message: "Not the owner of this voice entry".to_string(),
        });
    }
    Ok(entry)
}

// ============================================================================
// Transcribe
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TranscribeRequest {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub transcription_provider: Option<String>,
    #[serde(default)]
    pub transcription_model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub beam_size: Option<i64>,
    #[serde(default)]
    pub enable_diarization: Option<bool>,
    #[serde(default)]
    pub speaker_count: Option<i64>,
}

#[derive(Serialize)]
pub struct TranscribeResponse {
    pub transcription_id: Uuid,
}

/// POST /api/v1/entries/{id}/transcribe
#[instrument(skip(state, user, body), fields(user_id = %user.user_id, entry_id = %entry_id))]
pub async fn transcribe(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(entry_id): Path<Uuid>,
    Json(body): Json<TranscribeRequest>,
) -> ApiResult<(StatusCode, Json<TranscribeResponse>)> {
    let entry = owned_entry(&state, entry_id, user.user_id).await?;

    let provider_id = body
        .transcription_provider
        .as_deref()
        .unwrap_or_else(|| state.transcription_registry.default_provider());
    let adapter = state.transcription_registry.get(provider_id).ok_or_else(|| {
        ApiError::from(DomainError::InvalidParameter {
            name: "transcription_provider".to_string(),
            reason: format!("'{provider_id}' is not an available provider"),
        })
    })?;
    let descriptor = adapter.descriptor();

    let model = match &body.transcription_model {
        Some(model) => {
            if !descriptor.has_model(model) {
                return Err(DomainError::InvalidParameter {
                    name: "transcription_model".to_string(),
                    reason: format!("'{model}' is not served by provider '{provider_id}'"),
                }
                .into());
            }
            model.clone()
        }
        None => descriptor
            .default_model()
            .map(|m| m.id.clone())
            .ok_or_else(|| ApiError::ServiceUnavailable {
                message: format!("Provider '{provider_id}' has no models"),
            })?,
    };

    // Preferences fill the gaps the request leaves open
    let preferences = state.preferences.get(user.user_id).await?;
    let language = body
        .language
        .or_else(|| preferences.and_then(|p| p.preferred_language))
        .unwrap_or_else(|| "auto".to_string());
    if !languages::is_supported(&language) {
        return Err(DomainError::InvalidParameter {
            name: "language".to_string(),
            reason: format!("'{language}' is not a supported language code"),
        }
        .into());
    }

    // Central parameter validation against the provider's schema
    let mut supplied = serde_json::Map::new();
    if let Some(v) = body.temperature {
        supplied.insert("temperature".to_string(), serde_json::json!(v));
    }
    if let Some(v) = body.beam_size {
        supplied.insert("beam_size".to_string(), serde_json::json!(v));
    }
    if let Some(v) = body.enable_diarization {
        supplied.insert("enable_diarization".to_string(), serde_json::json!(v));
    }
    if let Some(v) = body.speaker_count {
        supplied.insert("speaker_count".to_string(), serde_json::json!(v));
    }
    let validated = validate_parameters(&descriptor.parameters, &supplied)?;

    let transcription = state
        .transcriptions
        .insert(NewTranscription {
            id: Uuid::new_v4(),
            entry_id: entry.id,
            provider: descriptor.id.clone(),
            model_used: model,
            language_code: language,
            temperature: validated.get("temperature").and_then(|v| v.as_f64()),
            beam_size: validated
                .get("beam_size")
                .and_then(|v| v.as_i64())
                .map(|v| v as i32),
            enable_diarization: validated
                .get("enable_diarization")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            speaker_count: validated
                .get("speaker_count")
                .and_then(|v| v.as_i64())
                .map(|v| v as i32)
                .unwrap_or(1),
        })
        .await?;

    let pipeline = state.transcription_pipeline.clone();
    let transcription_id = transcription.id;
    tokio::spawn(async move {
        if let Err(e) = pipeline.process(transcription_id).await {
            error!(transcription_id = %transcription_id, error = %e, "Pipeline error");
        }
    });

    info!(transcription_id = %transcription.id, provider = %descriptor.id, "Transcription enqueued");
    Ok((
        StatusCode::ACCEPTED,
        Json(TranscribeResponse {
            transcription_id: transcription.id,
        }),
    ))
}

// ============================================================================
// Cleanup
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CleanupRequest {
    pub entry_type: String,
    #[serde(default)]
    pub llm_model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub prompt_template_name: Option<String>,
}

#[derive(Serialize)]
pub struct CleanupResponse {
    pub cleanup_id: Uuid,
}

/// POST /api/v1/entries/{id}/cleanup
#[instrument(skip(state, user, body), fields(user_id = %user.user_id, entry_id = %entry_id))]
pub async fn cleanup(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(entry_id): Path<Uuid>,
    Json(body): Json<CleanupRequest>,
) -> ApiResult<(StatusCode, Json<CleanupResponse>)> {
    let entry = owned_entry(&state, entry_id, user.user_id).await?;

    // Cleanup needs a primary completed transcription to exist now; its id is
    // captured by value and used even if primary moves later.
    let primary = state
        .transcriptions
        .primary_completed(entry.id)
        .await?
        .ok_or(DomainError::NoPrimary { entry_id: entry.id })?;

    let template = match &body.prompt_template_name {
        Some(name) => state.templates.find(name, &body.entry_type).await?,
        None => state.templates.active_for_entry_type(&body.entry_type).await?,
    }
    .ok_or_else(|| DomainError::PromptTemplateMissing {
        entry_type: body.entry_type.clone(),
    })?;

    let adapter = state.llm_registry.default_adapter().ok_or_else(|| {
        ApiError::ServiceUnavailable {
            message: "No LLM provider configured".to_string(),
        }
    })?;
    let descriptor = adapter.descriptor();

    let preferences = state.preferences.get(user.user_id).await?;
    let model = body
        .llm_model
        .or_else(|| preferences.and_then(|p| p.preferred_llm_model))
        .or_else(|| descriptor.default_model().map(|m| m.id.clone()))
        .ok_or_else(|| ApiError::ServiceUnavailable {
            message: format!("Provider '{}' has no models", descriptor.id),
        })?;

    let mut supplied = serde_json::Map::new();
    if let Some(v) = body.temperature {
        supplied.insert("temperature".to_string(), serde_json::json!(v));
    }
    if let Some(v) = body.top_p {
        supplied.insert("top_p".to_string(), serde_json::json!(v));
    }
    let validated = validate_parameters(&descriptor.parameters, &supplied)?;

    let cleanup = state
        .cleanups
        .insert(NewCleanedEntry {
            id: Uuid::new_v4(),
            voice_entry_id: entry.id,
            transcription_id: primary.id,
            user_id: user.user_id,
            model_name: model,
            temperature: validated.get("temperature").and_then(|v| v.as_f64()),
            top_p: validated.get("top_p").and_then(|v| v.as_f64()),
            prompt_template_id: Some(template.id),
        })
        .await?;

    let pipeline = state.cleanup_pipeline.clone();
    let cleanup_id = cleanup.id;
    tokio::spawn(async move {
        if let Err(e) = pipeline.process(cleanup_id).await {
            error!(cleanup_id = %cleanup_id, error = %e, "Pipeline error");
        }
    });

    info!(cleanup_id = %cleanup.id, template = %template.name, "Cleanup enqueued");
    Ok((
        StatusCode::ACCEPTED,
        Json(CleanupResponse {
            cleanup_id: cleanup.id,
        }),
    ))
}
