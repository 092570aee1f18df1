//! Provider, model, and language discovery endpoints
//!
//! `/options` drives client UI: the default provider on each side with its
//! models and parameter schema, plus the full provider roster.

use axum::{extract::State, Json};
use serde::Serialize;

use vv_domain::languages::SUPPORTED_LANGUAGES;
use vv_domain::ParameterSchema;

use vv_adapters::providers::ModelDescriptor;

use crate::handlers::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Serialize)]
pub struct SideOptions {
    pub provider: String,
    pub available_providers: Vec<String>,
    pub models: Vec<ModelDescriptor>,
    pub parameters: ParameterSchema,
}

#[derive(Serialize)]
pub struct OptionsResponse {
    pub transcription: SideOptions,
    pub llm: SideOptions,
}

/// GET /api/v1/options
pub async fn options(State(state): State<AppState>) -> ApiResult<Json<OptionsResponse>> {
    let transcription_adapter = state
        .transcription_registry
        .default_adapter()
        .ok_or_else(|| ApiError::ServiceUnavailable {
            message: "No transcription provider configured".to_string(),
        })?;
    let llm_adapter = state
        .llm_registry
        .default_adapter()
        .ok_or_else(|| ApiError::ServiceUnavailable {
            message: "No LLM provider configured".to_string(),
        })?;

    let transcription = transcription_adapter.descriptor();
    let llm = llm_adapter.descriptor();

    Ok(Json(OptionsResponse {
        transcription: SideOptions {
            provider: transcription.id.clone(),
            available_providers: state
                .transcription_registry
                .provider_ids()
                .iter()
                .map(|id| id.to_string())
                .collect(),
            models: transcription.models.clone(),
            parameters: transcription.parameters.clone(),
        },
        llm: SideOptions {
            provider: llm.id.clone(),
            available_providers: state
                .llm_registry
                .list_available()
                .iter()
                .map(|d| d.id.clone())
                .collect(),
            models: llm.models.clone(),
            parameters: llm.parameters.clone(),
        },
    }))
}

#[derive(Serialize)]
pub struct ModelsResponse {
    pub provider: String,
    pub models: Vec<ModelDescriptor>,
}

/// GET /api/v1/models/transcription
pub async fn transcription_models(State(state): State<AppState>) -> ApiResult<Json<ModelsResponse>> {
    let adapter = state
        .transcription_registry
        .default_adapter()
        .ok_or_else(|| ApiError::ServiceUnavailable {
            message: "No transcription provider configured".to_string(),
        })?;
    let descriptor = adapter.descriptor();
    Ok(Json(ModelsResponse {
        provider: descriptor.id.clone(),
        models: descriptor.models.clone(),
    }))
}

/// GET /api/v1/models/llm
pub async fn llm_models(State(state): State<AppState>) -> ApiResult<Json<ModelsResponse>> {
    let adapter = state
        .llm_registry
        .default_adapter()
        .ok_or_else(|| ApiError::ServiceUnavailable {
            message: "No LLM provider configured".to_string(),
        })?;
    let descriptor = adapter.descriptor();
    Ok(Json(ModelsResponse {
        provider: descriptor.id.clone(),
        models: descriptor.models.clone(),
    }))
}

#[derive(Serialize)]
pub struct LanguagesResponse {
    pub languages: Vec<&'static str>,
    pub count: usize,
}

/// GET /api/v1/models/languages
pub async fn supported_languages() -> Json<LanguagesResponse> {
    Json(LanguagesResponse {
        languages: SUPPORTED_LANGUAGES.to_vec(),
        count: SUPPORTED_LANGUAGES.len(),
    })
}
