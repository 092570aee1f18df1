//! Upload endpoint
//!
//! Accepts one multipart `file` field, validates it, stores the audio under
//! the local blob root, and creates the voice entry (DEK minted atomically).
//! With `auto_transcribe_on_upload` set, the first transcription is enqueued
//! and kicked immediately.

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use tracing::{error, info, instrument};
use uuid::Uuid;

use vv_adapters::{estimate_mp3_duration, CreateEntryRequest};

use crate::auth::AuthenticatedUser;
use crate::handlers::{ApiError, ApiResult};
use crate::state::AppState;

const ALLOWED_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "ogg", "flac", "webm"];

#[derive(Serialize)]
pub struct UploadResponse {
    pub id: Uuid,
    pub original_filename: String,
    pub saved_filename: String,
    pub duration_seconds: f64,
    pub uploaded_at: String,
    pub message: &'static str,
}

fn extension_of(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

/// POST /api/v1/upload
#[instrument(skip(state, user, multipart), fields(user_id = %user.user_id))]
pub async fn upload(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| ApiError::BadRequest {
        message: format!("Malformed multipart body: {e}"),
    })? {
        if field.name() == Some("file") {
            let filename = field
                .file_name()
                .unwrap_or("recording.bin")
                .to_string();
            let bytes = field.bytes().await.map_err(|e| ApiError::BadRequest {
                message: format!("Failed to read file field: {e}"),
            })?;
            file = Some((filename, bytes.to_vec()));
        }
    }

    let (original_filename, bytes) = file.ok_or_else(|| ApiError::UnprocessableEntity {
        message: "Missing 'file' field".to_string(),
    })?;

    let extension = extension_of(&original_filename);
    if !extension
        .as_deref()
        .map(|ext| ALLOWED_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
    {
        return Err(ApiError::BadRequest {
            message: format!(
                "Invalid file type; expected one of: {}",
                ALLOWED_EXTENSIONS.join(", ")
            ),
        });
    }
    if bytes.is_empty() {
        return Err(ApiError::BadRequest {
            message: "File is empty".to_string(),
        });
    }
    if bytes.len() > state.config.max_upload_bytes {
        return Err(ApiError::PayloadTooLarge {
            max_bytes: state.config.max_upload_bytes,
        });
    }

    let uploaded_at = chrono::Utc::now();
    let saved = state
        .audio
        .store(&original_filename, &bytes, uploaded_at)
        .await?;
    let duration_seconds = estimate_mp3_duration(&bytes).unwrap_or(0.0);

    let (creation, transcription_id) = state
        .lifecycle
        .create_voice_entry(CreateEntryRequest {
            user_id: user.user_id,
            audio_handle: saved.handle,
            original_filename: original_filename.clone(),
            duration_seconds,
            auto_transcribe: state.config.auto_transcribe_on_upload,
        })
        .await?;

    if let Some(transcription_id) = transcription_id {
        let pipeline = state.transcription_pipeline.clone();
        tokio::spawn(async move {
            if let Err(e) = pipeline.process(transcription_id).await {
                error!(transcription_id = %transcription_id, error = %e, "Pipeline error");
            }
        });
    }

    info!(
        entry_id = %creation.entry.id,
        created = creation.created,
        size = bytes.len(),
        "Upload accepted"
    );

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            id: creation.entry.id,
            original_filename,
            saved_filename: saved.saved_filename,
            duration_seconds: creation.entry.duration_seconds,
            uploaded_at: creation.entry.created_at.to_rfc3339(),
            message: "File uploaded successfully",
        }),
    ))
}
