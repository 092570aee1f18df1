//! Envelope-encryption endpoints
//!
//! Erasure (cryptographic shredding), key rotation, and per-entry encryption
//! status. Ciphertext rows survive erasure; only the key dies.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use vv_ports::{DekStore, EntryStore};

use crate::auth::AuthenticatedUser;
use crate::handlers::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EraseRequest {
    pub voice_entry_id: Uuid,
    #[serde(default)]
    pub confirm: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Serialize)]
pub struct EraseResponse {
    pub target_type: &'static str,
    pub target_id: Uuid,
    pub dek_id: Uuid,
    pub destroyed_at: String,
    pub message: &'static str,
}

/// POST /api/v1/encryption/erase
#[instrument(skip(state, user, body), fields(user_id = %user.user_id))]
pub async fn erase(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<EraseRequest>,
) -> ApiResult<Json<EraseResponse>> {
    let record = state
        .erasure
        .erase(user.user_id, body.voice_entry_id, body.confirm, body.reason)
        .await?;

    Ok(Json(EraseResponse {
        target_type: "voice_entry",
        target_id: record.voice_entry_id,
        dek_id: record.dek_id,
        destroyed_at: record.destroyed_at.to_rfc3339(),
        message: "Data encryption key destroyed; content is permanently unreadable",
    }))
}

#[derive(Debug, Deserialize)]
pub struct RotateRequest {
    pub voice_entry_id: Uuid,
    /// KEK to re-wrap under; the active KEK when omitted
    #[serde(default)]
    pub new_kek_id: Option<String>,
}

#[derive(Serialize)]
pub struct RotateResponse {
    pub target_id: Uuid,
    pub dek_id: Uuid,
    pub key_version: i32,
    /// Version tag of the KEK now wrapping the DEK
    pub encryption_version: String,
    pub rotated_at: String,
}

/// POST /api/v1/encryption/rotate
#[instrument(skip(state, user, body), fields(user_id = %user.user_id))]
pub async fn rotate(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<RotateRequest>,
) -> ApiResult<Json<RotateResponse>> {
    let entry = state
        .entries
        .get(body.voice_entry_id)
        .await?
        .ok_or_else(|| ApiError::NotFound {
            resource: "Voice entry".to_string(),
            id: body.voice_entry_id.to_string(),
        })?;
    if entry.user_id != user.user_id {
        return Err(ApiError::Forbidden {
            message: "Not the owner of this voice entry".to_string(),
        });
    }

    let new_kek_id = body
        .new_kek_id
        .unwrap_or_else(|| state.kek_ring.active().version().to_string());
    let rotation = state.deks.rotate(body.voice_entry_id, &new_kek_id).await?;

    Ok(Json(RotateResponse {
        target_id: body.voice_entry_id,
        dek_id: rotation.dek_id,
        key_version: rotation.key_version,
        encryption_version: rotation.encryption_version,
        rotated_at: rotation.rotated_at.to_rfc3339(),
    }))
}

#[derive(Serialize)]
pub struct EncryptionStatusResponse {
    pub target_type: &'static str,
    pub target_id: Uuid,
    pub is_encrypted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dek_id: Option<Uuid>,
    pub key_destroyed: bool,
}

/// GET /api/v1/encryption/status/{voice_entry_id}
#[instrument(skip(state, user), fields(user_id = %user.user_id))]
pub async fn status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(voice_entry_id): Path<Uuid>,
) -> ApiResult<Json<EncryptionStatusResponse>> {
    let entry = state
        .entries
        .get(voice_entry_id)
        .await?
        .ok_or_else(|| ApiError::NotFound {
            resource: "Voice entry".to_string(),
            id: voice_entry_id.to_string(),
        })?;
    if entry.user_id != user.user_id {
        return Err(ApiError::Forbidden {
            message: "Not the owner of this voice entry".to_string(),
        });
    }

    let dek = state.deks.get(voice_entry_id).await?;
    let key_destroyed = dek.as_ref().map(|d| d.is_destroyed()).unwrap_or(false);

    Ok(Json(EncryptionStatusResponse {
        target_type: "voice_entry",
        target_id: voice_entry_id,
        is_encrypted: entry.is_encrypted,
        encryption_version: dek.as_ref().map(|d| d.encryption_version.clone()),
        dek_id: dek.as_ref().map(|d| d.id),
        key_destroyed,
    }))
}
