//! API Error Types
//!
//! The single place where the error taxonomy maps to HTTP statuses.
//! Plaintext and key material never reach a response body or a log line.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use vv_adapters::{
    CleanupPipelineError, CodecError, ErasureError, LifecycleError, TranscriptionPipelineError,
};
use vv_domain::DomainError;
use vv_ports::{
    AudioSourceError, DekStoreError, EntryStoreError, PipelineStoreError, PreferencesStoreError,
    TemplateStoreError,
};

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

/// API error types
#[derive(Debug)]
pub enum ApiError {
    /// Rejected before any state change
    BadRequest { message: String },
    /// Caller is not the owner
    Forbidden { message: String },
    /// Resource not found
    NotFound { resource: String, id: String },
    /// Pipeline precondition failed
    Conflict { message: String },
    /// DEK destroyed; ciphertext exists but is unreadable
    Gone { voice_entry_id: Uuid },
    /// Upload exceeds the configured cap
    PayloadTooLarge { max_bytes: usize },
    /// Schema-level validation failure
    UnprocessableEntity { message: String },
    /// No provider configured, or a transient failure survived the retry
    /// budget
    ServiceUnavailable { message: String },
    /// Crypto or storage bug
    Internal { message: String },
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            ApiError::BadRequest { message } => (StatusCode::BAD_REQUEST, message.clone(), None),
            ApiError::Forbidden { message } => (StatusCode::FORBIDDEN, message.clone(), None),
            ApiError::NotFound { resource, id } => (
                StatusCode::NOT_FOUND,
                format!("{resource} not found: {id}"),
                None,
            ),
            ApiError::Conflict { message } => (StatusCode::CONFLICT, message.clone(), None),
            ApiError::Gone { voice_entry_id } => (
                StatusCode::GONE,
                "Content has been erased and is permanently unreadable".to_string(),
                Some(serde_json::json!({ "voice_entry_id": voice_entry_id })),
            ),
            ApiError::PayloadTooLarge { max_bytes } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("File too large; the limit is {max_bytes} bytes"),
                None,
            ),
            ApiError::UnprocessableEntity { message } => {
                (StatusCode::UNPROCESSABLE_ENTITY, message.clone(), None)
            }
            ApiError::ServiceUnavailable { message } => {
                (StatusCode::SERVICE_UNAVAILABLE, message.clone(), None)
            }
            ApiError::Internal { message } => {
                tracing::error!(error = %message, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error,
            code: status.as_u16(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::InvalidInput { message } => ApiError::BadRequest { message },
            DomainError::InvalidParameter { name, reason } => ApiError::UnprocessableEntity {
                message: format!("Invalid parameter '{name}': {reason}"),
            },
            DomainError::InvalidTransition {
                current_state,
                attempted_transition,
            } => ApiError::Conflict {
                message: format!("Cannot {attempted_transition} from state {current_state}"),
            },
            DomainError::NoPrimary { entry_id } => ApiError::Conflict {
                message: format!("No primary completed transcription exists for entry {entry_id}"),
            },
            DomainError::PromptTemplateMissing { entry_type } => ApiError::NotFound {
                resource: "Prompt template".to_string(),
                id: entry_type,
            },
        }
    }
}

impl From<PipelineStoreError> for ApiError {
    fn from(e: PipelineStoreError) -> Self {
        match e {
            PipelineStoreError::NotFound { id } => ApiError::NotFound {
                resource: "Row".to_string(),
                id: id.to_string(),
            },
            PipelineStoreError::InvalidState {
                id,
                status,
                expected,
            } => ApiError::Conflict {
                message: format!("Row {id} is {status}, expected {expected}"),
            },
            PipelineStoreError::Storage { message } => ApiError::Internal { message },
        }
    }
}

impl From<EntryStoreError> for ApiError {
    fn from(e: EntryStoreError) -> Self {
        match e {
            EntryStoreError::Storage { message } => ApiError::Internal { message },
        }
    }
}

impl From<DekStoreError> for ApiError {
    fn from(e: DekStoreError) -> Self {
        match e {
            DekStoreError::Destroyed { voice_entry_id } => ApiError::Gone { voice_entry_id },
            DekStoreError::NotFound { voice_entry_id } => ApiError::NotFound {
                resource: "Encryption key".to_string(),
                id: voice_entry_id.to_string(),
            },
            DekStoreError::UnknownKek { kek_id } => ApiError::BadRequest {
                message: format!("No KEK named '{kek_id}' is configured"),
            },
            DekStoreError::Crypto { message } | DekStoreError::Storage { message } => {
                ApiError::Internal { message }
            }
        }
    }
}

impl From<CodecError> for ApiError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Destroyed { voice_entry_id } => ApiError::Gone { voice_entry_id },
            CodecError::Missing { voice_entry_id } => ApiError::Internal {
                message: format!("no DEK for encrypted entry {voice_entry_id}"),
            },
            CodecError::Crypto { message } | CodecError::Storage { message } => {
                ApiError::Internal { message }
            }
        }
    }
}

impl From<TemplateStoreError> for ApiError {
    fn from(e: TemplateStoreError) -> Self {
        match e {
            TemplateStoreError::Storage { message } => ApiError::Internal { message },
        }
    }
}

impl From<PreferencesStoreError> for ApiError {
    fn from(e: PreferencesStoreError) -> Self {
        match e {
            PreferencesStoreError::Storage { message } => ApiError::Internal { message },
        }
    }
}

impl From<AudioSourceError> for ApiError {
    fn from(e: AudioSourceError) -> Self {
        match e {
            AudioSourceError::NotFound { handle } => ApiError::NotFound {
                resource: "Audio".to_string(),
                id: handle,
            },
            AudioSourceError::Io { message } => ApiError::Internal { message },
        }
    }
}

impl From<ErasureError> for ApiError {
    fn from(e: ErasureError) -> Self {
        match e {
            ErasureError::NotConfirmed => ApiError::BadRequest {
                message: "Erasure requires confirm: true".to_string(),
            },
            ErasureError::NotFound { voice_entry_id } => ApiError::NotFound {
                resource: "Voice entry".to_string(),
                id: voice_entry_id.to_string(),
            },
            ErasureError::NotOwner { .. } => ApiError::Forbidden {
                message: "Not the owner of this voice entry".to_string(),
            },
            ErasureError::DekStore(inner) => inner.into(),
            ErasureError::EntryStore(inner) => inner.into(),
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::InvalidInput { message } => ApiError::BadRequest { message },
            LifecycleError::NoProvider => ApiError::ServiceUnavailable {
                message: "No transcription provider configured".to_string(),
            },
            LifecycleError::EntryStore(inner) => inner.into(),
            LifecycleError::TranscriptionStore(inner) => inner.into(),
        }
    }
}

impl From<TranscriptionPipelineError> for ApiError {
    fn from(e: TranscriptionPipelineError) -> Self {
        ApiError::Internal {
            message: e.to_string(),
        }
    }
}

impl From<CleanupPipelineError> for ApiError {
    fn from(e: CleanupPipelineError) -> Self {
        ApiError::Internal {
            message: e.to_string(),
        }
    }
}
