//! Domain errors

use thiserror::Error;
use uuid::Uuid;

/// Domain errors for VoxVault
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Invalid state transition: cannot transition from {current_state} via {attempted_transition}")]
    InvalidTransition {
        current_state: String,
        attempted_transition: String,
    },

    #[error("No primary completed transcription exists for entry {entry_id}")]
    NoPrimary { entry_id: Uuid },

    #[error("No active prompt template for entry type '{entry_type}'")]
    PromptTemplateMissing { entry_type: String },
}
