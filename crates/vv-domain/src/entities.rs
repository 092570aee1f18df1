//! Domain entities
//!
//! Every entity carries a stable UUID identity. Parent→child links are
//! exclusive ownership: destroying a voice entry cascade-destroys its
//! transcriptions, cleaned entries, and DEK at the storage layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state_machines::JobStatus;

/// Field tags used as the associated-data prefix when encrypting a column.
///
/// A ciphertext is bound to `"<field_tag>:<voice_entry_id>"`, so moving it to
/// another row (or another column of the same row) fails authentication.
pub mod field_tags {
    pub const TRANSCRIBED_TEXT: &str = "transcription_text";
    pub const TRANSCRIPTION_SEGMENTS: &str = "transcription_segments";
    pub const CLEANED_TEXT: &str = "cleaned_text";
    pub const USER_EDITED_TEXT: &str = "user_edited_text";
}

/// Associated-data string binding a ciphertext to its owning field and entry.
pub fn associated_data(field_tag: &str, voice_entry_id: Uuid) -> String {
    format!("{field_tag}:{voice_entry_id}")
}

/// One ingested voice recording.
///
/// Immutable after the initial metadata write. The audio itself lives in
/// external blob storage; `audio_handle` is the opaque reference to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub audio_handle: String,
    pub original_filename: String,
    pub duration_seconds: f64,
    pub is_encrypted: bool,
    pub encryption_version: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A data encryption key record, exactly one per voice entry.
///
/// `encrypted_dek` holds the KEK-wrapped key bytes. After destruction the row
/// is kept as a tombstone: `deleted_at` is set and the wrapped bytes are
/// overwritten with a random sentinel that does not unwrap.
#[derive(Debug, Clone)]
pub struct DataEncryptionKey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub voice_entry_id: Uuid,
    pub encrypted_dek: Vec<u8>,
    pub encryption_version: String,
    pub key_version: i32,
    pub created_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DataEncryptionKey {
    pub fn is_destroyed(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// One transcription attempt for a voice entry.
///
/// `transcribed_text` and `segments` are ciphertext. At most one transcription
/// per entry may have `is_primary = true` (partial unique index).
#[derive(Debug, Clone)]
pub struct Transcription {
    pub id: Uuid,
    pub entry_id: Uuid,
    pub transcribed_text: Option<Vec<u8>>,
    pub segments: Option<Vec<u8>>,
    pub status: JobStatus,
    pub model_used: String,
    pub provider: String,
    pub language_code: String,
    pub temperature: Option<f64>,
    pub beam_size: Option<i32>,
    pub enable_diarization: bool,
    pub speaker_count: i32,
    pub is_primary: bool,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A plaintext diarization segment, serialized to JSON before encryption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    pub text: String,
}

/// One LLM cleanup attempt for a voice entry.
///
/// `cleaned_text` and `user_edited_text` are ciphertext. `llm_raw_response`
/// stays plaintext for audit. `transcription_id` is captured by value at
/// cleanup time and never re-resolved.
#[derive(Debug, Clone)]
pub struct CleanedEntry {
    pub id: Uuid,
    pub voice_entry_id: Uuid,
    pub transcription_id: Uuid,
    pub user_id: Uuid,
    pub cleaned_text: Option<Vec<u8>>,
    pub user_edited_text: Option<Vec<u8>>,
    pub user_edited_at: Option<DateTime<Utc>>,
    pub model_name: String,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub prompt_template_id: Option<i32>,
    pub llm_raw_response: Option<String>,
    pub status: JobStatus,
    pub is_primary: bool,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A cleanup prompt, stored as data and resolved by `(entry_type, is_active,
/// highest version)`. Unique on `(name, entry_type)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: i32,
    pub name: String,
    pub entry_type: String,
    pub prompt_text: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-user defaults merged with request parameters at pipeline entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPreferences {
    pub user_id: Uuid,
    pub preferred_language: Option<String>,
    pub preferred_llm_model: Option<String>,
}

/// Audit record emitted when a DEK is destroyed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErasureRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub voice_entry_id: Uuid,
    pub dek_id: Uuid,
    pub reason: Option<String>,
    pub destroyed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn associated_data_binds_field_and_entry() {
        let id = Uuid::nil();
        assert_eq!(
            associated_data(field_tags::TRANSCRIBED_TEXT, id),
            "transcription_text:00000000-0000-0000-0000-000000000000"
        );
        assert_ne!(
            associated_data(field_tags::TRANSCRIBED_TEXT, id),
            associated_data(field_tags::CLEANED_TEXT, id)
        );
    }

    #[test]
    fn segment_json_shape_is_stable() {
        let seg = TranscriptSegment {
            start: 0.0,
            end: 1.5,
            speaker: Some("SPEAKER_00".to_string()),
            text: "hello".to_string(),
        };
        let json = serde_json::to_string(&seg).unwrap();
        let parsed: TranscriptSegment = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, seg);
    }
}
