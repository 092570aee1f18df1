//! VoxVault Port Traits
//!
//! This crate defines the port interfaces (traits) that adapters must
//! implement:
//! - EntryStore: voice entry rows
//! - DekStore: per-entry data encryption keys (load, destroy, rotate)
//! - TranscriptionStore / CleanupStore: pipeline rows with compare-and-set
//!   claims and primary selection at the storage boundary
//! - TemplateStore: active prompt template resolution
//! - PreferencesStore: per-user defaults
//! - AudioSource: opaque-handle reads from the external blob store

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use vv_domain::{
    CleanedEntry, DataEncryptionKey, ErasureRecord, PromptTemplate, Transcription, UserPreferences,
    VoiceEntry,
};

/// A 256-bit plaintext data encryption key, zeroized on drop.
///
/// Intentionally has no `Debug`/`Display` impl; key material must never
/// reach logs or error messages.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PlaintextDek(pub [u8; 32]);

impl PlaintextDek {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

// ============================================================================
// Entry store
// ============================================================================

/// New voice entry row, identity assigned by the caller.
#[derive(Debug, Clone)]
pub struct NewVoiceEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub audio_handle: String,
    pub original_filename: String,
    pub duration_seconds: f64,
    pub encryption_version: String,
}

/// Outcome of an entry creation: `created` is false when an existing row for
/// the same audio handle was adopted instead.
#[derive(Debug, Clone)]
pub struct EntryCreation {
    pub entry: VoiceEntry,
    pub created: bool,
}

/// Voice entry rows. Entries are immutable after creation.
pub trait EntryStore: Send + Sync {
    /// Insert a voice entry and mint its DEK in one atomic step. Idempotent
    /// on the audio handle: a concurrent or repeated create with the same
    /// handle returns the existing row (and leaves its DEK untouched).
    fn create(
        &self,
        new: NewVoiceEntry,
    ) -> impl Future<Output = Result<EntryCreation, EntryStoreError>> + Send;

    fn get(
        &self,
        entry_id: Uuid,
    ) -> impl Future<Output = Result<Option<VoiceEntry>, EntryStoreError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum EntryStoreError {
    #[error("Storage error: {message}")]
    Storage { message: String },
}

// ============================================================================
// DEK store
// ============================================================================

/// Result of a key rotation.
#[derive(Debug, Clone)]
pub struct DekRotation {
    pub dek_id: Uuid,
    pub key_version: i32,
    /// Version tag of the KEK now wrapping the DEK
    pub encryption_version: String,
    pub rotated_at: DateTime<Utc>,
}

/// Data encryption keys, exactly one per voice entry.
///
/// Minting happens inside [`EntryStore::create`] so that an encrypted entry
/// can never exist without its DEK. Implementations own the wrap/unwrap
/// against the process-wide KEK; callers only ever see plaintext DEKs through
/// [`PlaintextDek`].
pub trait DekStore: Send + Sync {
    /// Load and unwrap the non-deleted DEK for a voice entry.
    fn load(
        &self,
        voice_entry_id: Uuid,
    ) -> impl Future<Output = Result<PlaintextDek, DekStoreError>> + Send;

    /// Fetch the DEK row (wrapped form) without unwrapping, tombstones
    /// included.
    fn get(
        &self,
        voice_entry_id: Uuid,
    ) -> impl Future<Output = Result<Option<DataEncryptionKey>, DekStoreError>> + Send;

    /// Destroy the DEK: set `deleted_at`, overwrite the wrapped bytes with a
    /// random sentinel, and record an erasure audit event. Idempotent; a
    /// second call returns the audit record of the first.
    fn destroy(
        &self,
        user_id: Uuid,
        voice_entry_id: Uuid,
        reason: Option<String>,
    ) -> impl Future<Output = Result<ErasureRecord, DekStoreError>> + Send;

    /// Unwrap the DEK under the KEK recorded on its row and re-wrap it under
    /// the named KEK, bumping `key_version`. Serialized per voice entry.
    /// Fails with `UnknownKek` when `new_kek_id` is not in the ring.
    fn rotate(
        &self,
        voice_entry_id: Uuid,
        new_kek_id: &str,
    ) -> impl Future<Output = Result<DekRotation, DekStoreError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum DekStoreError {
    #[error("No DEK exists for voice entry {voice_entry_id}")]
    NotFound { voice_entry_id: Uuid },

    #[error("DEK for voice entry {voice_entry_id} has been destroyed")]
    Destroyed { voice_entry_id: Uuid },

    #[error("No KEK named '{kek_id}' is configured")]
    UnknownKek { kek_id: String },

    #[error("Crypto failure: {message}")]
    Crypto { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },
}

// ============================================================================
// Pipeline stores
// ============================================================================

/// Shared error type for the transcription and cleanup stores.
#[derive(Debug, thiserror::Error)]
pub enum PipelineStoreError {
    #[error("Row not found: {id}")]
    NotFound { id: Uuid },

    #[error("Row {id} is in state {status}, expected {expected}")]
    InvalidState {
        id: Uuid,
        status: String,
        expected: String,
    },

    #[error("Storage error: {message}")]
    Storage { message: String },
}

/// New transcription row; inserted with `status = pending`.
#[derive(Debug, Clone)]
pub struct NewTranscription {
    pub id: Uuid,
    pub entry_id: Uuid,
    pub provider: String,
    pub model_used: String,
    pub language_code: String,
    pub temperature: Option<f64>,
    pub beam_size: Option<i32>,
    pub enable_diarization: bool,
    pub speaker_count: i32,
}

/// Transcription rows and their state machine at the storage boundary.
pub trait TranscriptionStore: Send + Sync {
    fn insert(
        &self,
        new: NewTranscription,
    ) -> impl Future<Output = Result<Transcription, PipelineStoreError>> + Send;

    fn get(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Transcription>, PipelineStoreError>> + Send;

    /// Compare-and-set claim: `pending → processing`, stamping `started_at`.
    /// Returns false when another worker already claimed the row.
    fn claim(&self, id: Uuid) -> impl Future<Output = Result<bool, PipelineStoreError>> + Send;

    /// Persist ciphertext and transition `processing → completed`.
    fn mark_completed(
        &self,
        id: Uuid,
        transcribed_text: Vec<u8>,
        segments: Option<Vec<u8>>,
    ) -> impl Future<Output = Result<(), PipelineStoreError>> + Send;

    /// Record a failure and transition `processing → failed`.
    fn mark_failed(
        &self,
        id: Uuid,
        error_message: String,
    ) -> impl Future<Output = Result<(), PipelineStoreError>> + Send;

    /// First-writer-wins primary selection: set `is_primary` on a completed
    /// row only if the entry has no completed primary yet. Returns whether
    /// this row became primary.
    fn try_set_primary(
        &self,
        id: Uuid,
        entry_id: Uuid,
    ) -> impl Future<Output = Result<bool, PipelineStoreError>> + Send;

    /// Atomically demote the current primary and promote the given completed
    /// row.
    fn promote(
        &self,
        id: Uuid,
        entry_id: Uuid,
    ) -> impl Future<Output = Result<(), PipelineStoreError>> + Send;

    /// The completed primary transcription for an entry, if any.
    fn primary_completed(
        &self,
        entry_id: Uuid,
    ) -> impl Future<Output = Result<Option<Transcription>, PipelineStoreError>> + Send;

    /// Oldest pending row id, FIFO.
    fn next_pending(
        &self,
    ) -> impl Future<Output = Result<Option<Uuid>, PipelineStoreError>> + Send;
}

/// New cleanup row; inserted with `status = pending`. `transcription_id` is
/// the primary transcription captured by value at enqueue time.
#[derive(Debug, Clone)]
pub struct NewCleanedEntry {
    pub id: Uuid,
    pub voice_entry_id: Uuid,
    pub transcription_id: Uuid,
    pub user_id: Uuid,
    pub model_name: String,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub prompt_template_id: Option<i32>,
}

/// Cleaned entry rows and their state machine at the storage boundary.
pub trait CleanupStore: Send + Sync {
    fn insert(
        &self,
        new: NewCleanedEntry,
    ) -> impl Future<Output = Result<CleanedEntry, PipelineStoreError>> + Send;

    fn get(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<CleanedEntry>, PipelineStoreError>> + Send;

    /// Compare-and-set claim: `pending → processing`, stamping `started_at`.
    fn claim(&self, id: Uuid) -> impl Future<Output = Result<bool, PipelineStoreError>> + Send;

    /// Persist ciphertext plus the verbatim raw LLM response (plaintext, for
    /// audit) and transition `processing → completed`.
    fn mark_completed(
        &self,
        id: Uuid,
        cleaned_text: Vec<u8>,
        llm_raw_response: String,
    ) -> impl Future<Output = Result<(), PipelineStoreError>> + Send;

    fn mark_failed(
        &self,
        id: Uuid,
        error_message: String,
    ) -> impl Future<Output = Result<(), PipelineStoreError>> + Send;

    /// First-writer-wins primary selection, as for transcriptions.
    fn try_set_primary(
        &self,
        id: Uuid,
        voice_entry_id: Uuid,
    ) -> impl Future<Output = Result<bool, PipelineStoreError>> + Send;

    /// Write the user-edited override ciphertext. A side channel: never
    /// touches `cleaned_text` or primary selection.
    fn set_user_edited(
        &self,
        id: Uuid,
        user_edited_text: Vec<u8>,
    ) -> impl Future<Output = Result<(), PipelineStoreError>> + Send;

    fn next_pending(
        &self,
    ) -> impl Future<Output = Result<Option<Uuid>, PipelineStoreError>> + Send;
}

// ============================================================================
// Prompt templates & preferences
// ============================================================================

/// Prompt template lookup.
pub trait TemplateStore: Send + Sync {
    /// The active template for an entry type, highest version wins.
    fn active_for_entry_type(
        &self,
        entry_type: &str,
    ) -> impl Future<Output = Result<Option<PromptTemplate>, TemplateStoreError>> + Send;

    /// Lookup by logical name + entry type.
    fn find(
        &self,
        name: &str,
        entry_type: &str,
    ) -> impl Future<Output = Result<Option<PromptTemplate>, TemplateStoreError>> + Send;

    /// Lookup by template id (cleanup rows capture the id at enqueue time).
    fn get(
        &self,
        id: i32,
    ) -> impl Future<Output = Result<Option<PromptTemplate>, TemplateStoreError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateStoreError {
    #[error("Storage error: {message}")]
    Storage { message: String },
}

/// Per-user preference lookup; merged with request parameters at pipeline
/// entry.
pub trait PreferencesStore: Send + Sync {
    fn get(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = Result<Option<UserPreferences>, PreferencesStoreError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum PreferencesStoreError {
    #[error("Storage error: {message}")]
    Storage { message: String },
}

// ============================================================================
// Audio source
// ============================================================================

/// Read audio bytes from the external blob store by opaque handle.
pub trait AudioSource: Send + Sync {
    fn fetch(
        &self,
        handle: &str,
    ) -> impl Future<Output = Result<Vec<u8>, AudioSourceError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum AudioSourceError {
    #[error("Audio handle not found: {handle}")]
    NotFound { handle: String },

    #[error("I/O error: {message}")]
    Io { message: String },
}
