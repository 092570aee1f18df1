//! Entry lifecycle orchestrator
//!
//! Accepts an audio handle from the upload boundary, creates the voice entry
//! (the store mints the DEK in the same transaction), and optionally enqueues
//! the first transcription using the owner's preferred language and the
//! default provider.

use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use vv_ports::{
    EntryCreation, EntryStore, EntryStoreError, NewTranscription, NewVoiceEntry,
    PipelineStoreError, PreferencesStore, TranscriptionStore,
};

use crate::providers::TranscriptionRegistry;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Entry store error: {0}")]
    EntryStore(#[from] EntryStoreError),

    #[error("Transcription store error: {0}")]
    TranscriptionStore(#[from] PipelineStoreError),

    #[error("No transcription provider configured")]
    NoProvider,
}

/// New-entry request from the upload boundary.
#[derive(Debug, Clone)]
pub struct CreateEntryRequest {
    pub user_id: Uuid,
    pub audio_handle: String,
    pub original_filename: String,
    pub duration_seconds: f64,
    /// Enqueue a first transcription right away
    pub auto_transcribe: bool,
}

pub struct EntryLifecycle<E, T, P>
where
    E: EntryStore,
    T: TranscriptionStore,
    P: PreferencesStore,
{
    entries: Arc<E>,
    transcriptions: Arc<T>,
    preferences: Arc<P>,
    registry: Arc<TranscriptionRegistry>,
    encryption_version: String,
}

impl<E, T, P> EntryLifecycle<E, T, P>
where
    E: EntryStore,
    T: TranscriptionStore,
    P: PreferencesStore,
{
    pub fn new(
        entries: Arc<E>,
        transcriptions: Arc<T>,
        preferences: Arc<P>,
        registry: Arc<TranscriptionRegistry>,
        encryption_version: &str,
    ) -> Self {
        Self {
            entries,
            transcriptions,
            preferences,
            registry,
            encryption_version: encryption_version.to_string(),
        }
    }

    /// Create a voice entry (idempotent on the audio handle) and optionally
    /// enqueue its first transcription. Returns the creation outcome and the
    /// enqueued transcription id, if any.
    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn create_voice_entry(
        &self,
        request: CreateEntryRequest,
    ) -> Result<(EntryCreation, Option<Uuid>), LifecycleError> {
        if request.original_filename.is_empty() {
            return Err(LifecycleError::InvalidInput {
                message: "original filename is empty".to_string(),
            });
        }
        if request.audio_handle.is_empty() {
            return Err(LifecycleError::InvalidInput {
                message: "audio handle is empty".to_string(),
            });
        }
        if !request.duration_seconds.is_finite() || request.duration_seconds < 0.0 {
            return Err(LifecycleError::InvalidInput {
                message: "duration must be a non-negative number".to_string(),
            });
        }

        let creation = self
            .entries
            .create(NewVoiceEntry {
                id: Uuid::new_v4(),
                user_id: request.user_id,
                audio_handle: request.audio_handle,
                original_filename: request.original_filename,
                duration_seconds: request.duration_seconds,
                encryption_version: self.encryption_version.clone(),
            })
            .await?;

        // A retried upload that adopted an existing entry does not enqueue a
        // second transcription.
        if !creation.created || !request.auto_transcribe {
            return Ok((creation, None));
        }

        let adapter = self
            .registry
            .default_adapter()
            .ok_or(LifecycleError::NoProvider)?;
        let descriptor = adapter.descriptor();
        let model = descriptor
            .default_model()
            .ok_or(LifecycleError::NoProvider)?;

        let language = self
            .preferences
            .get(request.user_id)
            .await
            .ok()
            .flatten()
            .and_then(|p| p.preferred_language)
            .unwrap_or_else(|| "auto".to_string());

        let transcription = self
            .transcriptions
            .insert(NewTranscription {
                id: Uuid::new_v4(),
                entry_id: creation.entry.id,
                provider: descriptor.id.clone(),
                model_used: model.id.clone(),
                language_code: language,
                temperature: None,
                beam_size: None,
                enable_diarization: false,
                speaker_count: 1,
            })
            .await?;

        info!(
            entry_id = %creation.entry.id,
            transcription_id = %transcription.id,
            provider = %descriptor.id,
            "Voice entry created, transcription enqueued"
        );
        Ok((creation, Some(transcription.id)))
    }
}
