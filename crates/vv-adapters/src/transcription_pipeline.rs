//! Transcription pipeline worker
//!
//! Drives one transcription row through its state machine:
//! claim (compare-and-set) → provider call → encrypt → persist → primary
//! selection. Provider failures are recorded on the row; only storage and
//! integrity failures propagate to the caller.
//!
//! Transient provider errors retry with exponential backoff. Primary
//! selection is first-writer-wins, enforced by the storage boundary.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Mutex, Semaphore};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use vv_domain::field_tags;
use vv_ports::{AudioSource, DekStore, EntryStore, PipelineStoreError, TranscriptionStore};

use crate::config::PipelineConfig;
use crate::field_codec::{CodecError, DekCache, FieldCodec};
use crate::providers::{
    ProviderError, TranscriptionAdapter, TranscriptionOutput, TranscriptionRegistry,
    TranscriptionRequest,
};

#[derive(Debug, thiserror::Error)]
pub enum TranscriptionPipelineError {
    #[error("Store error: {0}")]
    Store(#[from] PipelineStoreError),

    #[error("Entry store error: {message}")]
    EntryStore { message: String },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

pub struct TranscriptionPipeline<S, E, D, A>
where
    S: TranscriptionStore,
    E: EntryStore,
    D: DekStore,
    A: AudioSource,
{
    transcriptions: Arc<S>,
    entries: Arc<E>,
    codec: FieldCodec<D>,
    registry: Arc<TranscriptionRegistry>,
    audio: Arc<A>,
    config: PipelineConfig,
    limits: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl<S, E, D, A> TranscriptionPipeline<S, E, D, A>
where
    S: TranscriptionStore + 'static,
    E: EntryStore + 'static,
    D: DekStore + 'static,
    A: AudioSource + 'static,
{
    pub fn new(
        transcriptions: Arc<S>,
        entries: Arc<E>,
        deks: Arc<D>,
        registry: Arc<TranscriptionRegistry>,
        audio: Arc<A>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            transcriptions,
            entries,
            codec: FieldCodec::new(deks),
            registry,
            audio,
            config,
            limits: Mutex::new(HashMap::new()),
        }
    }

    /// Bound on in-flight calls per provider. Excess rows stay `pending` and
    /// are picked up in FIFO order.
    async fn provider_permit(&self, provider: &str) -> Option<OwnedSemaphorePermit> {
        let semaphore = {
            let mut limits = self.limits.lock().await;
            limits
                .entry(provider.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.config.max_in_flight_per_provider)))
                .clone()
        };
        semaphore.acquire_owned().await.ok()
    }

    async fn call_with_retries(
        &self,
        adapter: &TranscriptionAdapter,
        request: &TranscriptionRequest,
    ) -> Result<TranscriptionOutput, ProviderError> {
        let mut attempt = 1u32;
        loop {
            let outcome =
                tokio::time::timeout(self.config.provider_timeout, adapter.execute(request)).await;

            let err = match outcome {
                Ok(Ok(output)) => return Ok(output),
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Timeout {
                    seconds: self.config.provider_timeout.as_secs(),
                },
            };

            if err.is_transient() && self.config.retry.should_retry(attempt) {
                let delay = self.config.retry.delay_for(attempt);
                warn!(
                    provider = adapter.id(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient provider failure; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }
            return Err(err);
        }
    }

    /// Run one transcription row to a terminal state. Safe to call
    /// concurrently for the same row: the claim is a compare-and-set.
    #[instrument(skip(self), fields(transcription_id = %id))]
    pub async fn process(&self, id: Uuid) -> Result<(), TranscriptionPipelineError> {
        if !self.transcriptions.claim(id).await? {
            debug!("Row already claimed or terminal");
            return Ok(());
        }

        let row = self
            .transcriptions
            .get(id)
            .await?
            .ok_or(PipelineStoreError::NotFound { id })?;

        let entry = match self.entries.get(row.entry_id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                self.transcriptions
                    .mark_failed(id, "voice entry no longer exists".to_string())
                    .await?;
                return Ok(());
            }
            Err(e) => {
                return Err(TranscriptionPipelineError::EntryStore {
                    message: e.to_string(),
                })
            }
        };

        let Some(adapter) = self.registry.get(&row.provider) else {
            self.transcriptions
                .mark_failed(id, format!("unknown transcription provider '{}'", row.provider))
                .await?;
            return Ok(());
        };

        let audio = match self.audio.fetch(&entry.audio_handle).await {
            Ok(audio) => audio,
            Err(e) => {
                self.transcriptions
                    .mark_failed(id, format!("audio unavailable: {e}"))
                    .await?;
                return Ok(());
            }
        };

        let request = TranscriptionRequest {
            audio,
            filename: entry.original_filename.clone(),
            model: row.model_used.clone(),
            language: row.language_code.clone(),
            temperature: row.temperature,
            beam_size: row.beam_size,
            enable_diarization: row.enable_diarization,
            speaker_count: row.speaker_count,
        };

        let permit = self.provider_permit(&row.provider).await;
        let output = match self.call_with_retries(adapter, &request).await {
            Ok(output) => output,
            Err(e) => {
                warn!(provider = %row.provider, error = %e, "Transcription failed");
                self.transcriptions.mark_failed(id, e.to_string()).await?;
                return Ok(());
            }
        };
        drop(permit);
        debug!(provider_metadata = %output.metadata, "Provider call finished");

        let mut cache = DekCache::new();
        let transcribed_text = match self
            .codec
            .encrypt_field(
                &mut cache,
                entry.id,
                field_tags::TRANSCRIBED_TEXT,
                output.text.as_bytes(),
            )
            .await
        {
            Ok(ciphertext) => ciphertext,
            Err(CodecError::Destroyed { .. }) | Err(CodecError::Missing { .. }) => {
                // Erasure intercepted this entry mid-flight; the transcript
                // must not be persisted in plaintext or under a dead key.
                self.transcriptions
                    .mark_failed(id, "encryption unavailable: DEK destroyed".to_string())
                    .await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let segments = match &output.segments {
            Some(segments) => {
                let json = serde_json::to_vec(segments).map_err(|e| CodecError::Crypto {
                    message: format!("segment serialization failed: {e}"),
                })?;
                Some(
                    self.codec
                        .encrypt_field(
                            &mut cache,
                            entry.id,
                            field_tags::TRANSCRIPTION_SEGMENTS,
                            &json,
                        )
                        .await?,
                )
            }
            None => None,
        };

        self.transcriptions
            .mark_completed(id, transcribed_text, segments)
            .await?;

        let became_primary = self.transcriptions.try_set_primary(id, row.entry_id).await?;
        info!(
            entry_id = %row.entry_id,
            provider = %row.provider,
            model = %row.model_used,
            is_primary = became_primary,
            "Transcription completed"
        );
        Ok(())
    }

    /// Cooperative worker loop: picks up pending rows FIFO. Handlers also
    /// kick `process` directly after enqueue; the CAS claim makes the two
    /// paths race-free.
    pub fn spawn_worker(self: &Arc<Self>) -> tokio::task::JoinHandle<()>
    where
        S: Send + Sync,
        E: Send + Sync,
        D: Send + Sync,
        A: Send + Sync,
    {
        let pipeline = self.clone();
        tokio::spawn(async move {
            loop {
                match pipeline.transcriptions.next_pending().await {
                    Ok(Some(id)) => {
                        if let Err(e) = pipeline.process(id).await {
                            error!(transcription_id = %id, error = %e, "Pipeline error");
                        }
                    }
                    Ok(None) => tokio::time::sleep(pipeline.config.poll_interval).await,
                    Err(e) => {
                        error!(error = %e, "Failed to poll pending transcriptions");
                        tokio::time::sleep(pipeline.config.poll_interval).await;
                    }
                }
            }
        })
    }
}
