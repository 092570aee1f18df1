//! Cleanup pipeline worker
//!
//! Same state-machine shape as the transcription pipeline, with cleanup's
//! distinguishing steps: decrypt the source transcript (captured by value at
//! enqueue), render the prompt template, call the LLM, parse the response
//! leniently, and persist the encrypted `cleaned_text` next to the verbatim
//! raw response.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use vv_domain::{field_tags, CleanupOutput};
use vv_ports::{CleanupStore, DekStore, PipelineStoreError, TemplateStore, TranscriptionStore};

use crate::config::PipelineConfig;
use crate::field_codec::{CodecError, DekCache, FieldCodec};
use crate::providers::{LlmAdapter, LlmOutput, LlmRegistry, LlmRequest, ProviderError};

#[derive(Debug, thiserror::Error)]
pub enum CleanupPipelineError {
    #[error("Store error: {0}")]
    Store(#[from] PipelineStoreError),

    #[error("Template store error: {message}")]
    TemplateStore { message: String },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

pub struct CleanupPipeline<C, T, TS, D>
where
    C: CleanupStore,
    T: TranscriptionStore,
    TS: TemplateStore,
    D: DekStore,
{
    cleanups: Arc<C>,
    transcriptions: Arc<T>,
    templates: Arc<TS>,
    codec: FieldCodec<D>,
    registry: Arc<LlmRegistry>,
    config: PipelineConfig,
    limits: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl<C, T, TS, D> CleanupPipeline<C, T, TS, D>
where
    C: CleanupStore + 'static,
    T: TranscriptionStore + 'static,
    TS: TemplateStore + 'static,
    D: DekStore + 'static,
{
    pub fn new(
        cleanups: Arc<C>,
        transcriptions: Arc<T>,
        templates: Arc<TS>,
        deks: Arc<D>,
        registry: Arc<LlmRegistry>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            cleanups,
            transcriptions,
            templates,
            codec: FieldCodec::new(deks),
            registry,
            config,
            limits: Mutex::new(HashMap::new()),
        }
    }

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
        adapter: &LlmAdapter,
        request: &LlmRequest,
    ) -> Result<LlmOutput, ProviderError> {
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
                    "Transient LLM failure; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }
            return Err(err);
        }
    }

    /// Run one cleanup row to a terminal state.
    #[instrument(skip(self), fields(cleanup_id = %id))]
    pub async fn process(&self, id: Uuid) -> Result<(), CleanupPipelineError> {
        if !self.cleanups.claim(id).await? {
            debug!("Row already claimed or terminal");
            return Ok(());
        }

        let row = self
            .cleanups
            .get(id)
            .await?
            .ok_or(PipelineStoreError::NotFound { id })?;

        // The source transcription was captured by value at enqueue; it is
        // used even if primary has moved since.
        let source = match self.transcriptions.get(row.transcription_id).await? {
            Some(t) if t.status == vv_domain::JobStatus::Completed => t,
            _ => {
                self.cleanups
                    .mark_failed(id, "source transcription missing or not completed".to_string())
                    .await?;
                return Ok(());
            }
        };

        let template = match row.prompt_template_id {
            Some(template_id) => self
                .templates
                .get(template_id)
                .await
                .map_err(|e| CleanupPipelineError::TemplateStore {
                    message: e.to_string(),
                })?,
            None => None,
        };
        let Some(template) = template else {
            self.cleanups
                .mark_failed(id, "prompt template missing".to_string())
                .await?;
            return Ok(());
        };

        let mut cache = DekCache::new();
        let transcript_ciphertext = match &source.transcribed_text {
            Some(ciphertext) => ciphertext,
            None => {
                self.cleanups
                    .mark_failed(id, "source transcription has no text".to_string())
                    .await?;
                return Ok(());
            }
        };
        let transcript = match self
            .codec
            .decrypt_field(
                &mut cache,
                row.voice_entry_id,
                field_tags::TRANSCRIBED_TEXT,
                transcript_ciphertext,
            )
            .await
        {
            Ok(plaintext) => match String::from_utf8(plaintext) {
                Ok(text) => text,
                Err(_) => {
                    self.cleanups
                        .mark_failed(id, "transcript is not valid UTF-8".to_string())
                        .await?;
                    return Ok(());
                }
            },
            Err(CodecError::Destroyed { .. }) | Err(CodecError::Missing { .. }) => {
                self.cleanups
                    .mark_failed(id, "encryption unavailable: DEK destroyed".to_string())
                    .await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let prompt = match template.render(&transcript) {
            Ok(prompt) => prompt,
            Err(e) => {
                self.cleanups.mark_failed(id, e.to_string()).await?;
                return Ok(());
            }
        };

        let Some(adapter) = self.registry.default_adapter() else {
            self.cleanups
                .mark_failed(id, "no LLM provider configured".to_string())
                .await?;
            return Ok(());
        };

        let request = LlmRequest {
            model: row.model_name.clone(),
            prompt,
            temperature: row.temperature,
            top_p: row.top_p,
        };

        let permit = self.provider_permit(adapter.id()).await;
        let output = match self.call_with_retries(adapter, &request).await {
            Ok(output) => output,
            Err(e) => {
                warn!(provider = adapter.id(), error = %e, "Cleanup failed");
                self.cleanups.mark_failed(id, e.to_string()).await?;
                return Ok(());
            }
        };
        drop(permit);
        debug!(provider_metadata = %output.metadata, "LLM call finished");

        // The raw response is stored verbatim for audit; only the parsed
        // cleaned text is encrypted and persisted as content.
        let parsed = CleanupOutput::parse(&output.text);
        let cleaned_ciphertext = match self
            .codec
            .encrypt_field(
                &mut cache,
                row.voice_entry_id,
                field_tags::CLEANED_TEXT,
                parsed.cleaned_text.as_bytes(),
            )
            .await
        {
            Ok(ciphertext) => ciphertext,
            Err(CodecError::Destroyed { .. }) | Err(CodecError::Missing { .. }) => {
                self.cleanups
                    .mark_failed(id, "encryption unavailable: DEK destroyed".to_string())
                    .await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        self.cleanups
            .mark_completed(id, cleaned_ciphertext, output.text)
            .await?;

        let became_primary = self
            .cleanups
            .try_set_primary(id, row.voice_entry_id)
            .await?;
        info!(
            voice_entry_id = %row.voice_entry_id,
            model = %row.model_name,
            is_primary = became_primary,
            "Cleanup completed"
        );
        Ok(())
    }

    /// Cooperative worker loop over pending cleanup rows.
    pub fn spawn_worker(self: &Arc<Self>) -> tokio::task::JoinHandle<()>
    where
        C: Send + Sync,
        T: Send + Sync,
        TS: Send + Sync,
        D: Send + Sync,
    {
        let pipeline = self.clone();
        tokio::spawn(async move {
            loop {
                match pipeline.cleanups.next_pending().await {
                    Ok(Some(id)) => {
                        if let Err(e) = pipeline.process(id).await {
                            error!(cleanup_id = %id, error = %e, "Pipeline error");
                        }
                    }
                    Ok(None) => tokio::time::sleep(pipeline.config.poll_interval).await,
                    Err(e) => {
                        error!(error = %e, "Failed to poll pending cleanups");
                        tokio::time::sleep(pipeline.config.poll_interval).await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use vv_domain::JobStatus;
    use vv_ports::{
        DekStore, EntryStore, NewCleanedEntry, NewTranscription, NewVoiceEntry, TemplateStore,
    };

    use crate::crypto::{Kek, KekRing};
    use crate::memory::{
        InMemoryCleanupStore, InMemoryDekStore, InMemoryEntryStore, InMemoryTemplateStore,
        InMemoryTranscriptionStore,
    };
    use crate::providers::{LlmAdapter, NoopLlm};
    use crate::retry::RetryPolicy;

    type TestPipeline = CleanupPipeline<
        InMemoryCleanupStore,
        InMemoryTranscriptionStore,
        InMemoryTemplateStore,
        InMemoryDekStore,
    >;

    struct Harness {
        pipeline: Arc<TestPipeline>,
        cleanups: Arc<InMemoryCleanupStore>,
        transcriptions: Arc<InMemoryTranscriptionStore>,
        templates: Arc<InMemoryTemplateStore>,
        deks: Arc<InMemoryDekStore>,
        entry_id: Uuid,
        user_id: Uuid,
        transcription_id: Uuid,
    }

    async fn harness_with_registry(registry: LlmRegistry) -> Harness {
        let kek = Arc::new(KekRing::new(Kek::from_bytes([13u8; 32], "local-v1")));
        let deks = Arc::new(InMemoryDekStore::new(kek));
        let entries = Arc::new(InMemoryEntryStore::new(deks.clone()));
        let transcriptions = Arc::new(InMemoryTranscriptionStore::new());
        let cleanups = Arc::new(InMemoryCleanupStore::new());
        let templates = Arc::new(InMemoryTemplateStore::with_seed_templates());

        let user_id = Uuid::new_v4();
        let created = entries
            .create(NewVoiceEntry {
                id: Uuid::new_v4(),
                user_id,
                audio_handle: "2026/07/journal.mp3".to_string(),
                original_filename: "journal.mp3".to_string(),
                duration_seconds: 4.0,
                encryption_version: "local-v1".to_string(),
            })
            .await
            .unwrap();
        let entry_id = created.entry.id;

        // A completed primary transcription with encrypted text
        let row = transcriptions
            .insert(NewTranscription {
                id: Uuid::new_v4(),
                entry_id,
                provider: "noop".to_string(),
                model_used: "noop".to_string(),
                language_code: "en".to_string(),
                temperature: None,
                beam_size: None,
                enable_diarization: false,
                speaker_count: 1,
            })
            .await
            .unwrap();
        transcriptions.claim(row.id).await.unwrap();
        let dek = deks.load(entry_id).await.unwrap();
        let ciphertext = crate::crypto::encrypt(
            b"um so I had a dream about rivers",
            &dek,
            &vv_domain::associated_data(field_tags::TRANSCRIBED_TEXT, entry_id),
        )
        .unwrap();
        transcriptions
            .mark_completed(row.id, ciphertext, None)
            .await
            .unwrap();
        transcriptions.try_set_primary(row.id, entry_id).await.unwrap();

        let config = PipelineConfig {
            provider_timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(5),
                factor: 2.0,
                jitter: 0.0,
            },
            max_in_flight_per_provider: 4,
            poll_interval: Duration::from_millis(10),
        };

        let pipeline = Arc::new(CleanupPipeline::new(
            cleanups.clone(),
            transcriptions.clone(),
            templates.clone(),
            deks.clone(),
            Arc::new(registry),
            config,
        ));

        Harness {
            pipeline,
            cleanups,
            transcriptions,
            templates,
            deks,
            entry_id,
            user_id,
            transcription_id: row.id,
        }
    }

    async fn harness() -> Harness {
        harness_with_registry(LlmRegistry::new("noop").with_adapter(LlmAdapter::Noop(NoopLlm::new())))
            .await
    }

    async fn enqueue(h: &Harness) -> Uuid {
        let template = h
            .templates
            .active_for_entry_type("journal")
            .await
            .unwrap()
            .unwrap();
        let row = h
            .cleanups
            .insert(NewCleanedEntry {
                id: Uuid::new_v4(),
                voice_entry_id: h.entry_id,
                transcription_id: h.transcription_id,
                user_id: h.user_id,
                model_name: "noop".to_string(),
                temperature: Some(0.7),
                top_p: Some(0.9),
                prompt_template_id: Some(template.id),
            })
            .await
            .unwrap();
        row.id
    }

    #[tokio::test]
    async fn happy_path_persists_encrypted_cleaned_text_and_raw_response() {
        let h = harness().await;
        let id = enqueue(&h).await;

        h.pipeline.process(id).await.unwrap();

        let done = h.cleanups.get(id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.is_primary);

        let raw = done.llm_raw_response.as_ref().unwrap();
        assert!(raw.contains("cleaned_text"));

        let dek = h.deks.load(h.entry_id).await.unwrap();
        let cleaned = crate::crypto::decrypt(
            done.cleaned_text.as_ref().unwrap(),
            &dek,
            &vv_domain::associated_data(field_tags::CLEANED_TEXT, h.entry_id),
        )
        .unwrap();
        assert!(!cleaned.is_empty());
    }

    #[tokio::test]
    async fn second_cleanup_stays_non_primary() {
        let h = harness().await;
        let first = enqueue(&h).await;
        let second = enqueue(&h).await;

        h.pipeline.process(first).await.unwrap();
        h.pipeline.process(second).await.unwrap();

        assert!(h.cleanups.get(first).await.unwrap().unwrap().is_primary);
        assert!(!h.cleanups.get(second).await.unwrap().unwrap().is_primary);
    }

    #[tokio::test]
    async fn missing_template_fails_the_row() {
        let h = harness().await;
        let row = h
            .cleanups
            .insert(NewCleanedEntry {
                id: Uuid::new_v4(),
                voice_entry_id: h.entry_id,
                transcription_id: h.transcription_id,
                user_id: h.user_id,
                model_name: "noop".to_string(),
                temperature: None,
                top_p: None,
                prompt_template_id: Some(424242),
            })
            .await
            .unwrap();

        h.pipeline.process(row.id).await.unwrap();

        let failed = h.cleanups.get(row.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed
            .error_message
            .as_ref()
            .unwrap()
            .contains("template missing"));
    }

    #[tokio::test]
    async fn incomplete_source_transcription_fails_the_row() {
        let h = harness().await;
        // A pending transcription cannot feed cleanup
        let pending = h
            .transcriptions
            .insert(NewTranscription {
                id: Uuid::new_v4(),
                entry_id: h.entry_id,
                provider: "noop".to_string(),
                model_used: "noop".to_string(),
                language_code: "en".to_string(),
                temperature: None,
                beam_size: None,
                enable_diarization: false,
                speaker_count: 1,
            })
            .await
            .unwrap();

        let row = h
            .cleanups
            .insert(NewCleanedEntry {
                id: Uuid::new_v4(),
                voice_entry_id: h.entry_id,
                transcription_id: pending.id,
                user_id: h.user_id,
                model_name: "noop".to_string(),
                temperature: None,
                top_p: None,
                prompt_template_id: Some(2),
            })
            .await
            .unwrap();

        h.pipeline.process(row.id).await.unwrap();

        let failed = h.cleanups.get(row.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn destroyed_dek_fails_cleanup() {
        let h = harness().await;
        let id = enqueue(&h).await;

        h.deks.destroy(h.user_id, h.entry_id, None).await.unwrap();
        h.pipeline.process(id).await.unwrap();

        let failed = h.cleanups.get(id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed
            .error_message
            .as_ref()
            .unwrap()
            .contains("encryption unavailable"));
    }

    #[tokio::test]
    async fn unstructured_llm_response_falls_back_to_whole_text() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "llama3.1:8b",
                "response": "Just a plain prose answer with no JSON."
            })))
            .mount(&server)
            .await;

        let ollama = crate::providers::OllamaLlm::new(crate::providers::OllamaConfig {
            base_url: server.uri(),
            timeout_secs: 5,
        })
        .unwrap();
        let h = harness_with_registry(
            LlmRegistry::new("ollama").with_adapter(LlmAdapter::Ollama(ollama)),
        )
        .await;

        let template = h
            .templates
            .active_for_entry_type("journal")
            .await
            .unwrap()
            .unwrap();
        let row = h
            .cleanups
            .insert(NewCleanedEntry {
                id: Uuid::new_v4(),
                voice_entry_id: h.entry_id,
                transcription_id: h.transcription_id,
                user_id: h.user_id,
                model_name: "llama3.1:8b".to_string(),
                temperature: None,
                top_p: None,
                prompt_template_id: Some(template.id),
            })
            .await
            .unwrap();

        h.pipeline.process(row.id).await.unwrap();

        let done = h.cleanups.get(row.id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(
            done.llm_raw_response.as_deref(),
            Some("Just a plain prose answer with no JSON.")
        );

        let dek = h.deks.load(h.entry_id).await.unwrap();
        let cleaned = crate::crypto::decrypt(
            done.cleaned_text.as_ref().unwrap(),
            &dek,
            &vv_domain::associated_data(field_tags::CLEANED_TEXT, h.entry_id),
        )
        .unwrap();
        assert_eq!(cleaned, b"Just a plain prose answer with no JSON.");
    }
}
