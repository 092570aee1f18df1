//! Application state wiring
//!
//! Builds the adapter graph once at startup: Postgres stores over a shared
//! pool, the provider registries from configuration, and the two pipeline
//! workers. The pool connects lazily so the service can come up (and report
//! a degraded health status) while the database is still starting.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

use vv_adapters::providers::{
    AssemblyAiConfig, AssemblyAiTranscriber, GroqConfig, GroqLlm, GroqTranscriber, NoopLlm,
    NoopTranscriber, OllamaConfig, OllamaLlm, SloveneAsrConfig, SloveneAsrTranscriber,
    WhisperConfig, WhisperTranscriber,
};
use vv_adapters::{
    CleanupPipeline, EntryLifecycle, ErasureCoordinator, FieldCodec, Kek, KekRing, LlmAdapter,
    LlmRegistry, LocalAudioStore, PipelineConfig, PostgresCleanupStore, PostgresDekStore,
    PostgresEntryStore, PostgresPreferencesStore, PostgresTemplateStore,
    PostgresTranscriptionStore, TranscriptionAdapter, TranscriptionRegistry, TranscriptionPipeline,
};

use crate::config::ApiConfig;

pub type Lifecycle =
    EntryLifecycle<PostgresEntryStore, PostgresTranscriptionStore, PostgresPreferencesStore>;
pub type Erasure = ErasureCoordinator<PostgresEntryStore, PostgresDekStore>;
pub type TranscriptionWorker = TranscriptionPipeline<
    PostgresTranscriptionStore,
    PostgresEntryStore,
    PostgresDekStore,
    LocalAudioStore,
>;
pub type CleanupWorker = CleanupPipeline<
    PostgresCleanupStore,
    PostgresTranscriptionStore,
    PostgresTemplateStore,
    PostgresDekStore,
>;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    pub pool: PgPool,
    pub kek_ring: Arc<KekRing>,
    pub entries: Arc<PostgresEntryStore>,
    pub deks: Arc<PostgresDekStore>,
    pub transcriptions: Arc<PostgresTranscriptionStore>,
    pub cleanups: Arc<PostgresCleanupStore>,
    pub templates: Arc<PostgresTemplateStore>,
    pub preferences: Arc<PostgresPreferencesStore>,
    pub audio: Arc<LocalAudioStore>,
    pub codec: Arc<FieldCodec<PostgresDekStore>>,
    pub transcription_registry: Arc<TranscriptionRegistry>,
    pub llm_registry: Arc<LlmRegistry>,
    pub transcription_pipeline: Arc<TranscriptionWorker>,
    pub cleanup_pipeline: Arc<CleanupWorker>,
    pub lifecycle: Arc<Lifecycle>,
    pub erasure: Arc<Erasure>,
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl AppState {
    pub fn build(config: ApiConfig) -> Result<Self, StateError> {
        let mut ring = KekRing::new(
            Kek::from_base64(&config.master_kek_base64, &config.encryption_version).map_err(
                |e| StateError::Config {
                    message: e.to_string(),
                },
            )?,
        );
        for (version, encoded) in &config.extra_keks {
            ring = ring.with_kek(Kek::from_base64(encoded, version).map_err(|e| {
                StateError::Config {
                    message: format!("KEK '{version}': {e}"),
                }
            })?);
        }
        let kek_ring = Arc::new(ring);

        let pool = PgPoolOptions::new()
            .max_connections(config.storage.max_connections)
            .connect_lazy(&config.storage.database_url)
            .map_err(|e| StateError::Config {
                message: format!("invalid database URL: {e}"),
            })?;

        let schema = config.storage.schema.as_str();
        let deks = Arc::new(PostgresDekStore::new(pool.clone(), schema, kek_ring.clone()));
        let entries = Arc::new(PostgresEntryStore::new(pool.clone(), schema, deks.clone()));
        let transcriptions = Arc::new(PostgresTranscriptionStore::new(pool.clone(), schema));
        let cleanups = Arc::new(PostgresCleanupStore::new(pool.clone(), schema));
        let templates = Arc::new(PostgresTemplateStore::new(pool.clone(), schema));
        let preferences = Arc::new(PostgresPreferencesStore::new(pool.clone(), schema));
        let audio = Arc::new(LocalAudioStore::new(config.upload_dir.clone()));

        let transcription_registry = Arc::new(build_transcription_registry(&config));
        let llm_registry = Arc::new(build_llm_registry(&config));

        let transcription_pipeline = Arc::new(TranscriptionPipeline::new(
            transcriptions.clone(),
            entries.clone(),
            deks.clone(),
            transcription_registry.clone(),
            audio.clone(),
            PipelineConfig::transcription()
                .with_timeout(Duration::from_secs(config.transcription_timeout_secs)),
        ));
        let cleanup_pipeline = Arc::new(CleanupPipeline::new(
            cleanups.clone(),
            transcriptions.clone(),
            templates.clone(),
            deks.clone(),
            llm_registry.clone(),
            PipelineConfig::cleanup().with_timeout(Duration::from_secs(config.llm_timeout_secs)),
        ));

        let lifecycle = Arc::new(EntryLifecycle::new(
            entries.clone(),
            transcriptions.clone(),
            preferences.clone(),
            transcription_registry.clone(),
            &config.encryption_version,
        ));
        let erasure = Arc::new(ErasureCoordinator::new(entries.clone(), deks.clone()));
        let codec = Arc::new(FieldCodec::new(deks.clone()));

        info!(
            transcription_providers = ?transcription_registry.provider_ids(),
            default_transcription = transcription_registry.default_provider(),
            default_llm = llm_registry.default_provider(),
            schema = schema,
            "Application state built"
        );

        Ok(Self {
            config: Arc::new(config),
            pool,
            kek_ring,
            entries,
            deks,
            transcriptions,
            cleanups,
            templates,
            preferences,
            audio,
            codec,
            transcription_registry,
            llm_registry,
            transcription_pipeline,
            cleanup_pipeline,
            lifecycle,
            erasure,
        })
    }

    /// Start the cooperative pipeline workers. The handles run for the
    /// process lifetime.
    pub fn spawn_workers(&self) {
        let _transcription = self.transcription_pipeline.spawn_worker();
        let _cleanup = self.cleanup_pipeline.spawn_worker();
    }
}

fn build_transcription_registry(config: &ApiConfig) -> TranscriptionRegistry {
    let mut registry = TranscriptionRegistry::new(&config.default_transcription_provider)
        .with_adapter(TranscriptionAdapter::Noop(NoopTranscriber::new()));

    match WhisperTranscriber::new(WhisperConfig::from_env()) {
        Ok(adapter) => registry = registry.with_adapter(TranscriptionAdapter::Whisper(adapter)),
        Err(e) => warn!(error = %e, "Whisper adapter unavailable"),
    }
    match SloveneAsrTranscriber::new(SloveneAsrConfig::from_env()) {
        Ok(adapter) => registry = registry.with_adapter(TranscriptionAdapter::SloveneAsr(adapter)),
        Err(e) => warn!(error = %e, "Slovene ASR adapter unavailable"),
    }
    if let Some(groq_config) = GroqConfig::from_env() {
        match GroqTranscriber::new(groq_config) {
            Ok(adapter) => registry = registry.with_adapter(TranscriptionAdapter::Groq(adapter)),
            Err(e) => warn!(error = %e, "Groq transcription adapter unavailable"),
        }
    }
    if let Some(assemblyai_config) = AssemblyAiConfig::from_env() {
        match AssemblyAiTranscriber::new(assemblyai_config) {
            Ok(adapter) => {
                registry = registry.with_adapter(TranscriptionAdapter::AssemblyAi(adapter))
            }
            Err(e) => warn!(error = %e, "AssemblyAI adapter unavailable"),
        }
    }

    registry
}

fn build_llm_registry(config: &ApiConfig) -> LlmRegistry {
    let mut registry = LlmRegistry::new(&config.default_llm_provider)
        .with_adapter(LlmAdapter::Noop(NoopLlm::new()));

    match OllamaLlm::new(OllamaConfig::from_env()) {
        Ok(adapter) => registry = registry.with_adapter(LlmAdapter::Ollama(adapter)),
        Err(e) => warn!(error = %e, "Ollama adapter unavailable"),
    }
    if let Some(groq_config) = GroqConfig::from_env() {
        match GroqLlm::new(groq_config) {
            Ok(adapter) => registry = registry.with_adapter(LlmAdapter::Groq(adapter)),
            Err(e) => warn!(error = %e, "Groq LLM adapter unavailable"),
        }
    }

    registry
}
