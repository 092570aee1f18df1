//! VoxVault Adapter Implementations
//!
//! This crate provides adapter implementations for the ports defined in
//! vv-ports, plus the pipeline workers that drive them:
//! - AEAD envelope engine (DEK generation, KEK wrap, ciphertext framing)
//! - PostgreSQL stores (entries, DEKs, transcriptions, cleanups, templates)
//! - In-memory stores for tests
//! - Transcription/LLM provider adapters and registries
//! - Transcription and cleanup pipeline workers
//! - Entry lifecycle and erasure coordinators
//! - Local filesystem audio store

pub mod audio_store;
pub mod cleanup_pipeline;
pub mod cleanup_store;
pub mod config;
pub mod crypto;
pub mod dek_store;
pub mod entry_store;
pub mod erasure;
pub mod field_codec;
pub mod lifecycle;
pub mod memory;
pub mod providers;
pub mod retry;
pub mod template_store;
pub mod transcription_pipeline;
pub mod transcription_store;

pub use audio_store::{estimate_mp3_duration, LocalAudioStore, SavedAudio};
pub use cleanup_pipeline::{CleanupPipeline, CleanupPipelineError};
pub use cleanup_store::PostgresCleanupStore;
pub use config::{PipelineConfig, StorageConfig};
pub use crypto::{CryptoError, Kek, KekRing};
pub use dek_store::PostgresDekStore;
pub use entry_store::{PostgresEntryStore, PostgresPreferencesStore};
pub use erasure::{ErasureCoordinator, ErasureError};
pub use field_codec::{CodecError, DekCache, FieldCodec};
pub use lifecycle::{CreateEntryRequest, EntryLifecycle, LifecycleError};
pub use providers::{
    LlmAdapter, LlmRegistry, ProviderDescriptor, ProviderError, TranscriptionAdapter,
    TranscriptionRegistry,
};
pub use retry::RetryPolicy;
pub use template_store::PostgresTemplateStore;
pub use transcription_pipeline::{TranscriptionPipeline, TranscriptionPipelineError};
pub use transcription_store::PostgresTranscriptionStore;
