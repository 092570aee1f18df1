//! Transcription and LLM provider adapters
//!
//! Each backend is an adapter carrying a [`ProviderDescriptor`]: its id,
//! human name, model list, and parameter schema. Dispatch goes through the
//! tagged enums [`TranscriptionAdapter`] and [`LlmAdapter`]; a registry maps
//! provider ids to adapters. Adding a provider means adding a descriptor and
//! an adapter variant; the pipelines do not change.

pub mod assemblyai;
pub mod groq;
pub mod noop;
pub mod ollama;
pub mod slovene;
pub mod whisper;

use serde::Serialize;

use vv_domain::{ParameterSchema, TranscriptSegment};

pub use assemblyai::{AssemblyAiConfig, AssemblyAiTranscriber};
pub use groq::{GroqConfig, GroqLlm, GroqTranscriber};
pub use noop::{NoopLlm, NoopTranscriber};
pub use ollama::{OllamaConfig, OllamaLlm};
pub use slovene::{SloveneAsrConfig, SloveneAsrTranscriber};
pub use whisper::{WhisperConfig, WhisperTranscriber};

// ============================================================================
// Descriptors
// ============================================================================

/// One model offered by a provider.
#[derive(Debug, Clone, Serialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
}

impl ModelDescriptor {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
        }
    }
}

/// Declarative description of a backend: what it is, which models it serves,
/// and which parameters it accepts.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderDescriptor {
    pub id: String,
    pub name: String,
    pub models: Vec<ModelDescriptor>,
    pub parameters: ParameterSchema,
}

impl ProviderDescriptor {
    pub fn default_model(&self) -> Option<&ModelDescriptor> {
        self.models.first()
    }

    pub fn has_model(&self, model_id: &str) -> bool {
        self.models.iter().any(|m| m.id == model_id)
    }
}

// ============================================================================
// Requests & responses
// ============================================================================

/// A validated transcription request handed to an adapter.
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    pub audio: Vec<u8>,
    pub filename: String,
    pub model: String,
    pub language: String,
    pub temperature: Option<f64>,
    pub beam_size: Option<i32>,
    pub enable_diarization: bool,
    pub speaker_count: i32,
}

/// Plaintext transcription result before encryption.
#[derive(Debug, Clone)]
pub struct TranscriptionOutput {
    pub text: String,
    pub segments: Option<Vec<TranscriptSegment>>,
    /// Model echo from the provider
    pub model: String,
    /// Provider-specific opaque metadata, recorded alongside the row
    pub metadata: serde_json::Value,
}

/// A validated LLM request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
}

/// Raw LLM result.
#[derive(Debug, Clone)]
pub struct LlmOutput {
    pub text: String,
    pub model: String,
    pub metadata: serde_json::Value,
}

// ============================================================================
// Errors
// ============================================================================

/// Provider failures, classified for the retry policy.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Network problems, 5xx responses: retried with backoff.
    #[error("Transient provider failure: {message}")]
    Transient { message: String },

    /// Auth, invalid audio, quota: recorded on the row, never retried.
    #[error("Permanent provider failure: {message}")]
    Permanent { message: String },

    /// Call exceeded its upper bound.
    #[error("Provider call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// 429 from the provider; retried, and surfaced as 429 once the budget
    /// is exhausted.
    #[error("Provider rate limited: {message}")]
    RateLimited { message: String },
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Transient { .. }
                | ProviderError::Timeout { .. }
                | ProviderError::RateLimited { .. }
        )
    }

    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            ProviderError::Transient {
                message: e.to_string(),
            }
        } else {
            ProviderError::Permanent {
                message: e.to_string(),
            }
        }
    }

    /// Classify a non-success HTTP response.
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = format!("{status}: {}", body.chars().take(200).collect::<String>());

        if status.as_u16() == 429 {
            ProviderError::RateLimited { message }
        } else if status.is_server_error() {
            ProviderError::Transient { message }
        } else {
            ProviderError::Permanent { message }
        }
    }
}

// ============================================================================
// Tagged adapter variants
// ============================================================================

/// Transcription backend variants.
pub enum TranscriptionAdapter {
    Whisper(WhisperTranscriber),
    Groq(GroqTranscriber),
    AssemblyAi(AssemblyAiTranscriber),
    SloveneAsr(SloveneAsrTranscriber),
    Noop(NoopTranscriber),
}

impl TranscriptionAdapter {
    pub fn descriptor(&self) -> &ProviderDescriptor {
        match self {
            TranscriptionAdapter::Whisper(a) => a.descriptor(),
            TranscriptionAdapter::Groq(a) => a.descriptor(),
            TranscriptionAdapter::AssemblyAi(a) => a.descriptor(),
            TranscriptionAdapter::SloveneAsr(a) => a.descriptor(),
            TranscriptionAdapter::Noop(a) => a.descriptor(),
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor().id
    }

    pub async fn execute(
        &self,
        request: &TranscriptionRequest,
    ) -> Result<TranscriptionOutput, ProviderError> {
        match self {
            TranscriptionAdapter::Whisper(a) => a.execute(request).await,
            TranscriptionAdapter::Groq(a) => a.execute(request).await,
            TranscriptionAdapter::AssemblyAi(a) => a.execute(request).await,
            TranscriptionAdapter::SloveneAsr(a) => a.execute(request).await,
            TranscriptionAdapter::Noop(a) => a.execute(request).await,
        }
    }
}

/// LLM backend variants.
pub enum LlmAdapter {
    Ollama(OllamaLlm),
    Groq(GroqLlm),
    Noop(NoopLlm),
}

impl LlmAdapter {
    pub fn descriptor(&self) -> &ProviderDescriptor {
        match self {
            LlmAdapter::Ollama(a) => a.descriptor(),
            LlmAdapter::Groq(a) => a.descriptor(),
            LlmAdapter::Noop(a) => a.descriptor(),
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor().id
    }

    pub async fn execute(&self, request: &LlmRequest) -> Result<LlmOutput, ProviderError> {
        match self {
            LlmAdapter::Ollama(a) => a.execute(request).await,
            LlmAdapter::Groq(a) => a.execute(request).await,
            LlmAdapter::Noop(a) => a.execute(request).await,
        }
    }
}

// ============================================================================
// Registries
// ============================================================================

/// Registry of transcription backends.
pub struct TranscriptionRegistry {
    adapters: Vec<TranscriptionAdapter>,
    default_provider: String,
}

impl TranscriptionRegistry {
    pub fn new(default_provider: &str) -> Self {
        Self {
            adapters: Vec::new(),
            default_provider: default_provider.to_string(),
        }
    }

    pub fn with_adapter(mut self, adapter: TranscriptionAdapter) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn get(&self, provider_id: &str) -> Option<&TranscriptionAdapter> {
        self.adapters.iter().find(|a| a.id() == provider_id)
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    pub fn default_adapter(&self) -> Option<&TranscriptionAdapter> {
        self.get(&self.default_provider)
    }

    pub fn list_available(&self) -> Vec<&ProviderDescriptor> {
        self.adapters.iter().map(|a| a.descriptor()).collect()
    }

    pub fn provider_ids(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.id()).collect()
    }
}

/// Registry of LLM backends.
pub struct LlmRegistry {
    adapters: Vec<LlmAdapter>,
    default_provider: String,
}

impl LlmRegistry {
    pub fn new(default_provider: &str) -> Self {
        Self {
            adapters: Vec::new(),
            default_provider: default_provider.to_string(),
        }
    }

    pub fn with_adapter(mut self, adapter: LlmAdapter) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn get(&self, provider_id: &str) -> Option<&LlmAdapter> {
        self.adapters.iter().find(|a| a.id() == provider_id)
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    pub fn default_adapter(&self) -> Option<&LlmAdapter> {
        self.get(&self.default_provider)
    }

    pub fn list_available(&self) -> Vec<&ProviderDescriptor> {
        self.adapters.iter().map(|a| a.descriptor()).collect()
    }
}
