//! Groq adapters
//!
//! Groq serves both sides of the house through its OpenAI-compatible API:
//! hosted Whisper models for transcription and chat models for cleanup.

use serde::Deserialize;
use tracing::instrument;

use vv_domain::{llm_parameter_schema, transcription_parameter_schema};

use super::{
    LlmOutput, LlmRequest, ModelDescriptor, ProviderDescriptor, ProviderError,
    TranscriptionOutput, TranscriptionRequest,
};

#[derive(Debug, Clone)]
pub struct GroqConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl GroqConfig {
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("VV_GROQ_API_KEY").ok()?;
        Some(Self {
            api_key,
            base_url: std::env::var("VV_GROQ_BASE_URL")
                .unwrap_or_else(|_| "https://api.groq.com/openai/v1".to_string()),
            timeout_secs: 120,
        })
    }
}

fn build_client(timeout_secs: u64) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ProviderError::Permanent {
            message: format!("failed to build HTTP client: {e}"),
        })
}

// ============================================================================
// Transcription
// ============================================================================

#[derive(Debug, Deserialize)]
struct GroqTranscriptionResponse {
    text: String,
}

pub struct GroqTranscriber {
    config: GroqConfig,
    client: reqwest::Client,
    descriptor: ProviderDescriptor,
}

impl GroqTranscriber {
    pub fn new(config: GroqConfig) -> Result<Self, ProviderError> {
        let client = build_client(config.timeout_secs)?;
        Ok(Self {
            config,
            client,
            descriptor: ProviderDescriptor {
                id: "groq".to_string(),
                name: "Groq".to_string(),
                models: vec![
                    ModelDescriptor::new("whisper-large-v3", "Whisper large-v3 (hosted)"),
                    ModelDescriptor::new("whisper-large-v3-turbo", "Whisper large-v3 turbo"),
                    ModelDescriptor::new("distil-whisper-large-v3-en", "Distil-Whisper (English)"),
                ],
                parameters: transcription_parameter_schema(),
            },
        })
    }

    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    pub async fn execute(
        &self,
        request: &TranscriptionRequest,
    ) -> Result<TranscriptionOutput, ProviderError> {
        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(request.audio.clone())
                    .file_name(request.filename.clone()),
            )
            .text("model", request.model.clone())
            .text("response_format", "json");

        if request.language != "auto" {
            form = form.text("language", request.language.clone());
        }
        if let Some(temperature) = request.temperature {
            form = form.text("temperature", temperature.to_string());
        }

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }

        let body: GroqTranscriptionResponse =
            response.json().await.map_err(|e| ProviderError::Permanent {
                message: format!("unparseable groq response: {e}"),
            })?;

        Ok(TranscriptionOutput {
            text: body.text.trim().to_string(),
            // Groq's transcription endpoint does not diarize
            segments: None,
            model: request.model.clone(),
            metadata: serde_json::json!({ "provider": "groq" }),
        })
    }
}

// ============================================================================
// LLM
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

pub struct GroqLlm {
    config: GroqConfig,
    client: reqwest::Client,
    descriptor: ProviderDescriptor,
}

impl GroqLlm {
    pub fn new(config: GroqConfig) -> Result<Self, ProviderError> {
        let client = build_client(config.timeout_secs)?;
        Ok(Self {
            config,
            client,
            descriptor: ProviderDescriptor {
                id: "groq".to_string(),
                name: "Groq".to_string(),
                models: vec![
                    ModelDescriptor::new("llama-3.3-70b-versatile", "Llama 3.3 70B"),
                    ModelDescriptor::new("llama-3.1-8b-instant", "Llama 3.1 8B"),
                ],
                parameters: llm_parameter_schema(),
            },
        })
    }

    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    pub async fn execute(&self, request: &LlmRequest) -> Result<LlmOutput, ProviderError> {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": [{ "role": "user", "content": request.prompt }],
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }

        let completion: ChatCompletionResponse =
            response.json().await.map_err(|e| ProviderError::Permanent {
                message: format!("unparseable groq completion: {e}"),
            })?;

        let text = completion
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| ProviderError::Permanent {
                message: "groq completion had no choices".to_string(),
            })?;

        Ok(LlmOutput {
            text,
            model: completion.model.unwrap_or_else(|| request.model.clone()),
            metadata: serde_json::json!({
                "provider": "groq",
                "usage": completion.usage,
            }),
        })
    }
}
