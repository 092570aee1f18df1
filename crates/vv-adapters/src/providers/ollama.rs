//! Local Ollama adapter
//!
//! Non-streaming `/api/generate` calls against a local Ollama daemon.

use serde::Deserialize;
use tracing::instrument;

use vv_domain::llm_parameter_schema;

use super::{LlmOutput, LlmRequest, ModelDescriptor, ProviderDescriptor, ProviderError};

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl OllamaConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("VV_OLLAMA_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    eval_count: Option<u64>,
    #[serde(default)]
    total_duration: Option<u64>,
}

pub struct OllamaLlm {
    config: OllamaConfig,
    client: reqwest::Client,
    descriptor: ProviderDescriptor,
}

impl OllamaLlm {
    pub fn new(config: OllamaConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Permanent {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            config,
            client,
            descriptor: ProviderDescriptor {
                id: "ollama".to_string(),
                name: "Ollama (local)".to_string(),
                models: vec![
                    ModelDescriptor::new("llama3.1:8b", "Llama 3.1 8B"),
                    ModelDescriptor::new("qwen2.5:7b", "Qwen 2.5 7B"),
                    ModelDescriptor::new("mistral:7b", "Mistral 7B"),
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
        let mut options = serde_json::Map::new();
        if let Some(temperature) = request.temperature {
            options.insert("temperature".to_string(), serde_json::json!(temperature));
        }
        if let Some(top_p) = request.top_p {
            options.insert("top_p".to_string(), serde_json::json!(top_p));
        }

        let body = serde_json::json!({
            "model": request.model,
            "prompt": request.prompt,
            "stream": false,
            "options": options,
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.config.base_url))
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }

        let body: GenerateResponse = response.json().await.map_err(|e| ProviderError::Permanent {
            message: format!("unparseable ollama response: {e}"),
        })?;

        Ok(LlmOutput {
            text: body.response,
            model: body.model.unwrap_or_else(|| request.model.clone()),
            metadata: serde_json::json!({
                "provider": "ollama",
                "eval_count": body.eval_count,
                "total_duration": body.total_duration,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn generates_without_streaming() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({ "stream": false })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "llama3.1:8b",
                "response": "{\"cleaned_text\": \"Done.\"}",
                "eval_count": 12
            })))
            .mount(&server)
            .await;

        let adapter = OllamaLlm::new(OllamaConfig {
            base_url: server.uri(),
            timeout_secs: 5,
        })
        .unwrap();

        let out = adapter
            .execute(&LlmRequest {
                model: "llama3.1:8b".to_string(),
                prompt: "Clean this".to_string(),
                temperature: Some(0.7),
                top_p: None,
            })
            .await
            .unwrap();

        assert!(out.text.contains("Done."));
        assert_eq!(out.model, "llama3.1:8b");
    }

    #[tokio::test]
    async fn daemon_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model loading"))
            .mount(&server)
            .await;

        let adapter = OllamaLlm::new(OllamaConfig {
            base_url: server.uri(),
            timeout_secs: 5,
        })
        .unwrap();

        let err = adapter
            .execute(&LlmRequest {
                model: "llama3.1:8b".to_string(),
                prompt: "x".to_string(),
                temperature: None,
                top_p: None,
            })
            .await
            .unwrap_err();

        assert!(err.is_transient());
    }
}
