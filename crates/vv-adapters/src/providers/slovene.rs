//! Local Slovene ASR adapter
//!
//! A NeMo conformer service fine-tuned for Slovene, exposed over a small
//! local HTTP surface. Only `sl` audio; language is fixed regardless of the
//! requested code.

use serde::Deserialize;
use tracing::instrument;

use vv_domain::transcription_parameter_schema;

use super::{
    ModelDescriptor, ProviderDescriptor, ProviderError, TranscriptionOutput, TranscriptionRequest,
};

#[derive(Debug, Clone)]
pub struct SloveneAsrConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl SloveneAsrConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("VV_SLOVENE_ASR_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8800".to_string()),
            timeout_secs: 180,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SloveneAsrResponse {
    text: String,
}

pub struct SloveneAsrTranscriber {
    config: SloveneAsrConfig,
    client: reqwest::Client,
    descriptor: ProviderDescriptor,
}

impl SloveneAsrTranscriber {
    pub fn new(config: SloveneAsrConfig) -> Result<Self, ProviderError> {
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
                id: "clarinsi_slovene_asr".to_string(),
                name: "Slovene ASR (local)".to_string(),
                models: vec![ModelDescriptor::new(
                    "nemo-conformer-sl",
                    "NeMo Conformer (Slovene)",
                )],
                parameters: transcription_parameter_schema(),
            },
        })
    }

    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    #[instrument(skip(self, request))]
    pub async fn execute(
        &self,
        request: &TranscriptionRequest,
    ) -> Result<TranscriptionOutput, ProviderError> {
        let form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(request.audio.clone())
                .file_name(request.filename.clone()),
        );

        let response = self
            .client
            .post(format!("{}/api/transcribe", self.config.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }

        let body: SloveneAsrResponse =
            response.json().await.map_err(|e| ProviderError::Permanent {
                message: format!("unparseable slovene-asr response: {e}"),
            })?;

        Ok(TranscriptionOutput {
            text: body.text.trim().to_string(),
            segments: None,
            model: request.model.clone(),
            metadata: serde_json::json!({ "provider": "clarinsi_slovene_asr", "language": "sl" }),
        })
    }
}
