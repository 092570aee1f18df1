//! Local Whisper adapter
//!
//! Talks to a local faster-whisper server over its OpenAI-compatible HTTP
//! surface. `response_format=verbose_json` yields segments for diarization.

use serde::Deserialize;
use tracing::{debug, instrument};

use vv_domain::{transcription_parameter_schema, TranscriptSegment};

use super::{
    ModelDescriptor, ProviderDescriptor, ProviderError, TranscriptionOutput, TranscriptionRequest,
};

#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// Base URL of the local server
    pub base_url: String,
    /// HTTP client timeout in seconds (the pipeline enforces its own bound)
    pub timeout_secs: u64,
}

impl WhisperConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("VV_WHISPER_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:9090".to_string()),
            timeout_secs: 180,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    text: String,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
    #[serde(default)]
    speaker: Option<String>,
}

pub struct WhisperTranscriber {
    config: WhisperConfig,
    client: reqwest::Client,
    descriptor: ProviderDescriptor,
}

impl WhisperTranscriber {
    pub fn new(config: WhisperConfig) -> Result<Self, ProviderError> {
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
                id: "whisper".to_string(),
                name: "Local Whisper".to_string(),
                models: vec![
                    ModelDescriptor::new("large-v3", "Whisper large-v3"),
                    ModelDescriptor::new("medium", "Whisper medium"),
                    ModelDescriptor::new("small", "Whisper small"),
                    ModelDescriptor::new("base", "Whisper base"),
                    ModelDescriptor::new("tiny", "Whisper tiny"),
                ],
                parameters: transcription_parameter_schema(),
            },
        })
    }

    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    #[instrument(skip(self, request), fields(model = %request.model, language = %request.language))]
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
            .text("response_format", "verbose_json");

        if request.language != "auto" {
            form = form.text("language", request.language.clone());
        }
        if let Some(temperature) = request.temperature {
            form = form.text("temperature", temperature.to_string());
        }
        if let Some(beam_size) = request.beam_size {
            form = form.text("beam_size", beam_size.to_string());
        }
        if request.enable_diarization {
            form = form
                .text("diarize", "true")
                .text("num_speakers", request.speaker_count.to_string());
        }

        let response = self
            .client
            .post(format!("{}/v1/audio/transcriptions", self.config.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }

        let body: WhisperResponse = response.json().await.map_err(|e| ProviderError::Permanent {
            message: format!("unparseable whisper response: {e}"),
        })?;

        debug!(segments = body.segments.len(), "Whisper transcription received");

        let segments = (!body.segments.is_empty()).then(|| {
            body.segments
                .into_iter()
                .map(|s| TranscriptSegment {
                    start: s.start,
                    end: s.end,
                    speaker: s.speaker,
                    text: s.text.trim().to_string(),
                })
                .collect()
        });

        Ok(TranscriptionOutput {
            text: body.text.trim().to_string(),
            segments,
            model: request.model.clone(),
            metadata: serde_json::json!({
                "provider": "whisper",
                "detected_language": body.language,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> TranscriptionRequest {
        TranscriptionRequest {
            audio: vec![1u8; 128],
            filename: "dream.mp3".to_string(),
            model: "large-v3".to_string(),
            language: "en".to_string(),
            temperature: Some(0.0),
            beam_size: Some(5),
            enable_diarization: false,
            speaker_count: 1,
        }
    }

    #[tokio::test]
    async fn parses_verbose_json_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "text": " I dreamt of rivers. ",
                "language": "en",
                "segments": [
                    {"start": 0.0, "end": 2.5, "text": " I dreamt of rivers. "}
                ]
            })))
            .mount(&server)
            .await;

        let adapter = WhisperTranscriber::new(WhisperConfig {
            base_url: server.uri(),
            timeout_secs: 5,
        })
        .unwrap();

        let out = adapter.execute(&request()).await.unwrap();
        assert_eq!(out.text, "I dreamt of rivers.");
        assert_eq!(out.segments.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let adapter = WhisperTranscriber::new(WhisperConfig {
            base_url: server.uri(),
            timeout_secs: 5,
        })
        .unwrap();

        let err = adapter.execute(&request()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn client_errors_are_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad audio"))
            .mount(&server)
            .await;

        let adapter = WhisperTranscriber::new(WhisperConfig {
            base_url: server.uri(),
            timeout_secs: 5,
        })
        .unwrap();

        let err = adapter.execute(&request()).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
