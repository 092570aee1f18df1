//! AssemblyAI adapter
//!
//! Three-step flow: upload the audio bytes, create a transcript job, poll
//! until it settles. The poll loop is bounded here by attempt count; the
//! pipeline's call timeout is the hard bound.

use serde::Deserialize;
use tracing::{debug, instrument};

use vv_domain::{transcription_parameter_schema, TranscriptSegment};

use super::{
    ModelDescriptor, ProviderDescriptor, ProviderError, TranscriptionOutput, TranscriptionRequest,
};

#[derive(Debug, Clone)]
pub struct AssemblyAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    /// Seconds between status polls
    pub poll_interval_secs: u64,
    /// Maximum status polls before giving up
    pub max_polls: u32,
}

impl AssemblyAiConfig {
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("VV_ASSEMBLYAI_API_KEY").ok()?;
        Some(Self {
            api_key,
            base_url: std::env::var("VV_ASSEMBLYAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.assemblyai.com".to_string()),
            timeout_secs: 30,
            poll_interval_secs: 3,
            max_polls: 40,
        })
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    id: String,
    status: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    utterances: Option<Vec<Utterance>>,
    #[serde(default)]
    language_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Utterance {
    start: u64,
    end: u64,
    text: String,
    #[serde(default)]
    speaker: Option<String>,
}

pub struct AssemblyAiTranscriber {
    config: AssemblyAiConfig,
    client: reqwest::Client,
    descriptor: ProviderDescriptor,
}

impl AssemblyAiTranscriber {
    pub fn new(config: AssemblyAiConfig) -> Result<Self, ProviderError> {
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
                id: "assemblyai".to_string(),
                name: "AssemblyAI".to_string(),
                models: vec![
                    ModelDescriptor::new("best", "Best (highest accuracy)"),
                    ModelDescriptor::new("nano", "Nano (fastest)"),
                ],
                parameters: transcription_parameter_schema(),
            },
        })
    }

    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn upload(&self, audio: &[u8]) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(format!("{}/v2/upload", self.config.base_url))
            .header("authorization", &self.config.api_key)
            .body(audio.to_vec())
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }

        let body: UploadResponse = response.json().await.map_err(|e| ProviderError::Permanent {
            message: format!("unparseable upload response: {e}"),
        })?;
        Ok(body.upload_url)
    }

    async fn create_transcript(
        &self,
        upload_url: &str,
        request: &TranscriptionRequest,
    ) -> Result<String, ProviderError> {
        let mut body = serde_json::json!({
            "audio_url": upload_url,
            "speech_model": request.model,
            "speaker_labels": request.enable_diarization,
        });
        if request.language != "auto" {
            body["language_code"] = serde_json::json!(request.language);
        } else {
            body["language_detection"] = serde_json::json!(true);
        }
        if request.enable_diarization && request.speaker_count > 1 {
            body["speakers_expected"] = serde_json::json!(request.speaker_count);
        }

        let response = self
            .client
            .post(format!("{}/v2/transcript", self.config.base_url))
            .header("authorization", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }

        let body: TranscriptResponse =
            response.json().await.map_err(|e| ProviderError::Permanent {
                message: format!("unparseable transcript response: {e}"),
            })?;
        Ok(body.id)
    }

    async fn poll(&self, transcript_id: &str) -> Result<TranscriptResponse, ProviderError> {
        for _ in 0..self.config.max_polls {
            let response = self
                .client
                .get(format!(
                    "{}/v2/transcript/{transcript_id}",
                    self.config.base_url
                ))
                .header("authorization", &self.config.api_key)
                .send()
                .await
                .map_err(ProviderError::from_reqwest)?;

            if !response.status().is_success() {
                return Err(ProviderError::from_response(response).await);
            }

            let body: TranscriptResponse =
                response.json().await.map_err(|e| ProviderError::Permanent {
                    message: format!("unparseable poll response: {e}"),
                })?;

            match body.status.as_str() {
                "completed" => return Ok(body),
                "error" => {
                    return Err(ProviderError::Permanent {
                        message: body
                            .error
                            .unwrap_or_else(|| "transcript failed without detail".to_string()),
                    })
                }
                _ => {
                    debug!(transcript_id = %body.id, status = %body.status, "Transcript not ready");
                    tokio::time::sleep(std::time::Duration::from_secs(
                        self.config.poll_interval_secs,
                    ))
                    .await;
                }
            }
        }

        Err(ProviderError::Timeout {
            seconds: self.config.poll_interval_secs * self.config.max_polls as u64,
        })
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    pub async fn execute(
        &self,
        request: &TranscriptionRequest,
    ) -> Result<TranscriptionOutput, ProviderError> {
        let upload_url = self.upload(&request.audio).await?;
        let transcript_id = self.create_transcript(&upload_url, request).await?;
        let transcript = self.poll(&transcript_id).await?;

        let segments = transcript.utterances.filter(|u| !u.is_empty()).map(|us| {
            us.into_iter()
                .map(|u| TranscriptSegment {
                    // AssemblyAI reports milliseconds
                    start: u.start as f64 / 1000.0,
                    end: u.end as f64 / 1000.0,
                    speaker: u.speaker,
                    text: u.text,
                })
                .collect()
        });

        Ok(TranscriptionOutput {
            text: transcript.text.unwrap_or_default().trim().to_string(),
            segments,
            model: request.model.clone(),
            metadata: serde_json::json!({
                "provider": "assemblyai",
                "transcript_id": transcript.id,
                "language_code": transcript.language_code,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> AssemblyAiConfig {
        AssemblyAiConfig {
            api_key: "aai_test".to_string(),
            base_url: server.uri(),
            timeout_secs: 5,
            poll_interval_secs: 0,
            max_polls: 5,
        }
    }

    fn request() -> TranscriptionRequest {
        TranscriptionRequest {
            audio: vec![2u8; 64],
            filename: "talk.mp3".to_string(),
            model: "best".to_string(),
            language: "en".to_string(),
            temperature: None,
            beam_size: None,
            enable_diarization: true,
            speaker_count: 2,
        }
    }

    #[tokio::test]
    async fn upload_create_poll_flow() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "upload_url": "https://cdn.example/upload/abc"
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v2/transcript"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "tr_1", "status": "queued"
            })))
            .mount(&server)
            .await;

        // First poll still processing, second completed
        Mock::given(method("GET"))
            .and(path("/v2/transcript/tr_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "tr_1", "status": "processing"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v2/transcript/tr_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "tr_1",
                "status": "completed",
                "text": "Two people talking.",
                "language_code": "en_us",
                "utterances": [
                    {"start": 0, "end": 1500, "text": "Hello.", "speaker": "A"},
                    {"start": 1500, "end": 2400, "text": "Hi.", "speaker": "B"}
                ]
            })))
            .mount(&server)
            .await;

        let adapter = AssemblyAiTranscriber::new(config(&server)).unwrap();
        let out = adapter.execute(&request()).await.unwrap();

        assert_eq!(out.text, "Two people talking.");
        let segments = out.segments.unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].speaker.as_deref(), Some("A"));
        assert!((segments[0].end - 1.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn transcript_error_is_permanent() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "upload_url": "https://cdn.example/upload/abc"
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v2/transcript"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "tr_2", "status": "queued"
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v2/transcript/tr_2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "tr_2", "status": "error", "error": "audio duration is too short"
            })))
            .mount(&server)
            .await;

        let adapter = AssemblyAiTranscriber::new(config(&server)).unwrap();
        let err = adapter.execute(&request()).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
