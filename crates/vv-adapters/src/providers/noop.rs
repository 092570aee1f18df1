//! No-op providers
//!
//! Deterministic backends for tests and smoke deployments: no network, no
//! credentials. The transcriber echoes a fixed phrase; the LLM answers with
//! well-formed cleanup JSON.

use vv_domain::{llm_parameter_schema, transcription_parameter_schema, TranscriptSegment};

use super::{
    LlmOutput, LlmRequest, ModelDescriptor, ProviderDescriptor, ProviderError,
    TranscriptionOutput, TranscriptionRequest,
};

pub struct NoopTranscriber {
    descriptor: ProviderDescriptor,
}

impl NoopTranscriber {
    pub fn new() -> Self {
        Self {
            descriptor: ProviderDescriptor {
                id: "noop".to_string(),
                name: "No-op transcriber".to_string(),
                models: vec![ModelDescriptor::new("noop", "No-op model")],
                parameters: transcription_parameter_schema(),
            },
        }
    }

    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    pub async fn execute(
        &self,
        request: &TranscriptionRequest,
    ) -> Result<TranscriptionOutput, ProviderError> {
        if request.audio.is_empty() {
            return Err(ProviderError::Permanent {
                message: "audio is empty".to_string(),
            });
        }

        let text = format!(
            "This is a noop transcription of {} ({} bytes, language {}).",
            request.filename,
            request.audio.len(),
            request.language
        );

        let segments = request.enable_diarization.then(|| {
            (0..request.speaker_count.max(1))
                .map(|i| TranscriptSegment {
                    start: i as f64,
                    end: (i + 1) as f64,
                    speaker: Some(format!("SPEAKER_{i:02}")),
                    text: format!("segment {i}"),
                })
                .collect()
        });

        Ok(TranscriptionOutput {
            text,
            segments,
            model: request.model.clone(),
            metadata: serde_json::json!({ "provider": "noop" }),
        })
    }
}

impl Default for NoopTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

pub struct NoopLlm {
    descriptor: ProviderDescriptor,
}

impl NoopLlm {
    pub fn new() -> Self {
        Self {
            descriptor: ProviderDescriptor {
                id: "noop".to_string(),
                name: "No-op LLM".to_string(),
                models: vec![ModelDescriptor::new("noop", "No-op model")],
                parameters: llm_parameter_schema(),
            },
        }
    }

    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    pub async fn execute(&self, request: &LlmRequest) -> Result<LlmOutput, ProviderError> {
        let body = serde_json::json!({
            "cleaned_text": format!("Cleaned ({} prompt chars).", request.prompt.len()),
            "themes": [],
            "emotions": [],
        });
        Ok(LlmOutput {
            text: body.to_string(),
            model: request.model.clone(),
            metadata: serde_json::json!({ "provider": "noop" }),
        })
    }
}

impl Default for NoopLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_transcriber_is_deterministic_about_shape() {
        let adapter = NoopTranscriber::new();
        let out = adapter
            .execute(&TranscriptionRequest {
                audio: vec![0u8; 64],
                filename: "dream.mp3".to_string(),
                model: "noop".to_string(),
                language: "en".to_string(),
                temperature: None,
                beam_size: None,
                enable_diarization: true,
                speaker_count: 2,
            })
            .await
            .unwrap();

        assert!(out.text.contains("dream.mp3"));
        assert_eq!(out.segments.as_ref().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn noop_transcriber_rejects_empty_audio() {
        let adapter = NoopTranscriber::new();
        let err = adapter
            .execute(&TranscriptionRequest {
                audio: vec![],
                filename: "x.mp3".to_string(),
                model: "noop".to_string(),
                language: "en".to_string(),
                temperature: None,
                beam_size: None,
                enable_diarization: false,
                speaker_count: 1,
            })
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn noop_llm_produces_parseable_cleanup_json() {
        let adapter = NoopLlm::new();
        let out = adapter
            .execute(&LlmRequest {
                model: "noop".to_string(),
                prompt: "Clean this: hello".to_string(),
                temperature: None,
                top_p: None,
            })
            .await
            .unwrap();

        let parsed = vv_domain::CleanupOutput::parse(&out.text);
        assert!(!parsed.cleaned_text.is_empty());
    }
}
