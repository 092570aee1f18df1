//! Prompt rendering and lenient LLM output parsing
//!
//! Cleanup prompts live in the `prompt_templates` table and contain a
//! `{transcription_text}` placeholder. LLM responses are expected to be JSON
//! with at least a `cleaned_text` field, but models wrap output in markdown
//! fences or prose often enough that parsing has to be forgiving: we extract
//! the largest balanced JSON object and fall back to treating the whole
//! response as cleaned text.

use serde_json::Value;

use crate::entities::PromptTemplate;
use crate::errors::DomainError;

/// Placeholder substituted with the decrypted primary transcript.
pub const TRANSCRIPTION_PLACEHOLDER: &str = "{transcription_text}";

impl PromptTemplate {
    /// Substitute the transcript into the template text.
    pub fn render(&self, transcription_text: &str) -> Result<String, DomainError> {
        if !self.prompt_text.contains(TRANSCRIPTION_PLACEHOLDER) {
            return Err(DomainError::InvalidInput {
                message: format!(
                    "prompt template '{}' has no {TRANSCRIPTION_PLACEHOLDER} placeholder",
                    self.name
                ),
            });
        }
        Ok(self
            .prompt_text
            .replace(TRANSCRIPTION_PLACEHOLDER, transcription_text))
    }
}

/// Find the largest balanced `{ ... }` object in a response.
///
/// Brace counting skips string literals and escape sequences, so braces
/// inside JSON strings do not break the balance.
pub fn extract_json_object(response: &str) -> Option<&str> {
    let bytes = response.as_bytes();
    let mut best: Option<(usize, usize)> = None;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }

        let start = i;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        let mut end = None;

        for (offset, &b) in bytes[start..].iter().enumerate() {
            if in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(start + offset + 1);
                        break;
                    }
                }
                _ => {}
            }
        }

        match end {
            Some(end) => {
                let len = end - start;
                if best.map_or(true, |(s, e)| len > e - s) {
                    best = Some((start, end));
                }
                i = end;
            }
            // Unterminated object: nothing balanced starts here or later
            None => break,
        }
    }

    best.map(|(s, e)| &response[s..e])
}

/// The structured result of a cleanup LLM call.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupOutput {
    pub cleaned_text: String,
    /// Optional fields (themes, emotions, ...) surfaced to downstream
    /// wrappers; the core persists only `cleaned_text`.
    pub extras: serde_json::Map<String, Value>,
}

impl CleanupOutput {
    /// Parse a raw LLM response leniently.
    ///
    /// Falls back to the whole trimmed response as `cleaned_text` when no
    /// parseable object with a `cleaned_text` string is found.
    pub fn parse(raw: &str) -> CleanupOutput {
        if let Some(candidate) = extract_json_object(raw) {
            if let Ok(Value::Object(mut map)) = serde_json::from_str::<Value>(candidate) {
                if let Some(Value::String(text)) = map.remove("cleaned_text") {
                    return CleanupOutput {
                        cleaned_text: text,
                        extras: map,
                    };
                }
            }
        }
        CleanupOutput {
            cleaned_text: raw.trim().to_string(),
            extras: serde_json::Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn template(text: &str) -> PromptTemplate {
        PromptTemplate {
            id: 1,
            name: "generic_v1".to_string(),
            entry_type: "journal".to_string(),
            prompt_text: text.to_string(),
            description: None,
            is_active: true,
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn render_substitutes_transcript() {
        let t = template("Clean this up:\n{transcription_text}\nRespond with JSON.");
        let rendered = t.render("um so I had a dream").unwrap();
        assert!(rendered.contains("um so I had a dream"));
        assert!(!rendered.contains(TRANSCRIPTION_PLACEHOLDER));
    }

    #[test]
    fn render_rejects_template_without_placeholder() {
        let t = template("no placeholder here");
        assert!(t.render("text").is_err());
    }

    #[test]
    fn extracts_object_from_markdown_fence() {
        let raw = "```json\n{\"cleaned_text\": \"Hello.\", \"themes\": [\"a\"]}\n```";
        let obj = extract_json_object(raw).unwrap();
        assert!(obj.starts_with('{') && obj.ends_with('}'));
        let parsed: Value = serde_json::from_str(obj).unwrap();
        assert_eq!(parsed["cleaned_text"], "Hello.");
    }

    #[test]
    fn extracts_largest_of_multiple_objects() {
        let raw = "{\"a\":1} and then {\"cleaned_text\":\"longer one\",\"themes\":[]}";
        let obj = extract_json_object(raw).unwrap();
        assert!(obj.contains("cleaned_text"));
    }

    #[test]
    fn braces_inside_strings_do_not_break_balance() {
        let raw = "{\"cleaned_text\": \"set {x} to \\\"{y}\\\"\"}";
        let obj = extract_json_object(raw).unwrap();
        assert_eq!(obj, raw);
    }

    #[test]
    fn parse_prefers_structured_cleaned_text() {
        let raw = "Sure! Here is the result:\n{\"cleaned_text\": \"I dreamt of rivers.\", \"emotions\": [\"calm\"]}";
        let out = CleanupOutput::parse(raw);
        assert_eq!(out.cleaned_text, "I dreamt of rivers.");
        assert_eq!(out.extras["emotions"][0], "calm");
    }

    #[test]
    fn parse_falls_back_to_whole_response() {
        let raw = "  I dreamt of rivers and nothing else.  ";
        let out = CleanupOutput::parse(raw);
        assert_eq!(out.cleaned_text, "I dreamt of rivers and nothing else.");
        assert!(out.extras.is_empty());
    }

    #[test]
    fn parse_falls_back_when_object_lacks_cleaned_text() {
        let raw = "{\"summary\": \"no cleaned text key\"}";
        let out = CleanupOutput::parse(raw);
        assert_eq!(out.cleaned_text, raw);
    }

    #[test]
    fn unterminated_object_is_ignored() {
        let raw = "{\"cleaned_text\": \"never closed";
        assert!(extract_json_object(raw).is_none());
    }
}
