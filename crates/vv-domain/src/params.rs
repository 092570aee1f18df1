//! Provider parameter schemas and central validation
//!
//! Every provider descriptor carries a parameter schema. Requests are
//! projected through the schema before dispatch: unknown keys are rejected,
//! out-of-range values fail with `InvalidParameter`, nothing is silently
//! dropped.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::errors::DomainError;

/// Primitive kind of a provider parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    Float,
    Int,
    Bool,
    String,
}

/// Declarative description of one provider parameter.
#[derive(Debug, Clone, Serialize)]
pub struct ParameterSpec {
    #[serde(rename = "type")]
    pub kind: ParameterKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
    pub description: String,
}

impl ParameterSpec {
    pub fn float(min: f64, max: f64, default: f64, description: &str) -> Self {
        Self {
            kind: ParameterKind::Float,
            min: Some(min),
            max: Some(max),
            default: Some(Value::from(default)),
            allowed_values: None,
            description: description.to_string(),
        }
    }

    pub fn int(min: i64, max: i64, default: i64, description: &str) -> Self {
        Self {
            kind: ParameterKind::Int,
            min: Some(min as f64),
            max: Some(max as f64),
            default: Some(Value::from(default)),
            allowed_values: None,
            description: description.to_string(),
        }
    }

    pub fn bool(default: bool, description: &str) -> Self {
        Self {
            kind: ParameterKind::Bool,
            min: None,
            max: None,
            default: Some(Value::from(default)),
            allowed_values: None,
            description: description.to_string(),
        }
    }

    pub fn string(description: &str) -> Self {
        Self {
            kind: ParameterKind::String,
            min: None,
            max: None,
            default: None,
            allowed_values: None,
            description: description.to_string(),
        }
    }
}

/// Schema: parameter name → spec. BTreeMap keeps `/options` output stable.
pub type ParameterSchema = BTreeMap<String, ParameterSpec>;

/// The standard transcription parameter schema.
pub fn transcription_parameter_schema() -> ParameterSchema {
    let mut schema = ParameterSchema::new();
    schema.insert(
        "temperature".to_string(),
        ParameterSpec::float(0.0, 1.0, 0.0, "Sampling temperature for decoding"),
    );
    schema.insert(
        "language".to_string(),
        ParameterSpec::string("ISO 639-1 language code, or 'auto' for detection"),
    );
    schema.insert(
        "beam_size".to_string(),
        ParameterSpec::int(1, 10, 5, "Beam search width"),
    );
    schema.insert(
        "enable_diarization".to_string(),
        ParameterSpec::bool(false, "Label segments with speaker identities"),
    );
    schema.insert(
        "speaker_count".to_string(),
        ParameterSpec::int(1, 10, 1, "Expected number of speakers"),
    );
    schema
}

/// The standard LLM parameter schema.
pub fn llm_parameter_schema() -> ParameterSchema {
    let mut schema = ParameterSchema::new();
    schema.insert(
        "temperature".to_string(),
        ParameterSpec::float(0.0, 2.0, 0.7, "Sampling temperature"),
    );
    schema.insert(
        "top_p".to_string(),
        ParameterSpec::float(0.0, 1.0, 1.0, "Nucleus sampling cutoff"),
    );
    schema.insert(
        "model".to_string(),
        ParameterSpec::string("Model identifier to use for this request"),
    );
    schema
}

/// Project supplied parameters through a schema.
///
/// Returns the normalized map (supplied values only; defaults are the
/// caller's concern). Unknown keys, type mismatches, out-of-range numbers,
/// and values outside `allowed_values` all fail with `InvalidParameter`.
pub fn validate_parameters(
    schema: &ParameterSchema,
    supplied: &serde_json::Map<String, Value>,
) -> Result<BTreeMap<String, Value>, DomainError> {
    let mut validated = BTreeMap::new();

    for (name, value) in supplied {
        let spec = schema.get(name).ok_or_else(|| DomainError::InvalidParameter {
            name: name.clone(),
            reason: "not recognized by this provider".to_string(),
        })?;

        if value.is_null() {
            continue;
        }

        match spec.kind {
            ParameterKind::Float => {
                let n = value.as_f64().ok_or_else(|| type_error(name, "a number"))?;
                check_range(name, n, spec)?;
                validated.insert(name.clone(), Value::from(n));
            }
            ParameterKind::Int => {
                let n = value.as_i64().ok_or_else(|| type_error(name, "an integer"))?;
                check_range(name, n as f64, spec)?;
                validated.insert(name.clone(), Value::from(n));
            }
            ParameterKind::Bool => {
                let b = value.as_bool().ok_or_else(|| type_error(name, "a boolean"))?;
                validated.insert(name.clone(), Value::from(b));
            }
            ParameterKind::String => {
                let s = value.as_str().ok_or_else(|| type_error(name, "a string"))?;
                if let Some(allowed) = &spec.allowed_values {
                    if !allowed.iter().any(|a| a == s) {
                        return Err(DomainError::InvalidParameter {
                            name: name.clone(),
                            reason: format!("'{s}' is not one of the allowed values"),
                        });
                    }
                }
                validated.insert(name.clone(), Value::from(s));
            }
        }
    }

    Ok(validated)
}

fn type_error(name: &str, expected: &str) -> DomainError {
    DomainError::InvalidParameter {
        name: name.to_string(),
        reason: format!("must be {expected}"),
    }
}

fn check_range(name: &str, value: f64, spec: &ParameterSpec) -> Result<(), DomainError> {
    if let Some(min) = spec.min {
        if value < min {
            return Err(DomainError::InvalidParameter {
                name: name.to_string(),
                reason: format!("{value} is below the minimum of {min}"),
            });
        }
    }
    if let Some(max) = spec.max {
        if value > max {
            return Err(DomainError::InvalidParameter {
                name: name.to_string(),
                reason: format!("{value} is above the maximum of {max}"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn supplied(pairs: &[(&str, Value)]) -> serde_json::Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn accepts_in_range_values() {
        let schema = transcription_parameter_schema();
        let params = supplied(&[
            ("temperature", json!(0.2)),
            ("beam_size", json!(5)),
            ("enable_diarization", json!(true)),
            ("speaker_count", json!(2)),
        ]);
        let validated = validate_parameters(&schema, &params).unwrap();
        assert_eq!(validated.len(), 4);
        assert_eq!(validated["beam_size"], json!(5));
    }

    #[test]
    fn rejects_unknown_parameter() {
        let schema = transcription_parameter_schema();
        let params = supplied(&[("beam_width", json!(5))]);
        let err = validate_parameters(&schema, &params).unwrap_err();
        assert!(matches!(err, DomainError::InvalidParameter { name, .. } if name == "beam_width"));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let schema = llm_parameter_schema();
        let params = supplied(&[("temperature", json!(2.5))]);
        assert!(validate_parameters(&schema, &params).is_err());

        let params = supplied(&[("top_p", json!(-0.1))]);
        assert!(validate_parameters(&schema, &params).is_err());
    }

    #[test]
    fn rejects_type_mismatch() {
        let schema = transcription_parameter_schema();
        let params = supplied(&[("beam_size", json!("wide"))]);
        assert!(validate_parameters(&schema, &params).is_err());

        let params = supplied(&[("enable_diarization", json!(1))]);
        assert!(validate_parameters(&schema, &params).is_err());
    }

    #[test]
    fn null_values_are_treated_as_absent() {
        let schema = llm_parameter_schema();
        let params = supplied(&[("temperature", Value::Null)]);
        let validated = validate_parameters(&schema, &params).unwrap();
        assert!(validated.is_empty());
    }

    #[test]
    fn schema_serializes_with_type_key() {
        let schema = transcription_parameter_schema();
        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(json["temperature"]["type"], "float");
        assert_eq!(json["temperature"]["min"], 0.0);
        assert_eq!(json["temperature"]["max"], 1.0);
        assert!(json["temperature"]["description"].is_string());
    }
}
