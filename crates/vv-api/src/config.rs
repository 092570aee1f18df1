//! API Configuration Module
//!
//! All configuration is read once at startup. The master KEK arrives as
//! base64 in the environment (or a KMS reference resolved before launch);
//! it never appears in logs.

use std::env;

use vv_adapters::config::StorageConfig;

use crate::auth::AuthConfig;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Database + schema configuration
    pub storage: StorageConfig,
    /// Base64-encoded 32-byte master KEK (the active one)
    pub master_kek_base64: String,
    /// Active encryption-provider version tag
    pub encryption_version: String,
    /// Additional KEKs the process can unwrap with and rotate onto, as
    /// `(version tag, base64 key)` pairs
    pub extra_keks: Vec<(String, String)>,
    /// Default transcription provider id
    pub default_transcription_provider: String,
    /// Default LLM provider id
    pub default_llm_provider: String,
    /// Enqueue a transcription right after upload
    pub auto_transcribe_on_upload: bool,
    /// Directory for uploaded audio
    pub upload_dir: String,
    /// Upload size cap in bytes
    pub max_upload_bytes: usize,
    /// Upper bound on one transcription provider call, seconds
    pub transcription_timeout_secs: u64,
    /// Upper bound on one LLM call, seconds
    pub llm_timeout_secs: u64,
    /// Bearer-token auth configuration
    pub auth: AuthConfig,
    /// Default tracing filter
    pub log_level: String,
}

impl ApiConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            host: env::var("VV_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("VV_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),
            storage: StorageConfig::from_env(),
            master_kek_base64: env::var("VV_MASTER_KEK").unwrap_or_default(),
            encryption_version: env::var("VV_ENCRYPTION_VERSION")
                .unwrap_or_else(|_| "local-v1".to_string()),
            extra_keks: env::var("VV_KEK_RING")
                .map(|raw| parse_kek_ring(&raw))
                .unwrap_or_default(),
            default_transcription_provider: env::var("VV_TRANSCRIPTION_PROVIDER")
                .unwrap_or_else(|_| "whisper".to_string()),
            default_llm_provider: env::var("VV_LLM_PROVIDER")
                .unwrap_or_else(|_| "ollama".to_string()),
            auto_transcribe_on_upload: env::var("VV_AUTO_TRANSCRIBE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            upload_dir: env::var("VV_UPLOAD_DIR").unwrap_or_else(|_| "./uploads".to_string()),
            max_upload_bytes: env::var("VV_MAX_UPLOAD_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50 * 1024 * 1024),
            transcription_timeout_secs: env::var("VV_TRANSCRIPTION_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(120),
            llm_timeout_secs: env::var("VV_LLM_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            auth: AuthConfig::from_env(),
            log_level: env::var("VV_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }

    /// Local development defaults: noop providers, fixed KEK, no auth.
    pub fn local_dev() -> Self {
        use base64::Engine;
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            storage: StorageConfig::local_dev(),
            master_kek_base64: base64::engine::general_purpose::STANDARD.encode([0u8; 32]),
            encryption_version: "local-v1".to_string(),
            extra_keks: Vec::new(),
            default_transcription_provider: "noop".to_string(),
            default_llm_provider: "noop".to_string(),
            auto_transcribe_on_upload: false,
            upload_dir: "./uploads".to_string(),
            max_upload_bytes: 50 * 1024 * 1024,
            transcription_timeout_secs: 120,
            llm_timeout_secs: 60,
            auth: AuthConfig::test_mode(),
            log_level: "debug".to_string(),
        }
    }
}

/// Parse `VV_KEK_RING`: comma-separated `version=base64` entries, e.g.
/// `local-v0=AAAA...,standby-v2=BBBB...`. Malformed entries are skipped.
fn parse_kek_ring(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|entry| {
            let (version, encoded) = entry.trim().split_once('=')?;
            if version.is_empty() || encoded.is_empty() {
                return None;
            }
            Some((version.to_string(), encoded.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kek_ring_parsing_skips_malformed_entries() {
        let parsed = parse_kek_ring("local-v0=QUFB, standby=QkJC ,broken,=QQ==,empty=");
        assert_eq!(
            parsed,
            vec![
                ("local-v0".to_string(), "QUFB".to_string()),
                ("standby".to_string(), "QkJC".to_string()),
            ]
        );
    }
}
