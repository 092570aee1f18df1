//! API Handlers
//!
//! HTTP endpoints for uploads, the transcription and cleanup pipelines,
//! provider/model discovery, and envelope-encryption operations. Handlers
//! translate between the wire and the adapters; every error reaches the
//! client through the taxonomy mapping in `error`.

pub mod cleaned_entries;
pub mod encryption;
pub mod entries;
pub mod error;
pub mod health;
pub mod models;
pub mod transcriptions;
pub mod upload;

pub use error::{ApiError, ApiResult};
