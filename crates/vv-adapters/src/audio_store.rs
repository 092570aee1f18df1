//! Local filesystem audio store
//!
//! Stands in for the external blob store at the upload boundary. Files land
//! in date-partitioned directories under a configured root; the returned
//! handle is the root-relative path and is treated as opaque everywhere else.
//!
//! The saved filename carries a content-hash suffix, so a retried upload of
//! the same bytes maps to the same handle and entry creation stays
//! idempotent end to end.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use vv_ports::{AudioSource, AudioSourceError};

/// Outcome of storing an upload.
#[derive(Debug, Clone)]
pub struct SavedAudio {
    /// Opaque handle (root-relative path)
    pub handle: String,
    /// Content-hash-suffixed filename within the date partition
    pub saved_filename: String,
}

pub struct LocalAudioStore {
    root: PathBuf,
}

impl LocalAudioStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store upload bytes under `<root>/YYYY/MM/DD/<stem>_<content-hash>.<ext>`.
    #[instrument(skip(self, bytes), fields(original_filename = %original_filename, size = bytes.len()))]
    pub async fn store(
        &self,
        original_filename: &str,
        bytes: &[u8],
        now: DateTime<Utc>,
    ) -> Result<SavedAudio, AudioSourceError> {
        let (stem, extension) = split_filename(original_filename);
        let digest = hex::encode(Sha256::digest(bytes));
        let saved_filename = format!("{}_{}.{}", sanitize(stem), &digest[..16], extension);
        let partition = now.format("%Y/%m/%d").to_string();
        let handle = format!("{partition}/{saved_filename}");

        let directory = self.root.join(&partition);
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(io_error)?;
        tokio::fs::write(directory.join(&saved_filename), bytes)
            .await
            .map_err(io_error)?;

        debug!(handle = %handle, "Audio stored");
        Ok(SavedAudio {
            handle,
            saved_filename,
        })
    }
}

fn io_error(e: std::io::Error) -> AudioSourceError {
    AudioSourceError::Io {
        message: e.to_string(),
    }
}

fn split_filename(filename: &str) -> (&str, &str) {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, ext),
        _ => (filename, "bin"),
    }
}

/// Keep handles shell- and path-safe.
fn sanitize(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "audio".to_string()
    } else {
        cleaned
    }
}

/// A handle must stay inside the root.
fn is_safe_handle(handle: &str) -> bool {
    !handle.is_empty()
        && !Path::new(handle).is_absolute()
        && !handle.split('/').any(|part| part == ".." || part.is_empty())
}

impl AudioSource for LocalAudioStore {
    async fn fetch(&self, handle: &str) -> Result<Vec<u8>, AudioSourceError> {
        if !is_safe_handle(handle) {
            return Err(AudioSourceError::NotFound {
                handle: handle.to_string(),
            });
        }
        match tokio::fs::read(self.root.join(handle)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AudioSourceError::NotFound {
                handle: handle.to_string(),
            }),
            Err(e) => Err(io_error(e)),
        }
    }
}

// ============================================================================
// MP3 duration estimate
// ============================================================================

/// Bitrate table for MPEG-1 Layer III, in kbit/s (index 0 and 15 invalid).
const MPEG1_LAYER3_BITRATES: [u32; 16] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0,
];

/// Estimate the duration of a CBR MP3 from its first frame header.
///
/// Good enough for display metadata; never feeds the pipeline. Returns None
/// when no frame header is found.
pub fn estimate_mp3_duration(bytes: &[u8]) -> Option<f64> {
    let mut i = 0;
    while i + 4 <= bytes.len() {
        // Frame sync: 11 set bits
        if bytes[i] == 0xFF && bytes[i + 1] & 0xE0 == 0xE0 {
            let version_bits = (bytes[i + 1] >> 3) & 0x03;
            let layer_bits = (bytes[i + 1] >> 1) & 0x03;
            let bitrate_index = (bytes[i + 2] >> 4) as usize;

            // MPEG-1 Layer III with a valid bitrate index
            if version_bits == 0b11 && layer_bits == 0b01 && (1..15).contains(&bitrate_index) {
                let bitrate = MPEG1_LAYER3_BITRATES[bitrate_index];
                return Some(bytes.len() as f64 * 8.0 / (bitrate as f64 * 1000.0));
            }
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_and_fetch_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalAudioStore::new(dir.path());
        let now = Utc::now();

        let saved = store
            .store("dream recording.mp3", b"not really audio", now)
            .await
            .unwrap();

        assert!(saved.saved_filename.starts_with("dream_recording_"));
        assert!(saved.saved_filename.ends_with(".mp3"));
        assert!(saved.handle.starts_with(&now.format("%Y/%m/%d").to_string()));

        let bytes = store.fetch(&saved.handle).await.unwrap();
        assert_eq!(bytes, b"not really audio");
    }

    #[tokio::test]
    async fn identical_bytes_map_to_the_same_handle() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalAudioStore::new(dir.path());
        let now = Utc::now();

        let first = store.store("dream.mp3", b"same audio", now).await.unwrap();
        let second = store.store("dream.mp3", b"same audio", now).await.unwrap();
        let other = store.store("dream.mp3", b"other audio", now).await.unwrap();

        assert_eq!(first.handle, second.handle);
        assert_ne!(first.handle, other.handle);
    }

    #[tokio::test]
    async fn fetch_rejects_traversal_handles() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalAudioStore::new(dir.path());

        for handle in ["../etc/passwd", "/etc/passwd", "a//b.mp3", ""] {
            assert!(matches!(
                store.fetch(handle).await.unwrap_err(),
                AudioSourceError::NotFound { .. }
            ));
        }
    }

    #[tokio::test]
    async fn fetch_missing_handle_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalAudioStore::new(dir.path());
        assert!(matches!(
            store.fetch("2026/01/01/nope.mp3").await.unwrap_err(),
            AudioSourceError::NotFound { .. }
        ));
    }

    #[test]
    fn duration_estimate_reads_the_first_frame_header() {
        // 128 kbit/s MPEG-1 Layer III header: FF FB 90 00
        let mut bytes = vec![0xFF, 0xFB, 0x90, 0x00];
        bytes.extend(vec![0u8; 16_000 - 4]);

        let duration = estimate_mp3_duration(&bytes).unwrap();
        // 16000 bytes at 128 kbit/s is exactly one second
        assert!((duration - 1.0).abs() < 0.01);
    }

    #[test]
    fn duration_estimate_skips_leading_garbage() {
        let mut bytes = vec![0x49, 0x44, 0x33, 0x00, 0x00]; // ID3 tag-ish prefix
        bytes.extend([0xFF, 0xFB, 0x90, 0x00]);
        bytes.extend(vec![0u8; 32_000]);
        assert!(estimate_mp3_duration(&bytes).is_some());
    }

    #[test]
    fn duration_estimate_handles_non_mp3_bytes() {
        assert!(estimate_mp3_duration(b"plain text file").is_none());
        assert!(estimate_mp3_duration(&[]).is_none());
    }
}
