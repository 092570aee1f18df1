//! Encrypted-field codec
//!
//! Thin wrapper over the envelope engine and the DEK store. Encrypts and
//! decrypts one column value at a time, binding each ciphertext to
//! `"<field_tag>:<voice_entry_id>"`.
//!
//! DEKs are unwrapped at most once per scope through [`DekCache`]; the cache
//! lives for one request or one pipeline run and zeroizes its keys on drop.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use vv_domain::associated_data;
use vv_ports::{DekStore, DekStoreError, PlaintextDek};

use crate::crypto;

/// Per-scope cache of unwrapped DEKs. Keys zeroize when the cache drops
/// (`PlaintextDek` is zeroize-on-drop).
#[derive(Default)]
pub struct DekCache {
    deks: HashMap<Uuid, PlaintextDek>,
}

impl DekCache {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Codec errors, as seen by pipelines and handlers.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The DEK was destroyed; the ciphertext is permanently unreadable.
    #[error("Encryption unavailable: DEK for voice entry {voice_entry_id} has been destroyed")]
    Destroyed { voice_entry_id: Uuid },

    /// No DEK row exists. For an encrypted entry this is an integrity bug.
    #[error("Encryption unavailable: no DEK exists for voice entry {voice_entry_id}")]
    Missing { voice_entry_id: Uuid },

    #[error("Crypto failure: {message}")]
    Crypto { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },
}

impl CodecError {
    fn from_store(e: DekStoreError) -> Self {
        match e {
            DekStoreError::Destroyed { voice_entry_id } => CodecError::Destroyed { voice_entry_id },
            DekStoreError::NotFound { voice_entry_id } => CodecError::Missing { voice_entry_id },
            DekStoreError::UnknownKek { kek_id } => CodecError::Storage {
                message: format!("No KEK named '{kek_id}' is configured"),
            },
            DekStoreError::Crypto { message } => CodecError::Crypto { message },
            DekStoreError::Storage { message } => CodecError::Storage { message },
        }
    }
}

/// Field-level encrypt/decrypt against a voice entry's DEK.
pub struct FieldCodec<D: DekStore> {
    deks: Arc<D>,
}

impl<D: DekStore> FieldCodec<D> {
    pub fn new(deks: Arc<D>) -> Self {
        Self { deks }
    }

    async fn dek<'c>(
        &self,
        cache: &'c mut DekCache,
        voice_entry_id: Uuid,
    ) -> Result<&'c PlaintextDek, CodecError> {
        if !cache.deks.contains_key(&voice_entry_id) {
            let dek = self
                .deks
                .load(voice_entry_id)
                .await
                .map_err(CodecError::from_store)?;
            cache.deks.insert(voice_entry_id, dek);
        }
        Ok(&cache.deks[&voice_entry_id])
    }

    /// Encrypt a field value for its owning voice entry.
    pub async fn encrypt_field(
        &self,
        cache: &mut DekCache,
        voice_entry_id: Uuid,
        field_tag: &str,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CodecError> {
        let ad = associated_data(field_tag, voice_entry_id);
        let dek = self.dek(cache, voice_entry_id).await?;
        crypto::encrypt(plaintext, dek, &ad).map_err(|e| CodecError::Crypto {
            message: e.to_string(),
        })
    }

    /// Decrypt a field value for its owning voice entry.
    pub async fn decrypt_field(
        &self,
        cache: &mut DekCache,
        voice_entry_id: Uuid,
        field_tag: &str,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CodecError> {
        let ad = associated_data(field_tag, voice_entry_id);
        let dek = self.dek(cache, voice_entry_id).await?;
        crypto::decrypt(ciphertext, dek, &ad).map_err(|e| CodecError::Crypto {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vv_domain::field_tags;

    use crate::crypto::{Kek, KekRing};
    use crate::memory::{InMemoryDekStore, InMemoryEntryStore};
    use vv_ports::{EntryStore, NewVoiceEntry};

    fn test_kek() -> Arc<KekRing> {
        Arc::new(KekRing::new(Kek::from_bytes([9u8; 32], "local-v1")))
    }

    async fn seeded_entry(deks: &Arc<InMemoryDekStore>) -> Uuid {
        let entries = InMemoryEntryStore::new(deks.clone());
        let entry_id = Uuid::new_v4();
        entries
            .create(NewVoiceEntry {
                id: entry_id,
                user_id: Uuid::new_v4(),
                audio_handle: format!("2026/07/{entry_id}.mp3"),
                original_filename: "dream.mp3".to_string(),
                duration_seconds: 3.2,
                encryption_version: "local-v1".to_string(),
            })
            .await
            .unwrap();
        entry_id
    }

    #[tokio::test]
    async fn field_round_trip() {
        let deks = Arc::new(InMemoryDekStore::new(test_kek()));
        let entry_id = seeded_entry(&deks).await;
        let codec = FieldCodec::new(deks);
        let mut cache = DekCache::new();

        let ciphertext = codec
            .encrypt_field(&mut cache, entry_id, field_tags::TRANSCRIBED_TEXT, b"hello")
            .await
            .unwrap();
        let plaintext = codec
            .decrypt_field(&mut cache, entry_id, field_tags::TRANSCRIBED_TEXT, &ciphertext)
            .await
            .unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[tokio::test]
    async fn ciphertext_cannot_move_between_fields() {
        let deks = Arc::new(InMemoryDekStore::new(test_kek()));
        let entry_id = seeded_entry(&deks).await;
        let codec = FieldCodec::new(deks);
        let mut cache = DekCache::new();

        let ciphertext = codec
            .encrypt_field(&mut cache, entry_id, field_tags::CLEANED_TEXT, b"hello")
            .await
            .unwrap();
        let err = codec
            .decrypt_field(&mut cache, entry_id, field_tags::USER_EDITED_TEXT, &ciphertext)
            .await
            .unwrap_err();
        assert!(matches!(err, CodecError::Crypto { .. }));
    }

    #[tokio::test]
    async fn dek_is_loaded_once_per_cache() {
        let deks = Arc::new(InMemoryDekStore::new(test_kek()));
        let entry_id = seeded_entry(&deks).await;
        let codec = FieldCodec::new(deks.clone());
        let mut cache = DekCache::new();

        for _ in 0..5 {
            codec
                .encrypt_field(&mut cache, entry_id, field_tags::TRANSCRIBED_TEXT, b"x")
                .await
                .unwrap();
        }
        assert_eq!(deks.load_count(), 1);

        // A fresh scope loads again
        let mut fresh = DekCache::new();
        let ciphertext = codec
            .encrypt_field(&mut fresh, entry_id, field_tags::TRANSCRIBED_TEXT, b"x")
            .await
            .unwrap();
        codec
            .decrypt_field(&mut fresh, entry_id, field_tags::TRANSCRIBED_TEXT, &ciphertext)
            .await
            .unwrap();
        assert_eq!(deks.load_count(), 2);
    }

    #[tokio::test]
    async fn destroyed_dek_fails_every_subsequent_decrypt() {
        let deks = Arc::new(InMemoryDekStore::new(test_kek()));
        let entry_id = seeded_entry(&deks).await;
        let codec = FieldCodec::new(deks.clone());

        let mut cache = DekCache::new();
        let ciphertext = codec
            .encrypt_field(&mut cache, entry_id, field_tags::TRANSCRIBED_TEXT, b"gone soon")
            .await
            .unwrap();
        drop(cache);

        use vv_ports::DekStore;
        deks.destroy(Uuid::new_v4(), entry_id, Some("user request".to_string()))
            .await
            .unwrap();

        for _ in 0..3 {
            let mut cache = DekCache::new();
            let err = codec
                .decrypt_field(&mut cache, entry_id, field_tags::TRANSCRIBED_TEXT, &ciphertext)
                .await
                .unwrap_err();
            assert!(matches!(err, CodecError::Destroyed { .. }));
        }
    }

    #[tokio::test]
    async fn missing_dek_is_distinguished() {
        let deks = Arc::new(InMemoryDekStore::new(test_kek()));
        let codec = FieldCodec::new(deks);
        let mut cache = DekCache::new();

        let err = codec
            .decrypt_field(&mut cache, Uuid::new_v4(), field_tags::TRANSCRIBED_TEXT, &[1, 2, 3])
            .await
            .unwrap_err();
        assert!(matches!(err, CodecError::Missing { .. }));
    }
}
