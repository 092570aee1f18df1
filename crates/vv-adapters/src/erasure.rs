//! Erasure coordinator
//!
//! Right-to-erasure by cryptographic shredding: verify ownership, destroy the
//! entry's DEK, and emit the audit record. Ciphertext rows are intentionally
//! left in place; with the key gone they are permanently unreadable and
//! subsequent reads answer `Gone`.

use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use vv_domain::ErasureRecord;
use vv_ports::{DekStore, DekStoreError, EntryStore, EntryStoreError};

#[derive(Debug, thiserror::Error)]
pub enum ErasureError {
    #[error("Erasure requires explicit confirmation")]
    NotConfirmed,

    #[error("Voice entry not found: {voice_entry_id}")]
    NotFound { voice_entry_id: Uuid },

    #[error("Voice entry {voice_entry_id} is not owned by the caller")]
    NotOwner { voice_entry_id: Uuid },

    #[error("DEK store error: {0}")]
    DekStore(#[from] DekStoreError),

    #[error("Entry store error: {0}")]
    EntryStore(#[from] EntryStoreError),
}

pub struct ErasureCoordinator<E, D>
where
    E: EntryStore,
    D: DekStore,
{
    entries: Arc<E>,
    deks: Arc<D>,
}

impl<E, D> ErasureCoordinator<E, D>
where
    E: EntryStore,
    D: DekStore,
{
    pub fn new(entries: Arc<E>, deks: Arc<D>) -> Self {
        Self { entries, deks }
    }

    /// Destroy the DEK for a voice entry. Idempotent; repeating the call
    /// returns the audit record of the first destruction.
    #[instrument(skip(self), fields(user_id = %user_id, voice_entry_id = %voice_entry_id))]
    pub async fn erase(
        &self,
        user_id: Uuid,
        voice_entry_id: Uuid,
        confirm: bool,
        reason: Option<String>,
    ) -> Result<ErasureRecord, ErasureError> {
        if !confirm {
            return Err(ErasureError::NotConfirmed);
        }

        let entry = self
            .entries
            .get(voice_entry_id)
            .await?
            .ok_or(ErasureError::NotFound { voice_entry_id })?;
        if entry.user_id != user_id {
            return Err(ErasureError::NotOwner { voice_entry_id });
        }

        let record = self.deks.destroy(user_id, voice_entry_id, reason).await?;
        info!(
            dek_id = %record.dek_id,
            destroyed_at = %record.destroyed_at,
            "Voice entry cryptographically erased"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vv_ports::NewVoiceEntry;

    use crate::crypto::{Kek, KekRing};
    use crate::memory::{InMemoryDekStore, InMemoryEntryStore};

    struct Harness {
        coordinator: ErasureCoordinator<InMemoryEntryStore, InMemoryDekStore>,
        deks: Arc<InMemoryDekStore>,
        user_id: Uuid,
        entry_id: Uuid,
    }

    async fn harness() -> Harness {
        let kek = Arc::new(KekRing::new(Kek::from_bytes([17u8; 32], "local-v1")));
        let deks = Arc::new(InMemoryDekStore::new(kek));
        let entries = Arc::new(InMemoryEntryStore::new(deks.clone()));

        let user_id = Uuid::new_v4();
        let created = entries
            .create(NewVoiceEntry {
                id: Uuid::new_v4(),
                user_id,
                audio_handle: "2026/07/erase-me.mp3".to_string(),
                original_filename: "erase-me.mp3".to_string(),
                duration_seconds: 2.0,
                encryption_version: "local-v1".to_string(),
            })
            .await
            .unwrap();

        Harness {
            coordinator: ErasureCoordinator::new(entries, deks.clone()),
            deks,
            user_id,
            entry_id: created.entry.id,
        }
    }

    #[tokio::test]
    async fn erase_destroys_the_dek_and_audits() {
        let h = harness().await;
        let record = h
            .coordinator
            .erase(h.user_id, h.entry_id, true, Some("user request".to_string()))
            .await
            .unwrap();

        assert_eq!(record.voice_entry_id, h.entry_id);
        assert!(matches!(
            h.deks.load(h.entry_id).await,
            Err(DekStoreError::Destroyed { .. })
        ));
        assert_eq!(h.deks.erasure_audit().await.len(), 1);
    }

    #[tokio::test]
    async fn erase_is_idempotent() {
        let h = harness().await;
        let first = h
            .coordinator
            .erase(h.user_id, h.entry_id, true, None)
            .await
            .unwrap();
        let second = h
            .coordinator
            .erase(h.user_id, h.entry_id, true, None)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(h.deks.erasure_audit().await.len(), 1);
    }

    #[tokio::test]
    async fn erase_requires_confirmation() {
        let h = harness().await;
        let err = h
            .coordinator
            .erase(h.user_id, h.entry_id, false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ErasureError::NotConfirmed));

        // Nothing was destroyed
        assert!(h.deks.load(h.entry_id).await.is_ok());
    }

    #[tokio::test]
    async fn erase_rejects_non_owner() {
        let h = harness().await;
        let err = h
            .coordinator
            .erase(Uuid::new_v4(), h.entry_id, true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ErasureError::NotOwner { .. }));
        assert!(h.deks.load(h.entry_id).await.is_ok());
    }

    #[tokio::test]
    async fn erase_rejects_unknown_entry() {
        let h = harness().await;
        let err = h
            .coordinator
            .erase(h.user_id, Uuid::new_v4(), true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ErasureError::NotFound { .. }));
    }
}
