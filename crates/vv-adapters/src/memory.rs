//! In-memory store implementations
//!
//! Backing for pipeline and codec tests, and for the `noop` end-to-end path.
//! The one-primary and CAS-claim rules that Postgres enforces with partial
//! unique indexes and guarded UPDATEs are modeled here under a write lock, so
//! the stores exhibit the same observable behavior. Status transitions go
//! through `JobStateMachine::transition`, the same table the SQL guards are
//! bound from.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use vv_domain::{
    CleanedEntry, DataEncryptionKey, ErasureRecord, JobStateMachine, JobStatus, JobTransition,
    PromptTemplate, Transcription, UserPreferences, VoiceEntry,
};
use vv_ports::{
    AudioSource, AudioSourceError, CleanupStore, DekRotation, DekStore, DekStoreError,
    EntryCreation, EntryStore, EntryStoreError, NewCleanedEntry, NewTranscription, NewVoiceEntry,
    PipelineStoreError, PlaintextDek, PreferencesStore, PreferencesStoreError, TemplateStore,
    TemplateStoreError, TranscriptionStore,
};

use crate::crypto::{self, Kek, KekRing};

// ============================================================================
// DEK store
// ============================================================================

/// In-memory DEK store. Wraps and unwraps against a real KEK ring so that
/// crypto behavior (tombstone sentinels, per-row wrapping keys) matches the
/// Postgres adapter.
pub struct InMemoryDekStore {
    keks: Arc<KekRing>,
    rows: RwLock<HashMap<Uuid, DataEncryptionKey>>,
    audits: RwLock<Vec<ErasureRecord>>,
    load_count: AtomicUsize,
}

impl InMemoryDekStore {
    pub fn new(keks: Arc<KekRing>) -> Self {
        Self {
            keks,
            rows: RwLock::new(HashMap::new()),
            audits: RwLock::new(Vec::new()),
            load_count: AtomicUsize::new(0),
        }
    }

    fn wrapping_kek(&self, encryption_version: &str) -> Result<&Kek, DekStoreError> {
        self.keks
            .get(encryption_version)
            .ok_or_else(|| DekStoreError::Crypto {
                message: format!("KEK '{encryption_version}' is not in the configured ring"),
            })
    }

    /// How many times a DEK was unwrapped; used to assert cache behavior.
    pub fn load_count(&self) -> usize {
        self.load_count.load(Ordering::SeqCst)
    }

    pub async fn erasure_audit(&self) -> Vec<ErasureRecord> {
        self.audits.read().await.clone()
    }

    /// Mint a wrapped DEK for an entry under the active KEK. Idempotent;
    /// called from entry creation.
    pub(crate) async fn mint(&self, user_id: Uuid, voice_entry_id: Uuid) -> Result<Uuid, DekStoreError> {
        let mut rows = self.rows.write().await;
        if let Some(existing) = rows.get(&voice_entry_id) {
            return Ok(existing.id);
        }
        let kek = self.keks.active();
        let dek = crypto::generate_dek();
        let wrapped = crypto::wrap_dek(&dek, kek, &crypto::dek_associated_data(voice_entry_id))
            .map_err(|e| DekStoreError::Crypto {
                message: e.to_string(),
            })?;
        let row = DataEncryptionKey {
            id: Uuid::new_v4(),
            user_id,
            voice_entry_id,
            encrypted_dek: wrapped,
            encryption_version: kek.version().to_string(),
            key_version: 1,
            created_at: Utc::now(),
            rotated_at: None,
            deleted_at: None,
        };
        let id = row.id;
        rows.insert(voice_entry_id, row);
        Ok(id)
    }
}

impl DekStore for InMemoryDekStore {
    async fn load(&self, voice_entry_id: Uuid) -> Result<PlaintextDek, DekStoreError> {
        let rows = self.rows.read().await;
        let row = rows
            .get(&voice_entry_id)
            .ok_or(DekStoreError::NotFound { voice_entry_id })?;
        if row.is_destroyed() {
            return Err(DekStoreError::Destroyed { voice_entry_id });
        }
        let kek = self.wrapping_kek(&row.encryption_version)?;
        self.load_count.fetch_add(1, Ordering::SeqCst);
        crypto::unwrap_dek(
            &row.encrypted_dek,
            kek,
            &crypto::dek_associated_data(voice_entry_id),
        )
        .map_err(|e| DekStoreError::Crypto {
            message: e.to_string(),
        })
    }

    async fn get(&self, voice_entry_id: Uuid) -> Result<Option<DataEncryptionKey>, DekStoreError> {
        Ok(self.rows.read().await.get(&voice_entry_id).cloned())
    }

    async fn destroy(
        &self,
        user_id: Uuid,
        voice_entry_id: Uuid,
        reason: Option<String>,
    ) -> Result<ErasureRecord, DekStoreError> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(&voice_entry_id)
            .ok_or(DekStoreError::NotFound { voice_entry_id })?;

        if row.is_destroyed() {
            let audits = self.audits.read().await;
            if let Some(existing) = audits
                .iter()
                .rev()
                .find(|a| a.voice_entry_id == voice_entry_id)
            {
                return Ok(existing.clone());
            }
        }

        let destroyed_at = Utc::now();
        row.deleted_at = Some(destroyed_at);
        row.encrypted_dek = crypto::random_sentinel();

        let record = ErasureRecord {
            id: Uuid::new_v4(),
            user_id,
            voice_entry_id,
            dek_id: row.id,
            reason,
            destroyed_at,
        };
        self.audits.write().await.push(record.clone());
        Ok(record)
    }

    async fn rotate(
        &self,
        voice_entry_id: Uuid,
        new_kek_id: &str,
    ) -> Result<DekRotation, DekStoreError> {
        let new_kek = self
            .keks
            .get(new_kek_id)
            .ok_or_else(|| DekStoreError::UnknownKek {
                kek_id: new_kek_id.to_string(),
            })?;

        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(&voice_entry_id)
            .ok_or(DekStoreError::NotFound { voice_entry_id })?;
        if row.is_destroyed() {
            return Err(DekStoreError::Destroyed { voice_entry_id });
        }

        let current_kek = self.wrapping_kek(&row.encryption_version)?;

        let ad = crypto::dek_associated_data(voice_entry_id);
        let dek = crypto::unwrap_dek(&row.encrypted_dek, current_kek, &ad).map_err(|e| {
            DekStoreError::Crypto {
                message: e.to_string(),
            }
        })?;
        row.encrypted_dek =
            crypto::wrap_dek(&dek, new_kek, &ad).map_err(|e| DekStoreError::Crypto {
                message: e.to_string(),
            })?;
        let rotated_at = Utc::now();
        row.key_version += 1;
        row.rotated_at = Some(rotated_at);
        row.encryption_version = new_kek.version().to_string();
        Ok(DekRotation {
            dek_id: row.id,
            key_version: row.key_version,
            encryption_version: row.encryption_version.clone(),
            rotated_at,
        })
    }
}

// ============================================================================
// Entry store
// ============================================================================

pub struct InMemoryEntryStore {
    deks: Arc<InMemoryDekStore>,
    rows: RwLock<HashMap<Uuid, VoiceEntry>>,
    by_handle: RwLock<HashMap<String, Uuid>>,
}

impl InMemoryEntryStore {
    pub fn new(deks: Arc<InMemoryDekStore>) -> Self {
        Self {
            deks,
            rows: RwLock::new(HashMap::new()),
            by_handle: RwLock::new(HashMap::new()),
        }
    }
}

impl EntryStore for InMemoryEntryStore {
    async fn create(&self, new: NewVoiceEntry) -> Result<EntryCreation, EntryStoreError> {
        let mut by_handle = self.by_handle.write().await;
        let mut rows = self.rows.write().await;

        if let Some(existing_id) = by_handle.get(&new.audio_handle) {
            let entry = rows[existing_id].clone();
            return Ok(EntryCreation {
                entry,
                created: false,
            });
        }

        let entry = VoiceEntry {
            id: new.id,
            user_id: new.user_id,
            audio_handle: new.audio_handle.clone(),
            original_filename: new.original_filename,
            duration_seconds: new.duration_seconds,
            is_encrypted: true,
            encryption_version: Some(new.encryption_version),
            created_at: Utc::now(),
        };
        by_handle.insert(new.audio_handle, entry.id);
        rows.insert(entry.id, entry.clone());

        self.deks
            .mint(entry.user_id, entry.id)
            .await
            .map_err(|e| EntryStoreError::Storage {
                message: e.to_string(),
            })?;

        Ok(EntryCreation {
            entry,
            created: true,
        })
    }

    async fn get(&self, entry_id: Uuid) -> Result<Option<VoiceEntry>, EntryStoreError> {
        Ok(self.rows.read().await.get(&entry_id).cloned())
    }
}

// ============================================================================
// Transcription store
// ============================================================================

/// Apply a state-machine transition, mapping a rejected edge to the same
/// `InvalidState` error the Postgres stores produce.
fn apply_transition(
    id: Uuid,
    current: JobStatus,
    event: JobTransition,
) -> Result<JobStatus, PipelineStoreError> {
    JobStateMachine::transition(current, event).map_err(|_| PipelineStoreError::InvalidState {
        id,
        status: current.as_str().to_string(),
        expected: JobStateMachine::edge(event).0.as_str().to_string(),
    })
}

#[derive(Default)]
pub struct InMemoryTranscriptionStore {
    rows: RwLock<HashMap<Uuid, Transcription>>,
    order: RwLock<Vec<Uuid>>,
}

impl InMemoryTranscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TranscriptionStore for InMemoryTranscriptionStore {
    async fn insert(&self, new: NewTranscription) -> Result<Transcription, PipelineStoreError> {
        let row = Transcription {
            id: new.id,
            entry_id: new.entry_id,
            transcribed_text: None,
            segments: None,
            status: JobStatus::Pending,
            model_used: new.model_used,
            provider: new.provider,
            language_code: new.language_code,
            temperature: new.temperature,
            beam_size: new.beam_size,
            enable_diarization: new.enable_diarization,
            speaker_count: new.speaker_count,
            is_primary: false,
            error_message: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        };
        self.rows.write().await.insert(row.id, row.clone());
        self.order.write().await.push(row.id);
        Ok(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transcription>, PipelineStoreError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn claim(&self, id: Uuid) -> Result<bool, PipelineStoreError> {
        let mut rows = self.rows.write().await;
        let row = rows.get_mut(&id).ok_or(PipelineStoreError::NotFound { id })?;
        match JobStateMachine::transition(row.status, JobTransition::Claim) {
            Ok(next) => {
                row.status = next;
                row.started_at = Some(Utc::now());
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        transcribed_text: Vec<u8>,
        segments: Option<Vec<u8>>,
    ) -> Result<(), PipelineStoreError> {
        let mut rows = self.rows.write().await;
        let row = rows.get_mut(&id).ok_or(PipelineStoreError::NotFound { id })?;
        row.status = apply_transition(id, row.status, JobTransition::Complete)?;
        row.transcribed_text = Some(transcribed_text);
        row.segments = segments;
        row.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error_message: String) -> Result<(), PipelineStoreError> {
        let mut rows = self.rows.write().await;
        let row = rows.get_mut(&id).ok_or(PipelineStoreError::NotFound { id })?;
        row.status = apply_transition(id, row.status, JobTransition::Fail)?;
        row.error_message = Some(error_message);
        row.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn try_set_primary(&self, id: Uuid, entry_id: Uuid) -> Result<bool, PipelineStoreError> {
        let mut rows = self.rows.write().await;
        let already = rows
            .values()
            .any(|r| r.entry_id == entry_id && r.is_primary);
        if already {
            return Ok(false);
        }
        let row = rows.get_mut(&id).ok_or(PipelineStoreError::NotFound { id })?;
        if row.status != JobStatus::Completed {
            return Ok(false);
        }
        row.is_primary = true;
        Ok(true)
    }

    async fn promote(&self, id: Uuid, entry_id: Uuid) -> Result<(), PipelineStoreError> {
        let mut rows = self.rows.write().await;
        match rows.get(&id) {
            None => return Err(PipelineStoreError::NotFound { id }),
            Some(row) if row.status != JobStatus::Completed => {
                return Err(PipelineStoreError::InvalidState {
                    id,
                    status: row.status.as_str().to_string(),
                    expected: "completed".to_string(),
                })
            }
            Some(_) => {}
        }
        for row in rows.values_mut() {
            if row.entry_id == entry_id {
                row.is_primary = row.id == id;
            }
        }
        Ok(())
    }

    async fn primary_completed(
        &self,
        entry_id: Uuid,
    ) -> Result<Option<Transcription>, PipelineStoreError> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|r| r.entry_id == entry_id && r.is_primary && r.status == JobStatus::Completed)
            .cloned())
    }

    async fn next_pending(&self) -> Result<Option<Uuid>, PipelineStoreError> {
        let rows = self.rows.read().await;
        let order = self.order.read().await;
        Ok(order
            .iter()
            .find(|id| rows.get(id).map(|r| r.status) == Some(JobStatus::Pending))
            .copied())
    }
}

// ============================================================================
// Cleanup store
// ============================================================================

#[derive(Default)]
pub struct InMemoryCleanupStore {
    rows: RwLock<HashMap<Uuid, CleanedEntry>>,
    order: RwLock<Vec<Uuid>>,
}

impl InMemoryCleanupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CleanupStore for InMemoryCleanupStore {
    async fn insert(&self, new: NewCleanedEntry) -> Result<CleanedEntry, PipelineStoreError> {
        let row = CleanedEntry {
            id: new.id,
            voice_entry_id: new.voice_entry_id,
            transcription_id: new.transcription_id,
            user_id: new.user_id,
            cleaned_text: None,
            user_edited_text: None,
            user_edited_at: None,
            model_name: new.model_name,
            temperature: new.temperature,
            top_p: new.top_p,
            prompt_template_id: new.prompt_template_id,
            llm_raw_response: None,
            status: JobStatus::Pending,
            is_primary: false,
            error_message: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        };
        self.rows.write().await.insert(row.id, row.clone());
        self.order.write().await.push(row.id);
        Ok(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<CleanedEntry>, PipelineStoreError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn claim(&self, id: Uuid) -> Result<bool, PipelineStoreError> {
        let mut rows = self.rows.write().await;
        let row = rows.get_mut(&id).ok_or(PipelineStoreError::NotFound { id })?;
        match JobStateMachine::transition(row.status, JobTransition::Claim) {
            Ok(next) => {
                row.status = next;
                row.started_at = Some(Utc::now());
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        cleaned_text: Vec<u8>,
        llm_raw_response: String,
    ) -> Result<(), PipelineStoreError> {
        let mut rows = self.rows.write().await;
        let row = rows.get_mut(&id).ok_or(PipelineStoreError::NotFound { id })?;
        row.status = apply_transition(id, row.status, JobTransition::Complete)?;
        row.cleaned_text = Some(cleaned_text);
        row.llm_raw_response = Some(llm_raw_response);
        row.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error_message: String) -> Result<(), PipelineStoreError> {
        let mut rows = self.rows.write().await;
        let row = rows.get_mut(&id).ok_or(PipelineStoreError::NotFound { id })?;
        row.status = apply_transition(id, row.status, JobTransition::Fail)?;
        row.error_message = Some(error_message);
        row.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn try_set_primary(
        &self,
        id: Uuid,
        voice_entry_id: Uuid,
    ) -> Result<bool, PipelineStoreError> {
        let mut rows = self.rows.write().await;
        let already = rows
            .values()
            .any(|r| r.voice_entry_id == voice_entry_id && r.is_primary);
        if already {
            return Ok(false);
        }
        let row = rows.get_mut(&id).ok_or(PipelineStoreError::NotFound { id })?;
        if row.status != JobStatus::Completed {
            return Ok(false);
        }
        row.is_primary = true;
        Ok(true)
    }

    async fn set_user_edited(
        &self,
        id: Uuid,
        user_edited_text: Vec<u8>,
    ) -> Result<(), PipelineStoreError> {
        let mut rows = self.rows.write().await;
        let row = rows.get_mut(&id).ok_or(PipelineStoreError::NotFound { id })?;
        row.user_edited_text = Some(user_edited_text);
        row.user_edited_at = Some(Utc::now());
        Ok(())
    }

    async fn next_pending(&self) -> Result<Option<Uuid>, PipelineStoreError> {
        let rows = self.rows.read().await;
        let order = self.order.read().await;
        Ok(order
            .iter()
            .find(|id| rows.get(id).map(|r| r.status) == Some(JobStatus::Pending))
            .copied())
    }
}

// ============================================================================
// Prompt templates
// ============================================================================

pub struct InMemoryTemplateStore {
    templates: RwLock<Vec<PromptTemplate>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self {
            templates: RwLock::new(Vec::new()),
        }
    }

    /// Seeded with the stock cleanup prompts.
    pub fn with_seed_templates() -> Self {
        let mut templates = vec![seed_template(
            1,
            "dream_v1",
            "dream",
            DREAM_PROMPT,
            "Original dream cleanup prompt",
        )];
        for (id, entry_type, description) in [
            (2, "journal", "Generic cleanup prompt for journal entries"),
            (3, "meeting", "Generic cleanup prompt for meeting notes"),
            (4, "note", "Generic cleanup prompt for notes"),
        ] {
            templates.push(seed_template(id, "generic_v1", entry_type, GENERIC_PROMPT, description));
        }
        Self {
            templates: RwLock::new(templates),
        }
    }

    pub async fn push(&self, template: PromptTemplate) {
        self.templates.write().await.push(template);
    }
}

impl Default for InMemoryTemplateStore {
    fn default() -> Self {
        Self::with_seed_templates()
    }
}

fn seed_template(
    id: i32,
    name: &str,
    entry_type: &str,
    prompt_text: &str,
    description: &str,
) -> PromptTemplate {
    PromptTemplate {
        id,
        name: name.to_string(),
        entry_type: entry_type.to_string(),
        prompt_text: prompt_text.to_string(),
        description: Some(description.to_string()),
        is_active: true,
        version: 1,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

const DREAM_PROMPT: &str = r#"You are a dream journal assistant. Clean up this voice transcription of a dream:

Original transcription:
{transcription_text}

Tasks:
1. Fix grammar, punctuation, and capitalization
2. Remove filler words (um, uh, like, you know)
3. Organize into coherent paragraphs
4. Keep the original meaning and emotional tone intact
5. Extract key themes (max 5)
6. Identify emotions present

Respond ONLY with valid JSON in this exact format (no markdown, no extra text):
{
  "cleaned_text": "The cleaned version here",
  "themes": ["theme1", "theme2"],
  "emotions": ["emotion1", "emotion2"]
}"#;

const GENERIC_PROMPT: &str = r#"You are a transcription cleanup assistant. Clean up this voice transcription:

Original transcription:
{transcription_text}

Tasks:
1. Fix grammar, punctuation, and capitalization
2. Remove filler words (um, uh, like, you know)
3. Organize into coherent paragraphs
4. Keep the original meaning and tone intact
5. Extract key topics or themes (max 5)
6. Identify the overall sentiment or emotions

Respond ONLY with valid JSON in this exact format (no markdown, no extra text):
{
  "cleaned_text": "The cleaned version here",
  "themes": ["topic1", "topic2"],
  "emotions": ["emotion1", "emotion2"]
}"#;

impl TemplateStore for InMemoryTemplateStore {
    async fn active_for_entry_type(
        &self,
        entry_type: &str,
    ) -> Result<Option<PromptTemplate>, TemplateStoreError> {
        Ok(self
            .templates
            .read()
            .await
            .iter()
            .filter(|t| t.entry_type == entry_type && t.is_active)
            .max_by_key(|t| t.version)
            .cloned())
    }

    async fn find(
        &self,
        name: &str,
        entry_type: &str,
    ) -> Result<Option<PromptTemplate>, TemplateStoreError> {
        Ok(self
            .templates
            .read()
            .await
            .iter()
            .filter(|t| t.name == name && t.entry_type == entry_type)
            .max_by_key(|t| t.version)
            .cloned())
    }

    async fn get(&self, id: i32) -> Result<Option<PromptTemplate>, TemplateStoreError> {
        Ok(self
            .templates
            .read()
            .await
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }
}

// ============================================================================
// Preferences & audio
// ============================================================================

#[derive(Default)]
pub struct InMemoryPreferencesStore {
    rows: RwLock<HashMap<Uuid, UserPreferences>>,
}

impl InMemoryPreferencesStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, prefs: UserPreferences) {
        self.rows.write().await.insert(prefs.user_id, prefs);
    }
}

impl PreferencesStore for InMemoryPreferencesStore {
    async fn get(&self, user_id: Uuid) -> Result<Option<UserPreferences>, PreferencesStoreError> {
        Ok(self.rows.read().await.get(&user_id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryAudioSource {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryAudioSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, handle: &str, bytes: Vec<u8>) {
        self.blobs.write().await.insert(handle.to_string(), bytes);
    }
}

impl AudioSource for InMemoryAudioSource {
    async fn fetch(&self, handle: &str) -> Result<Vec<u8>, AudioSourceError> {
        self.blobs
            .read()
            .await
            .get(handle)
            .cloned()
            .ok_or_else(|| AudioSourceError::NotFound {
                handle: handle.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kek_ring() -> Arc<KekRing> {
        Arc::new(KekRing::new(Kek::from_bytes([3u8; 32], "local-v1")))
    }

    #[tokio::test]
    async fn entry_creation_is_idempotent_on_audio_handle() {
        let deks = Arc::new(InMemoryDekStore::new(kek_ring()));
        let entries = InMemoryEntryStore::new(deks.clone());

        let new = |id: Uuid| NewVoiceEntry {
            id,
            user_id: Uuid::new_v4(),
            audio_handle: "2026/07/dream.mp3".to_string(),
            original_filename: "dream.mp3".to_string(),
            duration_seconds: 3.0,
            encryption_version: "local-v1".to_string(),
        };

        let first = entries.create(new(Uuid::new_v4())).await.unwrap();
        let second = entries.create(new(Uuid::new_v4())).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.entry.id, second.entry.id);

        // Exactly one DEK was minted
        assert!(deks.get(first.entry.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dek_destroy_is_idempotent_and_audited() {
        let deks = Arc::new(InMemoryDekStore::new(kek_ring()));
        let entries = InMemoryEntryStore::new(deks.clone());
        let user_id = Uuid::new_v4();
        let created = entries
            .create(NewVoiceEntry {
                id: Uuid::new_v4(),
                user_id,
                audio_handle: "a.mp3".to_string(),
                original_filename: "a.mp3".to_string(),
                duration_seconds: 1.0,
                encryption_version: "local-v1".to_string(),
            })
            .await
            .unwrap();
        let entry_id = created.entry.id;

        let first = deks.destroy(user_id, entry_id, None).await.unwrap();
        let second = deks.destroy(user_id, entry_id, None).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(deks.erasure_audit().await.len(), 1);

        assert!(matches!(
            deks.load(entry_id).await,
            Err(DekStoreError::Destroyed { .. })
        ));
    }

    #[tokio::test]
    async fn rotation_moves_the_dek_onto_the_named_kek() {
        // Active v1 plus a standby v2 to rotate onto
        let ring = Arc::new(
            KekRing::new(Kek::from_bytes([3u8; 32], "local-v1"))
                .with_kek(Kek::from_bytes([4u8; 32], "local-v2")),
        );
        let deks = Arc::new(InMemoryDekStore::new(ring));
        let entries = InMemoryEntryStore::new(deks.clone());
        let created = entries
            .create(NewVoiceEntry {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                audio_handle: "r.mp3".to_string(),
                original_filename: "r.mp3".to_string(),
                duration_seconds: 1.0,
                encryption_version: "local-v1".to_string(),
            })
            .await
            .unwrap();
        let entry_id = created.entry.id;

        let before = deks.load(entry_id).await.unwrap();
        let ciphertext = crypto::encrypt(b"still readable", &before, "t:x").unwrap();

        let rotation = deks.rotate(entry_id, "local-v2").await.unwrap();
        assert_eq!(rotation.key_version, 2);
        assert_eq!(rotation.encryption_version, "local-v2");

        let row = deks.get(entry_id).await.unwrap().unwrap();
        assert_eq!(row.encryption_version, "local-v2");

        // The DEK itself is unchanged, so existing ciphertext stays readable
        let after = deks.load(entry_id).await.unwrap();
        assert_eq!(crypto::decrypt(&ciphertext, &after, "t:x").unwrap(), b"still readable");

        // And a rotation target outside the ring is rejected up front
        assert!(matches!(
            deks.rotate(entry_id, "local-v9").await.unwrap_err(),
            DekStoreError::UnknownKek { .. }
        ));
    }

    #[tokio::test]
    async fn concurrent_primary_claims_admit_exactly_one_winner() {
        let store = Arc::new(InMemoryTranscriptionStore::new());
        let entry_id = Uuid::new_v4();

        let mut ids = Vec::new();
        for _ in 0..8 {
            let row = store
                .insert(NewTranscription {
                    id: Uuid::new_v4(),
                    entry_id,
                    provider: "noop".to_string(),
                    model_used: "noop".to_string(),
                    language_code: "en".to_string(),
                    temperature: None,
                    beam_size: None,
                    enable_diarization: false,
                    speaker_count: 1,
                })
                .await
                .unwrap();
            assert!(store.claim(row.id).await.unwrap());
            store.mark_completed(row.id, vec![1], None).await.unwrap();
            ids.push(row.id);
        }

        let mut handles = Vec::new();
        for id in ids {
            let store = store.clone();
            handles.push(tokio::spawn(
                async move { store.try_set_primary(id, entry_id).await },
            ));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn claim_is_compare_and_set() {
        let store = InMemoryTranscriptionStore::new();
        let row = store
            .insert(NewTranscription {
                id: Uuid::new_v4(),
                entry_id: Uuid::new_v4(),
                provider: "noop".to_string(),
                model_used: "noop".to_string(),
                language_code: "en".to_string(),
                temperature: None,
                beam_size: None,
                enable_diarization: false,
                speaker_count: 1,
            })
            .await
            .unwrap();

        assert!(store.claim(row.id).await.unwrap());
        assert!(!store.claim(row.id).await.unwrap());
    }

    #[tokio::test]
    async fn promote_demotes_the_previous_primary() {
        let store = InMemoryTranscriptionStore::new();
        let entry_id = Uuid::new_v4();
        let mut ids = Vec::new();
        for _ in 0..2 {
            let row = store
                .insert(NewTranscription {
                    id: Uuid::new_v4(),
                    entry_id,
                    provider: "noop".to_string(),
                    model_used: "noop".to_string(),
                    language_code: "en".to_string(),
                    temperature: None,
                    beam_size: None,
                    enable_diarization: false,
                    speaker_count: 1,
                })
                .await
                .unwrap();
            store.claim(row.id).await.unwrap();
            store.mark_completed(row.id, vec![0], None).await.unwrap();
            ids.push(row.id);
        }

        assert!(store.try_set_primary(ids[0], entry_id).await.unwrap());
        store.promote(ids[1], entry_id).await.unwrap();

        let first = store.get(ids[0]).await.unwrap().unwrap();
        let second = store.get(ids[1]).await.unwrap().unwrap();
        assert!(!first.is_primary);
        assert!(second.is_primary);
    }

    #[tokio::test]
    async fn active_template_resolution_prefers_highest_version() {
        let store = InMemoryTemplateStore::with_seed_templates();
        store
            .push(PromptTemplate {
                id: 99,
                name: "generic_v2".to_string(),
                entry_type: "journal".to_string(),
                prompt_text: "New prompt {transcription_text}".to_string(),
                description: None,
                is_active: true,
                version: 2,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await;

        let active = store.active_for_entry_type("journal").await.unwrap().unwrap();
        assert_eq!(active.version, 2);

        assert!(store.active_for_entry_type("recipe").await.unwrap().is_none());
    }
}
