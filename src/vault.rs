//! The vault itself: credential storage, locking, and the operations that
//! mutate it. Every mutation goes through a single mutex-guarded state so a
//! `Vault` handle can be shared across threads without callers coordinating
//! locking themselves.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::audit::{AuditEntry, AuditKeySource, AuditLog, EventType, Outcome};
use crate::backup::ManualBackupManager;
use crate::crypto::{self, Key, SALT_LEN};
use crate::error::{PassCliError, VaultError};
use crate::keychain::{Keychain, MemoryKeychain};
use crate::policy::{self, RateLimiter};
use crate::secure_types::{OptionalSecret, SerializableSecret};
use crate::storage::{self, SaveStage, VaultEnvelope};
use crate::sync::{self, SyncDecision, SyncState, SyncTransport};

/// A single stored credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub service: String,
    pub username: String,
    pub password: SerializableSecret,
    pub url: Option<String>,
    pub notes: Option<String>,
    pub category: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
    pub totp_secret: OptionalSecret,
    pub usage_records: Vec<UsageRecord>,
}

/// Caller-supplied context recorded alongside a credential access, so usage
/// history can say where and in what capacity a credential was read.
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    /// Filesystem or repository-relative path the access originated from.
    pub path: String,
    /// Which field was read (`"password"`, `"totp_secret"`, ...), if the
    /// caller distinguishes fields; counted once per access into
    /// [`UsageRecord::field_access_counts`].
    pub field: Option<String>,
    /// Optional label identifying the repository this access is for.
    pub repository_label: Option<String>,
    /// Optional source line number, for callers that can supply one.
    pub line_number: Option<u32>,
}

/// Records a single "credential was retrieved" event, kept on the
/// credential itself for local "last used" reporting independent of the
/// audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub path: String,
    pub accessed_at: chrono::DateTime<Utc>,
    pub field_access_counts: HashMap<String, u32>,
    pub repository_label: Option<String>,
    pub line_number: Option<u32>,
}

/// Everything the encrypted vault blob contains once decrypted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultContent {
    pub id: Uuid,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
    pub credentials: HashMap<String, Credential>,
    pub audit_key_source: AuditKeySource,
    pub metadata: HashMap<String, String>,
}

impl VaultContent {
    fn new(audit_key_source: AuditKeySource) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            credentials: HashMap::new(),
            audit_key_source,
            metadata: HashMap::new(),
        }
    }
}

struct UnlockedState {
    key: Zeroizing<Key>,
    content: VaultContent,
}

/// A handle to one vault file on disk. Locked vaults hold no key material
/// or content in memory; unlocking derives the key and decrypts into an
/// `UnlockedState` guarded by this struct's mutex.
pub struct Vault {
    path: PathBuf,
    state: Mutex<Option<UnlockedState>>,
    rate_limiter: Mutex<RateLimiter>,
    audit_log: AuditLog,
    machine_id: String,
    keychain: Box<dyn Keychain + Send + Sync>,
}

fn machine_id() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown-host".to_string())
}

#[cfg(feature = "os-keychain")]
fn default_keychain() -> Box<dyn Keychain + Send + Sync> {
    Box::new(crate::keychain::OsKeychain::new())
}

#[cfg(not(feature = "os-keychain"))]
fn default_keychain() -> Box<dyn Keychain + Send + Sync> {
    Box::new(MemoryKeychain::new())
}

impl Vault {
    /// Create a brand-new vault at `path`. Fails if a vault already exists
    /// there. `audit_key_source` is fixed for the life of this vault file.
    pub fn init(
        path: impl Into<PathBuf>,
        master_password: &str,
        audit_key_source: AuditKeySource,
    ) -> Result<Self, PassCliError> {
        let path = path.into();
        if path.exists() {
            return Err(VaultError::AlreadyExists(path.display().to_string()).into());
        }
        policy::validate(master_password).map_err(PassCliError::from)?;

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        if !crate::permissions::probe_rename_atomicity(dir)? {
            return Err(VaultError::FilesystemNotAtomic {
                path: dir.display().to_string(),
            }
            .into());
        }

        let salt: [u8; SALT_LEN] = rand::random();
        let key = crypto::derive_key(master_password, &salt).map_err(PassCliError::from)?;
        let content = VaultContent::new(audit_key_source);

        let vault = Self {
            path: path.clone(),
            state: Mutex::new(None),
            rate_limiter: Mutex::new(RateLimiter::new()),
            audit_log: AuditLog::new(&path),
            machine_id: machine_id(),
            keychain: default_keychain(),
        };

        if let AuditKeySource::Bound { service, identifier } = &content.audit_key_source {
            let random_key: [u8; 32] = rand::random();
            vault
                .keychain
                .set(service, identifier, &random_key)
                .map_err(PassCliError::from)?;
        }

        vault.persist(&key, &salt, &content)?;
        vault.append_audit(&content, EventType::VaultInit, Outcome::Success, None)?;

        {
            let mut state = vault.state.lock().expect("vault mutex poisoned");
            *state = Some(UnlockedState {
                key: Zeroizing::new(key),
                content,
            });
        }
        Ok(vault)
    }

    /// Open an existing vault file without unlocking it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PassCliError> {
        let path = path.into();
        if !path.exists() {
            return Err(VaultError::NotFound(path.display().to_string()).into());
        }
        Ok(Self {
            audit_log: AuditLog::new(&path),
            path,
            state: Mutex::new(None),
            rate_limiter: Mutex::new(RateLimiter::new()),
            machine_id: machine_id(),
            keychain: default_keychain(),
        })
    }

    /// Derive the key, decrypt, and parse the vault content, subject to the
    /// rate limiter. On success the N-1 backup is no longer needed and is
    /// removed.
    pub fn unlock(&self, master_password: &str) -> Result<(), PassCliError> {
        {
            let mut limiter = self.rate_limiter.lock().expect("rate limiter poisoned");
            limiter.check().map_err(PassCliError::from)?;
        }

        let result = self.try_unlock(master_password);

        let mut limiter = self.rate_limiter.lock().expect("rate limiter poisoned");
        match &result {
            Ok(()) => limiter.record_success(),
            Err(_) => limiter.record_failure(),
        }
        result
    }

    fn try_unlock(&self, master_password: &str) -> Result<(), PassCliError> {
        let bytes = storage::read_file(&self.path).map_err(PassCliError::from)?;
        let envelope = VaultEnvelope::from_bytes(&bytes).map_err(PassCliError::from)?;
        let key = crypto::derive_key(master_password, &envelope.salt).map_err(PassCliError::from)?;
        let mut plaintext = crypto::decrypt(&key, &envelope.nonce, &envelope.ciphertext)
            .map_err(PassCliError::from)?;
        let parsed: Result<VaultContent, _> = serde_json::from_slice(&plaintext);
        let content = match parsed {
            Ok(c) => c,
            Err(e) => {
                crypto::clear(&mut plaintext);
                return Err(VaultError::InvalidFormat(e.to_string()).into());
            }
        };
        crypto::clear(&mut plaintext);

        storage::delete_backup(&self.path);

        let mut state = self.state.lock().expect("vault mutex poisoned");
        *state = Some(UnlockedState {
            key: Zeroizing::new(key),
            content,
        });
        drop(state);

        self.append_audit_self(EventType::VaultUnlock, Outcome::Success, None)?;
        Ok(())
    }

    /// Zeroize the in-memory key and content. Idempotent on an already
    /// locked vault.
    pub fn lock(&self) -> Result<(), PassCliError> {
        let had_state = {
            let mut state = self.state.lock().expect("vault mutex poisoned");
            state.take().is_some()
        };
        if had_state {
            self.append_audit_self(EventType::VaultLock, Outcome::Success, None)?;
        }
        Ok(())
    }

    pub fn is_unlocked(&self) -> bool {
        self.state.lock().expect("vault mutex poisoned").is_some()
    }

    fn with_content<R>(&self, f: impl FnOnce(&VaultContent) -> R) -> Result<R, PassCliError> {
        let state = self.state.lock().expect("vault mutex poisoned");
        let unlocked = state.as_ref().ok_or(VaultError::NotUnlocked)?;
        Ok(f(&unlocked.content))
    }

    fn mutate_and_save(
        &self,
        f: impl FnOnce(&mut VaultContent) -> Result<(), PassCliError>,
    ) -> Result<(), PassCliError> {
        let (key, content) = {
            let mut state = self.state.lock().expect("vault mutex poisoned");
            let unlocked = state.as_mut().ok_or(VaultError::NotUnlocked)?;
            f(&mut unlocked.content)?;
            unlocked.content.updated_at = Utc::now();
            (*unlocked.key, unlocked.content.clone())
        };

        self.save_content(&key, &content)
    }

    fn save_content(&self, key: &Key, content: &VaultContent) -> Result<(), PassCliError> {
        let bytes = storage::read_file(&self.path).map_err(PassCliError::from)?;
        let salt = VaultEnvelope::from_bytes(&bytes).map_err(PassCliError::from)?.salt;
        self.persist(key, &salt, content)
    }

    fn persist(&self, key: &Key, salt: &[u8; SALT_LEN], content: &VaultContent) -> Result<(), PassCliError> {
        let mut plaintext = serde_json::to_vec(content)
            .map_err(|e| PassCliError::from(VaultError::InvalidFormat(e.to_string())))?;
        let (nonce, ciphertext) = crypto::encrypt(key, &plaintext).map_err(PassCliError::from)?;
        crypto::clear(&mut plaintext);
        let envelope = VaultEnvelope::new(*salt, nonce, ciphertext);
        let blob = envelope.to_bytes();

        let verify_key = *key;
        storage::atomic_save_with_stages(
            &self.path,
            &blob,
            move |bytes| {
                let envelope = VaultEnvelope::from_bytes(bytes).map_err(|e| e.to_string())?;
                let mut plaintext =
                    crypto::decrypt(&verify_key, &envelope.nonce, &envelope.ciphertext)
                        .map_err(|e| e.to_string())?;
                let parsed: Result<VaultContent, _> = serde_json::from_slice(&plaintext);
                crypto::clear(&mut plaintext);
                parsed.map(|_| ()).map_err(|e| e.to_string())
            },
            |stage| self.audit_save_stage(key, content, stage),
        )
        .map_err(PassCliError::from)
    }

    /// Turn a [`SaveStage`] into an audit entry, resolving the audit key
    /// from the `key` this save is using rather than `self.state` (which,
    /// during `Vault::init`'s first save, hasn't been populated yet).
    /// Best effort: a logging failure here must never abort the save it's
    /// describing.
    fn audit_save_stage(&self, key: &Key, content: &VaultContent, stage: SaveStage) {
        let (event_type, outcome) = match stage {
            SaveStage::Started => (EventType::AtomicSaveStarted, Outcome::InProgress),
            SaveStage::TempFileCreated => (EventType::TempFileCreated, Outcome::Success),
            SaveStage::VerificationStarted => (EventType::VerificationStarted, Outcome::InProgress),
            SaveStage::VerificationPassed => (EventType::VerificationPassed, Outcome::Success),
            SaveStage::VerificationFailed => (EventType::VerificationFailed, Outcome::Failure),
            SaveStage::RenameStarted => (EventType::AtomicRenameStarted, Outcome::InProgress),
            SaveStage::RenameCompleted => (EventType::AtomicRenameCompleted, Outcome::Success),
            SaveStage::RollbackCompleted => (EventType::RollbackCompleted, Outcome::Success),
            SaveStage::CleanupOrphanedFiles => (EventType::CleanupOrphanedFiles, Outcome::Success),
        };
        let audit_key = match &content.audit_key_source {
            AuditKeySource::Derived { salt } => crypto::hmac_derive(key, salt),
            AuditKeySource::Bound { service, identifier } => {
                match self.keychain.get(service, identifier) {
                    Ok(k) => k,
                    Err(e) => {
                        log::warn!("failed to resolve audit key for atomic-save event: {}", e);
                        return;
                    }
                }
            }
        };
        let entry = AuditEntry::new(
            &audit_key,
            Utc::now().to_rfc3339(),
            event_type,
            outcome,
            None,
            self.machine_id.clone(),
        );
        if let Err(e) = self.audit_log.append(&entry) {
            log::warn!("failed to record atomic-save audit event: {}", e);
        }
    }

    fn append_audit_self(
        &self,
        event_type: EventType,
        outcome: Outcome,
        credential_name: Option<String>,
    ) -> Result<(), PassCliError> {
        let content = self.with_content(|c| c.clone())?;
        self.append_audit(&content, event_type, outcome, credential_name)
    }

    fn append_audit(
        &self,
        content: &VaultContent,
        event_type: EventType,
        outcome: Outcome,
        credential_name: Option<String>,
    ) -> Result<(), PassCliError> {
        let audit_key = self.resolve_audit_key(content)?;
        let entry = AuditEntry::new(
            &audit_key,
            Utc::now().to_rfc3339(),
            event_type,
            outcome,
            credential_name,
            self.machine_id.clone(),
        );
        self.audit_log.append(&entry).map_err(PassCliError::from)
    }

    fn resolve_audit_key(&self, content: &VaultContent) -> Result<Vec<u8>, PassCliError> {
        match &content.audit_key_source {
            AuditKeySource::Derived { salt } => {
                // Mix the vault encryption key with the audit salt via
                // HMAC rather than re-deriving from the master password,
                // since the password itself is never retained after
                // unlock.
                let state = self.state.lock().expect("vault mutex poisoned");
                let unlocked = state.as_ref().ok_or(VaultError::NotUnlocked)?;
                Ok(crypto::hmac_derive(unlocked.key.as_ref(), salt))
            }
            AuditKeySource::Bound { service, identifier } => {
                self.keychain.get(service, identifier).map_err(PassCliError::from)
            }
        }
    }

    /// Add a new credential. Errs if one already exists under this
    /// service name.
    pub fn add_credential(&self, credential: Credential) -> Result<(), PassCliError> {
        let service = credential.service.clone();
        let result = self.mutate_and_save(|content| {
            if content.credentials.contains_key(&service) {
                return Err(VaultError::DuplicateCredential(service.clone()).into());
            }
            content.credentials.insert(service.clone(), credential);
            Ok(())
        });
        self.append_audit_self(
            EventType::CredentialAdd,
            if result.is_ok() { Outcome::Success } else { Outcome::Failure },
            Some(service),
        )?;
        result
    }

    /// Fetch a credential by service name, recording a usage record and an
    /// audit entry. `caller_context` identifies where the access came from;
    /// pass [`CallerContext::default`] when the caller has nothing to add.
    pub fn get_credential(
        &self,
        service: &str,
        caller_context: CallerContext,
    ) -> Result<Credential, PassCliError> {
        let result = self.mutate_and_save(|content| {
            let cred = content
                .credentials
                .get_mut(service)
                .ok_or_else(|| VaultError::CredentialNotFound(service.to_string()))?;
            let mut field_access_counts = HashMap::new();
            if let Some(field) = &caller_context.field {
                field_access_counts.insert(field.clone(), 1);
            }
            cred.usage_records.push(UsageRecord {
                path: caller_context.path.clone(),
                accessed_at: Utc::now(),
                field_access_counts,
                repository_label: caller_context.repository_label.clone(),
                line_number: caller_context.line_number,
            });
            Ok(())
        });
        self.append_audit_self(
            EventType::CredentialAccess,
            if result.is_ok() { Outcome::Success } else { Outcome::Failure },
            Some(service.to_string()),
        )?;
        result?;
        self.with_content(|content| {
            content
                .credentials
                .get(service)
                .cloned()
                .ok_or_else(|| VaultError::CredentialNotFound(service.to_string()).into())
        })?
    }

    pub fn update_credential(
        &self,
        service: &str,
        update: impl FnOnce(&mut Credential),
    ) -> Result<(), PassCliError> {
        let result = self.mutate_and_save(|content| {
            let cred = content
                .credentials
                .get_mut(service)
                .ok_or_else(|| VaultError::CredentialNotFound(service.to_string()))?;
            update(cred);
            cred.updated_at = Utc::now();
            Ok(())
        });
        self.append_audit_self(
            EventType::CredentialUpdate,
            if result.is_ok() { Outcome::Success } else { Outcome::Failure },
            Some(service.to_string()),
        )?;
        result
    }

    pub fn delete_credential(&self, service: &str) -> Result<(), PassCliError> {
        let result = self.mutate_and_save(|content| {
            content
                .credentials
                .remove(service)
                .map(|_| ())
                .ok_or_else(|| VaultError::CredentialNotFound(service.to_string()).into())
        });
        self.append_audit_self(
            EventType::CredentialDelete,
            if result.is_ok() { Outcome::Success } else { Outcome::Failure },
            Some(service.to_string()),
        )?;
        result
    }

    pub fn list_credentials(&self) -> Result<Vec<String>, PassCliError> {
        self.with_content(|content| {
            let mut names: Vec<String> = content.credentials.keys().cloned().collect();
            names.sort();
            names
        })
    }

    /// Re-encrypt the vault under a new master password and salt.
    pub fn change_password(&self, new_password: &str) -> Result<(), PassCliError> {
        policy::validate(new_password).map_err(PassCliError::from)?;
        let new_salt: [u8; SALT_LEN] = rand::random();
        let new_key = crypto::derive_key(new_password, &new_salt).map_err(PassCliError::from)?;

        let content = {
            let mut state = self.state.lock().expect("vault mutex poisoned");
            let unlocked = state.as_mut().ok_or(VaultError::NotUnlocked)?;
            unlocked.key = Zeroizing::new(new_key);
            unlocked.content.clone()
        };

        let result = self.persist(&new_key, &new_salt, &content);
        self.append_audit(
            &content,
            EventType::PasswordChange,
            if result.is_ok() { Outcome::Success } else { Outcome::Failure },
            None,
        )?;
        result
    }

    /// Verify every audit log entry's signature against the key this
    /// vault's content declares. Requires the vault to be unlocked when
    /// the source is `Derived`.
    pub fn verify_audit_log(&self) -> Result<Vec<String>, PassCliError> {
        let content = self.with_content(|c| c.clone())?;
        let key = self.resolve_audit_key(&content)?;
        self.audit_log.verify_all(&key).map_err(PassCliError::from)
    }

    /// Like [`Self::append_audit_self`], but a failure (most commonly "vault
    /// is locked") is logged rather than propagated. Used for operations
    /// that act on vault files without requiring an unlocked handle.
    fn append_audit_self_best_effort(
        &self,
        event_type: EventType,
        outcome: Outcome,
        credential_name: Option<String>,
    ) {
        if let Err(e) = self.append_audit_self(event_type, outcome, credential_name) {
            log::warn!("failed to record audit event: {}", e);
        }
    }

    /// Permanently delete this vault: the live file, its N-1 automatic
    /// backup, its `.sync-state`, and its audit log. Manual backups are
    /// preserved, since removing a vault should not destroy a user's own
    /// explicit snapshots. If the audit key is bound to a keychain entry
    /// and the vault is currently unlocked, that entry is revoked too.
    pub fn remove_vault(&self) -> Result<(), PassCliError> {
        if !self.path.exists() {
            return Err(VaultError::NotFound(self.path.display().to_string()).into());
        }

        if let Ok(content) = self.with_content(|c| c.clone()) {
            if let AuditKeySource::Bound { service, identifier } = &content.audit_key_source {
                if let Err(e) = self.keychain.delete(service, identifier) {
                    log::warn!("failed to revoke keychain entry for removed vault: {}", e);
                }
            }
        }

        ManualBackupManager::remove_automatic_backup(&self.path);
        let _ = fs::remove_file(sync::state_path_for(&self.path));
        self.audit_log.remove_files();

        fs::remove_file(&self.path)
            .map_err(|e| VaultError::InvalidFormat(format!("failed to remove vault file: {}", e)))?;

        self.state.lock().expect("vault mutex poisoned").take();
        Ok(())
    }

    /// Snapshot the live vault file as a manual backup.
    pub fn create_manual_backup(&self) -> Result<PathBuf, PassCliError> {
        let result = ManualBackupManager::create_manual_backup(&self.path);
        self.append_audit_self_best_effort(
            EventType::BackupCreate,
            if result.is_ok() { Outcome::Success } else { Outcome::Failure },
            None,
        );
        result.map_err(PassCliError::from)
    }

    /// Restore `backup_path` over the live vault file. The vault should be
    /// locked (or reopened) afterward, since any content held in memory may
    /// no longer match what's on disk.
    pub fn restore_from_backup(&self, backup_path: &Path) -> Result<(), PassCliError> {
        let result = ManualBackupManager::restore_from_backup(backup_path, &self.path);
        self.append_audit_self_best_effort(
            EventType::BackupRestore,
            if result.is_ok() { Outcome::Success } else { Outcome::Failure },
            None,
        );
        result.map_err(PassCliError::from)
    }

    fn remote_entry_for<'a>(
        &self,
        entries: &'a [sync::RemoteEntry],
    ) -> Option<&'a sync::RemoteEntry> {
        let file_name = self.path.file_name()?.to_str()?;
        entries.iter().find(|e| e.name == file_name)
    }

    /// Decide what a sync should do next, by comparing the live local vault
    /// blob against the persisted `.sync-state` and the transport's current
    /// remote listing. Operates at the file level; the vault does not need
    /// to be unlocked.
    pub fn sync_decision(
        &self,
        transport: &dyn SyncTransport,
        remote_path: &str,
    ) -> Result<SyncDecision, PassCliError> {
        let bytes = storage::read_file(&self.path).map_err(PassCliError::from)?;
        let local_hash = sync::hash_vault_blob(&bytes);
        let state = SyncState::load(&self.path);
        let entries = transport.list_remote(remote_path).map_err(PassCliError::from)?;
        let remote_entry = self.remote_entry_for(&entries);
        Ok(state.decide(&local_hash, remote_entry))
    }

    /// Pull the remote copy down over the local vault file and record the
    /// new sync state. The vault should be locked (or reopened) afterward.
    pub fn smart_pull(&self, transport: &dyn SyncTransport, remote_path: &str) -> Result<(), PassCliError> {
        transport.pull(remote_path, &self.path).map_err(PassCliError::from)?;
        let bytes = storage::read_file(&self.path).map_err(PassCliError::from)?;
        let local_hash = sync::hash_vault_blob(&bytes);
        let entries = transport.list_remote(remote_path).map_err(PassCliError::from)?;
        let remote_entry = self.remote_entry_for(&entries);

        let mut state = SyncState::load(&self.path);
        state.mark_pulled(local_hash, remote_entry);
        state.save(&self.path).map_err(PassCliError::from)?;

        self.append_audit_self_best_effort(EventType::SyncPull, Outcome::Success, None);
        Ok(())
    }

    /// Push the local vault file to the remote and record the new sync
    /// state.
    pub fn smart_push(&self, transport: &dyn SyncTransport, remote_path: &str) -> Result<(), PassCliError> {
        let bytes = storage::read_file(&self.path).map_err(PassCliError::from)?;
        let local_hash = sync::hash_vault_blob(&bytes);
        transport.push(&self.path, remote_path).map_err(PassCliError::from)?;
        let entries = transport.list_remote(remote_path).map_err(PassCliError::from)?;
        let remote_entry = self.remote_entry_for(&entries);

        let mut state = SyncState::load(&self.path);
        state.mark_pushed(local_hash, remote_entry);
        state.save(&self.path).map_err(PassCliError::from)?;

        self.append_audit_self_best_effort(EventType::SyncPush, Outcome::Success, None);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Vault {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_credential(service: &str) -> Credential {
        let now = Utc::now();
        Credential {
            service: service.to_string(),
            username: "alice".to_string(),
            password: SerializableSecret::new("s3cr3t-Password1".to_string()),
            url: None,
            notes: None,
            category: None,
            created_at: now,
            updated_at: now,
            totp_secret: OptionalSecret::none(),
            usage_records: Vec::new(),
        }
    }

    fn derived_source() -> AuditKeySource {
        AuditKeySource::Derived { salt: [5u8; SALT_LEN] }
    }

    #[test]
    fn init_rejects_weak_password() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.enc");
        let err = Vault::init(&path, "short", derived_source()).unwrap_err();
        assert!(matches!(err, PassCliError::Policy(_)));
    }

    #[test]
    fn init_then_unlock_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.enc");
        let vault = Vault::init(&path, "Correct-Horse9Battery", derived_source()).unwrap();
        assert!(vault.is_unlocked());
        vault.lock().unwrap();
        assert!(!vault.is_unlocked());

        let reopened = Vault::open(&path).unwrap();
        reopened.unlock("Correct-Horse9Battery").unwrap();
        assert!(reopened.is_unlocked());
    }

    #[test]
    fn unlock_fails_with_wrong_password() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.enc");
        Vault::init(&path, "Correct-Horse9Battery", derived_source()).unwrap();

        let reopened = Vault::open(&path).unwrap();
        let err = reopened.unlock("wrong-password-here").unwrap_err();
        assert!(matches!(err, PassCliError::Crypto(_)));
    }

    #[test]
    fn add_get_list_delete_credential() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.enc");
        let vault = Vault::init(&path, "Correct-Horse9Battery", derived_source()).unwrap();

        vault.add_credential(test_credential("github")).unwrap();
        assert_eq!(vault.list_credentials().unwrap(), vec!["github".to_string()]);

        let fetched = vault
            .get_credential(
                "github",
                CallerContext {
                    path: "demo.rs".to_string(),
                    field: Some("password".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(fetched.username, "alice");
        assert_eq!(fetched.usage_records.len(), 1);
        assert_eq!(fetched.usage_records[0].path, "demo.rs");
        assert_eq!(fetched.usage_records[0].field_access_counts.get("password"), Some(&1));

        vault.delete_credential("github").unwrap();
        assert!(vault.list_credentials().unwrap().is_empty());
    }

    #[test]
    fn add_duplicate_credential_errs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.enc");
        let vault = Vault::init(&path, "Correct-Horse9Battery", derived_source()).unwrap();
        vault.add_credential(test_credential("github")).unwrap();
        let err = vault.add_credential(test_credential("github")).unwrap_err();
        assert!(matches!(err, PassCliError::Vault(VaultError::DuplicateCredential(_))));
    }

    #[test]
    fn operations_on_locked_vault_err() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.enc");
        let vault = Vault::init(&path, "Correct-Horse9Battery", derived_source()).unwrap();
        vault.lock().unwrap();
        let err = vault.list_credentials().unwrap_err();
        assert!(matches!(err, PassCliError::Vault(VaultError::NotUnlocked)));
    }

    #[test]
    fn change_password_then_unlock_with_new_password() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.enc");
        let vault = Vault::init(&path, "Correct-Horse9Battery", derived_source()).unwrap();
        vault.add_credential(test_credential("github")).unwrap();
        vault.change_password("New-Correct9Battery!").unwrap();
        vault.lock().unwrap();

        let reopened = Vault::open(&path).unwrap();
        reopened.unlock("New-Correct9Battery!").unwrap();
        assert_eq!(reopened.list_credentials().unwrap(), vec!["github".to_string()]);
    }

    #[test]
    fn repeated_failed_unlocks_trigger_rate_limit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.enc");
        Vault::init(&path, "Correct-Horse9Battery", derived_source()).unwrap();
        let reopened = Vault::open(&path).unwrap();

        for _ in 0..policy::MAX_FAILURES {
            let _ = reopened.unlock("wrong-password-here");
        }
        let err = reopened.unlock("wrong-password-here").unwrap_err();
        assert!(matches!(err, PassCliError::Policy(_)));
    }

    #[test]
    fn audit_log_verifies_after_operations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.enc");
        let vault = Vault::init(&path, "Correct-Horse9Battery", derived_source()).unwrap();
        vault.add_credential(test_credential("github")).unwrap();
        vault.get_credential("github", CallerContext::default()).unwrap();

        let failing = vault.verify_audit_log().unwrap();
        assert!(failing.is_empty());
    }

    #[test]
    fn remove_vault_deletes_live_file_and_preserves_manual_backup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.enc");
        let vault = Vault::init(&path, "Correct-Horse9Battery", derived_source()).unwrap();
        vault.add_credential(test_credential("github")).unwrap();
        let manual = vault.create_manual_backup().unwrap();

        vault.remove_vault().unwrap();

        assert!(!path.exists());
        assert!(manual.exists(), "manual backups must survive vault removal");
        assert!(!vault.is_unlocked());
    }

    #[test]
    fn remove_vault_errs_if_already_removed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.enc");
        let vault = Vault::init(&path, "Correct-Horse9Battery", derived_source()).unwrap();
        vault.remove_vault().unwrap();
        let err = vault.remove_vault().unwrap_err();
        assert!(matches!(err, PassCliError::Vault(VaultError::NotFound(_))));
    }

    #[test]
    fn manual_backup_then_restore_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.enc");
        let vault = Vault::init(&path, "Correct-Horse9Battery", derived_source()).unwrap();
        vault.add_credential(test_credential("github")).unwrap();
        let backup = vault.create_manual_backup().unwrap();

        vault.add_credential(test_credential("gitlab")).unwrap();
        assert_eq!(vault.list_credentials().unwrap().len(), 2);

        vault.restore_from_backup(&backup).unwrap();
        vault.lock().unwrap();
        let reopened = Vault::open(&path).unwrap();
        reopened.unlock("Correct-Horse9Battery").unwrap();
        assert_eq!(reopened.list_credentials().unwrap(), vec!["github".to_string()]);
    }

    #[test]
    fn sync_decision_reflects_local_and_remote_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.enc");
        let vault = Vault::init(&path, "Correct-Horse9Battery", derived_source()).unwrap();

        let transport = crate::sync::FakeTransport {
            entries: Vec::new(),
            pulls: std::cell::RefCell::new(Vec::new()),
            pushes: std::cell::RefCell::new(Vec::new()),
        };

        let decision = vault.sync_decision(&transport, "remote:vault.enc").unwrap();
        assert_eq!(decision, crate::sync::SyncDecision::Push);

        vault.smart_push(&transport, "remote:vault.enc").unwrap();
        assert_eq!(transport.pushes.borrow().len(), 1);

        let decision = vault.sync_decision(&transport, "remote:vault.enc").unwrap();
        assert_eq!(decision, crate::sync::SyncDecision::Skip);
    }
}
