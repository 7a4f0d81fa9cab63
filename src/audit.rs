//! Tamper-evident audit log: every vault-mutating operation is appended as
//! an HMAC-signed entry, independent of the vault's own encryption key.
//!
//! The signing key is chosen once, at vault init, and recorded in the vault
//! content as an [`AuditKeySource`] so it is never re-derived inconsistently
//! across a password change (see DESIGN.md's resolution of the key-source
//! open question).

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use hmac::Mac;
use serde::{Deserialize, Serialize};

use crate::crypto::HmacSha256;
use crate::error::AuditError;
use crate::permissions::restrict_to_owner;

/// Log file rotates once it exceeds this size.
pub const ROTATION_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024;

/// A rotated-out `.old` log older than this is deleted on the next
/// rotation.
pub const OLD_LOG_MAX_AGE_SECS: i64 = 7 * 24 * 60 * 60;

/// Where the HMAC key used to sign audit entries comes from. Chosen once at
/// vault init and stored in the vault content; never switched later.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind")]
pub enum AuditKeySource {
    /// Bound to an OS keychain entry identified by `service`/`identifier`.
    /// The audit log remains verifiable without the master password, at
    /// the cost of depending on that keychain being present.
    Bound { service: String, identifier: String },
    /// Derived from the master password with an independent salt stored
    /// alongside the vault. Fully portable, but unverifiable without
    /// unlocking the vault.
    Derived { salt: [u8; 32] },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Attempt,
    InProgress,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    VaultInit,
    VaultUnlock,
    VaultLock,
    #[serde(rename = "vault_password_change")]
    PasswordChange,
    VaultRemove,
    CredentialAdd,
    CredentialAccess,
    CredentialUpdate,
    CredentialDelete,
    KeychainEnable,
    KeychainStatus,
    BackupCreate,
    BackupRestore,
    TotpAccess,
    TotpAdd,
    TotpUpdate,
    TotpClear,
    SyncPull,
    SyncPush,
    AtomicSaveStarted,
    TempFileCreated,
    VerificationStarted,
    VerificationPassed,
    VerificationFailed,
    AtomicRenameStarted,
    AtomicRenameCompleted,
    RollbackCompleted,
    CleanupOrphanedFiles,
}

/// One signed log line. `signature` covers the canonical tuple of every
/// other field, HMAC-SHA256, hex-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: String,
    pub event_type: EventType,
    pub outcome: Outcome,
    pub credential_name: Option<String>,
    pub machine_id: String,
    pub signature: String,
}

fn canonical_message(
    timestamp: &str,
    event_type: &EventType,
    outcome: Outcome,
    credential_name: Option<&str>,
    machine_id: &str,
) -> String {
    let event = serde_json::to_string(event_type).unwrap_or_default();
    let outcome_str = match outcome {
        Outcome::Success => "success",
        Outcome::Failure => "failure",
        Outcome::Attempt => "attempt",
        Outcome::InProgress => "in_progress",
    };
    format!(
        "{}|{}|{}|{}|{}",
        timestamp,
        event,
        outcome_str,
        credential_name.unwrap_or(""),
        machine_id
    )
}

fn sign(key: &[u8], message: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

impl AuditEntry {
    pub fn new(
        key: &[u8],
        timestamp: String,
        event_type: EventType,
        outcome: Outcome,
        credential_name: Option<String>,
        machine_id: String,
    ) -> Self {
        let message = canonical_message(
            &timestamp,
            &event_type,
            outcome,
            credential_name.as_deref(),
            &machine_id,
        );
        let signature = sign(key, &message);
        Self {
            timestamp,
            event_type,
            outcome,
            credential_name,
            machine_id,
            signature,
        }
    }

    pub fn verify(&self, key: &[u8]) -> bool {
        let message = canonical_message(
            &self.timestamp,
            &self.event_type,
            self.outcome,
            self.credential_name.as_deref(),
            &self.machine_id,
        );
        let expected = sign(key, &message);
        crate::crypto::constant_time_equal(expected.as_bytes(), self.signature.as_bytes())
    }
}

/// Appends signed entries to a rotating, newline-delimited JSON log next to
/// the vault file.
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(vault_path: &Path) -> Self {
        let mut name = vault_path.file_name().unwrap_or_default().to_os_string();
        name.push(".audit.log");
        Self {
            path: vault_path.with_file_name(name),
        }
    }

    fn old_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".old");
        self.path.with_file_name(name)
    }

    /// Append a new signed entry, rotating first if the current log has
    /// grown past [`ROTATION_THRESHOLD_BYTES`].
    pub fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        self.rotate_if_needed()?;
        let line = serde_json::to_string(entry)
            .map_err(|e| AuditError::RotationFailed(e.to_string()))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| AuditError::RotationFailed(e.to_string()))?;
        let _ = restrict_to_owner(&file);
        let mut file = file;
        writeln!(file, "{}", line).map_err(|e| AuditError::RotationFailed(e.to_string()))?;
        file.sync_all().map_err(|e| AuditError::RotationFailed(e.to_string()))
    }

    fn rotate_if_needed(&self) -> Result<(), AuditError> {
        let size = match fs::metadata(&self.path) {
            Ok(m) => m.len(),
            Err(_) => return Ok(()),
        };
        if size < ROTATION_THRESHOLD_BYTES {
            return Ok(());
        }
        let old = self.old_path();
        if let Ok(meta) = fs::metadata(&old) {
            let age_secs = meta
                .modified()
                .ok()
                .and_then(|t| t.elapsed().ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            if age_secs > OLD_LOG_MAX_AGE_SECS {
                let _ = fs::remove_file(&old);
            }
        }
        if old.exists() {
            return Err(AuditError::RotationFailed(format!(
                "{} already exists and is not yet old enough to delete",
                old.display()
            )));
        }
        fs::rename(&self.path, &old).map_err(|e| AuditError::RotationFailed(e.to_string()))
    }

    /// Read every entry across the live log and (if present) the `.old`
    /// sibling, oldest first, verifying each signature. Returns the
    /// timestamps of any entry whose signature does not verify.
    pub fn verify_all(&self, key: &[u8]) -> Result<Vec<String>, AuditError> {
        let mut failing = Vec::new();
        for path in [self.old_path(), self.path.clone()] {
            let contents = match fs::read_to_string(&path) {
                Ok(c) => c,
                Err(_) => continue,
            };
            for line in contents.lines().filter(|l| !l.trim().is_empty()) {
                let entry: AuditEntry = serde_json::from_str(line)
                    .map_err(|e| AuditError::RotationFailed(e.to_string()))?;
                if !entry.verify(key) {
                    failing.push(entry.timestamp.clone());
                }
            }
        }
        Ok(failing)
    }

    /// Delete the live log and its rotated `.old` sibling, if present.
    /// Called by vault removal; best effort, since a vault being destroyed
    /// should not fail over stray audit log cleanup.
    pub fn remove_files(&self) {
        let _ = fs::remove_file(&self.path);
        let _ = fs::remove_file(self.old_path());
    }

    /// Read every entry, oldest first, without verifying. Used by callers
    /// that want to display history and verify separately.
    pub fn read_all(&self) -> Result<Vec<AuditEntry>, AuditError> {
        let mut entries = Vec::new();
        for path in [self.old_path(), self.path.clone()] {
            let contents = match fs::read_to_string(&path) {
                Ok(c) => c,
                Err(_) => continue,
            };
            for line in contents.lines().filter(|l| !l.trim().is_empty()) {
                entries.push(
                    serde_json::from_str(line)
                        .map_err(|e| AuditError::RotationFailed(e.to_string()))?,
                );
            }
        }
        Ok(entries)
    }
}
