//! Atomic vault persistence: envelope encode/decode and the write-verify-
//! rename save protocol, including the single N-1 backup and orphan temp
//! cleanup.
//!
//! This module knows nothing about credentials or vault content; it is
//! handed opaque encrypted bytes by [`crate::vault`] and a verification
//! closure that attempts to decrypt+parse them.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use rand::RngCore;

use crate::crypto::{NONCE_LEN, SALT_LEN};
use crate::error::VaultError;
use crate::permissions::restrict_to_owner;

/// Current vault envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// `version(1B) | salt(32B) | nonce(12B) | ciphertext+tag(rest)`
#[derive(Debug, Clone)]
pub struct VaultEnvelope {
    pub version: u8,
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

impl VaultEnvelope {
    pub fn new(salt: [u8; SALT_LEN], nonce: [u8; NONCE_LEN], ciphertext: Vec<u8>) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            salt,
            nonce,
            ciphertext,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + SALT_LEN + NONCE_LEN + self.ciphertext.len());
        out.push(self.version);
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VaultError> {
        let header_len = 1 + SALT_LEN + NONCE_LEN;
        if bytes.len() < header_len {
            return Err(VaultError::InvalidFormat("envelope too short".into()));
        }
        let version = bytes[0];
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&bytes[1..1 + SALT_LEN]);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[1 + SALT_LEN..header_len]);
        let ciphertext = bytes[header_len..].to_vec();
        Ok(Self {
            version,
            salt,
            nonce,
            ciphertext,
        })
    }
}

/// Only the header (magic-free here: version + salt length/shape) is
/// inspected; used by [`crate::backup`] to probe a backup without
/// decrypting it.
pub fn probe_header(bytes: &[u8]) -> bool {
    VaultEnvelope::from_bytes(bytes).is_ok()
}

/// Transition markers emitted while [`atomic_save_with_stages`] runs.
/// This module knows nothing about audit entries; callers that care turn
/// these into [`crate::audit::AuditEntry`] records themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStage {
    Started,
    TempFileCreated,
    VerificationStarted,
    VerificationPassed,
    VerificationFailed,
    RenameStarted,
    RenameCompleted,
    RollbackCompleted,
    CleanupOrphanedFiles,
}

fn backup_path(vault_path: &Path) -> PathBuf {
    let mut name = vault_path.file_name().unwrap_or_default().to_os_string();
    name.push(".backup");
    vault_path.with_file_name(name)
}

fn temp_path(vault_path: &Path) -> PathBuf {
    let now = chrono::Utc::now().format("%Y%m%d-%H%M%S");
    let mut rand_bytes = [0u8; 3];
    rand::thread_rng().fill_bytes(&mut rand_bytes);
    let suffix: String = rand_bytes.iter().map(|b| format!("{:02x}", b)).collect();
    let mut name = vault_path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".tmp.{}.{}", now, suffix));
    vault_path.with_file_name(name)
}

fn write_new_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    restrict_to_owner(&file)?;
    file.write_all(data)?;
    file.sync_all()
}

fn io_err_to_vault_err(path: &Path, err: &std::io::Error) -> VaultError {
    let path_str = path.display().to_string();
    match err.kind() {
        std::io::ErrorKind::PermissionDenied => VaultError::PermissionDenied { path: path_str },
        std::io::ErrorKind::OutOfMemory => VaultError::DiskSpace { path: path_str },
        _ if err.raw_os_error() == Some(28) /* ENOSPC */ => {
            VaultError::DiskSpace { path: path_str }
        }
        _ => VaultError::InvalidFormat(format!("{}: {}", path_str, err)),
    }
}

/// The write-verify-rename save protocol of spec.md §4.2.
///
/// `verify` is handed the freshly-written temp file's bytes and must
/// attempt to decrypt+parse them, returning `Err` with a human reason on
/// any failure. On success the temp file replaces the live vault, the
/// previous generation becomes `vault.enc.backup`, and any orphaned temp
/// files from earlier crashed saves are swept up (best effort).
pub fn atomic_save(
    vault_path: &Path,
    new_blob: &[u8],
    verify: impl FnOnce(&[u8]) -> Result<(), String>,
) -> Result<(), VaultError> {
    atomic_save_with_stages(vault_path, new_blob, verify, |_| {})
}

/// Same protocol as [`atomic_save`], additionally reporting each step via
/// `on_stage` as it happens. `vault::Vault::persist` uses this to emit the
/// atomic-save transition audit events; plain `atomic_save` passes a no-op.
pub fn atomic_save_with_stages(
    vault_path: &Path,
    new_blob: &[u8],
    verify: impl FnOnce(&[u8]) -> Result<(), String>,
    mut on_stage: impl FnMut(SaveStage),
) -> Result<(), VaultError> {
    on_stage(SaveStage::Started);

    let dir = vault_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let tmp = temp_path(vault_path);

    // Step 2: write + fsync the temp file.
    write_new_file(&tmp, new_blob).map_err(|e| io_err_to_vault_err(&tmp, &e))?;
    on_stage(SaveStage::TempFileCreated);

    // Step 3: verification. Any failure rolls back and leaves the vault
    // untouched.
    on_stage(SaveStage::VerificationStarted);
    let temp_bytes = match fs::read(&tmp) {
        Ok(b) => b,
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            return Err(io_err_to_vault_err(&tmp, &e));
        }
    };
    if let Err(reason) = verify(&temp_bytes) {
        let _ = fs::remove_file(&tmp);
        on_stage(SaveStage::VerificationFailed);
        return Err(VaultError::VerificationFailed {
            path: vault_path.display().to_string(),
            reason,
        });
    }
    on_stage(SaveStage::VerificationPassed);

    // Step 4: back up the current live vault (if any) to vault.enc.backup,
    // overwriting any prior backup.
    on_stage(SaveStage::RenameStarted);
    let backup = backup_path(vault_path);
    if vault_path.exists() {
        let _ = fs::remove_file(&backup);
        if let Err(e) = fs::rename(vault_path, &backup) {
            let _ = fs::remove_file(&tmp);
            return Err(io_err_to_vault_err(vault_path, &e));
        }
    }

    // Step 5: install the new vault. If this fails, best-effort restore
    // the backup and report a critical error distinct from the consistent
    // failure modes above.
    if let Err(e) = fs::rename(&tmp, vault_path) {
        if backup.exists() {
            let _ = fs::rename(&backup, vault_path);
            on_stage(SaveStage::RollbackCompleted);
        }
        return Err(VaultError::CriticalSaveFailure {
            path: vault_path.display().to_string(),
            reason: e.to_string(),
        });
    }
    on_stage(SaveStage::RenameCompleted);

    // Step 6: sweep orphaned temp files from earlier crashed saves.
    cleanup_orphaned_temps(&dir, vault_path, &tmp);
    on_stage(SaveStage::CleanupOrphanedFiles);

    Ok(())
}

fn vault_stem(vault_path: &Path) -> String {
    vault_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Delete any `<vault>.tmp.*` files other than `keep`. Failures are
/// warnings, not fatal: orphan cleanup never blocks the user's save.
pub fn cleanup_orphaned_temps(dir: &Path, vault_path: &Path, keep: &Path) {
    let stem = vault_stem(vault_path);
    let prefix = format!("{}.tmp.", stem);
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            log::warn!("could not scan {} for orphaned temp files: {}", dir.display(), e);
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path == keep {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(&prefix) {
            if let Err(e) = fs::remove_file(&path) {
                log::warn!("failed to remove orphaned temp file {}: {}", path.display(), e);
            }
        }
    }
}

/// Initialize a brand-new vault file (no prior backup, no verification
/// rollback target needed beyond "delete the half-written temp").
pub fn atomic_init(
    vault_path: &Path,
    blob: &[u8],
    verify: impl FnOnce(&[u8]) -> Result<(), String>,
) -> Result<(), VaultError> {
    atomic_save(vault_path, blob, verify)
}

/// Delete `vault.enc.backup` next to `vault_path`, if present. Called after
/// a successful unlock: the previous generation is no longer needed once
/// the current one has proven readable (see DESIGN.md's resolution of the
/// backup-retention open question).
pub fn delete_backup(vault_path: &Path) {
    let backup = backup_path(vault_path);
    if backup.exists() {
        if let Err(e) = fs::remove_file(&backup) {
            log::warn!("failed to delete previous-generation backup {}: {}", backup.display(), e);
        }
    }
}

/// Path of the N-1 backup for `vault_path`, whether or not it currently
/// exists.
pub fn backup_path_for(vault_path: &Path) -> PathBuf {
    backup_path(vault_path)
}

/// Read an entire file to bytes, mapping IO errors onto [`VaultError`].
pub fn read_file(path: &Path) -> Result<Vec<u8>, VaultError> {
    let mut file = File::open(path).map_err(|e| io_err_to_vault_err(path, &e))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .map_err(|e| io_err_to_vault_err(path, &e))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ok_verify(_: &[u8]) -> Result<(), String> {
        Ok(())
    }

    #[test]
    fn envelope_roundtrip() {
        let env = VaultEnvelope::new([1u8; SALT_LEN], [2u8; NONCE_LEN], vec![3, 4, 5]);
        let bytes = env.to_bytes();
        let decoded = VaultEnvelope::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.version, ENVELOPE_VERSION);
        assert_eq!(decoded.salt, env.salt);
        assert_eq!(decoded.nonce, env.nonce);
        assert_eq!(decoded.ciphertext, env.ciphertext);
    }

    #[test]
    fn envelope_rejects_short_bytes() {
        assert!(VaultEnvelope::from_bytes(&[0u8; 4]).is_err());
    }

    #[test]
    fn atomic_save_creates_file_and_backup_on_resave() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.enc");

        atomic_save(&path, b"v1", ok_verify).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"v1");
        assert!(!backup_path(&path).exists());

        atomic_save(&path, b"v2", ok_verify).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"v2");
        assert_eq!(fs::read(backup_path(&path)).unwrap(), b"v1");
    }

    #[test]
    fn atomic_save_rolls_back_on_verification_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.enc");
        atomic_save(&path, b"v1", ok_verify).unwrap();

        let err = atomic_save(&path, b"bad", |_| Err("boom".to_string())).unwrap_err();
        assert!(matches!(err, VaultError::VerificationFailed { .. }));
        assert_eq!(fs::read(&path).unwrap(), b"v1", "vault must be unchanged");

        let leftover: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftover.is_empty(), "temp file must be removed on rollback");
    }

    #[test]
    fn orphaned_temp_files_are_swept_on_next_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.enc");
        atomic_save(&path, b"v1", ok_verify).unwrap();

        let orphan = dir.path().join("vault.enc.tmp.20200101-000000.deadbe");
        fs::write(&orphan, b"leftover").unwrap();

        atomic_save(&path, b"v2", ok_verify).unwrap();
        assert!(!orphan.exists());
    }

    #[test]
    fn delete_backup_removes_n_minus_1() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.enc");
        atomic_save(&path, b"v1", ok_verify).unwrap();
        atomic_save(&path, b"v2", ok_verify).unwrap();
        assert!(backup_path(&path).exists());
        delete_backup(&path);
        assert!(!backup_path(&path).exists());
    }
}
