//! Manual backup management: user-triggered snapshots distinct from the
//! automatic N-1 backup the save protocol in [`crate::storage`] keeps.

use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::VaultError;
use crate::storage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupKind {
    Automatic,
    Manual,
}

#[derive(Debug, Clone)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub created: DateTime<Utc>,
    pub size: u64,
    pub kind: BackupKind,
}

impl BackupInfo {
    pub fn display_name(&self) -> String {
        format!(
            "{} {} ({} bytes)",
            match self.kind {
                BackupKind::Automatic => "[auto]",
                BackupKind::Manual => "[manual]",
            },
            self.created.format("%Y-%m-%d %H:%M:%S"),
            self.size
        )
    }
}

pub struct ManualBackupManager;

impl ManualBackupManager {
    fn manual_path(vault_path: &Path, timestamp: &str) -> PathBuf {
        let mut name = vault_path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".{}.manual.backup", timestamp));
        vault_path.with_file_name(name)
    }

    /// Copy the current live vault file to a timestamped manual backup.
    pub fn create_manual_backup(vault_path: &Path) -> Result<PathBuf, VaultError> {
        if !vault_path.exists() {
            return Err(VaultError::NotFound(vault_path.display().to_string()));
        }
        let timestamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
        let backup_path = Self::manual_path(vault_path, &timestamp);
        fs::copy(vault_path, &backup_path)
            .map_err(|e| VaultError::InvalidFormat(format!("backup copy failed: {}", e)))?;
        Ok(backup_path)
    }

    /// List both the automatic N-1 backup (if present) and every manual
    /// backup for `vault_path`, newest first.
    pub fn list_backups(vault_path: &Path) -> Result<Vec<BackupInfo>, VaultError> {
        let mut backups = Vec::new();

        let auto_path = storage::backup_path_for(vault_path);
        if let Ok(meta) = fs::metadata(&auto_path) {
            backups.push(BackupInfo {
                path: auto_path,
                created: file_modified(&meta),
                size: meta.len(),
                kind: BackupKind::Automatic,
            });
        }

        let dir = vault_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let stem = vault_path.file_name().unwrap_or_default().to_string_lossy().to_string();
        let prefix = format!("{}.", stem);
        let suffix = ".manual.backup";

        if let Ok(entries) = fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with(&prefix) && name.ends_with(suffix) {
                    if let Ok(meta) = entry.metadata() {
                        backups.push(BackupInfo {
                            path: entry.path(),
                            created: file_modified(&meta),
                            size: meta.len(),
                            kind: BackupKind::Manual,
                        });
                    }
                }
            }
        }

        backups.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(backups)
    }

    /// The single newest backup across both automatic and manual, if any.
    pub fn find_newest_backup(vault_path: &Path) -> Result<Option<BackupInfo>, VaultError> {
        Ok(Self::list_backups(vault_path)?.into_iter().next())
    }

    /// Check that a backup's envelope header parses without attempting to
    /// decrypt it. Cheap corruption probe before offering a backup for
    /// restore.
    pub fn probe_backup(backup_path: &Path) -> bool {
        match fs::read(backup_path) {
            Ok(bytes) => storage::probe_header(&bytes),
            Err(_) => false,
        }
    }

    /// Restore `backup_path` over `vault_path`. Fails closed: a backup
    /// whose header doesn't parse is never installed, and the current
    /// vault (if any) is preserved as its own manual backup first.
    pub fn restore_from_backup(backup_path: &Path, vault_path: &Path) -> Result<(), VaultError> {
        if !Self::probe_backup(backup_path) {
            return Err(VaultError::InvalidFormat(format!(
                "backup '{}' failed header validation; refusing to restore",
                backup_path.display()
            )));
        }
        if vault_path.exists() {
            Self::create_manual_backup(vault_path)?;
        }
        let bytes = fs::read(backup_path)
            .map_err(|e| VaultError::InvalidFormat(format!("backup read failed: {}", e)))?;
        storage::atomic_save(vault_path, &bytes, |written| {
            if storage::probe_header(written) {
                Ok(())
            } else {
                Err("restored backup failed header validation".to_string())
            }
        })
    }

    /// Delete the automatic N-1 backup for `vault_path`, if present. Manual
    /// backups are left untouched; callers that also want those gone must
    /// remove them explicitly.
    pub fn remove_automatic_backup(vault_path: &Path) {
        storage::delete_backup(vault_path);
    }

    /// Keep only the `keep_count` newest manual backups, deleting the
    /// rest. The automatic N-1 backup is never touched here.
    pub fn prune_manual_backups(vault_path: &Path, keep_count: usize) -> Result<usize, VaultError> {
        let manual: Vec<_> = Self::list_backups(vault_path)?
            .into_iter()
            .filter(|b| b.kind == BackupKind::Manual)
            .collect();
        let mut removed = 0;
        for backup in manual.into_iter().skip(keep_count) {
            if fs::remove_file(&backup.path).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn file_modified(meta: &fs::Metadata) -> DateTime<Utc> {
    meta.modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}
