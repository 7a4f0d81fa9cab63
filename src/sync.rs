//! Sync state machine: decides whether a local vault should push, pull, or
//! flag a conflict against a remote copy, by consulting an external
//! replication tool's structured (JSON) output rather than scraping its
//! human-readable text.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SyncError;
use crate::permissions::restrict_to_owner;

const SYNC_STATE_FILE: &str = ".sync-state";

/// SHA-256 hash of a vault blob, hex-encoded, used to detect local changes
/// without trusting a dirty bit that some caller might forget to set.
pub fn hash_vault_blob(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Path of the `.sync-state` file for a vault, next to the vault itself.
pub fn state_path_for(vault_path: &Path) -> PathBuf {
    let dir = vault_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    dir.join(SYNC_STATE_FILE)
}

/// One remote-side file listing entry, as emitted by `rclone lsjson` (or
/// an equivalent `--json` flag on another replication tool).
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteEntry {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Size")]
    pub size: u64,
    #[serde(rename = "ModTime")]
    pub mod_time: String,
}

/// Outcome of comparing local and remote vault state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncDecision {
    /// Remote is missing or identical to what we last synced; nothing to do.
    Skip,
    /// Remote is newer than our last-known-synced state and we have no
    /// local changes since: pull it down.
    Pull,
    /// We have local changes and the remote hasn't moved: push is the
    /// caller's responsibility, this decision just says it's safe.
    Push,
    /// Both local and remote changed since the last synced state: refuse
    /// to pick a side automatically.
    Conflict,
}

/// Tracks what this vault last agreed with the remote on. Persisted as JSON
/// at `.sync-state` next to the vault file. The remote side of every
/// decision is always re-fetched via [`SyncTransport::list_remote`]; only
/// the last-known state needs to survive between process runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    pub last_push_hash: Option<String>,
    pub last_push_time: Option<String>,
    pub remote_mod_time: Option<String>,
    pub remote_size: Option<u64>,
}

impl SyncState {
    pub fn fresh() -> Self {
        Self {
            last_push_hash: None,
            last_push_time: None,
            remote_mod_time: None,
            remote_size: None,
        }
    }

    /// Load `.sync-state` next to `vault_path`, or a fresh state if it's
    /// missing or unreadable (first sync, or a corrupt state file that
    /// shouldn't block syncing).
    pub fn load(vault_path: &Path) -> Self {
        let path = state_path_for(vault_path);
        match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                log::warn!("sync state at {} is malformed ({}); starting fresh", path.display(), e);
                Self::fresh()
            }),
            Err(_) => Self::fresh(),
        }
    }

    /// Persist this state as `.sync-state` next to `vault_path`.
    pub fn save(&self, vault_path: &Path) -> Result<(), SyncError> {
        let path = state_path_for(vault_path);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| SyncError::Network(format!("failed to serialize sync state: {}", e)))?;
        fs::write(&path, json)
            .map_err(|e| SyncError::Network(format!("failed to write {}: {}", path.display(), e)))?;
        if let Ok(file) = fs::File::open(&path) {
            let _ = restrict_to_owner(&file);
        }
        Ok(())
    }

    /// Decide what to do, given the SHA-256 hash of the live local vault
    /// blob and the remote's current listing for the vault file (`None` if
    /// the remote has no such file yet).
    ///
    /// | local hash vs state | remote mtime/size vs state | action   |
    /// |----------------------|------------------------------|----------|
    /// | unchanged            | unchanged                     | Skip     |
    /// | unchanged            | changed                       | Pull     |
    /// | changed               | unchanged                     | Push     |
    /// | changed               | changed                       | Conflict |
    pub fn decide(&self, local_hash: &str, remote: Option<&RemoteEntry>) -> SyncDecision {
        let local_changed = self.last_push_hash.as_deref() != Some(local_hash);
        let remote_changed = match (&self.remote_mod_time, &self.remote_size, remote) {
            (Some(mod_time), Some(size), Some(entry)) => {
                &entry.mod_time != mod_time || entry.size != *size
            }
            (None, None, None) => false,
            _ => true,
        };

        match (local_changed, remote_changed) {
            (false, false) => SyncDecision::Skip,
            (false, true) => SyncDecision::Pull,
            (true, false) => SyncDecision::Push,
            (true, true) => SyncDecision::Conflict,
        }
    }

    /// Record that `local_hash` was just pushed and is now what the remote
    /// holds.
    pub fn mark_pushed(&mut self, local_hash: String, remote: Option<&RemoteEntry>) {
        self.last_push_hash = Some(local_hash);
        self.last_push_time = Some(chrono::Utc::now().to_rfc3339());
        self.remote_mod_time = remote.map(|r| r.mod_time.clone());
        self.remote_size = remote.map(|r| r.size);
    }

    /// Record that the local vault was just overwritten with the remote's
    /// contents, so the local hash now matches what the remote reports.
    pub fn mark_pulled(&mut self, local_hash: String, remote: Option<&RemoteEntry>) {
        self.last_push_hash = Some(local_hash);
        self.remote_mod_time = remote.map(|r| r.mod_time.clone());
        self.remote_size = remote.map(|r| r.size);
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::fresh()
    }
}

/// Abstraction over the external replication tool invocation, so tests can
/// substitute a fake without shelling out.
pub trait SyncTransport {
    fn list_remote(&self, remote_path: &str) -> Result<Vec<RemoteEntry>, SyncError>;
    fn pull(&self, remote_path: &str, local_path: &Path) -> Result<(), SyncError>;
    fn push(&self, local_path: &Path, remote_path: &str) -> Result<(), SyncError>;
}

/// Shells out to `rclone` (or any tool exposing the same `lsjson`-style
/// subcommands) via a blocking `Command`, the same invocation style used
/// for this crate's other external-tool calls.
pub struct RcloneTransport {
    pub binary: String,
}

impl RcloneTransport {
    pub fn new() -> Self {
        Self {
            binary: "rclone".to_string(),
        }
    }
}

impl Default for RcloneTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncTransport for RcloneTransport {
    fn list_remote(&self, remote_path: &str) -> Result<Vec<RemoteEntry>, SyncError> {
        let output = Command::new(&self.binary)
            .args(["lsjson", remote_path])
            .output()
            .map_err(|_| SyncError::ToolMissing)?;
        if !output.status.success() {
            return Err(SyncError::Network(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|e| SyncError::Network(format!("malformed lsjson output: {}", e)))
    }

    fn pull(&self, remote_path: &str, local_path: &Path) -> Result<(), SyncError> {
        let status = Command::new(&self.binary)
            .args(["sync", remote_path, &local_path.to_string_lossy()])
            .status()
            .map_err(|_| SyncError::ToolMissing)?;
        if status.success() {
            Ok(())
        } else {
            Err(SyncError::Network(format!("pull exited with {}", status)))
        }
    }

    fn push(&self, local_path: &Path, remote_path: &str) -> Result<(), SyncError> {
        let status = Command::new(&self.binary)
            .args(["sync", &local_path.to_string_lossy(), remote_path])
            .status()
            .map_err(|_| SyncError::ToolMissing)?;
        if status.success() {
            Ok(())
        } else {
            Err(SyncError::Network(format!("push exited with {}", status)))
        }
    }
}

/// In-memory transport double for tests: records calls, returns canned
/// listings.
#[cfg(test)]
pub struct FakeTransport {
    pub entries: Vec<RemoteEntry>,
    pub pulls: std::cell::RefCell<Vec<(String, String)>>,
    pub pushes: std::cell::RefCell<Vec<(String, String)>>,
}

#[cfg(test)]
impl SyncTransport for FakeTransport {
    fn list_remote(&self, _remote_path: &str) -> Result<Vec<RemoteEntry>, SyncError> {
        Ok(self.entries.clone())
    }

    fn pull(&self, remote_path: &str, local_path: &Path) -> Result<(), SyncError> {
        self.pulls
            .borrow_mut()
            .push((remote_path.to_string(), local_path.display().to_string()));
        Ok(())
    }

    fn push(&self, local_path: &Path, remote_path: &str) -> Result<(), SyncError> {
        self.pushes
            .borrow_mut()
            .push((local_path.display().to_string(), remote_path.to_string()));
        Ok(())
    }
}
