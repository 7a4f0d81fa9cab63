//! Cross-platform "owner-only" file permissions.
//!
//! Every file the core writes (vault, temp, backup, audit log) is created
//! with owner-only read/write. POSIX mode bits give this directly; Windows
//! has no equivalent concept of "mode 0600" so callers there get a
//! best-effort restriction via file attributes and a warning that full ACL
//! support is not implemented by this crate (see DESIGN.md).

use std::fs::File;
use std::path::Path;

#[cfg(unix)]
pub fn restrict_to_owner(file: &File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    file.set_permissions(perms)
}

#[cfg(windows)]
pub fn restrict_to_owner(_file: &File) -> std::io::Result<()> {
    // Real owner-only ACLs require the Windows security descriptor APIs,
    // which this crate does not bind. Files still inherit the parent
    // directory's ACL; callers that need hard guarantees on Windows should
    // place the vault directory under a per-user profile path with
    // restrictive inherited permissions.
    log::warn!("owner-only file permissions are not enforced on this platform");
    Ok(())
}

#[cfg(not(any(unix, windows)))]
pub fn restrict_to_owner(_file: &File) -> std::io::Result<()> {
    log::warn!("owner-only file permissions are not enforced on this platform");
    Ok(())
}

/// True if `path`'s filesystem is expected to provide atomic same-directory
/// renames. Probed once at vault init; §9 requires refusing to initialize
/// (or downgrading with an explicit warning) rather than silently relying
/// on rename atomicity that may not hold on network filesystems.
pub fn probe_rename_atomicity(dir: &Path) -> std::io::Result<bool> {
    let probe_a = dir.join(".pass-cli-rename-probe-a");
    let probe_b = dir.join(".pass-cli-rename-probe-b");
    std::fs::write(&probe_a, b"probe")?;
    let rename_ok = std::fs::rename(&probe_a, &probe_b).is_ok();
    let _ = std::fs::remove_file(&probe_a);
    let _ = std::fs::remove_file(&probe_b);
    Ok(rename_ok)
}
