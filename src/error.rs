//! Unified Error Handling Module
//!
//! Provides typed errors for the vault engine with user-friendly,
//! path-naming messages. Every surfaced error states whether the vault was
//! left unmodified or, in the one critical save path, that a best-effort
//! restore was attempted.

use std::fmt;
use std::io;

/// Top-level error type for the vault engine.
#[derive(Debug)]
pub enum PassCliError {
    Vault(VaultError),
    Crypto(CryptoError),
    Auth(AuthError),
    Audit(AuditError),
    Policy(PolicyError),
    Sync(SyncError),
    Keychain(KeychainError),
    Io(io::Error),
    Other(String),
}

/// Vault operation errors.
#[derive(Debug, Clone)]
pub enum VaultError {
    NotFound(String),
    AlreadyExists(String),
    VerificationFailed { path: String, reason: String },
    DiskSpace { path: String },
    PermissionDenied { path: String },
    FilesystemNotAtomic { path: String },
    CriticalSaveFailure { path: String, reason: String },
    DuplicateCredential(String),
    CredentialNotFound(String),
    InvalidFormat(String),
    NotUnlocked,
}

/// Cryptographic errors.
#[derive(Debug, Clone)]
pub enum CryptoError {
    InvalidSaltLength(usize),
    KeyDerivation(String),
    Encryption(String),
    AuthFailed,
}

/// Authentication errors.
#[derive(Debug, Clone)]
pub enum AuthError {
    InvalidPassword,
}

/// Audit log errors.
#[derive(Debug, Clone)]
pub enum AuditError {
    SignatureInvalid { timestamps: Vec<String> },
    KeySourceMismatch,
    RotationFailed(String),
}

/// Password policy / rate limiter errors.
#[derive(Debug, Clone)]
pub enum PolicyError {
    Violation { rule: String, message: String },
    RateLimited { remaining_secs: u64 },
}

/// Sync engine errors.
#[derive(Debug, Clone)]
pub enum SyncError {
    Conflict,
    ToolMissing,
    Network(String),
    RemoteNotConfigured,
}

/// Keychain adapter errors.
#[derive(Debug, Clone)]
pub enum KeychainError {
    Unavailable(String),
    NotFound { service: String, identifier: String },
}

impl fmt::Display for PassCliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassCliError::Vault(e) => write!(f, "{}", e),
            PassCliError::Crypto(e) => write!(f, "{}", e),
            PassCliError::Auth(e) => write!(f, "{}", e),
            PassCliError::Audit(e) => write!(f, "{}", e),
            PassCliError::Policy(e) => write!(f, "{}", e),
            PassCliError::Sync(e) => write!(f, "{}", e),
            PassCliError::Keychain(e) => write!(f, "{}", e),
            PassCliError::Io(e) => write!(f, "IO error: {}", e),
            PassCliError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaultError::NotFound(path) => {
                write!(f, "vault not found at '{}'; run init first", path)
            }
            VaultError::AlreadyExists(path) => {
                write!(f, "vault already exists at '{}'; remove it to reset", path)
            }
            VaultError::VerificationFailed { path, reason } => write!(
                f,
                "save failed verifying '{}': {}; vault was not modified",
                path, reason
            ),
            VaultError::DiskSpace { path } => write!(
                f,
                "not enough disk space writing '{}'; vault was not modified",
                path
            ),
            VaultError::PermissionDenied { path } => write!(
                f,
                "permission denied writing '{}'; vault was not modified",
                path
            ),
            VaultError::FilesystemNotAtomic { path } => write!(
                f,
                "'{}' is on a filesystem without atomic rename; refusing to proceed",
                path
            ),
            VaultError::CriticalSaveFailure { path, reason } => write!(
                f,
                "critical: failed to install new vault at '{}' ({}); attempted restore from backup, verify manually",
                path, reason
            ),
            VaultError::DuplicateCredential(service) => {
                write!(f, "credential '{}' already exists", service)
            }
            VaultError::CredentialNotFound(service) => {
                write!(f, "credential '{}' not found", service)
            }
            VaultError::InvalidFormat(msg) => write!(f, "invalid vault format: {}", msg),
            VaultError::NotUnlocked => write!(f, "vault is locked; unlock it first"),
        }
    }
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::InvalidSaltLength(len) => {
                write!(f, "salt must be 32 bytes, got {}", len)
            }
            CryptoError::KeyDerivation(msg) => write!(f, "key derivation failed: {}", msg),
            CryptoError::Encryption(msg) => write!(f, "encryption failed: {}", msg),
            CryptoError::AuthFailed => write!(f, "cannot decrypt: wrong password or tampered data"),
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::InvalidPassword => write!(f, "cannot decrypt: wrong password or tampered data"),
        }
    }
}

impl fmt::Display for AuditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditError::SignatureInvalid { timestamps } => {
                write!(f, "audit signature invalid for entries: {}", timestamps.join(", "))
            }
            AuditError::KeySourceMismatch => {
                write!(f, "audit key source does not match vault content")
            }
            AuditError::RotationFailed(msg) => write!(f, "audit log rotation failed: {}", msg),
        }
    }
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyError::Violation { rule, message } => write!(f, "{}: {}", rule, message),
            PolicyError::RateLimited { remaining_secs } => write!(
                f,
                "too many attempts; wait {} seconds",
                remaining_secs
            ),
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Conflict => write!(
                f,
                "local and remote both changed since last sync; pick a side manually"
            ),
            SyncError::ToolMissing => write!(f, "replication tool not found on PATH"),
            SyncError::Network(msg) => write!(f, "sync transport error: {}", msg),
            SyncError::RemoteNotConfigured => write!(f, "no sync remote configured"),
        }
    }
}

impl fmt::Display for KeychainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeychainError::Unavailable(msg) => write!(f, "credential store unavailable: {}", msg),
            KeychainError::NotFound { service, identifier } => write!(
                f,
                "no entry for service '{}' identifier '{}'",
                service, identifier
            ),
        }
    }
}

impl std::error::Error for PassCliError {}

impl From<io::Error> for PassCliError {
    fn from(err: io::Error) -> Self {
        PassCliError::Io(err)
    }
}

impl From<VaultError> for PassCliError {
    fn from(err: VaultError) -> Self {
        PassCliError::Vault(err)
    }
}

impl From<CryptoError> for PassCliError {
    fn from(err: CryptoError) -> Self {
        PassCliError::Crypto(err)
    }
}

impl From<AuthError> for PassCliError {
    fn from(err: AuthError) -> Self {
        PassCliError::Auth(err)
    }
}

impl From<AuditError> for PassCliError {
    fn from(err: AuditError) -> Self {
        PassCliError::Audit(err)
    }
}

impl From<PolicyError> for PassCliError {
    fn from(err: PolicyError) -> Self {
        PassCliError::Policy(err)
    }
}

impl From<SyncError> for PassCliError {
    fn from(err: SyncError) -> Self {
        PassCliError::Sync(err)
    }
}

impl From<KeychainError> for PassCliError {
    fn from(err: KeychainError) -> Self {
        PassCliError::Keychain(err)
    }
}

impl From<String> for PassCliError {
    fn from(msg: String) -> Self {
        PassCliError::Other(msg)
    }
}

impl From<&str> for PassCliError {
    fn from(msg: &str) -> Self {
        PassCliError::Other(msg.to_string())
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PassCliError>;
