//! OS credential-store abstraction used by [`crate::audit::AuditKeySource::Bound`].
//!
//! Kept as a trait rather than a direct `keyring` binding so tests run
//! without a real OS keychain and so the `keyring` dependency stays behind
//! the optional `os-keychain` feature.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::KeychainError;

pub trait Keychain {
    fn get(&self, service: &str, identifier: &str) -> Result<Vec<u8>, KeychainError>;
    fn set(&self, service: &str, identifier: &str, secret: &[u8]) -> Result<(), KeychainError>;
    fn delete(&self, service: &str, identifier: &str) -> Result<(), KeychainError>;
}

/// In-process keychain double, used in tests and anywhere the
/// `os-keychain` feature is disabled but an audit key must still be
/// "bound" to something.
#[derive(Default)]
pub struct MemoryKeychain {
    entries: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryKeychain {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Keychain for MemoryKeychain {
    fn get(&self, service: &str, identifier: &str) -> Result<Vec<u8>, KeychainError> {
        let entries = self.entries.lock().expect("keychain mutex poisoned");
        entries
            .get(&(service.to_string(), identifier.to_string()))
            .cloned()
            .ok_or_else(|| KeychainError::NotFound {
                service: service.to_string(),
                identifier: identifier.to_string(),
            })
    }

    fn set(&self, service: &str, identifier: &str, secret: &[u8]) -> Result<(), KeychainError> {
        let mut entries = self.entries.lock().expect("keychain mutex poisoned");
        entries.insert((service.to_string(), identifier.to_string()), secret.to_vec());
        Ok(())
    }

    fn delete(&self, service: &str, identifier: &str) -> Result<(), KeychainError> {
        let mut entries = self.entries.lock().expect("keychain mutex poisoned");
        entries.remove(&(service.to_string(), identifier.to_string()));
        Ok(())
    }
}

/// Backed by the platform credential store (Keychain on macOS, Credential
/// Manager on Windows, the Secret Service on Linux) via the `keyring`
/// crate. Only compiled in when the `os-keychain` feature is enabled.
#[cfg(feature = "os-keychain")]
pub struct OsKeychain;

#[cfg(feature = "os-keychain")]
impl OsKeychain {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "os-keychain")]
impl Default for OsKeychain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "os-keychain")]
impl Keychain for OsKeychain {
    fn get(&self, service: &str, identifier: &str) -> Result<Vec<u8>, KeychainError> {
        let entry = keyring::Entry::new(service, identifier)
            .map_err(|e| KeychainError::Unavailable(e.to_string()))?;
        let secret = entry.get_password().map_err(|e| match e {
            keyring::Error::NoEntry => KeychainError::NotFound {
                service: service.to_string(),
                identifier: identifier.to_string(),
            },
            other => KeychainError::Unavailable(other.to_string()),
        })?;
        Ok(secret.into_bytes())
    }

    fn set(&self, service: &str, identifier: &str, secret: &[u8]) -> Result<(), KeychainError> {
        let entry = keyring::Entry::new(service, identifier)
            .map_err(|e| KeychainError::Unavailable(e.to_string()))?;
        let secret_str = String::from_utf8_lossy(secret);
        entry
            .set_password(&secret_str)
            .map_err(|e| KeychainError::Unavailable(e.to_string()))
    }

    fn delete(&self, service: &str, identifier: &str) -> Result<(), KeychainError> {
        let entry = keyring::Entry::new(service, identifier)
            .map_err(|e| KeychainError::Unavailable(e.to_string()))?;
        match entry.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(KeychainError::Unavailable(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_keychain_roundtrip() {
        let kc = MemoryKeychain::new();
        kc.set("pass-cli", "audit-key", b"secret").unwrap();
        assert_eq!(kc.get("pass-cli", "audit-key").unwrap(), b"secret");
    }

    #[test]
    fn memory_keychain_missing_entry() {
        let kc = MemoryKeychain::new();
        assert!(matches!(
            kc.get("pass-cli", "missing").unwrap_err(),
            KeychainError::NotFound { .. }
        ));
    }

    #[test]
    fn memory_keychain_delete_is_idempotent() {
        let kc = MemoryKeychain::new();
        kc.set("pass-cli", "k", b"v").unwrap();
        kc.delete("pass-cli", "k").unwrap();
        kc.delete("pass-cli", "k").unwrap();
        assert!(kc.get("pass-cli", "k").is_err());
    }
}
