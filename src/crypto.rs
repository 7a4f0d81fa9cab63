//! Crypto primitives: password-based key derivation and authenticated
//! encryption for the vault blob.

use aes_gcm::aead::{generic_array::GenericArray, Aead};
use aes_gcm::{Aes256Gcm, KeyInit};
use hmac::Hmac;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;

/// HMAC-SHA256, used for both key derivation internals (not directly) and
/// the audit signature in [`crate::audit`].
pub type HmacSha256 = Hmac<Sha256>;

/// A 32-byte AES-256 / HMAC key. Zeroized on drop by callers that wrap it
/// in a `Zeroizing` buffer.
pub type Key = [u8; 32];

/// PBKDF2 iteration floor mandated by the spec; kept identical between the
/// vault encryption key and the portable-mode audit key.
pub const PBKDF2_ITERATIONS: u32 = 600_000;

/// Required salt length for `derive_key`.
pub const SALT_LEN: usize = 32;

/// AES-GCM nonce length.
pub const NONCE_LEN: usize = 12;

/// Derive a 32-byte key from a password and a 32-byte salt using
/// PBKDF2-HMAC-SHA256 with `PBKDF2_ITERATIONS` rounds.
pub fn derive_key(password: &str, salt: &[u8]) -> Result<Key, CryptoError> {
    if salt.len() != SALT_LEN {
        return Err(CryptoError::InvalidSaltLength(salt.len()));
    }
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    Ok(key)
}

/// Encrypt `plaintext` under `key`, returning a fresh random nonce and the
/// ciphertext with its authentication tag appended.
pub fn encrypt(key: &Key, plaintext: &[u8]) -> Result<([u8; NONCE_LEN], Vec<u8>), CryptoError> {
    let cipher = Aes256Gcm::new(GenericArray::from_slice(key));
    let nonce_bytes: [u8; NONCE_LEN] = rand::random();
    let nonce = GenericArray::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    Ok((nonce_bytes, ciphertext))
}

/// Decrypt `ciphertext` (with its appended tag) under `key` and `nonce`.
/// Any tampering, wrong key, or truncation surfaces as a single
/// [`CryptoError::AuthFailed`] with no distinguishing detail.
pub fn decrypt(key: &Key, nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(GenericArray::from_slice(key));
    let nonce = GenericArray::from_slice(nonce);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::AuthFailed)
}

/// Fixed-time byte comparison. Used wherever two secrets (HMAC signatures,
/// derived keys) must be compared without leaking timing information.
pub fn constant_time_equal(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Overwrite `buf` with zeros. Used on decrypted plaintext before release.
pub fn clear(buf: &mut [u8]) {
    buf.zeroize();
}

/// Mix `key` with `salt` via HMAC-SHA256, used to derive the audit-log
/// signing key from the vault key without retaining the master password.
pub fn hmac_derive(key: &[u8], salt: &[u8]) -> Vec<u8> {
    use hmac::Mac;
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(salt);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_key_rejects_short_salt() {
        let err = derive_key("hunter2", &[0u8; 16]).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidSaltLength(16)));
    }

    #[test]
    fn derive_key_is_deterministic() {
        let salt = [7u8; SALT_LEN];
        let a = derive_key("correct horse", &salt).unwrap();
        let b = derive_key("correct horse", &salt).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn derive_key_differs_by_salt() {
        let a = derive_key("correct horse", &[1u8; SALT_LEN]).unwrap();
        let b = derive_key("correct horse", &[2u8; SALT_LEN]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = derive_key("pw", &[9u8; SALT_LEN]).unwrap();
        let (nonce, ciphertext) = encrypt(&key, b"hello vault").unwrap();
        let plaintext = decrypt(&key, &nonce, &ciphertext).unwrap();
        assert_eq!(plaintext, b"hello vault");
    }

    #[test]
    fn decrypt_fails_on_tamper() {
        let key = derive_key("pw", &[9u8; SALT_LEN]).unwrap();
        let (nonce, mut ciphertext) = encrypt(&key, b"hello vault").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xFF;
        assert!(decrypt(&key, &nonce, &ciphertext).is_err());
    }

    #[test]
    fn decrypt_fails_on_wrong_key() {
        let key = derive_key("pw", &[9u8; SALT_LEN]).unwrap();
        let other = derive_key("different", &[9u8; SALT_LEN]).unwrap();
        let (nonce, ciphertext) = encrypt(&key, b"hello vault").unwrap();
        assert!(decrypt(&other, &nonce, &ciphertext).is_err());
    }

    #[test]
    fn nonce_is_random_per_call() {
        let key = derive_key("pw", &[9u8; SALT_LEN]).unwrap();
        let (n1, _) = encrypt(&key, b"hello").unwrap();
        let (n2, _) = encrypt(&key, b"hello").unwrap();
        assert_ne!(n1, n2);
    }

    #[test]
    fn constant_time_equal_matches_eq() {
        assert!(constant_time_equal(b"abc", b"abc"));
        assert!(!constant_time_equal(b"abc", b"abd"));
        assert!(!constant_time_equal(b"abc", b"ab"));
    }
}
