//! Per-credential TOTP secrets: generation, code verification, and
//! base32 secret handling. Rendering a scannable QR code is a CLI/TUI
//! presentation concern and stays outside this engine.

use totp_rs::{Algorithm, Secret, TOTP};

use crate::error::CryptoError;

const DIGITS: usize = 6;
const SKEW: u8 = 1;
const STEP: u64 = 30;

/// Generate a fresh random TOTP secret, base32-encoded, ready to store on
/// a [`crate::vault::Credential`] and to hand to the user for enrollment
/// in their authenticator app.
pub fn generate_secret() -> String {
    let raw: [u8; 20] = rand::random();
    Secret::Raw(raw.to_vec()).to_encoded().to_string()
}

fn build_totp(secret_b32: &str) -> Result<TOTP, CryptoError> {
    let secret = Secret::Encoded(secret_b32.to_string());
    let bytes = secret
        .to_bytes()
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    TOTP::new(Algorithm::SHA1, DIGITS, SKEW, STEP, bytes)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// A provisioning URI suitable for manual entry or for a caller's own QR
/// rendering.
pub fn provisioning_uri(secret_b32: &str, account_name: &str, issuer: &str) -> String {
    format!(
        "otpauth://totp/{issuer}:{account}?secret={secret}&issuer={issuer}&digits={digits}&period={period}",
        issuer = issuer,
        account = account_name,
        secret = secret_b32,
        digits = DIGITS,
        period = STEP,
    )
}

/// Verify a user-entered code against `secret_b32`, allowing for clock
/// skew of one step on either side.
pub fn verify_code(secret_b32: &str, code: &str) -> Result<bool, CryptoError> {
    let totp = build_totp(secret_b32)?;
    Ok(totp.check_current(code).unwrap_or(false))
}

/// Generate the current code. Used by tests and by a caller offering a
/// "show my own code" convenience view.
pub fn current_code(secret_b32: &str) -> Result<String, CryptoError> {
    let totp = build_totp(secret_b32)?;
    totp.generate_current()
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}
