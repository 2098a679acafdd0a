//! Argon2id password hashing and verification.
//!
//! The dummy hash exists for timing equalization: a login against an
//! unknown username still performs one full verification so its latency
//! falls in the same distribution as a wrong-password attempt against a
//! real user.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use thiserror::Error;

/// A fixed Argon2id-shaped hash of an unguessable string, used only to
/// equalize verification timing for unknown usernames.
pub const DUMMY_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$YXV0aC1kdW1teS1zYWx0$kT6txiEbMt3y6tVcTGSNdpFwBVEFSBLbhr9KTtVkWaI";

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("hashing failed: {0}")]
    Hash(String),
}

/// Hash a password with Argon2id and a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| PasswordError::Hash(e.to_string()))
}

/// Verify a password against a PHC-formatted hash. A malformed hash counts
/// as a failed verification.
#[must_use]
pub fn verify_password(hash: &str, password: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// Burn one verification against the dummy hash (timing equalization).
pub fn equalize_timing(password: &str) {
    let _ = verify_password(DUMMY_HASH, password);
}
