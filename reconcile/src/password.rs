//! Placeholder passwords for provider-only accounts.
//!
//! Every [`UserRecord`](crate::state::UserRecord) carries a password hash,
//! even when the account only ever signs in through an OAuth provider. Those
//! accounts get the Argon2id hash of 32 random bytes; the plaintext is dropped
//! immediately, so no password can ever match it.

use crate::error::{ReconcileError, Result};
use argon2::password_hash::{PasswordHasher as _, SaltString, rand_core::OsRng};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use zeroize::Zeroizing;

/// Number of random bytes behind a placeholder password.
pub const PLACEHOLDER_ENTROPY_BYTES: usize = 32;

/// Hash a fresh random password and return the PHC string.
///
/// CPU-bound; async callers should run it on a blocking thread.
///
/// # Errors
///
/// Returns `ReconcileError::Internal` if Argon2 rejects its parameters.
pub fn random_password_hash() -> Result<String> {
    let mut secret = Zeroizing::new([0u8; PLACEHOLDER_ENTROPY_BYTES]);
    rand::rngs::OsRng.fill_bytes(&mut secret[..]);

    let salt = SaltString::generate(&mut OsRng);
    argon2_instance()?
        .hash_password(&secret[..], &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ReconcileError::Internal(format!("failed to hash placeholder password: {e}")))
}

// Tests use the smallest valid parameters.
fn argon2_instance() -> Result<Argon2<'static>> {
    let params = if cfg!(test) {
        Params::new(1024, 1, 1, None)
    } else {
        Ok(Params::default())
    }
    .map_err(|e| ReconcileError::Internal(format!("invalid Argon2 parameters: {e}")))?;

    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::PasswordHash;

    #[test]
    fn test_random_password_hash_is_argon2id_phc() {
        let hash = random_password_hash().unwrap();
        let parsed = PasswordHash::new(&hash).unwrap();
        assert_eq!(parsed.algorithm.as_str(), "argon2id");
        assert!(parsed.salt.is_some());
    }

    #[test]
    fn test_random_password_hashes_are_unique() {
        let first = random_password_hash().unwrap();
        let second = random_password_hash().unwrap();
        assert_ne!(first, second);
    }
}
