//! Token issuer trait.

use crate::error::Result;
use crate::state::AuthToken;

/// Signs and verifies stateless auth tokens.
///
/// Signing is pure: no shared mutable state, no I/O.
pub trait TokenIssuer: Send + Sync {
    /// Issue a token bound to `subject_email`.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::Signing` if encoding fails.
    fn sign(&self, subject_email: &str) -> Result<AuthToken>;

    /// Verify `token` and return the email it was issued for.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::InvalidToken` if the signature is wrong or the
    /// token has expired.
    fn verify(&self, token: &str) -> Result<String>;
}
