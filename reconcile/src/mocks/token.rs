//! Mock token issuer for testing.

use crate::error::{ReconcileError, Result};
use crate::providers::TokenIssuer;
use crate::state::AuthToken;
use chrono::{Duration, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const PREFIX: &str = "token-for-";

/// Mock token issuer.
///
/// Issues readable tokens of the form `token-for-<email>` and counts how
/// many it has signed.
#[derive(Debug, Clone, Default)]
pub struct MockTokenIssuer {
    signed: Arc<AtomicUsize>,
}

impl MockTokenIssuer {
    /// Create a new mock token issuer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tokens signed so far.
    #[must_use]
    pub fn signed_count(&self) -> usize {
        self.signed.load(Ordering::SeqCst)
    }
}

impl TokenIssuer for MockTokenIssuer {
    fn sign(&self, subject_email: &str) -> Result<AuthToken> {
        self.signed.fetch_add(1, Ordering::SeqCst);
        Ok(AuthToken::new(
            format!("{PREFIX}{subject_email}"),
            subject_email.to_string(),
            Utc::now() + Duration::days(7),
        ))
    }

    fn verify(&self, token: &str) -> Result<String> {
        token
            .strip_prefix(PREFIX)
            .filter(|email| !email.is_empty())
            .map(ToString::to_string)
            .ok_or(ReconcileError::InvalidToken)
    }
}
