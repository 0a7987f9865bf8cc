//! Mock identity fetcher for testing.

use crate::error::ProviderError;
use crate::providers::IdentityFetcher;
use crate::state::ProviderIdentity;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mock identity fetcher.
///
/// Resolves authorization codes registered with [`with_code`](Self::with_code);
/// any other code is rejected like an expired code would be.
#[derive(Debug, Clone, Default)]
pub struct MockIdentityFetcher {
    identities: Arc<Mutex<HashMap<String, ProviderIdentity>>>,
    unavailable: bool,
}

impl MockIdentityFetcher {
    /// Create a fetcher that knows no codes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fetcher whose provider is down.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Register `code` as resolving to `identity`.
    #[must_use]
    pub fn with_code(self, code: impl Into<String>, identity: ProviderIdentity) -> Self {
        if let Ok(mut identities) = self.identities.lock() {
            identities.insert(code.into(), identity);
        }
        self
    }
}

impl IdentityFetcher for MockIdentityFetcher {
    async fn fetch_identity(&self, code: &str) -> Result<ProviderIdentity, ProviderError> {
        if self.unavailable {
            return Err(ProviderError::Http("connection refused".to_string()));
        }

        self.identities
            .lock()
            .map_err(|_| ProviderError::Http("Mutex lock failed".to_string()))?
            .get(code)
            .cloned()
            .ok_or_else(|| ProviderError::Rejected(format!("unknown code: {code}")))
    }
}
