//! Provider identity fetcher trait.

use crate::error::ProviderError;
use crate::state::ProviderIdentity;

/// Resolves an OAuth authorization code into a provider identity.
///
/// Opaque to the reconciliation logic: only the resulting
/// [`ProviderIdentity`] matters.
pub trait IdentityFetcher: Send + Sync {
    /// Exchange `code` and fetch the identity behind it.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Network request fails → `ProviderError::Http`
    /// - Provider rejects the code → `ProviderError::Rejected`
    /// - Response is malformed → `ProviderError::Parse`
    fn fetch_identity(
        &self,
        code: &str,
    ) -> impl std::future::Future<Output = Result<ProviderIdentity, ProviderError>> + Send;
}
