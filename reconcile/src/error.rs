//! Error types for identity reconciliation.

use crate::state::ObjectId;
use thiserror::Error;

/// Result type alias for reconciliation operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Errors surfaced to the calling layer by the reconciliation service.
///
/// Every branch of a reconciliation either yields a token (or a link
/// confirmation) or one of these variants. Nothing is swallowed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    // ═══════════════════════════════════════════════════════════
    // Upstream Errors
    // ═══════════════════════════════════════════════════════════

    /// The OAuth provider could not produce an identity.
    ///
    /// Not retried by this crate.
    #[error("Identity provider unavailable: {0}")]
    ProviderUnavailable(#[source] ProviderError),

    // ═══════════════════════════════════════════════════════════
    // Storage Errors
    // ═══════════════════════════════════════════════════════════

    /// The user store failed to read or write.
    #[error("Storage error: {0}")]
    Storage(#[source] StoreError),

    /// A uniqueness constraint was violated at write time.
    ///
    /// Retryable: a concurrent request won the race for `key`.
    #[error("Conflicting write on {key}, retry the request")]
    Conflict {
        /// Identity key that was contended (e.g. `email:a@b.com`).
        key: String,
    },

    /// The authenticated session refers to a user that no longer exists.
    #[error("Session user {0} not found")]
    UnknownSessionUser(ObjectId),

    // ═══════════════════════════════════════════════════════════
    // Configuration Errors
    // ═══════════════════════════════════════════════════════════

    /// The service is misconfigured (fatal at startup).
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    // ═══════════════════════════════════════════════════════════
    // Token Errors
    // ═══════════════════════════════════════════════════════════

    /// Token signing failed.
    #[error("Failed to sign token: {0}")]
    Signing(String),

    /// A presented token failed verification.
    #[error("Invalid token")]
    InvalidToken,

    // ═══════════════════════════════════════════════════════════
    // System Errors
    // ═══════════════════════════════════════════════════════════

    /// Internal error (should not be exposed to users).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReconcileError {
    /// Returns `true` if the caller may retry the same request.
    ///
    /// # Examples
    ///
    /// ```
    /// # use identity_reconcile::ReconcileError;
    /// assert!(ReconcileError::Conflict { key: "email:a@b.com".into() }.is_retryable());
    /// assert!(!ReconcileError::InvalidToken.is_retryable());
    /// ```
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::Storage(StoreError::Unavailable(_))
        )
    }
}

impl From<StoreError> for ReconcileError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Conflict { key } => Self::Conflict { key },
            other => Self::Storage(other),
        }
    }
}

/// Errors returned by a [`UserStore`](crate::providers::UserStore).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No record matched the lookup.
    #[error("Record not found")]
    NotFound,

    /// A write would violate email or provider-id uniqueness.
    #[error("Uniqueness violation on {key}")]
    Conflict {
        /// The contended identity key.
        key: String,
    },

    /// The backend could not be reached or returned an error.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned by an [`IdentityFetcher`](crate::providers::IdentityFetcher).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The HTTP request to the provider failed (network error, timeout).
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The provider rejected the request (invalid code, expired token).
    #[error("Provider rejected request: {0}")]
    Rejected(String),

    /// The provider response could not be parsed.
    #[error("Failed to parse provider response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        Self::Http(error.to_string())
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required environment variable was not set.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// A configuration value was empty or invalid.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
