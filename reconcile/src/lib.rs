//! # Identity Reconcile
//!
//! OAuth account linking and provisioning. Given an identity asserted by a
//! third-party provider, decide whether the caller is a known user, a known
//! user arriving through a new provider, or someone new, without creating
//! duplicate records under concurrent requests.
//!
//! ## Features
//!
//! - **Explicit collaborators**: fetcher, user store and token issuer are
//!   injected through [`ReconcileEnvironment`]
//! - **Race-safe**: per-identity-key locks plus store-level uniqueness
//! - **Bootstrap administrator**: the first account ever created is the
//!   administrator, every later one a guest
//! - **Stateless tokens**: HS256 JWTs bound to the user's email
//!
//! ## Example
//!
//! ```rust,no_run
//! use identity_reconcile::providers::{GitHubIdentityFetcher, GitHubOAuthConfig};
//! use identity_reconcile::stores::ConfiguredUserStore;
//! use identity_reconcile::{ReconcileConfig, Reconciler, SessionContext};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ReconcileConfig::from_env()?;
//! let users = ConfiguredUserStore::open(&config.storage_backend).await?;
//! let fetcher = GitHubIdentityFetcher::new(GitHubOAuthConfig::from_env()?)?;
//! let service = Reconciler::from_config(fetcher, users, &config)?;
//!
//! let outcome = service
//!     .authenticate("code-from-callback", &SessionContext::Anonymous, Some("/dashboard"))
//!     .await?;
//! if let Some(target) = outcome.redirect() {
//!     println!("redirect to {target}");
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

// Public modules
pub mod config;
pub mod environment;
pub mod error;
pub mod locks;
pub mod password;
pub mod providers;
pub mod redirect;
pub mod service;
pub mod state;
pub mod stores;
pub mod token;

// Mock implementations for testing
#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

// Re-export main types for convenience
pub use config::{ReconcileConfig, StorageBackend};
pub use environment::{Clock, ReconcileEnvironment, SystemClock};
pub use error::{ConfigError, ProviderError, ReconcileError, Result, StoreError};
pub use service::Reconciler;
pub use state::{
    AuthToken, ObjectId, Provider, ProviderIdentity, ReconcileOutcome, Role, SessionContext,
    UserPatch, UserRecord,
};
pub use token::JwtTokenIssuer;
