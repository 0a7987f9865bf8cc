//! Reconciliation collaborators.
//!
//! This module defines traits for the external dependencies the
//! reconciliation service composes. These traits enable dependency injection
//! and make the reconciliation logic testable.
//!
//! # Architecture
//!
//! ```text
//! authorization code
//!        │
//!        ▼
//! ┌──────────────────┐   ProviderIdentity   ┌──────────────────┐
//! │ IdentityFetcher  │ ───────────────────▶ │ Reconciler       │
//! │ (GitHub, ...)    │                      │ - decides branch │
//! └──────────────────┘                      │ - locks keys     │
//!                                           └───┬──────────┬───┘
//!                               find/add/update │          │ sign
//!                                               ▼          ▼
//!                                 ┌──────────────┐  ┌──────────────┐
//!                                 │ UserStore    │  │ TokenIssuer  │
//!                                 └──────────────┘  └──────────────┘
//! ```
//!
//! - **Testing**: Use mocks (in-memory, deterministic)
//! - **Production**: Use real services (GitHub, PostgreSQL, HS256 JWTs)

pub mod fetcher;
pub mod github;
pub mod token;
pub mod user;

// Re-export provider traits
pub use fetcher::IdentityFetcher;
pub use github::{GitHubIdentityFetcher, GitHubOAuthConfig};
pub use token::TokenIssuer;
pub use user::UserStore;
