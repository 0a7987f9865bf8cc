//! Mock collaborator implementations for testing.
//!
//! This module provides simple, in-memory implementations of the
//! reconciliation collaborator traits for use in unit and integration tests.

pub mod clock;
pub mod fetcher;
pub mod token;
pub mod user;

pub use clock::FixedClock;
pub use fetcher::MockIdentityFetcher;
pub use token::MockTokenIssuer;
pub use user::{FailingUserStore, RecordingUserStore};
