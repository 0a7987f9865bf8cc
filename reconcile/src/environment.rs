//! Reconciliation environment.
//!
//! This module defines the environment type for dependency injection into
//! the [`Reconciler`](crate::service::Reconciler).

use crate::providers::{IdentityFetcher, TokenIssuer, UserStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Clock trait - abstracts time operations for testability.
pub trait Clock: Send + Sync {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Reconciliation environment.
///
/// Contains the three external collaborators the service composes.
///
/// # Type Parameters
///
/// - `F`: Provider identity fetcher
/// - `S`: User store
/// - `T`: Token issuer
#[derive(Clone)]
pub struct ReconcileEnvironment<F, S, T>
where
    F: IdentityFetcher,
    S: UserStore,
    T: TokenIssuer,
{
    /// Provider identity fetcher (OAuth code exchange).
    pub fetcher: F,

    /// User record store.
    pub users: S,

    /// Token issuer.
    pub tokens: T,

    /// Clock used for record timestamps.
    pub clock: Arc<dyn Clock>,
}

impl<F, S, T> ReconcileEnvironment<F, S, T>
where
    F: IdentityFetcher,
    S: UserStore,
    T: TokenIssuer,
{
    /// Create a new environment using the system clock.
    #[must_use]
    pub fn new(fetcher: F, users: S, tokens: T) -> Self {
        Self {
            fetcher,
            users,
            tokens,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
