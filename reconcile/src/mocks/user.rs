//! Mock user stores for testing.

use crate::error::StoreError;
use crate::providers::UserStore;
use crate::state::{ObjectId, Provider, UserPatch, UserRecord};
use crate::stores::InMemoryUserStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// User store whose backend is always down.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingUserStore;

impl FailingUserStore {
    fn unavailable<T>() -> Result<T, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

impl UserStore for FailingUserStore {
    async fn find_by_provider_id(&self, _: Provider, _: &str) -> Result<UserRecord, StoreError> {
        Self::unavailable()
    }

    async fn find_by_email(&self, _: &str) -> Result<UserRecord, StoreError> {
        Self::unavailable()
    }

    async fn find_by_object_id(&self, _: ObjectId) -> Result<UserRecord, StoreError> {
        Self::unavailable()
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Self::unavailable()
    }

    async fn add(&self, _: &UserRecord) -> Result<UserRecord, StoreError> {
        Self::unavailable()
    }

    async fn update_by_object_id(&self, _: ObjectId, _: &UserPatch) -> Result<UserRecord, StoreError> {
        Self::unavailable()
    }

    async fn update_by_provider_id(
        &self,
        _: Provider,
        _: &str,
        _: &UserPatch,
    ) -> Result<UserRecord, StoreError> {
        Self::unavailable()
    }

    async fn update_by_email(&self, _: &str, _: &UserPatch) -> Result<UserRecord, StoreError> {
        Self::unavailable()
    }
}

/// Wraps a store and counts attempted writes.
///
/// Used to assert that a code path performs no mutation, or exactly one.
#[derive(Debug, Clone, Default)]
pub struct RecordingUserStore<S = InMemoryUserStore> {
    inner: S,
    adds: Arc<AtomicUsize>,
    updates: Arc<AtomicUsize>,
}

impl<S: UserStore> RecordingUserStore<S> {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            adds: Arc::new(AtomicUsize::new(0)),
            updates: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The wrapped store.
    #[must_use]
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    /// Number of `add` calls.
    #[must_use]
    pub fn adds(&self) -> usize {
        self.adds.load(Ordering::SeqCst)
    }

    /// Number of `update_*` calls.
    #[must_use]
    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// Total number of writes.
    #[must_use]
    pub fn mutations(&self) -> usize {
        self.adds() + self.updates()
    }
}

impl<S: UserStore> UserStore for RecordingUserStore<S> {
    async fn find_by_provider_id(
        &self,
        provider: Provider,
        provider_id: &str,
    ) -> Result<UserRecord, StoreError> {
        self.inner.find_by_provider_id(provider, provider_id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<UserRecord, StoreError> {
        self.inner.find_by_email(email).await
    }

    async fn find_by_object_id(&self, object_id: ObjectId) -> Result<UserRecord, StoreError> {
        self.inner.find_by_object_id(object_id).await
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.inner.count().await
    }

    async fn add(&self, record: &UserRecord) -> Result<UserRecord, StoreError> {
        self.adds.fetch_add(1, Ordering::SeqCst);
        self.inner.add(record).await
    }

    async fn update_by_object_id(
        &self,
        object_id: ObjectId,
        patch: &UserPatch,
    ) -> Result<UserRecord, StoreError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update_by_object_id(object_id, patch).await
    }

    async fn update_by_provider_id(
        &self,
        provider: Provider,
        provider_id: &str,
        patch: &UserPatch,
    ) -> Result<UserRecord, StoreError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update_by_provider_id(provider, provider_id, patch).await
    }

    async fn update_by_email(&self, email: &str, patch: &UserPatch) -> Result<UserRecord, StoreError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update_by_email(email, patch).await
    }
}
