//! User store trait.

use crate::error::StoreError;
use crate::state::{ObjectId, Provider, UserPatch, UserRecord};
use std::future::Future;

/// User record store.
///
/// Implementations must enforce uniqueness of email (case-insensitive) and of
/// each `(provider, provider_id)` pair at write time, and must apply a
/// [`UserPatch`] atomically per record.
pub trait UserStore: Send + Sync {
    /// Find the record linked to `provider_id` for `provider`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - No record is linked → `StoreError::NotFound`
    /// - Backend fails → `StoreError::Unavailable`
    fn find_by_provider_id(
        &self,
        provider: Provider,
        provider_id: &str,
    ) -> impl Future<Output = Result<UserRecord, StoreError>> + Send;

    /// Find the record with `email`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - No record has that email → `StoreError::NotFound`
    /// - Backend fails → `StoreError::Unavailable`
    fn find_by_email(
        &self,
        email: &str,
    ) -> impl Future<Output = Result<UserRecord, StoreError>> + Send;

    /// Find a record by id.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - No such record → `StoreError::NotFound`
    /// - Backend fails → `StoreError::Unavailable`
    fn find_by_object_id(
        &self,
        object_id: ObjectId,
    ) -> impl Future<Output = Result<UserRecord, StoreError>> + Send;

    /// Number of records ever created (records are never deleted).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the backend fails.
    fn count(&self) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Insert a new record.
    ///
    /// An `Administrator` record is only accepted into an empty store.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Email or a provider id is already taken → `StoreError::Conflict`
    /// - An administrator is added to a non-empty store → `StoreError::Conflict`
    /// - Backend fails → `StoreError::Unavailable`
    fn add(
        &self,
        record: &UserRecord,
    ) -> impl Future<Output = Result<UserRecord, StoreError>> + Send;

    /// Apply `patch` to the record with `object_id`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - No such record → `StoreError::NotFound`
    /// - The patch would take another record's email or provider id → `StoreError::Conflict`
    /// - Backend fails → `StoreError::Unavailable`
    fn update_by_object_id(
        &self,
        object_id: ObjectId,
        patch: &UserPatch,
    ) -> impl Future<Output = Result<UserRecord, StoreError>> + Send;

    /// Apply `patch` to the record linked to `provider_id` for `provider`.
    ///
    /// # Errors
    ///
    /// Same as [`update_by_object_id`](Self::update_by_object_id).
    fn update_by_provider_id(
        &self,
        provider: Provider,
        provider_id: &str,
        patch: &UserPatch,
    ) -> impl Future<Output = Result<UserRecord, StoreError>> + Send;

    /// Apply `patch` to the record with `email`.
    ///
    /// # Errors
    ///
    /// Same as [`update_by_object_id`](Self::update_by_object_id).
    fn update_by_email(
        &self,
        email: &str,
        patch: &UserPatch,
    ) -> impl Future<Output = Result<UserRecord, StoreError>> + Send;
}
