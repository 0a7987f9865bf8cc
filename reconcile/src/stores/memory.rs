//! In-memory user store.
//!
//! A single mutex guards the records and both uniqueness indexes, so every
//! check-then-write below is atomic with respect to other callers.

use crate::error::StoreError;
use crate::providers::UserStore;
use crate::state::{ObjectId, Provider, Role, UserPatch, UserRecord, email_key};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Records {
    by_id: HashMap<ObjectId, UserRecord>,
    by_email: HashMap<String, ObjectId>,
    by_provider: HashMap<(Provider, String), ObjectId>,
}

impl Records {
    fn get(&self, object_id: Option<&ObjectId>) -> Result<UserRecord, StoreError> {
        object_id
            .and_then(|id| self.by_id.get(id))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    /// Reject the write if `email` or any provider id belongs to a record other than `owner`.
    fn check_unique<'a>(
        &self,
        owner: ObjectId,
        email: Option<&str>,
        provider_ids: impl IntoIterator<Item = (&'a Provider, &'a String)>,
    ) -> Result<(), StoreError> {
        if let Some(email) = email {
            let key = email_key(email);
            if self.by_email.get(&key).is_some_and(|holder| *holder != owner) {
                return Err(StoreError::Conflict {
                    key: format!("email:{key}"),
                });
            }
        }
        for (provider, provider_id) in provider_ids {
            let holder = self.by_provider.get(&(*provider, provider_id.clone()));
            if holder.is_some_and(|holder| *holder != owner) {
                return Err(StoreError::Conflict {
                    key: format!("provider:{provider}:{provider_id}"),
                });
            }
        }
        Ok(())
    }

    fn update(&mut self, object_id: ObjectId, patch: &UserPatch) -> Result<UserRecord, StoreError> {
        let current = self.by_id.get(&object_id).cloned().ok_or(StoreError::NotFound)?;
        self.check_unique(
            object_id,
            patch.email.as_deref(),
            patch.provider_ids.iter().map(|(p, id)| (p, id)),
        )?;

        let mut updated = current.clone();
        patch.apply_to(&mut updated, Utc::now());

        if updated.email != current.email {
            self.by_email.remove(&email_key(&current.email));
            self.by_email.insert(email_key(&updated.email), object_id);
        }
        for (provider, old_id) in &current.provider_ids {
            if updated.provider_ids.get(provider) != Some(old_id) {
                self.by_provider.remove(&(*provider, old_id.clone()));
            }
        }
        for (provider, provider_id) in &updated.provider_ids {
            self.by_provider.insert((*provider, provider_id.clone()), object_id);
        }

        self.by_id.insert(object_id, updated.clone());
        Ok(updated)
    }
}

/// Process-local user store.
///
/// Cloning shares the underlying records.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserStore {
    records: Arc<Mutex<Records>>,
}

impl InMemoryUserStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the store lock is poisoned.
    pub fn records(&self) -> Result<Vec<UserRecord>, StoreError> {
        let mut records: Vec<UserRecord> = self.lock()?.by_id.values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Records>, StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Unavailable("user store lock poisoned".to_string()))
    }
}

impl UserStore for InMemoryUserStore {
    async fn find_by_provider_id(
        &self,
        provider: Provider,
        provider_id: &str,
    ) -> Result<UserRecord, StoreError> {
        let records = self.lock()?;
        records.get(records.by_provider.get(&(provider, provider_id.to_string())))
    }

    async fn find_by_email(&self, email: &str) -> Result<UserRecord, StoreError> {
        let records = self.lock()?;
        records.get(records.by_email.get(&email_key(email)))
    }

    async fn find_by_object_id(&self, object_id: ObjectId) -> Result<UserRecord, StoreError> {
        self.lock()?.get(Some(&object_id))
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.lock()?.by_id.len() as u64)
    }

    async fn add(&self, record: &UserRecord) -> Result<UserRecord, StoreError> {
        let mut records = self.lock()?;

        if records.by_id.contains_key(&record.object_id) {
            return Err(StoreError::Conflict {
                key: format!("user:{}", record.object_id),
            });
        }
        if record.role == Role::Administrator && !records.by_id.is_empty() {
            return Err(StoreError::Conflict {
                key: "bootstrap:administrator".to_string(),
            });
        }
        records.check_unique(record.object_id, Some(&record.email), &record.provider_ids)?;

        records.by_email.insert(email_key(&record.email), record.object_id);
        for (provider, provider_id) in &record.provider_ids {
            records
                .by_provider
                .insert((*provider, provider_id.clone()), record.object_id);
        }
        records.by_id.insert(record.object_id, record.clone());

        Ok(record.clone())
    }

    async fn update_by_object_id(
        &self,
        object_id: ObjectId,
        patch: &UserPatch,
    ) -> Result<UserRecord, StoreError> {
        self.lock()?.update(object_id, patch)
    }

    async fn update_by_provider_id(
        &self,
        provider: Provider,
        provider_id: &str,
        patch: &UserPatch,
    ) -> Result<UserRecord, StoreError> {
        let mut records = self.lock()?;
        let object_id = *records
            .by_provider
            .get(&(provider, provider_id.to_string()))
            .ok_or(StoreError::NotFound)?;
        records.update(object_id, patch)
    }

    async fn update_by_email(
        &self,
        email: &str,
        patch: &UserPatch,
    ) -> Result<UserRecord, StoreError> {
        let mut records = self.lock()?;
        let object_id = *records
            .by_email
            .get(&email_key(email))
            .ok_or(StoreError::NotFound)?;
        records.update(object_id, patch)
    }
}
