//! User store backends.
//!
//! - [`memory`]: process-local, always available
//! - [`postgres`]: PostgreSQL (feature `postgres`)

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryUserStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresUserStore;

use crate::config::StorageBackend;
use crate::error::{ReconcileError, StoreError};
use crate::providers::UserStore;
use crate::state::{ObjectId, Provider, UserPatch, UserRecord};

/// User store chosen by [`StorageBackend`] at startup.
#[derive(Debug, Clone)]
pub enum ConfiguredUserStore {
    /// In-memory store.
    Memory(InMemoryUserStore),

    /// PostgreSQL store.
    #[cfg(feature = "postgres")]
    Postgres(PostgresUserStore),
}

impl ConfiguredUserStore {
    /// Open the store described by `backend`.
    ///
    /// PostgreSQL stores are migrated before use.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::Config` if the backend is not compiled in, or
    /// `ReconcileError::Storage` if connecting or migrating fails.
    pub async fn open(backend: &StorageBackend) -> Result<Self, ReconcileError> {
        match backend {
            StorageBackend::Memory => Ok(Self::Memory(InMemoryUserStore::new())),
            #[cfg(feature = "postgres")]
            StorageBackend::Postgres { database_url } => {
                let store = PostgresUserStore::connect(database_url).await?;
                store.migrate().await?;
                tracing::info!("connected to PostgreSQL user store");
                Ok(Self::Postgres(store))
            }
            #[cfg(not(feature = "postgres"))]
            StorageBackend::Postgres { .. } => Err(crate::error::ConfigError::Invalid(
                "postgres storage requires the `postgres` feature".to_string(),
            )
            .into()),
        }
    }
}

macro_rules! delegate {
    ($self:ident, $store:ident => $call:expr) => {
        match $self {
            Self::Memory($store) => $call.await,
            #[cfg(feature = "postgres")]
            Self::Postgres($store) => $call.await,
        }
    };
}

impl UserStore for ConfiguredUserStore {
    async fn find_by_provider_id(
        &self,
        provider: Provider,
        provider_id: &str,
    ) -> Result<UserRecord, StoreError> {
        delegate!(self, store => store.find_by_provider_id(provider, provider_id))
    }

    async fn find_by_email(&self, email: &str) -> Result<UserRecord, StoreError> {
        delegate!(self, store => store.find_by_email(email))
    }

    async fn find_by_object_id(&self, object_id: ObjectId) -> Result<UserRecord, StoreError> {
        delegate!(self, store => store.find_by_object_id(object_id))
    }

    async fn count(&self) -> Result<u64, StoreError> {
        delegate!(self, store => store.count())
    }

    async fn add(&self, record: &UserRecord) -> Result<UserRecord, StoreError> {
        delegate!(self, store => store.add(record))
    }

    async fn update_by_object_id(
        &self,
        object_id: ObjectId,
        patch: &UserPatch,
    ) -> Result<UserRecord, StoreError> {
        delegate!(self, store => store.update_by_object_id(object_id, patch))
    }

    async fn update_by_provider_id(
        &self,
        provider: Provider,
        provider_id: &str,
        patch: &UserPatch,
    ) -> Result<UserRecord, StoreError> {
        delegate!(self, store => store.update_by_provider_id(provider, provider_id, patch))
    }

    async fn update_by_email(
        &self,
        email: &str,
        patch: &UserPatch,
    ) -> Result<UserRecord, StoreError> {
        delegate!(self, store => store.update_by_email(email, patch))
    }
}
