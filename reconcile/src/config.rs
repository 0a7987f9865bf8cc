//! Reconciliation service configuration.
//!
//! Configuration is loaded once at startup and passed to the service at
//! construction. A missing or weak signing key is a startup failure, never a
//! per-request error.

use crate::error::ConfigError;
use chrono::Duration;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Minimum signing key length in bytes (HS256 key size).
pub const MIN_SIGNING_KEY_LEN: usize = 32;

/// Default token lifetime.
pub const DEFAULT_TOKEN_TTL_DAYS: i64 = 7;

/// Default query parameter carrying the token on redirects.
pub const DEFAULT_REDIRECT_PARAM: &str = "token";

const ENV_STORAGE: &str = "RECONCILE_STORAGE";
const ENV_JWT_KEY: &str = "RECONCILE_JWT_KEY";
const ENV_TOKEN_TTL_SECS: &str = "RECONCILE_TOKEN_TTL_SECS";
const ENV_DATABASE_URL: &str = "RECONCILE_DATABASE_URL";

/// Where user records live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Process-local store. Records are lost on restart.
    Memory,

    /// PostgreSQL (requires the `postgres` feature).
    Postgres {
        /// Connection string.
        database_url: String,
    },
}

impl StorageBackend {
    /// Backend name as accepted by `RECONCILE_STORAGE`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

/// JWT signing key, wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SigningKey(String);

impl SigningKey {
    /// Wrap a raw key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Raw key bytes.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Key length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the key is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}

/// Reconciliation service configuration.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// User store backend.
    pub storage_backend: StorageBackend,

    /// Process-wide token signing key.
    pub jwt_signing_key: SigningKey,

    /// Token lifetime.
    ///
    /// Default: 7 days
    pub token_ttl: Duration,

    /// Query parameter used to append the token to redirect targets.
    ///
    /// Default: `token`
    pub redirect_param: String,
}

impl ReconcileConfig {
    /// Create a configuration with an in-memory store.
    ///
    /// # Arguments
    ///
    /// * `jwt_signing_key` - HS256 signing key, at least 32 bytes
    #[must_use]
    pub fn new(jwt_signing_key: impl Into<String>) -> Self {
        Self {
            storage_backend: StorageBackend::Memory,
            jwt_signing_key: SigningKey::new(jwt_signing_key),
            token_ttl: Duration::days(DEFAULT_TOKEN_TTL_DAYS),
            redirect_param: DEFAULT_REDIRECT_PARAM.to_string(),
        }
    }

    /// Set the storage backend.
    #[must_use]
    pub fn with_storage_backend(mut self, backend: StorageBackend) -> Self {
        self.storage_backend = backend;
        self
    }

    /// Set the token lifetime.
    #[must_use]
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Set the redirect query parameter name.
    #[must_use]
    pub fn with_redirect_param(mut self, param: impl Into<String>) -> Self {
        self.redirect_param = param.into();
        self
    }

    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `RECONCILE_JWT_KEY` (required): token signing key
    /// - `RECONCILE_STORAGE`: `memory` (default) or `postgres`
    /// - `RECONCILE_DATABASE_URL`: required when storage is `postgres`
    /// - `RECONCILE_TOKEN_TTL_SECS`: token lifetime in seconds
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required variable is missing or any
    /// value fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let key = lookup(ENV_JWT_KEY)
            .ok_or_else(|| ConfigError::MissingEnvVar(ENV_JWT_KEY.to_string()))?;

        let storage_backend = match lookup(ENV_STORAGE).as_deref().map(str::trim) {
            None | Some("" | "memory") => StorageBackend::Memory,
            Some("postgres") => {
                let database_url = lookup(ENV_DATABASE_URL)
                    .ok_or_else(|| ConfigError::MissingEnvVar(ENV_DATABASE_URL.to_string()))?;
                StorageBackend::Postgres { database_url }
            }
            Some(other) => {
                return Err(ConfigError::Invalid(format!(
                    "{ENV_STORAGE} must be 'memory' or 'postgres', got '{other}'"
                )));
            }
        };

        let mut config = Self::new(key).with_storage_backend(storage_backend);

        if let Some(raw) = lookup(ENV_TOKEN_TTL_SECS) {
            let secs: i64 = raw.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{ENV_TOKEN_TTL_SECS} is not an integer: {raw}"))
            })?;
            config = config.with_token_ttl(Duration::seconds(secs));
        }

        config.validate()?;
        Ok(config)
    }

    /// Check every value the service depends on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the signing key is empty or shorter
    /// than [`MIN_SIGNING_KEY_LEN`], the token lifetime is not positive, the
    /// redirect parameter is empty, or a database URL is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_signing_key.is_empty() {
            return Err(ConfigError::Invalid("jwt_signing_key cannot be empty".to_string()));
        }
        if self.jwt_signing_key.len() < MIN_SIGNING_KEY_LEN {
            return Err(ConfigError::Invalid(format!(
                "jwt_signing_key must be at least {MIN_SIGNING_KEY_LEN} bytes"
            )));
        }
        if self.token_ttl <= Duration::zero() {
            return Err(ConfigError::Invalid("token_ttl must be positive".to_string()));
        }
        if self.redirect_param.is_empty() {
            return Err(ConfigError::Invalid("redirect_param cannot be empty".to_string()));
        }
        if let StorageBackend::Postgres { database_url } = &self.storage_backend {
            if database_url.is_empty() {
                return Err(ConfigError::Invalid("database_url cannot be empty".to_string()));
            }
        }
        Ok(())
    }
}
