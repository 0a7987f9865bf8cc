//! HS256 JWT token issuer.
//!
//! Tokens are stateless: a token is valid iff its signature checks out under
//! the process-wide key and it has not expired. There is no server-side
//! session record to revoke.

use crate::config::{MIN_SIGNING_KEY_LEN, ReconcileConfig, SigningKey};
use crate::environment::{Clock, SystemClock};
use crate::error::{ConfigError, ReconcileError, Result};
use crate::providers::TokenIssuer;
use crate::state::AuthToken;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Clock skew tolerated when checking expiry, in seconds.
pub const EXPIRY_LEEWAY_SECS: i64 = 60;

/// Claims carried by an issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user's email.
    pub sub: String,

    /// Issued at (Unix seconds).
    pub iat: i64,

    /// Expires at (Unix seconds).
    pub exp: i64,
}

/// Signs and verifies HS256 JWTs with a process-wide key.
#[derive(Clone)]
pub struct JwtTokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl JwtTokenIssuer {
    /// Create an issuer.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the key is empty or shorter than
    /// [`MIN_SIGNING_KEY_LEN`] bytes, or `ttl` is not positive.
    pub fn new(signing_key: &SigningKey, ttl: Duration) -> std::result::Result<Self, ConfigError> {
        if signing_key.is_empty() {
            return Err(ConfigError::Invalid("jwt_signing_key cannot be empty".to_string()));
        }
        if signing_key.len() < MIN_SIGNING_KEY_LEN {
            return Err(ConfigError::Invalid(format!(
                "jwt_signing_key must be at least {MIN_SIGNING_KEY_LEN} bytes"
            )));
        }
        if ttl <= Duration::zero() {
            return Err(ConfigError::Invalid("token_ttl must be positive".to_string()));
        }

        Ok(Self {
            encoding: EncodingKey::from_secret(signing_key.expose()),
            decoding: DecodingKey::from_secret(signing_key.expose()),
            ttl,
            clock: Arc::new(SystemClock),
        })
    }

    /// Create an issuer from the service configuration.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn from_config(config: &ReconcileConfig) -> std::result::Result<Self, ConfigError> {
        Self::new(&config.jwt_signing_key, config.token_ttl)
    }

    /// Replace the clock used for `iat`/`exp`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Token lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Verify `token` and return its claims.
    ///
    /// Expiry is checked against this issuer's clock with
    /// [`EXPIRY_LEEWAY_SECS`] of tolerance.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::InvalidToken` if the token is malformed, the
    /// signature does not match, or the token has expired.
    pub fn claims(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "token rejected");
                ReconcileError::InvalidToken
            })?
            .claims;

        if claims.exp + EXPIRY_LEEWAY_SECS < self.clock.now().timestamp() {
            tracing::debug!("token expired");
            return Err(ReconcileError::InvalidToken);
        }
        Ok(claims)
    }
}

impl fmt::Debug for JwtTokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtTokenIssuer")
            .field("algorithm", &Algorithm::HS256)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer for JwtTokenIssuer {
    fn sign(&self, subject_email: &str) -> Result<AuthToken> {
        let issued_at = self.clock.now();
        let expires_at: DateTime<Utc> = issued_at + self.ttl;
        let claims = Claims {
            sub: subject_email.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };

        let value = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ReconcileError::Signing(e.to_string()))?;

        Ok(AuthToken::new(value, claims.sub, expires_at))
    }

    fn verify(&self, token: &str) -> Result<String> {
        self.claims(token).map(|claims| claims.sub)
    }
}
