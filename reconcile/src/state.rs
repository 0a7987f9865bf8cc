//! Identity state types.
//!
//! This module defines the records the reconciliation service reads and
//! writes, the identities it receives from OAuth providers, and the results
//! it hands back to the calling layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════
// ID Types
// ═══════════════════════════════════════════════════════════════════════

/// Opaque unique identifier of a [`UserRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub uuid::Uuid);

impl ObjectId {
    /// Generate a new random `ObjectId`.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Providers and Roles
// ═══════════════════════════════════════════════════════════════════════

/// Supported OAuth providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// GitHub.
    GitHub,

    /// Google.
    Google,

    /// Microsoft.
    Microsoft,
}

impl Provider {
    /// Lowercase provider name, as used in synthetic emails and storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::Google => "google",
            Self::Microsoft => "microsoft",
        }
    }

    /// Parse a provider from its lowercase name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "github" => Some(Self::GitHub),
            "google" => Some(Self::Google),
            "microsoft" => Some(Self::Microsoft),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account role.
///
/// The first record ever created in a store is an `Administrator`; every
/// later one starts as a `Guest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Bootstrap administrator.
    Administrator,

    /// Regular account.
    Guest,
}

impl Role {
    /// Lowercase role name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Administrator => "administrator",
            Self::Guest => "guest",
        }
    }

    /// Parse a role from its lowercase name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "administrator" => Some(Self::Administrator),
            "guest" => Some(Self::Guest),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// User Records
// ═══════════════════════════════════════════════════════════════════════

/// A persisted user account.
///
/// Created once at first provisioning, afterwards only updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Unique identifier.
    pub object_id: ObjectId,

    /// Email address (unique, case-insensitive).
    pub email: String,

    /// Provider account ids, at most one per provider.
    pub provider_ids: BTreeMap<Provider, String>,

    /// Password hash (PHC string). Random for provider-only accounts.
    pub password_hash: String,

    /// Account role.
    pub role: Role,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    /// Provider id linked for `provider`, if any.
    #[must_use]
    pub fn provider_id(&self, provider: Provider) -> Option<&str> {
        self.provider_ids.get(&provider).map(String::as_str)
    }
}

/// Fields to change on an existing [`UserRecord`].
///
/// A patch is applied atomically: either every field changes or none does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPatch {
    /// New email address.
    pub email: Option<String>,

    /// Provider ids to set, replacing any existing id for the same provider.
    pub provider_ids: Vec<(Provider, String)>,

    /// Timestamp to record as `updated_at`. Stores use their own clock when unset.
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserPatch {
    /// Patch that links one provider id.
    #[must_use]
    pub fn link(provider: Provider, provider_id: impl Into<String>) -> Self {
        Self {
            email: None,
            provider_ids: vec![(provider, provider_id.into())],
            updated_at: None,
        }
    }

    /// Also change the email address.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Stamp the patched record with `at` instead of the store's clock.
    #[must_use]
    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// Returns `true` if the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.provider_ids.is_empty()
    }

    /// Apply the patch to `record`.
    ///
    /// `updated_at` takes the patch's timestamp, or `now` if it carries none.
    pub fn apply_to(&self, record: &mut UserRecord, now: DateTime<Utc>) {
        if let Some(email) = &self.email {
            record.email.clone_from(email);
        }
        for (provider, provider_id) in &self.provider_ids {
            record.provider_ids.insert(*provider, provider_id.clone());
        }
        record.updated_at = self.updated_at.unwrap_or(now);
    }
}

/// Normalized form of an email used for uniqueness checks.
#[must_use]
pub fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

// ═══════════════════════════════════════════════════════════════════════
// Provider Identities and Sessions
// ═══════════════════════════════════════════════════════════════════════

/// Identity asserted by an OAuth provider after a code exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIdentity {
    /// Provider that asserted the identity.
    pub provider: Provider,

    /// Provider account id (stable across username changes).
    pub provider_id: String,

    /// Email reported by the provider. Some providers omit it.
    pub email: Option<String>,
}

impl ProviderIdentity {
    /// Create a new provider identity.
    #[must_use]
    pub fn new(provider: Provider, provider_id: impl Into<String>, email: Option<String>) -> Self {
        Self {
            provider,
            provider_id: provider_id.into(),
            email,
        }
    }

    /// Email to bind the account to.
    ///
    /// Uses the provider's email when present and non-blank, otherwise the
    /// synthetic `<providerId>@mail.<providerName>`.
    #[must_use]
    pub fn resolved_email(&self) -> String {
        match self.email.as_deref().map(str::trim) {
            Some(email) if !email.is_empty() => email.to_string(),
            _ => synthetic_email(self.provider, &self.provider_id),
        }
    }

    /// Returns `true` if the provider did not report a usable email.
    #[must_use]
    pub fn has_synthetic_email(&self) -> bool {
        self.email.as_deref().is_none_or(|email| email.trim().is_empty())
    }
}

/// Deterministic placeholder email for provider accounts without one.
///
/// # Examples
///
/// ```
/// # use identity_reconcile::state::{synthetic_email, Provider};
/// assert_eq!(synthetic_email(Provider::GitHub, "abc"), "abc@mail.github");
/// ```
#[must_use]
pub fn synthetic_email(provider: Provider, provider_id: &str) -> String {
    format!("{provider_id}@mail.{}", provider.as_str())
}

/// Identity of the caller making the request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionContext {
    /// No one is signed in.
    #[default]
    Anonymous,

    /// A user is signed in.
    Authenticated {
        /// Signed-in user's record id.
        object_id: ObjectId,

        /// Signed-in user's email.
        email: String,
    },
}

impl SessionContext {
    /// Session for a signed-in user.
    #[must_use]
    pub fn authenticated(object_id: ObjectId, email: impl Into<String>) -> Self {
        Self::Authenticated {
            object_id,
            email: email.into(),
        }
    }

    /// Returns `true` if a user is signed in.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Results
// ═══════════════════════════════════════════════════════════════════════

/// Signed assertion binding an email to an expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    value: String,

    /// Email the token was issued for.
    pub subject: String,

    /// Expiration timestamp.
    pub expires_at: DateTime<Utc>,
}

impl AuthToken {
    /// Wrap an already signed token.
    #[must_use]
    pub const fn new(value: String, subject: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            value,
            subject,
            expires_at,
        }
    }

    /// The encoded token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("value", &"<redacted>")
            .field("subject", &self.subject)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Successful result of a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The caller is signed in as `user`.
    SignedIn {
        /// Token bound to the user's email.
        token: AuthToken,

        /// The resolved account.
        user: UserRecord,

        /// `true` if the account was provisioned by this call.
        created: bool,

        /// Caller's redirect target with the token appended.
        redirect: Option<String>,
    },

    /// A new provider was linked to the already signed-in user.
    ///
    /// No token is issued: the caller keeps its existing session.
    Linked {
        /// The updated account.
        user: UserRecord,
    },
}

impl ReconcileOutcome {
    /// The account this outcome refers to.
    #[must_use]
    pub const fn user(&self) -> &UserRecord {
        match self {
            Self::SignedIn { user, .. } | Self::Linked { user } => user,
        }
    }

    /// Issued token, if any.
    #[must_use]
    pub const fn token(&self) -> Option<&AuthToken> {
        match self {
            Self::SignedIn { token, .. } => Some(token),
            Self::Linked { .. } => None,
        }
    }

    /// Redirect target, if any.
    #[must_use]
    pub fn redirect(&self) -> Option<&str> {
        match self {
            Self::SignedIn { redirect, .. } => redirect.as_deref(),
            Self::Linked { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record() -> UserRecord {
        let now = Utc::now();
        UserRecord {
            object_id: ObjectId::new(),
            email: "a@b.com".to_string(),
            provider_ids: BTreeMap::new(),
            password_hash: "$argon2id$placeholder".to_string(),
            role: Role::Guest,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_resolved_email_prefers_provider_email() {
        let identity = ProviderIdentity::new(Provider::GitHub, "abc", Some("a@b.com".to_string()));
        assert_eq!(identity.resolved_email(), "a@b.com");
        assert!(!identity.has_synthetic_email());
    }

    #[test]
    fn test_resolved_email_synthesizes_when_missing_or_blank() {
        let missing = ProviderIdentity::new(Provider::GitHub, "abc", None);
        let blank = ProviderIdentity::new(Provider::GitHub, "abc", Some("  ".to_string()));

        assert_eq!(missing.resolved_email(), "abc@mail.github");
        assert_eq!(blank.resolved_email(), "abc@mail.github");
        assert!(missing.has_synthetic_email());
        assert!(blank.has_synthetic_email());
    }

    #[test]
    fn test_patch_replaces_existing_provider_id() {
        let mut user = record();
        user.provider_ids.insert(Provider::GitHub, "old".to_string());
        let later = user.updated_at + chrono::Duration::seconds(5);

        UserPatch::link(Provider::GitHub, "new").apply_to(&mut user, later);

        assert_eq!(user.provider_id(Provider::GitHub), Some("new"));
        assert_eq!(user.email, "a@b.com");
        assert_eq!(user.updated_at, later);
    }

    #[test]
    fn test_patch_timestamp_overrides_store_clock() {
        let mut user = record();
        let stamped = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();

        UserPatch::link(Provider::GitHub, "new")
            .with_updated_at(stamped)
            .apply_to(&mut user, Utc::now());

        assert_eq!(user.updated_at, stamped);
    }

    #[test]
    fn test_patch_with_email() {
        let mut user = record();
        let patch = UserPatch::link(Provider::Google, "g-1").with_email("c@d.com");
        assert!(!patch.is_empty());

        patch.apply_to(&mut user, Utc::now());

        assert_eq!(user.email, "c@d.com");
        assert_eq!(user.provider_id(Provider::Google), Some("g-1"));
        assert!(UserPatch::default().is_empty());
    }

    #[test]
    fn test_email_key_normalizes_case_and_whitespace() {
        assert_eq!(email_key(" A@B.Com "), "a@b.com");
    }

    #[test]
    fn test_provider_and_role_round_trip_names() {
        for provider in [Provider::GitHub, Provider::Google, Provider::Microsoft] {
            assert_eq!(Provider::parse(provider.as_str()), Some(provider));
        }
        for role in [Role::Administrator, Role::Guest] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Provider::parse("gitlab"), None);
    }

    #[test]
    fn test_auth_token_debug_redacts_value() {
        let token = AuthToken::new("secret.jwt.value".to_string(), "a@b.com".to_string(), Utc::now());
        let debug = format!("{token:?}");
        assert!(!debug.contains("secret.jwt.value"));
        assert!(debug.contains("a@b.com"));
    }
}
