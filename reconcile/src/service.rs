//! The identity reconciliation service.
//!
//! Given an identity asserted by an OAuth provider, [`Reconciler`] decides
//! whether the caller is a known user, a known user signing in through a new
//! provider, a signed-in user linking another provider, or someone new. The
//! checks run in a fixed order and the first that applies wins:
//!
//! 1. The provider id is already linked: sign in as that record. No write.
//! 2. The provider reported no email: use `<providerId>@mail.<provider>`.
//! 3. The caller is signed in: link the provider id to the caller's record.
//! 4. A record already has the email: link the provider id to it.
//! 5. Otherwise provision a record. The first record in the store becomes
//!    the administrator, every later one a guest.
//!
//! Steps 1, 4 and 5 issue a token for the record's email and, when the caller
//! passed a redirect target, append the token to it. Step 3 issues nothing:
//! the caller keeps the session it already has.
//!
//! # Concurrency
//!
//! Step 1 first runs without locks. On a miss, every identity key the call
//! may touch (`provider:<name>:<id>`, `email:<email>`, `user:<objectId>`) is
//! locked through [`KeyedLocks`], step 1 is repeated, and the decision and
//! write happen while the keys are held. Provisioning also holds a
//! store-wide bootstrap lock across `count` and `add`, so two first signups
//! cannot both observe an empty store.
//!
//! The locked section runs on its own task: once a call reaches it, dropping
//! the caller's future does not interrupt the write.

use crate::config::ReconcileConfig;
use crate::environment::ReconcileEnvironment;
use crate::error::{ConfigError, ProviderError, ReconcileError, Result, StoreError};
use crate::locks::KeyedLocks;
use crate::password::random_password_hash;
use crate::providers::{IdentityFetcher, TokenIssuer, UserStore};
use crate::redirect;
use crate::state::{
    ObjectId, ProviderIdentity, ReconcileOutcome, Role, SessionContext, UserPatch, UserRecord,
    email_key,
};
use crate::token::JwtTokenIssuer;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::Instrument;

/// Identity reconciliation service.
///
/// Cheap to clone; clones share locks and collaborators.
///
/// # Type Parameters
///
/// - `F`: Provider identity fetcher
/// - `S`: User store
/// - `T`: Token issuer
pub struct Reconciler<F, S, T>
where
    F: IdentityFetcher,
    S: UserStore,
    T: TokenIssuer,
{
    inner: Arc<Inner<F, S, T>>,
}

struct Inner<F, S, T>
where
    F: IdentityFetcher,
    S: UserStore,
    T: TokenIssuer,
{
    env: ReconcileEnvironment<F, S, T>,
    redirect_param: String,
    locks: KeyedLocks,
    bootstrap: tokio::sync::Mutex<()>,
}

impl<F, S, T> Clone for Reconciler<F, S, T>
where
    F: IdentityFetcher,
    S: UserStore,
    T: TokenIssuer,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F, S> Reconciler<F, S, JwtTokenIssuer>
where
    F: IdentityFetcher + 'static,
    S: UserStore + 'static,
{
    /// Build a service that signs HS256 tokens with the configured key.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration fails validation. This is
    /// a startup failure.
    pub fn from_config(
        fetcher: F,
        users: S,
        config: &ReconcileConfig,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let tokens = JwtTokenIssuer::from_config(config)?;
        Ok(Self::new(ReconcileEnvironment::new(fetcher, users, tokens), config))
    }
}

impl<F, S, T> Reconciler<F, S, T>
where
    F: IdentityFetcher + 'static,
    S: UserStore + 'static,
    T: TokenIssuer + 'static,
{
    /// Create a service over explicit collaborators.
    #[must_use]
    pub fn new(env: ReconcileEnvironment<F, S, T>, config: &ReconcileConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                env,
                redirect_param: config.redirect_param.clone(),
                locks: KeyedLocks::new(),
                bootstrap: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// The collaborators this service composes.
    #[must_use]
    pub fn environment(&self) -> &ReconcileEnvironment<F, S, T> {
        &self.inner.env
    }

    /// Exchange an OAuth authorization code and reconcile the resulting identity.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::ProviderUnavailable` if the code cannot be
    /// exchanged, otherwise whatever [`reconcile`](Self::reconcile) returns.
    #[tracing::instrument(skip_all, fields(authenticated = session.is_authenticated()))]
    pub async fn authenticate(
        &self,
        code: &str,
        session: &SessionContext,
        redirect: Option<&str>,
    ) -> Result<ReconcileOutcome> {
        let identity = self
            .inner
            .env
            .fetcher
            .fetch_identity(code)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "identity provider unavailable");
                ReconcileError::ProviderUnavailable(e)
            })?;

        self.reconcile(identity, session, redirect).await
    }

    /// Resolve a provider identity to a user record.
    ///
    /// # Errors
    ///
    /// - `ReconcileError::ProviderUnavailable` if the identity has a blank
    ///   provider account id
    /// - `ReconcileError::Storage` if the store fails
    /// - `ReconcileError::Conflict` if a concurrent write took the same
    ///   email or provider id (retryable)
    /// - `ReconcileError::UnknownSessionUser` if `session` names a record
    ///   that does not exist
    /// - `ReconcileError::Signing` if the token cannot be signed
    #[tracing::instrument(
        skip_all,
        fields(
            provider = %identity.provider,
            provider_id = %identity.provider_id,
            authenticated = session.is_authenticated(),
        )
    )]
    pub async fn reconcile(
        &self,
        identity: ProviderIdentity,
        session: &SessionContext,
        redirect: Option<&str>,
    ) -> Result<ReconcileOutcome> {
        if identity.provider_id.trim().is_empty() {
            tracing::warn!("provider asserted an identity without an account id");
            return Err(ReconcileError::ProviderUnavailable(ProviderError::Parse(format!(
                "{} identity has an empty account id",
                identity.provider
            ))));
        }

        let redirect = redirect::non_empty(redirect).map(str::to_string);

        if let Some(user) = self.inner.find_linked(&identity).await? {
            tracing::debug!(object_id = %user.object_id, "provider id already linked");
            return self.inner.sign_in(user, false, redirect);
        }

        let inner = Arc::clone(&self.inner);
        let session = session.clone();
        let task = tokio::spawn(
            async move { inner.reconcile_exclusive(identity, session, redirect).await }
                .instrument(tracing::Span::current()),
        );

        task.await.map_err(|e| {
            tracing::error!(error = %e, "reconciliation task failed");
            ReconcileError::Internal(format!("reconciliation task failed: {e}"))
        })?
    }

    /// Build the session context for a token issued by this service.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::InvalidToken` if the token does not verify or
    /// its user no longer exists, and `ReconcileError::Storage` if the store
    /// fails.
    pub async fn resolve_session(&self, token: &str) -> Result<SessionContext> {
        let email = self.inner.env.tokens.verify(token)?;
        match self.inner.env.users.find_by_email(&email).await {
            Ok(user) => Ok(SessionContext::authenticated(user.object_id, user.email)),
            Err(StoreError::NotFound) => Err(ReconcileError::InvalidToken),
            Err(e) => Err(storage_failure(e)),
        }
    }
}

impl<F, S, T> Inner<F, S, T>
where
    F: IdentityFetcher,
    S: UserStore,
    T: TokenIssuer,
{
    async fn find_linked(&self, identity: &ProviderIdentity) -> Result<Option<UserRecord>> {
        match self
            .env
            .users
            .find_by_provider_id(identity.provider, &identity.provider_id)
            .await
        {
            Ok(user) => Ok(Some(user)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(storage_failure(e)),
        }
    }

    async fn reconcile_exclusive(
        &self,
        identity: ProviderIdentity,
        session: SessionContext,
        redirect: Option<String>,
    ) -> Result<ReconcileOutcome> {
        let email = identity.resolved_email();
        if identity.has_synthetic_email() {
            tracing::debug!(%email, "provider reported no email, using synthetic address");
        }

        let mut keys = vec![
            format!("provider:{}:{}", identity.provider, identity.provider_id),
            format!("email:{}", email_key(&email)),
        ];
        if let SessionContext::Authenticated { object_id, .. } = &session {
            keys.push(format!("user:{object_id}"));
        }
        let _guard = self.locks.acquire(keys).await;

        if let Some(user) = self.find_linked(&identity).await? {
            tracing::debug!(object_id = %user.object_id, "provider id linked by a concurrent request");
            return self.sign_in(user, false, redirect);
        }

        let patch = UserPatch::link(identity.provider, identity.provider_id.clone())
            .with_updated_at(self.env.clock.now());

        if let SessionContext::Authenticated { object_id, .. } = session {
            return self.link_to_session(object_id, &patch).await;
        }

        match self.env.users.find_by_email(&email).await {
            Ok(existing) => {
                if let Some(replaced) = existing
                    .provider_id(identity.provider)
                    .filter(|linked| *linked != identity.provider_id)
                {
                    tracing::warn!(
                        object_id = %existing.object_id,
                        provider = %identity.provider,
                        replaced_provider_id = %replaced,
                        new_provider_id = %identity.provider_id,
                        "email match replaces the account's existing provider link"
                    );
                }
                let user = self
                    .env
                    .users
                    .update_by_email(&existing.email, &patch)
                    .await
                    .map_err(storage_failure)?;
                tracing::info!(
                    object_id = %user.object_id,
                    provider = %identity.provider,
                    "linked provider to existing account by email"
                );
                self.sign_in(user, false, redirect)
            }
            Err(StoreError::NotFound) => {
                let user = self.provision(identity, email).await?;
                self.sign_in(user, true, redirect)
            }
            Err(e) => Err(storage_failure(e)),
        }
    }

    async fn link_to_session(&self, object_id: ObjectId, patch: &UserPatch) -> Result<ReconcileOutcome> {
        match self.env.users.update_by_object_id(object_id, patch).await {
            Ok(user) => {
                tracing::info!(%object_id, "linked provider to signed-in user");
                Ok(ReconcileOutcome::Linked { user })
            }
            Err(StoreError::NotFound) => {
                tracing::warn!(%object_id, "session user not found");
                Err(ReconcileError::UnknownSessionUser(object_id))
            }
            Err(e) => Err(storage_failure(e)),
        }
    }

    async fn provision(&self, identity: ProviderIdentity, email: String) -> Result<UserRecord> {
        let password_hash = tokio::task::spawn_blocking(random_password_hash)
            .await
            .map_err(|e| ReconcileError::Internal(format!("password hashing task failed: {e}")))??;

        let _bootstrap = self.bootstrap.lock().await;

        let role = if self.env.users.count().await.map_err(storage_failure)? == 0 {
            Role::Administrator
        } else {
            Role::Guest
        };
        let now = self.env.clock.now();
        let record = UserRecord {
            object_id: ObjectId::new(),
            email,
            provider_ids: BTreeMap::from([(identity.provider, identity.provider_id)]),
            password_hash,
            role,
            created_at: now,
            updated_at: now,
        };

        let user = self.env.users.add(&record).await.map_err(storage_failure)?;
        tracing::info!(
            object_id = %user.object_id,
            provider = %identity.provider,
            role = %user.role,
            "provisioned new account"
        );
        Ok(user)
    }

    fn sign_in(
        &self,
        user: UserRecord,
        created: bool,
        redirect: Option<String>,
    ) -> Result<ReconcileOutcome> {
        let token = self.env.tokens.sign(&user.email)?;
        let redirect = redirect
            .map(|target| redirect::append_token(&target, &self.redirect_param, token.as_str()));

        Ok(ReconcileOutcome::SignedIn {
            token,
            user,
            created,
            redirect,
        })
    }
}

fn storage_failure(error: StoreError) -> ReconcileError {
    match &error {
        StoreError::Conflict { key } => tracing::warn!(%key, "uniqueness conflict"),
        StoreError::Unavailable(reason) => tracing::error!(%reason, "user store unavailable"),
        StoreError::NotFound => {}
    }
    error.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{FailingUserStore, MockIdentityFetcher, MockTokenIssuer};
    use crate::state::Provider;
    use crate::stores::InMemoryUserStore;

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    fn reconciler<S: UserStore + 'static>(
        users: S,
    ) -> Reconciler<MockIdentityFetcher, S, MockTokenIssuer> {
        let env = ReconcileEnvironment::new(MockIdentityFetcher::new(), users, MockTokenIssuer::new());
        Reconciler::new(env, &ReconcileConfig::new(KEY))
    }

    fn github(id: &str, email: Option<&str>) -> ProviderIdentity {
        ProviderIdentity::new(Provider::GitHub, id, email.map(str::to_string))
    }

    #[tokio::test]
    async fn test_first_user_is_administrator_then_guest() {
        let service = reconciler(InMemoryUserStore::new());

        let first = service
            .reconcile(github("1", Some("first@x.com")), &SessionContext::Anonymous, None)
            .await
            .unwrap();
        let second = service
            .reconcile(github("2", Some("second@x.com")), &SessionContext::Anonymous, None)
            .await
            .unwrap();

        assert_eq!(first.user().role, Role::Administrator);
        assert_eq!(second.user().role, Role::Guest);
        assert!(matches!(first, ReconcileOutcome::SignedIn { created: true, .. }));
    }

    #[tokio::test]
    async fn test_existing_link_signs_in_without_creating() {
        let service = reconciler(InMemoryUserStore::new());
        let identity = github("1", Some("a@b.com"));

        let created = service
            .reconcile(identity.clone(), &SessionContext::Anonymous, None)
            .await
            .unwrap();
        let again = service
            .reconcile(identity, &SessionContext::Anonymous, None)
            .await
            .unwrap();

        assert_eq!(again.user(), created.user());
        assert!(matches!(again, ReconcileOutcome::SignedIn { created: false, .. }));
        assert_eq!(again.token().unwrap().as_str(), "token-for-a@b.com");
    }

    #[tokio::test]
    async fn test_link_does_not_issue_token() {
        let store = InMemoryUserStore::new();
        let service = reconciler(store.clone());
        let owner = service
            .reconcile(github("1", Some("a@b.com")), &SessionContext::Anonymous, None)
            .await
            .unwrap()
            .user()
            .clone();
        let session = SessionContext::authenticated(owner.object_id, owner.email.clone());

        let linked = service
            .reconcile(
                ProviderIdentity::new(Provider::Google, "g-1", Some("other@c.com".to_string())),
                &session,
                Some("https://app/cb"),
            )
            .await
            .unwrap();

        assert!(matches!(linked, ReconcileOutcome::Linked { .. }));
        assert_eq!(linked.token(), None);
        assert_eq!(linked.redirect(), None);
        assert_eq!(service.environment().tokens.signed_count(), 1);
        assert_eq!(linked.user().provider_id(Provider::Google), Some("g-1"));
    }

    #[tokio::test]
    async fn test_unknown_session_user() {
        let service = reconciler(InMemoryUserStore::new());
        let ghost = ObjectId::new();
        let session = SessionContext::authenticated(ghost, "ghost@x.com");

        let err = service
            .reconcile(github("1", None), &session, None)
            .await
            .unwrap_err();
        assert_eq!(err, ReconcileError::UnknownSessionUser(ghost));
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_as_storage_error() {
        let service = reconciler(FailingUserStore);
        let err = service
            .reconcile(github("1", None), &SessionContext::Anonymous, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Storage(StoreError::Unavailable(_))));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_blank_redirect_is_ignored() {
        let service = reconciler(InMemoryUserStore::new());
        let outcome = service
            .reconcile(github("1", Some("a@b.com")), &SessionContext::Anonymous, Some(""))
            .await
            .unwrap();
        assert_eq!(outcome.redirect(), None);
    }

    #[tokio::test]
    async fn test_resolve_session_round_trip() {
        let service = reconciler(InMemoryUserStore::new());
        let outcome = service
            .reconcile(github("1", Some("a@b.com")), &SessionContext::Anonymous, None)
            .await
            .unwrap();

        let session = service
            .resolve_session(outcome.token().unwrap().as_str())
            .await
            .unwrap();
        assert_eq!(
            session,
            SessionContext::authenticated(outcome.user().object_id, "a@b.com")
        );
        assert_eq!(
            service.resolve_session("token-for-nobody@x.com").await,
            Err(ReconcileError::InvalidToken)
        );
    }

    #[test]
    fn test_from_config_rejects_short_key() {
        let config = ReconcileConfig::new("short");
        let result = Reconciler::from_config(MockIdentityFetcher::new(), InMemoryUserStore::new(), &config);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
