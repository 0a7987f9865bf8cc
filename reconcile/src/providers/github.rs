//! GitHub OAuth identity fetcher.
//!
//! Exchanges an authorization code for an access token, then reads the
//! account id and the best available email from GitHub's REST API.
//!
//! # Example
//!
//! ```no_run
//! use identity_reconcile::providers::{GitHubIdentityFetcher, GitHubOAuthConfig, IdentityFetcher};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = GitHubIdentityFetcher::new(GitHubOAuthConfig::from_env()?)?;
//! let identity = fetcher.fetch_identity("code-from-callback").await?;
//! println!("github user {}", identity.provider_id);
//! # Ok(())
//! # }
//! ```

use crate::error::{ConfigError, ProviderError};
use crate::providers::IdentityFetcher;
use crate::state::{Provider, ProviderIdentity};
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_API_URL: &str = "https://api.github.com";
const GITHUB_API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("identity-reconcile/", env!("CARGO_PKG_VERSION"));

/// GitHub OAuth application credentials.
#[derive(Clone)]
pub struct GitHubOAuthConfig {
    /// OAuth application client ID.
    pub client_id: String,

    /// OAuth application client secret (never logged).
    pub client_secret: String,

    /// Callback URL registered with GitHub.
    pub redirect_uri: String,

    /// Token endpoint. Overridable for GitHub Enterprise.
    pub token_url: String,

    /// REST API base URL. Overridable for GitHub Enterprise.
    pub api_url: String,

    /// Per-request timeout.
    pub timeout: Duration,
}

impl GitHubOAuthConfig {
    /// Create a configuration for github.com.
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            token_url: GITHUB_TOKEN_URL.to_string(),
            api_url: GITHUB_API_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Point the fetcher at a GitHub Enterprise instance.
    #[must_use]
    pub fn with_endpoints(mut self, token_url: impl Into<String>, api_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Load configuration from environment variables.
    ///
    /// # Required Environment Variables
    ///
    /// - `RECONCILE_GITHUB_CLIENT_ID`
    /// - `RECONCILE_GITHUB_CLIENT_SECRET`
    /// - `RECONCILE_GITHUB_REDIRECT_URI`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] if any variable is not set, or
    /// [`ConfigError::Invalid`] if one is empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let var = |name: &str| {
            std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
        };
        let config = Self::new(
            var("RECONCILE_GITHUB_CLIENT_ID")?,
            var("RECONCILE_GITHUB_CLIENT_SECRET")?,
            var("RECONCILE_GITHUB_REDIRECT_URI")?,
        );
        config.validate()?;
        Ok(config)
    }

    /// Validate that all credentials are non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if any field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.is_empty() {
            return Err(ConfigError::Invalid("client_id cannot be empty".to_string()));
        }
        if self.client_secret.is_empty() {
            return Err(ConfigError::Invalid("client_secret cannot be empty".to_string()));
        }
        if self.redirect_uri.is_empty() {
            return Err(ConfigError::Invalid("redirect_uri cannot be empty".to_string()));
        }
        Ok(())
    }
}

impl fmt::Debug for GitHubOAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubOAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("token_url", &self.token_url)
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    id: i64,
    email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GitHubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

/// Identity fetcher for GitHub OAuth applications.
#[derive(Debug, Clone)]
pub struct GitHubIdentityFetcher {
    config: GitHubOAuthConfig,
    http_client: Client,
}

impl GitHubIdentityFetcher {
    /// Create a new fetcher.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the configuration is incomplete or
    /// the HTTP client cannot be built.
    pub fn new(config: GitHubOAuthConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let http_client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    #[tracing::instrument(skip_all)]
    async fn exchange_code(&self, code: &str) -> Result<String, ProviderError> {
        tracing::debug!("exchanging authorization code for access token");

        let response = self
            .http_client
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ])
            .send()
            .await?;

        let body = response.text().await?;
        parse_token_response(&body)
    }

    #[tracing::instrument(skip_all)]
    async fn get_user(&self, access_token: &str) -> Result<GitHubUser, ProviderError> {
        tracing::debug!("fetching GitHub user");
        let url = format!("{}/user", self.config.api_url);
        self.get_json(&url, access_token).await
    }

    #[tracing::instrument(skip_all)]
    async fn get_emails(&self, access_token: &str) -> Result<Vec<GitHubEmail>, ProviderError> {
        tracing::debug!("fetching GitHub user emails");
        let url = format!("{}/user/emails", self.config.api_url);
        self.get_json(&url, access_token).await
    }

    async fn get_json<R>(&self, url: &str, access_token: &str) -> Result<R, ProviderError>
    where
        R: serde::de::DeserializeOwned,
    {
        let response = self
            .http_client
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .header("Authorization", format!("Bearer {access_token}"))
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected(format!("{url} returned {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(format!("{url}: {e}")))
    }
}

impl IdentityFetcher for GitHubIdentityFetcher {
    #[tracing::instrument(skip_all, fields(provider = "github"))]
    async fn fetch_identity(&self, code: &str) -> Result<ProviderIdentity, ProviderError> {
        let access_token = self.exchange_code(code).await?;
        let user = self.get_user(&access_token).await?;

        let email = match user.email.filter(|email| !email.trim().is_empty()) {
            Some(email) => Some(email),
            None => match self.get_emails(&access_token).await {
                Ok(emails) => pick_email(&emails),
                // Missing `user:email` scope yields 404; fall back to a synthetic email.
                Err(ProviderError::Rejected(reason)) => {
                    tracing::warn!(%reason, "could not read GitHub emails");
                    None
                }
                Err(e) => return Err(e),
            },
        };

        tracing::debug!(github_id = user.id, has_email = email.is_some(), "resolved GitHub identity");
        Ok(ProviderIdentity::new(Provider::GitHub, user.id.to_string(), email))
    }
}

fn parse_token_response(body: &str) -> Result<String, ProviderError> {
    let response: TokenResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::Parse(format!("failed to parse token response: {e}")))?;

    if let Some(error) = response.error {
        return Err(ProviderError::Rejected(response.error_description.unwrap_or(error)));
    }

    response
        .access_token
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ProviderError::Parse("token response has no access_token".to_string()))
}

/// Primary verified email, else any verified email.
fn pick_email(emails: &[GitHubEmail]) -> Option<String> {
    emails
        .iter()
        .find(|e| e.primary && e.verified)
        .or_else(|| emails.iter().find(|e| e.verified))
        .map(|e| e.email.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(address: &str, primary: bool, verified: bool) -> GitHubEmail {
        GitHubEmail {
            email: address.to_string(),
            primary,
            verified,
        }
    }

    #[test]
    fn test_pick_email_prefers_primary_verified() {
        let emails = vec![
            email("other@example.com", false, true),
            email("primary@example.com", true, true),
        ];
        assert_eq!(pick_email(&emails).as_deref(), Some("primary@example.com"));
    }

    #[test]
    fn test_pick_email_ignores_unverified() {
        let emails = vec![
            email("primary@example.com", true, false),
            email("verified@example.com", false, true),
        ];
        assert_eq!(pick_email(&emails).as_deref(), Some("verified@example.com"));
        assert_eq!(pick_email(&[email("x@example.com", true, false)]), None);
        assert_eq!(pick_email(&[]), None);
    }

    #[test]
    fn test_parse_token_response_success() {
        let token = parse_token_response(
            r#"{"access_token":"gho_abc","token_type":"bearer","scope":"user:email"}"#,
        );
        assert_eq!(token, Ok("gho_abc".to_string()));
    }

    #[test]
    fn test_parse_token_response_error() {
        let err = parse_token_response(
            r#"{"error":"bad_verification_code","error_description":"The code passed is incorrect or expired."}"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ProviderError::Rejected("The code passed is incorrect or expired.".to_string())
        );
    }

    #[test]
    fn test_parse_token_response_malformed() {
        assert!(matches!(parse_token_response("not json"), Err(ProviderError::Parse(_))));
        assert!(matches!(parse_token_response("{}"), Err(ProviderError::Parse(_))));
    }

    #[test]
    fn test_config_validation_and_redaction() {
        let config = GitHubOAuthConfig::new("id", "super-secret", "https://app.example.com/cb");
        assert!(config.validate().is_ok());
        assert!(!format!("{config:?}").contains("super-secret"));

        let missing = GitHubOAuthConfig::new("id", "", "https://app.example.com/cb");
        assert!(matches!(missing.validate(), Err(ConfigError::Invalid(_))));
        assert!(GitHubIdentityFetcher::new(missing).is_err());
    }

    #[test]
    fn test_with_endpoints_trims_trailing_slash() {
        let config = GitHubOAuthConfig::new("id", "secret", "https://app.example.com/cb")
            .with_endpoints("https://ghe.example.com/login/oauth/access_token", "https://ghe.example.com/api/v3/");
        assert_eq!(config.api_url, "https://ghe.example.com/api/v3");
    }
}
