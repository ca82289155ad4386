//! OAuth2 bearer tokens for push-notification APIs, from service account credentials
//!
//! fcm_auth exchanges the private key of a service account for a short-lived access token,
//! following the JWT-bearer grant: a claim set naming the service account, the requested
//! scope and the token endpoint is signed with the account's RSA key and posted to the
//! token endpoint, which answers with an access token and its lifetime.
//!
//! A [`TokenProvider`] caches tokens per scope for their lifetime; it will not make a request
//! while an appropriate token is cached, and concurrent callers that miss the cache share a
//! single exchange. Therefore, the caller should not cache tokens.
//!
//! ## Simple usage
//!
//! ```rust,no_run
//! # async fn get_token() -> Result<(), fcm_auth::AuthError> {
//! use fcm_auth::{ServiceAccount, TokenProvider, FIREBASE_MESSAGING_SCOPE};
//!
//! let service_account = ServiceAccount::from_file("service-account.json")?;
//! let token = service_account.get_token(FIREBASE_MESSAGING_SCOPE).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Sharing a provider
//!
//! Tokens are only cached inside a provider instance, so a single instance should be shared
//! across tasks, for example through a `OnceCell`:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio::sync::OnceCell;
//! use fcm_auth::{ServiceAccount, TokenProvider};
//!
//! static TOKEN_PROVIDER: OnceCell<Arc<dyn TokenProvider>> = OnceCell::const_new();
//!
//! async fn token_provider() -> &'static Arc<dyn TokenProvider> {
//!     TOKEN_PROVIDER
//!         .get_or_init(|| async {
//!             let provider = ServiceAccount::from_env()
//!                 .expect("unable to read service account credentials")
//!                 .expect("GOOGLE_APPLICATION_CREDENTIALS is not set");
//!             Arc::new(provider) as Arc<dyn TokenProvider>
//!         })
//!         .await
//! }
//! ```

#![warn(unreachable_pub)]

use std::error::Error as StdError;
use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use thiserror::Error;

mod cache;

mod config;
pub use config::Config;

mod jwt;

mod service_account;
pub use service_account::ServiceAccount;

mod types;
pub use types::{ServiceAccountKey, Signer, Token};

/// Scope granting access to the Firebase Cloud Messaging HTTP v1 API
pub const FIREBASE_MESSAGING_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";

/// A trait for an authentication context that can provide tokens
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Get a valid token for the given scope
    ///
    /// Tokens are cached until they come within the refresh margin of their expiry, so this
    /// method will only fetch a fresh token once the current token (for the given scope) is
    /// about to expire.
    async fn token(&self, scope: &str) -> Result<Arc<Token>, AuthError>;

    /// Get the value of a valid token for the given scope
    ///
    /// The result can be used in the request authorization header in format "Bearer {token}".
    async fn get_token(&self, scope: &str) -> Result<String, AuthError> {
        Ok(self.token(scope).await?.as_str().to_owned())
    }

    /// Get the project ID for the authentication context
    async fn project_id(&self) -> Result<Arc<str>, AuthError>;
}

/// Enumerates all possible errors returned by this library
///
/// Errors are cheap to clone so that a single failed exchange can be reported to every caller
/// that was waiting on it.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// The service account key is malformed or could not be used for signing
    ///
    /// Retrying will not help; the credentials have to be fixed.
    #[error("invalid service account credentials: {0}")]
    InvalidCredentials(&'static str, #[source] Option<Arc<dyn StdError + Send + Sync>>),

    /// The token endpoint could not be reached or did not answer in time
    ///
    /// This is the only transient error kind, see [`AuthError::is_retryable()`].
    #[error("token endpoint unavailable: {0}")]
    NetworkFailure(&'static str, #[source] Arc<dyn StdError + Send + Sync>),

    /// The token endpoint answered with a non-success status
    #[error("token exchange rejected with status {status}")]
    ExchangeRejected {
        /// HTTP status returned by the token endpoint
        status: StatusCode,
        /// OAuth2 `error` code, if the response carried one
        error: Option<String>,
        /// OAuth2 `error_description`, if the response carried one
        description: Option<String>,
    },

    /// The token endpoint answered successfully but the token could not be used
    #[error("invalid token endpoint response: {0}")]
    InvalidResponse(&'static str, #[source] Option<Arc<dyn StdError + Send + Sync>>),

    /// The requested scope is empty
    #[error("scope must not be empty")]
    InvalidScope,

    /// Any other failure, such as setting up the HTTP client
    #[error("{0}")]
    Other(&'static str, #[source] Arc<dyn StdError + Send + Sync>),
}

impl AuthError {
    /// Whether the failure is transient, so the caller may retry with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkFailure(..))
    }

    pub(crate) fn credentials(
        msg: &'static str,
        err: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::InvalidCredentials(msg, Some(Arc::new(err)))
    }

    pub(crate) fn network(msg: &'static str, err: impl StdError + Send + Sync + 'static) -> Self {
        Self::NetworkFailure(msg, Arc::new(err))
    }

    /// Whether the rejection complains about the `iat`/`exp` window of the assertion
    pub(crate) fn is_clock_skew(&self) -> bool {
        let Self::ExchangeRejected {
            error, description, ..
        } = self
        else {
            return false;
        };

        error.as_deref() == Some("invalid_grant")
            && description.as_deref().is_some_and(|desc| {
                desc.contains("iat") || desc.contains("exp") || desc.contains("timeframe")
            })
    }
}
