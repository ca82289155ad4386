use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use http_body_util::Full;
use hyper::header::CONTENT_TYPE;
use hyper::Request;
use tracing::{debug, instrument, warn, Level};
use url::form_urlencoded;

use crate::cache::{Lookup, TokenCache};
use crate::jwt::{Claims, GRANT_TYPE};
use crate::types::{HttpClient, ServiceAccountKey, Signer, Token};
use crate::{AuthError, Config, TokenProvider};

/// A service account exchanging signed assertions for access tokens
///
/// The credentials are validated and the signing key is loaded when the service account is
/// created, so a bad key is reported up front rather than on the first token request.
#[derive(Debug)]
pub struct ServiceAccount {
    client: HttpClient,
    key: ServiceAccountKey,
    signer: Signer,
    config: Config,
    tokens: TokenCache,
    subject: Option<String>,
    /// Seconds the token endpoint's clock is ahead of ours
    clock_offset: AtomicI64,
}

impl ServiceAccount {
    /// Check `GOOGLE_APPLICATION_CREDENTIALS` environment variable for a path to JSON credentials
    pub fn from_env() -> Result<Option<Self>, AuthError> {
        debug!("check for GOOGLE_APPLICATION_CREDENTIALS env var");
        match ServiceAccountKey::from_env()? {
            Some(key) => Self::new(key, Config::default()).map(Some),
            None => Ok(None),
        }
    }

    /// Read service account credentials from the given JSON file
    pub fn from_file<T: AsRef<Path>>(path: T) -> Result<Self, AuthError> {
        Self::new(ServiceAccountKey::from_file(path)?, Config::default())
    }

    /// Read service account credentials from the given JSON string
    pub fn from_json(s: &str) -> Result<Self, AuthError> {
        Self::new(ServiceAccountKey::from_str(s)?, Config::default())
    }

    /// Create a service account from parsed credentials
    pub fn new(key: ServiceAccountKey, config: Config) -> Result<Self, AuthError> {
        debug!(project = ?key.project_id, email = key.client_email, "found credentials");
        let signer = Signer::new(&key.private_key)?;
        Ok(Self {
            client: HttpClient::new()?,
            signer,
            tokens: TokenCache::new(config.refresh_margin),
            key,
            config,
            subject: None,
            clock_offset: AtomicI64::new(0),
        })
    }

    /// Set the `subject` to impersonate a user
    pub fn with_subject(mut self, subject: String) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Replace the configuration
    pub fn with_config(mut self, config: Config) -> Self {
        self.tokens = TokenCache::new(config.refresh_margin);
        self.config = config;
        self
    }

    /// The RSA PKCS1 SHA256 [`Signer`] used to sign JWT tokens
    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    /// The credentials this service account authenticates with
    pub fn key(&self) -> &ServiceAccountKey {
        &self.key
    }

    /// Sign an assertion for `scope` and exchange it for a token
    ///
    /// If the endpoint rejects the assertion because its clock disagrees with ours, the
    /// clock offset is taken from the response and the exchange is repeated once.
    #[instrument(level = Level::DEBUG, skip(self))]
    async fn fetch_token(&self, scope: &str) -> Result<Arc<Token>, AuthError> {
        let err = match self.exchange(scope).await {
            Ok(token) => return Ok(token),
            Err(Exchange::Failed(err)) => return Err(err),
            Err(Exchange::Rejected { err, server_date }) => match server_date {
                Some(date) if err.is_clock_skew() => {
                    let offset = date.signed_duration_since(Utc::now()).num_seconds();
                    warn!(offset, "token endpoint reports clock skew, resynchronizing");
                    self.clock_offset.store(offset, Ordering::Relaxed);
                    err
                }
                _ => return Err(err),
            },
        };

        match self.exchange(scope).await {
            Ok(token) => Ok(token),
            Err(Exchange::Failed(err)) => Err(err),
            Err(Exchange::Rejected { err: retry_err, .. }) => {
                debug!(?err, "first rejection before clock resynchronization");
                Err(retry_err)
            }
        }
    }

    async fn exchange(&self, scope: &str) -> Result<Arc<Token>, Exchange> {
        let now = Utc::now() + Duration::seconds(self.clock_offset.load(Ordering::Relaxed));
        let lifetime = self.config.assertion_lifetime.as_secs() as i64;
        let jwt = Claims::new(&self.key, scope, self.subject.as_deref(), now, lifetime)
            .to_jwt(&self.signer)?;
        let body = Bytes::from(
            form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&[("grant_type", GRANT_TYPE), ("assertion", jwt.as_str())])
                .finish()
                .into_bytes(),
        );

        let mut retries = 0;
        let rsp = loop {
            let req = Request::post(&self.key.token_uri)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Full::from(body.clone()))
                .map_err(|err| AuthError::credentials("failed to build token request", err))?;

            let err = match self.client.request(req, self.config.request_timeout).await {
                // Early return when the request succeeds
                Ok(rsp) => break rsp,
                Err(err) => err,
            };

            if retries >= self.config.retries {
                return Err(err.into());
            }

            retries += 1;
            warn!(?err, retries, "failed to reach token endpoint, trying again...");
        };

        let server_date = rsp.date;
        let token = match rsp.token() {
            Ok(token) => token,
            Err(err @ AuthError::ExchangeRejected { .. }) => {
                return Err(Exchange::Rejected { err, server_date })
            }
            Err(err) => return Err(err.into()),
        };

        if token.expires_within(self.config.refresh_margin) {
            warn!(
                expires_at = %token.expires_at(),
                "token endpoint issued a token that expires within the refresh margin"
            );
            return Err(AuthError::InvalidResponse(
                "token lifetime is shorter than the refresh margin",
                None,
            )
            .into());
        }

        debug!(expires_at = %token.expires_at(), "received token");
        Ok(Arc::new(token))
    }
}

#[async_trait]
impl TokenProvider for ServiceAccount {
    async fn token(&self, scope: &str) -> Result<Arc<Token>, AuthError> {
        if scope.trim().is_empty() {
            return Err(AuthError::InvalidScope);
        }

        loop {
            match self.tokens.lookup(scope) {
                Lookup::Cached(token) => return Ok(token),
                Lookup::Lead(flight) => {
                    let result = self.fetch_token(scope).await;
                    return flight.complete(result);
                }
                Lookup::Wait(rx) => match rx.await {
                    Ok(result) => return result,
                    // The leading caller went away before finishing; take over
                    Err(_) => continue,
                },
            }
        }
    }

    async fn project_id(&self) -> Result<Arc<str>, AuthError> {
        match &self.key.project_id {
            Some(pid) => Ok(pid.clone()),
            None => Err(AuthError::InvalidCredentials(
                "no project ID in service account key",
                None,
            )),
        }
    }
}

/// Failure of one exchange attempt, keeping what is needed to resynchronize the clock
enum Exchange {
    Rejected {
        err: AuthError,
        server_date: Option<DateTime<Utc>>,
    },
    Failed(AuthError),
}

impl From<AuthError> for Exchange {
    fn from(err: AuthError) -> Self {
        Self::Failed(err)
    }
}
