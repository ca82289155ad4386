use std::time::Duration;

/// Tuning for a [`ServiceAccount`](crate::ServiceAccount)
///
/// The defaults suit the Google OAuth2 token endpoint.
#[derive(Clone, Debug)]
pub struct Config {
    pub(crate) refresh_margin: Duration,
    pub(crate) request_timeout: Duration,
    pub(crate) retries: u8,
    pub(crate) assertion_lifetime: Duration,
}

impl Config {
    /// How long before its expiry a cached token is considered expired
    ///
    /// Callers get tokens that stay valid for at least this long.
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Upper bound on a single request to the token endpoint, including reading the response
    ///
    /// A token request may take several attempts, see [`Config::max_exchange_time()`].
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// How many times a request that failed on the network is repeated before giving up
    ///
    /// Every attempt gets its own request timeout, see [`Config::max_exchange_time()`].
    pub fn with_retries(mut self, retries: u8) -> Self {
        self.retries = retries;
        self
    }

    /// Validity requested for the signed assertion, between one minute and one hour
    pub fn with_assertion_lifetime(mut self, lifetime: Duration) -> Self {
        self.assertion_lifetime = lifetime.clamp(MIN_ASSERTION_LIFETIME, MAX_ASSERTION_LIFETIME);
        self
    }

    /// Longest a single token request can wait on the token endpoint
    ///
    /// Each exchange makes up to `retries + 1` attempts bounded by the request timeout, and a
    /// rejection caused by clock skew leads to one more exchange.
    pub fn max_exchange_time(&self) -> Duration {
        self.request_timeout
            .saturating_mul(2 * (u32::from(self.retries) + 1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_margin: Duration::from_secs(60),
            request_timeout: Duration::from_secs(10),
            retries: 2,
            assertion_lifetime: MAX_ASSERTION_LIFETIME,
        }
    }
}

const MIN_ASSERTION_LIFETIME: Duration = Duration::from_secs(60);
const MAX_ASSERTION_LIFETIME: Duration = Duration::from_secs(3600);
