use std::collections::HashMap;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::types::Token;
use crate::AuthError;

type Waiter = oneshot::Sender<Result<Arc<Token>, AuthError>>;

/// Per-scope token cache with at most one exchange in flight per scope
///
/// The mutex is only held for short bookkeeping, never across an await point.
#[derive(Debug)]
pub(crate) struct TokenCache {
    slots: Mutex<HashMap<String, Slot>>,
    margin: Duration,
}

#[derive(Debug, Default)]
struct Slot {
    token: Option<Arc<Token>>,
    state: Flight,
}

#[derive(Debug, Default)]
enum Flight {
    #[default]
    Idle,
    Exchanging(Vec<Waiter>),
}

/// Outcome of looking up a scope
pub(crate) enum Lookup<'a> {
    /// A cached token outside the refresh margin
    Cached(Arc<Token>),
    /// Another caller is exchanging; its result arrives on the receiver
    Wait(oneshot::Receiver<Result<Arc<Token>, AuthError>>),
    /// The caller must run the exchange and report through the guard
    Lead(FlightGuard<'a>),
}

impl TokenCache {
    pub(crate) fn new(margin: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            margin,
        }
    }

    pub(crate) fn lookup(&self, scope: &str) -> Lookup<'_> {
        let mut slots = self.lock();
        let slot = slots.entry(scope.to_owned()).or_default();

        if let Some(token) = &slot.token {
            if !token.expires_within(self.margin) {
                return Lookup::Cached(token.clone());
            }

            debug!(scope, expires_at = %token.expires_at(), "cached token expired");
            slot.token = None;
        }

        match &mut slot.state {
            Flight::Exchanging(waiters) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                debug!(scope, waiters = waiters.len(), "joining in-flight token exchange");
                Lookup::Wait(rx)
            }
            state @ Flight::Idle => {
                *state = Flight::Exchanging(Vec::new());
                Lookup::Lead(FlightGuard {
                    cache: self,
                    scope: scope.to_owned(),
                    done: false,
                })
            }
        }
    }

    /// Return the slot to idle, keeping `token` on success, and hand back the waiters
    fn finish(&self, scope: &str, token: Option<Arc<Token>>) -> Vec<Waiter> {
        let mut slots = self.lock();
        let slot = slots.entry(scope.to_owned()).or_default();
        if token.is_some() {
            slot.token = token;
        }

        match mem::take(&mut slot.state) {
            Flight::Exchanging(waiters) => waiters,
            Flight::Idle => Vec::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        // The map is consistent after every critical section, so poisoning is harmless
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn insert(&self, scope: &str, token: Arc<Token>) {
        self.lock().entry(scope.to_owned()).or_default().token = Some(token);
    }
}

/// Leadership of the exchange for one scope
///
/// Dropping the guard without completing it (e.g. because the leading future was cancelled)
/// releases the waiters, which then retry.
pub(crate) struct FlightGuard<'a> {
    cache: &'a TokenCache,
    scope: String,
    done: bool,
}

impl FlightGuard<'_> {
    /// Publish the exchange result to the cache and every waiter
    pub(crate) fn complete(
        mut self,
        result: Result<Arc<Token>, AuthError>,
    ) -> Result<Arc<Token>, AuthError> {
        self.done = true;
        let waiters = self.cache.finish(&self.scope, result.as_ref().ok().cloned());
        if !waiters.is_empty() {
            debug!(
                scope = %self.scope,
                waiters = waiters.len(),
                ok = result.is_ok(),
                "sharing token exchange result"
            );
        }

        for waiter in waiters {
            // The waiter may have gone away in the meantime
            let _ = waiter.send(result.clone());
        }

        result
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            debug!(scope = %self.scope, "token exchange abandoned");
            drop(self.cache.finish(&self.scope, None));
        }
    }
}
