//! # Ceremony Challenge Store
//!
//! A WebAuthn ceremony spans two HTTP requests: "begin" generates a challenge,
//! "finish" verifies the authenticator's answer to it. The server-side half of
//! the ceremony (challenge bytes, expected RP ID/origin, user verification
//! policy) has to survive between those two requests. This module keeps it in
//! memory.
//!
//! ## Guarantees
//! - **Single use**: [`ChallengeStore::take`] removes the entry it returns, so a
//!   ceremony transcript can never be finished twice.
//! - **Short lived**: entries expire [`CHALLENGE_TTL`] after they were stored.
//!   Expiry is checked on every read, so correctness never depends on the
//!   background sweep.
//! - **Last write wins**: storing twice under the same key replaces the first
//!   entry without warning.
//!
//! ## Memory
//! Abandoned ceremonies (closed tab, cancelled authenticator prompt) are never
//! read. A background task removes expired entries every [`SWEEP_INTERVAL`].
//! The task only holds a weak reference and stops once the store is dropped.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};

/// How long a ceremony may take between "begin" and "finish"
pub const CHALLENGE_TTL: Duration = Duration::from_secs(2 * 60);

/// How often the background sweep drops expired entries
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Identifies one in-flight ceremony
///
/// Each variant is its own namespace: a registration for user 42 and a login
/// for user 42 live under different keys and never overwrite each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChallengeKey {
    /// Registration or "add credential", keyed by the user id
    Registration(i64),
    /// Username-hinted login, keyed by the user id
    Login(i64),
    /// Usernameless login, keyed by a server-generated opaque session id
    DiscoverableLogin(String),
}

impl fmt::Display for ChallengeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeKey::Registration(user_id) => write!(f, "registration:{user_id}"),
            ChallengeKey::Login(user_id) => write!(f, "login:{user_id}"),
            ChallengeKey::DiscoverableLogin(session_id) => write!(f, "discoverable:{session_id}"),
        }
    }
}

/// Why [`ChallengeStore::take`] could not return a ceremony state
///
/// Callers usually collapse both into a single "session expired" answer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeStoreError {
    #[error("ceremony session not found")]
    NotFound,

    #[error("ceremony session expired")]
    Expired,
}

struct Entry<S> {
    state: S,
    expires_at: Instant,
}

struct Inner<S> {
    entries: Mutex<HashMap<ChallengeKey, Entry<S>>>,
    ttl: Duration,
}

impl<S> Inner<S> {
    fn sweep(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| now <= entry.expires_at);
        before - entries.len()
    }
}

/// TTL-bounded, single-use map of ceremony states
///
/// Cloning is cheap and every clone shares the same entries.
pub struct ChallengeStore<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for ChallengeStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Send + 'static> Default for ChallengeStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Send + 'static> ChallengeStore<S> {
    /// Create a store with the standard two-minute TTL
    ///
    /// When called inside a Tokio runtime the background sweep starts right
    /// away. Outside a runtime expired entries are only dropped on read or by
    /// an explicit [`sweep_expired`](Self::sweep_expired).
    pub fn new() -> Self {
        Self::with_ttl(CHALLENGE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        let store = Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                ttl,
            }),
        };
        store.spawn_sweeper(SWEEP_INTERVAL);
        store
    }

    fn spawn_sweeper(&self, every: Duration) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no Tokio runtime, challenge sweep disabled");
            return;
        };

        let inner: Weak<Inner<S>> = Arc::downgrade(&self.inner);
        let mut interval = tokio::time::interval_at(Instant::now() + every, every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        runtime.spawn(async move {
            loop {
                interval.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let removed = inner.sweep(Instant::now());
                if removed > 0 {
                    tracing::debug!(removed, "swept expired ceremony challenges");
                }
            }
        });
    }

    /// Store `state` under `key`, replacing whatever was there
    pub fn put(&self, key: ChallengeKey, state: S) {
        let expires_at = Instant::now() + self.inner.ttl;
        let replaced = self
            .inner
            .entries
            .lock()
            .insert(key.clone(), Entry { state, expires_at })
            .is_some();

        if replaced {
            tracing::debug!(%key, "replaced pending ceremony challenge");
        }
    }

    /// Remove the entry for `key` and return its state if it is still valid
    ///
    /// The entry is removed even when it turns out to be expired.
    pub fn take(&self, key: &ChallengeKey) -> Result<S, ChallengeStoreError> {
        let entry = self
            .inner
            .entries
            .lock()
            .remove(key)
            .ok_or(ChallengeStoreError::NotFound)?;

        if Instant::now() > entry.expires_at {
            return Err(ChallengeStoreError::Expired);
        }

        Ok(entry.state)
    }

    /// Drop every expired entry and return how many were removed
    pub fn sweep_expired(&self) -> usize {
        self.inner.sweep(Instant::now())
    }

    /// Number of stored entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task::JoinSet;

    #[test]
    fn take_is_single_use() {
        let store = ChallengeStore::new();
        store.put(ChallengeKey::Registration(123), "test-challenge");

        assert_eq!(store.take(&ChallengeKey::Registration(123)), Ok("test-challenge"));
        assert_eq!(
            store.take(&ChallengeKey::Registration(123)),
            Err(ChallengeStoreError::NotFound)
        );
    }

    #[test]
    fn missing_key_is_not_found() {
        let store: ChallengeStore<&str> = ChallengeStore::new();

        assert_eq!(
            store.take(&ChallengeKey::DiscoverableLogin("nonexistent".into())),
            Err(ChallengeStoreError::NotFound)
        );
    }

    #[test]
    fn second_put_overwrites_first() {
        let store = ChallengeStore::new();
        store.put(ChallengeKey::Login(7), "first");
        store.put(ChallengeKey::Login(7), "second");

        assert_eq!(store.len(), 1);
        assert_eq!(store.take(&ChallengeKey::Login(7)), Ok("second"));
        assert!(store.take(&ChallengeKey::Login(7)).is_err());
    }

    #[test]
    fn namespaces_do_not_collide() {
        let store = ChallengeStore::new();
        store.put(ChallengeKey::Registration(42), "registration");
        store.put(ChallengeKey::Login(42), "login");
        store.put(ChallengeKey::DiscoverableLogin("42".into()), "discoverable");

        assert_eq!(store.take(&ChallengeKey::Login(42)), Ok("login"));
        assert_eq!(
            store.take(&ChallengeKey::DiscoverableLogin("42".into())),
            Ok("discoverable")
        );
        assert_eq!(store.take(&ChallengeKey::Registration(42)), Ok("registration"));
    }

    #[test]
    fn keys_render_with_namespace_prefix() {
        assert_eq!(ChallengeKey::Registration(5).to_string(), "registration:5");
        assert_eq!(ChallengeKey::Login(5).to_string(), "login:5");
        assert_eq!(
            ChallengeKey::DiscoverableLogin("abc".into()).to_string(),
            "discoverable:abc"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn read_after_ttl_is_expired_without_sweep() {
        let store = ChallengeStore::new();
        store.put(ChallengeKey::Registration(1), "state");

        tokio::time::advance(CHALLENGE_TTL + Duration::from_millis(1)).await;

        assert_eq!(
            store.take(&ChallengeKey::Registration(1)),
            Err(ChallengeStoreError::Expired)
        );
        // the expired entry was consumed by the read
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn read_just_before_ttl_succeeds() {
        let store = ChallengeStore::new();
        store.put(ChallengeKey::Login(1), "state");

        tokio::time::advance(CHALLENGE_TTL - Duration::from_secs(1)).await;

        assert_eq!(store.take(&ChallengeKey::Login(1)), Ok("state"));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_only_removes_expired_entries() {
        let store = ChallengeStore::with_ttl(Duration::from_secs(10));
        store.put(ChallengeKey::Registration(1), "old");

        tokio::time::advance(Duration::from_secs(8)).await;
        store.put(ChallengeKey::Registration(2), "fresh");

        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(store.sweep_expired(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.take(&ChallengeKey::Registration(2)), Ok("fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweep_reclaims_abandoned_ceremonies() {
        let store = ChallengeStore::new();
        store.put(ChallengeKey::DiscoverableLogin("abandoned".into()), "state");

        tokio::time::advance(CHALLENGE_TTL + SWEEP_INTERVAL + Duration::from_secs(1)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_puts_and_takes_lose_nothing() {
        let store = ChallengeStore::new();

        let mut writers = JoinSet::new();
        for user_id in 0..100 {
            let store = store.clone();
            writers.spawn(async move {
                store.put(ChallengeKey::Registration(user_id), user_id);
            });
        }
        while let Some(joined) = writers.join_next().await {
            joined.expect("writer task panicked");
        }

        let mut readers = JoinSet::new();
        for user_id in 0..100 {
            let store = store.clone();
            readers.spawn(async move { store.take(&ChallengeKey::Registration(user_id)) });
        }

        let mut successes = 0;
        while let Some(joined) = readers.join_next().await {
            joined.expect("reader task panicked").expect("state missing");
            successes += 1;
        }

        assert_eq!(successes, 100);
        assert!(store.is_empty());
    }
}
