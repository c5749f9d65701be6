// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use super::Session;
use crate::service::SessionConfig;
use crate::{AppError, AppResult, Shutdown};

/// Consecutive colliding token draws before creation gives up.
const MAX_TOKEN_ATTEMPTS: usize = 64;

/// Every live session, keyed by token.
///
/// All access goes through the sharded `DashMap`: creation claims a token through
/// `entry()` so two concurrent creations can never end up with the same token, and
/// the sweep removes expired entries shard by shard under the shard lock.
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<String, Arc<Session>>,
    token_length: usize,
    ttl: Duration,
    sweep_interval: Duration,
}

impl SessionStore {
    pub fn new(config: &SessionConfig) -> AppResult<Self> {
        if config.token_length == 0 {
            return Err(AppError::InvalidValue(
                "session token length must be at least 1".into(),
            ));
        }
        if config.sweep_interval_secs == 0 {
            return Err(AppError::InvalidValue(
                "session sweep interval must be at least 1 second".into(),
            ));
        }
        Ok(SessionStore {
            sessions: DashMap::new(),
            token_length: config.token_length,
            ttl: config.ttl(),
            sweep_interval: config.sweep_interval(),
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn token_length(&self) -> usize {
        self.token_length
    }

    /// Creates a session under a fresh token, drawing again on collision with a live
    /// one. Fails once `MAX_TOKEN_ATTEMPTS` draws in a row collided, which means the
    /// token space is (nearly) exhausted.
    pub fn create_session(&self) -> AppResult<Arc<Session>> {
        for attempt in 1..=MAX_TOKEN_ATTEMPTS {
            let token = generate_token(self.token_length);
            if let Entry::Vacant(entry) = self.sessions.entry(token) {
                let session = Arc::new(Session::new(entry.key().clone()));
                entry.insert(session.clone());
                debug!("created session with token={}", session.token());
                return Ok(session);
            }
            trace!("session token collision {}, drawing again", attempt);
        }
        warn!(
            "no free session token of length {} after {} draws, {} sessions live",
            self.token_length,
            MAX_TOKEN_ATTEMPTS,
            self.sessions.len()
        );
        Err(AppError::SessionTokensExhausted(self.token_length))
    }

    /// Live session for `token`. A session past its time to live is not returned even if
    /// the sweep has not removed it yet.
    pub fn get(&self, token: &str) -> Option<Arc<Session>> {
        let session = self.sessions.get(token)?.value().clone();
        if session.is_expired(self.ttl) {
            return None;
        }
        Some(session)
    }

    /// Removes the session, returns whether it existed. Closing twice is fine.
    pub fn close(&self, token: &str) -> bool {
        let removed = self.sessions.remove(token).is_some();
        if removed {
            debug!("closed session with token={}", token);
        }
        removed
    }

    /// Whether the map still holds `token`, expired or not.
    pub fn contains(&self, token: &str) -> bool {
        self.sessions.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// One sweep: drops every session older than the time to live. Returns how many.
    pub fn evict_expired(&self) -> usize {
        let ttl = self.ttl;
        let mut removed = 0;
        self.sessions.retain(|token, session| {
            if session.is_expired(ttl) {
                info!("deleted session with token={}", token);
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Starts the background sweep, it runs until `shutdown` fires.
    pub fn spawn_eviction(self: &Arc<Self>, shutdown: Shutdown) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move { store.run_eviction(shutdown).await })
    }

    /// Sweeps every `sweep_interval`. A panicking sweep is logged and the next tick
    /// tries again.
    pub async fn run_eviction(&self, mut shutdown: Shutdown) {
        let mut interval = time::interval(self.sweep_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(
            "session eviction started, ttl {:?}, interval {:?}",
            self.ttl, self.sweep_interval
        );
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.recv() => {
                    debug!("session eviction received shutdown signal");
                    break;
                }
            }
            match catch_unwind(AssertUnwindSafe(|| self.evict_expired())) {
                Ok(0) => {}
                Ok(removed) => trace!("session sweep removed {} sessions", removed),
                Err(_) => error!("session sweep panicked, retrying on the next tick"),
            }
        }
    }
}

/// Uniform draw of `length` characters from `[a-zA-Z0-9]`.
pub fn generate_token(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::service::ShutdownNotifier;

    fn store(ttl_secs: u64) -> Arc<SessionStore> {
        let config = SessionConfig {
            token_length: 8,
            ttl_secs,
            sweep_interval_secs: 5,
        };
        Arc::new(SessionStore::new(&config).unwrap())
    }

    #[test]
    fn test_token_alphabet_and_length() {
        for length in [1, 8, 32] {
            let token = generate_token(length);
            assert_eq!(token.len(), length);
            assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_zero_length_rejected() {
        let config = SessionConfig {
            token_length: 0,
            ..SessionConfig::default()
        };
        assert!(SessionStore::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_create_get_close() {
        let store = store(60);
        let session = store.create_session().unwrap();
        let token = session.token().to_string();
        assert_eq!(token.len(), 8);

        let found = store.get(&token).unwrap();
        assert!(Arc::ptr_eq(&session, &found));
        assert!(store.get("missing").is_none());

        assert!(store.close(&token));
        assert!(!store.close(&token));
        assert!(store.get(&token).is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_single_character_tokens_stay_unique() {
        // 62 possible tokens, every creation must land on a free one
        let config = SessionConfig {
            token_length: 1,
            ttl_secs: 60,
            sweep_interval_secs: 5,
        };
        let store = SessionStore::new(&config).unwrap();
        let tokens: HashSet<String> = (0..40)
            .map(|_| store.create_session().unwrap().token().to_string())
            .collect();
        assert_eq!(tokens.len(), 40);
        assert_eq!(store.len(), 40);
    }

    #[test]
    fn test_exhausted_token_space_fails() {
        let config = SessionConfig {
            token_length: 1,
            ttl_secs: 60,
            sweep_interval_secs: 5,
        };
        let store = SessionStore::new(&config).unwrap();
        let mut failure = None;
        // at most 62 one-character tokens exist, so creation must give up eventually
        for _ in 0..1000 {
            if let Err(err) = store.create_session() {
                failure = Some(err);
                break;
            }
        }
        assert!(matches!(
            failure,
            Some(AppError::SessionTokensExhausted(1))
        ));
        assert!(store.len() <= 62);
    }

    #[test]
    fn test_concurrent_creation_is_unique() {
        let config = SessionConfig {
            token_length: 3,
            ttl_secs: 60,
            sweep_interval_secs: 5,
        };
        let store = Arc::new(SessionStore::new(&config).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..500)
                        .map(|_| store.create_session().unwrap().token().to_string())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all = HashSet::new();
        for handle in handles {
            for token in handle.join().unwrap() {
                assert!(all.insert(token), "duplicate token handed out");
            }
        }
        assert_eq!(all.len(), 4000);
        assert_eq!(store.len(), 4000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_expired() {
        let store = store(10);
        let old = store.create_session().unwrap().token().to_string();
        time::advance(Duration::from_secs(6)).await;
        let young = store.create_session().unwrap().token().to_string();
        time::advance(Duration::from_secs(5)).await;

        assert_eq!(store.evict_expired(), 1);
        assert!(!store.contains(&old));
        assert!(store.get(&young).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_hides_expired_before_sweep() {
        let store = store(10);
        let token = store.create_session().unwrap().token().to_string();
        time::advance(Duration::from_secs(11)).await;
        assert!(store.get(&token).is_none());
        assert!(store.contains(&token));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep() {
        let store = store(10);
        let notifier = ShutdownNotifier::new();
        let handle = store.spawn_eviction(notifier.subscribe());
        let token = store.create_session().unwrap().token().to_string();

        time::sleep(Duration::from_secs(9)).await;
        assert!(store.get(&token).is_some());

        // ttl + sweep interval + a little
        time::sleep(Duration::from_secs(7)).await;
        assert!(!store.contains(&token));

        notifier.notify();
        handle.await.unwrap();
    }
}
