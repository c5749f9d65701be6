//! Server side sessions.
//!
//! A [`Session`] is a typed bag of values keyed by name that business handlers read
//! and write between requests. The [`SessionStore`] owns every session, hands out
//! tokens, and evicts sessions older than the configured time to live.

pub use store::{generate_token, SessionStore};

mod store;

use std::any::Any;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::time::Duration;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use tokio::time::Instant;

pub type SessionData = HashMap<String, Box<dyn Any + Send + Sync>>;

pub struct Session {
    token: String,
    created_at: Instant,
    created_date: DateTime<Local>,
    data: Mutex<SessionData>,
}

impl Session {
    pub(crate) fn new(token: String) -> Self {
        Session {
            token,
            created_at: Instant::now(),
            created_date: Local::now(),
            data: Mutex::new(HashMap::new()),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Monotonic creation instant, the base of expiry.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Wall clock creation time, for display.
    pub fn created_date(&self) -> DateTime<Local> {
        self.created_date
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.age() > ttl
    }

    /// Stores `value` under `key`, returns true if an older value was replaced.
    pub fn insert<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) -> bool {
        self.data.lock().insert(key.into(), Box::new(value)).is_some()
    }

    /// Copy of the value under `key`, `None` if absent or of another type.
    pub fn get<T: Any + Clone>(&self, key: &str) -> Option<T> {
        self.data.lock().get(key)?.downcast_ref::<T>().cloned()
    }

    pub fn remove(&self, key: &str) -> bool {
        self.data.lock().remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.lock().contains_key(key)
    }

    /// Runs `f` with the data bag locked, for read-modify-write sequences that must
    /// not interleave with another request on the same session.
    pub fn with_data<R>(&self, f: impl FnOnce(&mut SessionData) -> R) -> R {
        let mut data = self.data.lock();
        f(&mut data)
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self.data.lock().keys().cloned().collect();
        f.debug_struct("Session")
            .field("token", &self.token)
            .field("created_date", &self.created_date)
            .field("keys", &keys)
            .finish()
    }
}
