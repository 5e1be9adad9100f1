use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, sleep};
use uuid::Uuid;

use gatehouse_auth::SessionError;
use gatehouse_core::LockSettings;

use super::store::{LockLease, MemRepository};

#[derive(Debug)]
struct Entry {
    fields: HashMap<String, String>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug)]
struct Held {
    token: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    hashes: HashMap<String, Entry>,
    locks: HashMap<String, Held>,
}

impl State {
    /// Live entry for `key`; an expired one is evicted on the way.
    fn entry(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        if self.hashes.get(key).is_some_and(|e| !e.live(now)) {
            self.hashes.remove(key);
        }
        self.hashes.get_mut(key)
    }

    /// Drop every expired hash and lapsed lock.
    fn sweep(&mut self, now: Instant) {
        self.hashes.retain(|_, entry| entry.live(now));
        self.locks.retain(|_, held| held.expires_at > now);
    }
}

/// In-memory key/value store with expiring hashes and leased locks.
///
/// Intended for tests/dev. Time comes from `tokio::time`, so a paused test
/// clock drives expiry. Expired keys and lapsed locks are reclaimed whenever
/// a key or lock is created, so nothing outlives its TTL by more than one
/// write.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMemRepository {
    state: Arc<Mutex<State>>,
    lock: LockSettings,
}

impl InMemoryMemRepository {
    pub fn new(lock: LockSettings) -> Self {
        Self {
            state: Arc::default(),
            lock,
        }
    }

    fn state(&self, op: &'static str) -> Result<MutexGuard<'_, State>, SessionError> {
        self.state
            .lock()
            .map_err(|_| SessionError::store(op, "lock poisoned"))
    }

    fn try_lock(&self, name: &str) -> Result<Option<LockLease>, SessionError> {
        let now = Instant::now();
        let mut state = self.state("lock")?;
        state.sweep(now);
        if state.locks.contains_key(name) {
            return Ok(None);
        }
        let token = Uuid::new_v4().to_string();
        state.locks.insert(
            name.to_string(),
            Held {
                token: token.clone(),
                expires_at: now + self.lock.expiry,
            },
        );
        Ok(Some(LockLease::new(name, token)))
    }
}

#[async_trait]
impl MemRepository for InMemoryMemRepository {
    async fn hset_ex(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, SessionError> {
        let now = Instant::now();
        let mut state = self.state("hset_ex")?;
        state.sweep(now);
        let entry = state.hashes.entry(key.to_string()).or_insert_with(|| Entry {
            fields: HashMap::new(),
            expires_at: None,
        });
        if entry.fields.contains_key(field) {
            return Ok(false);
        }
        entry.fields.insert(field.to_string(), value.to_string());
        entry.expires_at = Some(now + ttl);
        Ok(true)
    }

    async fn hset_if_exists(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<bool, SessionError> {
        let mut state = self.state("hset_if_exists")?;
        match state.entry(key, Instant::now()) {
            Some(entry) => {
                entry.fields.insert(field.to_string(), value.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, SessionError> {
        let mut state = self.state("hget")?;
        Ok(state
            .entry(key, Instant::now())
            .and_then(|entry| entry.fields.get(field).cloned()))
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), SessionError> {
        let mut state = self.state("hdel")?;
        let now = Instant::now();
        let emptied = match state.entry(key, now) {
            Some(entry) => {
                entry.fields.remove(field);
                entry.fields.is_empty()
            }
            None => false,
        };
        // A hash with no fields does not exist.
        if emptied {
            state.hashes.remove(key);
        }
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, SessionError> {
        let now = Instant::now();
        let mut state = self.state("expire")?;
        match state.entry(key, now) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn del(&self, key: &str) -> Result<bool, SessionError> {
        let now = Instant::now();
        let mut state = self.state("del")?;
        let live = state.entry(key, now).is_some();
        state.hashes.remove(key);
        Ok(live)
    }

    async fn exists(&self, key: &str) -> Result<bool, SessionError> {
        let mut state = self.state("exists")?;
        Ok(state.entry(key, Instant::now()).is_some())
    }

    async fn lock(&self, name: &str) -> Result<LockLease, SessionError> {
        let tries = self.lock.tries.max(1);
        for attempt in 1..=tries {
            if let Some(lease) = self.try_lock(name)? {
                return Ok(lease);
            }
            if attempt < tries {
                sleep(self.lock.retry_delay).await;
            }
        }
        Err(SessionError::Lock {
            name: name.to_string(),
            message: format!("still held after {tries} tries"),
        })
    }

    async fn unlock(&self, lease: LockLease) -> Result<(), SessionError> {
        let now = Instant::now();
        let mut state = self.state("unlock")?;
        let owned = state
            .locks
            .get(lease.name())
            .is_some_and(|held| held.token == lease.token() && held.expires_at > now);
        if !owned {
            return Err(SessionError::Lock {
                name: lease.name().to_string(),
                message: "lease expired or taken over".to_string(),
            });
        }
        state.locks.remove(lease.name());
        Ok(())
    }
}
