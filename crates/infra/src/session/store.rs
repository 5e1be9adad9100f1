use std::time::Duration;

use async_trait::async_trait;

use gatehouse_auth::SessionError;

/// Proof of holding a named lock. Pass it back to [`MemRepository::unlock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    name: String,
    token: String,
}

impl LockLease {
    pub fn new(name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: token.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Shared key/value store with hash fields, key expiry, and a distributed
/// mutex.
///
/// Every method is a single round-trip; none retries on a store fault. Only
/// `lock` retries, and only while the lock is held by someone else.
#[async_trait]
pub trait MemRepository: Send + Sync {
    /// Set `field` only if absent; when it was created, (re)arm the key's
    /// TTL. Returns whether the field was created.
    async fn hset_ex(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, SessionError>;

    /// Set `field` only when `key` exists. Returns whether it was written.
    async fn hset_if_exists(&self, key: &str, field: &str, value: &str)
    -> Result<bool, SessionError>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, SessionError>;

    async fn hdel(&self, key: &str, field: &str) -> Result<(), SessionError>;

    /// Reset the key's TTL. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, SessionError>;

    /// Delete the key. Returns whether anything was deleted.
    async fn del(&self, key: &str) -> Result<bool, SessionError>;

    async fn exists(&self, key: &str) -> Result<bool, SessionError>;

    /// Acquire the named lock, retrying with a fixed delay while it is held.
    /// The lease expires on its own if never released.
    async fn lock(&self, name: &str) -> Result<LockLease, SessionError>;

    /// Release a lease. Fails if the lease already expired or was taken over.
    async fn unlock(&self, lease: LockLease) -> Result<(), SessionError>;
}

/// Whole seconds for a store TTL; sub-second positive durations round up.
pub fn ttl_secs(ttl: Duration) -> u64 {
    if ttl > Duration::ZERO && ttl < Duration::from_secs(1) {
        1
    } else {
        ttl.as_secs()
    }
}
