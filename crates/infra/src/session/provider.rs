use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use gatehouse_auth::session::INIT_FIELD;
use gatehouse_auth::{Session, SessionError, SessionProvider};

use super::store::MemRepository;

/// Namespace for session keys in the shared store.
pub const SESSION_KEY_PREFIX: &str = "session:";

/// Session provider over a [`MemRepository`].
///
/// `init`, `read` and `destroy` each hold the per-session lock
/// `lock:session:<sid>` for exactly one operation. Different ids never
/// contend.
#[derive(Debug)]
pub struct KvSessionProvider<M> {
    store: Arc<M>,
    max_life_time: Duration,
}

impl<M> Clone for KvSessionProvider<M> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            max_life_time: self.max_life_time,
        }
    }
}

impl<M: MemRepository> KvSessionProvider<M> {
    pub fn new(store: Arc<M>, max_life_time: Duration) -> Self {
        Self {
            store,
            max_life_time,
        }
    }

    pub fn max_life_time(&self) -> Duration {
        self.max_life_time
    }

    fn session(&self, sid: &str) -> KvSession<M> {
        KvSession {
            sid: sid.to_string(),
            key: session_key(sid),
            store: self.store.clone(),
        }
    }

    /// Run `work` under the session's lock. `work` does not start until the
    /// lock is held; the lock is released whatever `work` returns.
    async fn locked<T>(
        &self,
        sid: &str,
        op: &'static str,
        work: impl Future<Output = Result<T, SessionError>> + Send,
    ) -> Result<T, SessionError> {
        let lease = self.store.lock(&lock_name(sid)).await?;
        let result = work.await;
        if let Err(err) = self.store.unlock(lease).await {
            warn!(op, error = %err, "session lock release failed");
        }
        result
    }
}

#[async_trait]
impl<M: MemRepository + 'static> SessionProvider for KvSessionProvider<M> {
    type Session = KvSession<M>;

    async fn session_init(&self, sid: &str) -> Result<KvSession<M>, SessionError> {
        let key = session_key(sid);
        let created = self
            .locked(
                sid,
                "session_init",
                self.store.hset_ex(&key, INIT_FIELD, "1", self.max_life_time),
            )
            .await?;
        if !created {
            return Err(SessionError::Conflict(sid.to_string()));
        }
        debug!("session initialized");
        Ok(self.session(sid))
    }

    async fn session_read(&self, sid: &str) -> Result<KvSession<M>, SessionError> {
        let key = session_key(sid);
        let live = self
            .locked(
                sid,
                "session_read",
                self.store.expire(&key, self.max_life_time),
            )
            .await?;
        if !live {
            return Err(SessionError::NotFound);
        }
        Ok(self.session(sid))
    }

    async fn session_destroy(&self, sid: &str) -> Result<(), SessionError> {
        let key = session_key(sid);
        let deleted = self
            .locked(sid, "session_destroy", self.store.del(&key))
            .await?;
        debug!(deleted, "session destroyed");
        Ok(())
    }

    async fn session_gc(&self, _max_life_time: Duration) {
        // The store expires keys natively.
    }
}

/// One live session: a hash under `session:<sid>`.
#[derive(Debug)]
pub struct KvSession<M> {
    sid: String,
    key: String,
    store: Arc<M>,
}

#[async_trait]
impl<M: MemRepository + 'static> Session for KvSession<M> {
    /// Fails with `NotFound` once the session has expired or been destroyed,
    /// rather than recreating the key without a TTL.
    async fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        if self.store.hset_if_exists(&self.key, key, value).await? {
            Ok(())
        } else {
            Err(SessionError::NotFound)
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        self.store.hget(&self.key, key).await
    }

    async fn delete(&self, key: &str) -> Result<(), SessionError> {
        self.store.hdel(&self.key, key).await
    }

    fn session_id(&self) -> &str {
        &self.sid
    }
}

fn session_key(sid: &str) -> String {
    format!("{SESSION_KEY_PREFIX}{sid}")
}

fn lock_name(sid: &str) -> String {
    format!("lock:{SESSION_KEY_PREFIX}{sid}")
}
