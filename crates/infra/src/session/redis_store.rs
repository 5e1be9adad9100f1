//! Redis-backed key/value store.
//!
//! Sessions are Redis hashes. Conditional writes run as Lua scripts so the
//! check and the write are one atomic step on the server. The mutex is the
//! single-instance Redlock pattern: `SET name token NX PX expiry` to take it,
//! a compare-and-delete script to release it.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{RedisError, Script};
use tokio::time::sleep;
use tracing::instrument;
use uuid::Uuid;

use gatehouse_auth::SessionError;
use gatehouse_core::LockSettings;

use super::store::{LockLease, MemRepository, ttl_secs};

/// Set the field only if absent; arm the TTL when it was created.
const HSET_EX: &str = r#"
local created = redis.call('HSETNX', KEYS[1], ARGV[1], ARGV[2])
if created == 1 then
  redis.call('EXPIRE', KEYS[1], tonumber(ARGV[3]))
end
return created
"#;

const HSET_IF_EXISTS: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
  return 1
end
return 0
"#;

const UNLOCK: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

#[derive(Clone)]
pub struct RedisMemRepository {
    conn: MultiplexedConnection,
    lock: LockSettings,
    hset_ex: Script,
    hset_if_exists: Script,
    unlock: Script,
}

impl core::fmt::Debug for RedisMemRepository {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisMemRepository")
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

impl RedisMemRepository {
    /// Connect to `redis_url` (e.g. "redis://localhost:6379").
    pub async fn connect(redis_url: &str, lock: LockSettings) -> Result<Self, SessionError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| SessionError::store("connect", e))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| SessionError::store("connect", e))?;
        Ok(Self::with_connection(conn, lock))
    }

    pub fn with_connection(conn: MultiplexedConnection, lock: LockSettings) -> Self {
        Self {
            conn,
            lock,
            hset_ex: Script::new(HSET_EX),
            hset_if_exists: Script::new(HSET_IF_EXISTS),
            unlock: Script::new(UNLOCK),
        }
    }

    async fn try_lock(&self, name: &str, token: &str) -> Result<bool, SessionError> {
        let mut conn = self.conn.clone();
        let expiry_ms = u64::try_from(self.lock.expiry.as_millis()).unwrap_or(u64::MAX);
        let reply: Option<String> = redis::cmd("SET")
            .arg(name)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(expiry_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("lock", e))?;
        Ok(reply.is_some())
    }
}

#[async_trait]
impl MemRepository for RedisMemRepository {
    #[instrument(skip(self, value), err)]
    async fn hset_ex(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, SessionError> {
        let mut conn = self.conn.clone();
        let created: i64 = self
            .hset_ex
            .key(key)
            .arg(field)
            .arg(value)
            .arg(ttl_secs(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| command_error("hset_ex", e))?;
        Ok(created == 1)
    }

    #[instrument(skip(self, value), err)]
    async fn hset_if_exists(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<bool, SessionError> {
        let mut conn = self.conn.clone();
        let written: i64 = self
            .hset_if_exists
            .key(key)
            .arg(field)
            .arg(value)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| command_error("hset_if_exists", e))?;
        Ok(written == 1)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, SessionError> {
        let mut conn = self.conn.clone();
        redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("hget", e))
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), SessionError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("HDEL")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("hdel", e))?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, SessionError> {
        let mut conn = self.conn.clone();
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("expire", e))
    }

    async fn del(&self, key: &str) -> Result<bool, SessionError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("del", e))?;
        Ok(deleted > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, SessionError> {
        let mut conn = self.conn.clone();
        redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("exists", e))
    }

    #[instrument(skip(self), err)]
    async fn lock(&self, name: &str) -> Result<LockLease, SessionError> {
        let token = Uuid::new_v4().to_string();
        let tries = self.lock.tries.max(1);
        for attempt in 1..=tries {
            if self.try_lock(name, &token).await? {
                return Ok(LockLease::new(name, token));
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
        let mut conn = self.conn.clone();
        let released: i64 = self
            .unlock
            .key(lease.name())
            .arg(lease.token())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| command_error("unlock", e))?;
        if released == 1 {
            Ok(())
        } else {
            Err(SessionError::Lock {
                name: lease.name().to_string(),
                message: "lease expired or taken over".to_string(),
            })
        }
    }
}

fn command_error(op: &'static str, err: RedisError) -> SessionError {
    SessionError::store(op, format!("{} failed: {err}", op.to_uppercase()))
}
