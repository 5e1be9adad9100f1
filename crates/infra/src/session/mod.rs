//! Key/value-backed session storage.
//!
//! [`MemRepository`] is the store contract (hash fields with expiry plus a
//! named mutex); [`KvSessionProvider`] implements the session provider on
//! top of any such store, serializing operations on one session id through
//! the store's mutex.

mod in_memory;
mod provider;
#[cfg(feature = "redis")]
mod redis_store;
mod store;

pub use in_memory::InMemoryMemRepository;
pub use provider::{KvSession, KvSessionProvider, SESSION_KEY_PREFIX};
#[cfg(feature = "redis")]
pub use redis_store::RedisMemRepository;
pub use store::{LockLease, MemRepository, ttl_secs};
