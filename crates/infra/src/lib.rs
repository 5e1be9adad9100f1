//! Infrastructure layer: policy storage and enforcement, session storage,
//! user lookup.
//!
//! Postgres and Redis backends sit behind the `postgres` and `redis`
//! features; the in-memory backends are always available.

pub mod policy;
pub mod session;
pub mod users;

pub use policy::{InMemoryPolicyAdapter, InMemoryPolicyTx, PolicyRepository, PolicyTxGuard};
#[cfg(feature = "postgres")]
pub use policy::{PgPolicyAdapter, PgPolicyTx};
#[cfg(feature = "redis")]
pub use session::RedisMemRepository;
pub use session::{InMemoryMemRepository, KvSession, KvSessionProvider, LockLease, MemRepository};
pub use users::InMemoryUserDirectory;
#[cfg(feature = "postgres")]
pub use users::PgUserDirectory;
