//! Policy enforcement backed by a durable policy store.
//!
//! The repository owns an in-memory casbin enforcer rebuilt from a
//! [`PolicyAdapter`](gatehouse_auth::PolicyAdapter). Adapters exist for tests
//! (in-memory, with staged transactions) and for Postgres.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod repository;

pub use in_memory::{InMemoryPolicyAdapter, InMemoryPolicyTx};
#[cfg(feature = "postgres")]
pub use postgres::{PgPolicyAdapter, PgPolicyTx};
pub use repository::{PolicyRepository, PolicyTxGuard};

/// Casbin model: allow on an exact `(sub, obj, act)` match.
pub const MODEL_CONF: &str = include_str!("model.conf");
