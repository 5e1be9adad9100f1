//! Session contracts.
//!
//! A session is a bag of string fields stored under one key of a shared
//! key/value store. Lifecycle: `init` creates it with a time-to-live, every
//! `read` refreshes that TTL, `destroy` deletes it. Expiry is implicit; the
//! store reclaims the key when the TTL elapses.
//!
//! Backends implement [`SessionProvider`]; the [`SessionManager`] never
//! special-cases one.

mod escape;
mod manager;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use escape::{query_escape, query_unescape};
pub use manager::{SessionCarrier, SessionManager};

/// Field written at creation time so the key exists before any caller data.
pub const INIT_FIELD: &str = "init";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The session key does not exist (never created, destroyed, or expired).
    #[error("session ID does not exist")]
    NotFound,

    #[error("invalid session token '{0}'")]
    InvalidToken(String),

    /// `init` found the session already initialized by someone else.
    #[error("session '{0}' already initialized")]
    Conflict(String),

    #[error("lock '{name}' not acquired: {message}")]
    Lock { name: String, message: String },

    #[error("session store {op} failed: {message}")]
    Store { op: &'static str, message: String },

    #[error("({session_name}) {op}({sid}): {source}")]
    Provider {
        session_name: String,
        op: &'static str,
        sid: String,
        #[source]
        source: Box<SessionError>,
    },
}

impl SessionError {
    pub fn store(op: &'static str, err: impl core::fmt::Display) -> Self {
        Self::Store {
            op,
            message: err.to_string(),
        }
    }

    /// True for the distinguished not-found condition, even when wrapped.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound => true,
            Self::Provider { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

/// Field-level access to one live session.
#[async_trait]
pub trait Session: Send + Sync {
    async fn set(&self, key: &str, value: &str) -> Result<(), SessionError>;

    /// `Ok(None)` when the field is absent; errors are store faults only.
    async fn get(&self, key: &str) -> Result<Option<String>, SessionError>;

    async fn delete(&self, key: &str) -> Result<(), SessionError>;

    fn session_id(&self) -> &str;
}

/// Storage backend for sessions.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    type Session: Session;

    /// Create the session key with its sentinel field and TTL.
    async fn session_init(&self, sid: &str) -> Result<Self::Session, SessionError>;

    /// Refresh the TTL; `NotFound` if the key is gone.
    async fn session_read(&self, sid: &str) -> Result<Self::Session, SessionError>;

    /// Delete the key. Deleting an absent key succeeds.
    async fn session_destroy(&self, sid: &str) -> Result<(), SessionError>;

    /// Reclaim expired sessions for backends without native expiry.
    async fn session_gc(&self, max_life_time: Duration);
}
