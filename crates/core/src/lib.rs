//! `gatehouse-core`: shared building blocks (no infrastructure concerns).
//!
//! Identifiers, the domain error model and process configuration live here so
//! that `auth` and `infra` agree on them without depending on each other.

pub mod config;
pub mod error;
pub mod id;

pub use config::{Environment, LockSettings, LogFormat, SessionSettings};
pub use error::DomainError;
pub use id::{DivisionId, UserId};
