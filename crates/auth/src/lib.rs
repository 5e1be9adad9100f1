//! `gatehouse-auth`: access-control and session boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage: it defines the
//! permission catalog and translator, the policy and session contracts, and
//! the authentication use-cases. Storage-backed implementations live in
//! `gatehouse-infra`.

pub mod authorize;
pub mod catalog;
pub mod error;
pub mod password;
pub mod permissions;
pub mod policy;
pub mod service;
pub mod session;
pub mod user;

#[cfg(test)]
mod test_support;

pub use authorize::{AuthzError, PolicyEnforcer, authorize};
pub use catalog::{CatalogError, PermissionCatalog};
pub use error::AuthError;
pub use password::PasswordHasher;
pub use permissions::{Action, Permission, Resource, ResourceAction};
pub use policy::{
    PolicyAdapter, PolicyError, PolicyRule, PolicyTransaction, default_division_policies,
};
pub use service::{AuthService, Login};
pub use session::{Session, SessionCarrier, SessionError, SessionManager, SessionProvider};
pub use user::{User, UserDirectory};
