//! Access-control surface consumed by the routing layer.
//!
//! HTTP binding lives outside this crate: routes resolve a session token and
//! a subject, then call into [`authz::AccessGuard`].

pub mod authz;
pub mod context;

pub use authz::{AccessGuard, AccessRule, PermissionChange};
pub use context::{SubjectContext, UserContext};
