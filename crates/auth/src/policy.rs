//! Policy tuples and the persistence contract behind the enforcer.
//!
//! A policy rule is the ordered triple `[subject, obj:<resource>, act:<action>]`.
//! Uniqueness of a rule in durable storage is the adapter's job; the
//! repository in `infra` only avoids re-adding rules its cache already holds.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::permissions::{Action, Resource};

/// One `[subject, object, action]` grant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolicyRule {
    pub subject: String,
    pub object: String,
    pub action: String,
}

impl PolicyRule {
    pub fn new(
        subject: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            object: object.into(),
            action: action.into(),
        }
    }

    /// Build a rule from unprefixed resource/action names.
    pub fn grant(subject: impl Into<String>, resource: &Resource, action: &Action) -> Self {
        Self::new(subject, resource.prefixed(), action.prefixed())
    }

    /// Flat form used by the casbin enforcer.
    pub fn to_vec(&self) -> Vec<String> {
        vec![self.subject.clone(), self.object.clone(), self.action.clone()]
    }

    /// Parse a flat rule; rules with fewer than three columns are rejected.
    pub fn from_slice(values: &[String]) -> Option<Self> {
        match values {
            [subject, object, action, ..] => Some(Self::new(subject, object, action)),
            _ => None,
        }
    }
}

impl core::fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "[{}, {}, {}]", self.subject, self.object, self.action)
    }
}

/// Policy store / enforcer failure, tagged with the failing operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("policy adapter {op} failed: {message}")]
    Adapter { op: &'static str, message: String },

    #[error("policy enforcer {op} failed: {message}")]
    Enforcer { op: &'static str, message: String },

    #[error("policy transaction: {0}")]
    Transaction(String),
}

impl PolicyError {
    pub fn adapter(op: &'static str, err: impl core::fmt::Display) -> Self {
        Self::Adapter {
            op,
            message: err.to_string(),
        }
    }

    pub fn enforcer(op: &'static str, err: impl core::fmt::Display) -> Self {
        Self::Enforcer {
            op,
            message: err.to_string(),
        }
    }
}

/// Durable policy storage.
///
/// An adapter may be bound to a top-level connection or to one in-flight
/// transaction; the repository treats both the same way.
#[async_trait]
pub trait PolicyAdapter: Send + Sync {
    /// Load every stored rule.
    async fn load_policies(&self) -> Result<Vec<PolicyRule>, PolicyError>;

    /// Persist rules. Callers pass only rules not already present.
    async fn add_policies(&self, rules: &[PolicyRule]) -> Result<(), PolicyError>;

    /// Delete rules; absent rules are ignored.
    async fn remove_policies(&self, rules: &[PolicyRule]) -> Result<(), PolicyError>;

    /// Create backing storage if it does not exist.
    async fn auto_migrate(&self) -> Result<(), PolicyError>;
}

#[async_trait]
impl<A> PolicyAdapter for std::sync::Arc<A>
where
    A: PolicyAdapter + ?Sized,
{
    async fn load_policies(&self) -> Result<Vec<PolicyRule>, PolicyError> {
        (**self).load_policies().await
    }

    async fn add_policies(&self, rules: &[PolicyRule]) -> Result<(), PolicyError> {
        (**self).add_policies(rules).await
    }

    async fn remove_policies(&self, rules: &[PolicyRule]) -> Result<(), PolicyError> {
        (**self).remove_policies(rules).await
    }

    async fn auto_migrate(&self) -> Result<(), PolicyError> {
        (**self).auto_migrate().await
    }
}

/// A policy adapter bound to one in-flight store transaction.
///
/// Commit or roll back before the repository's transaction guard is closed,
/// so the origin's reload observes the outcome.
#[async_trait]
pub trait PolicyTransaction: PolicyAdapter {
    async fn commit(&self) -> Result<(), PolicyError>;

    async fn rollback(&self) -> Result<(), PolicyError>;
}

/// Rules granted to a freshly created division.
///
/// Currently empty: new divisions start with no grants and receive them
/// through the administrative permission flow.
pub fn default_division_policies(_subject: &str) -> Vec<PolicyRule> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_uses_prefixed_columns() {
        let rule = PolicyRule::grant("div:ops", &Resource::USER, &Action::READ);
        assert_eq!(rule.to_vec(), vec!["div:ops", "obj:user", "act:read"]);
        assert_eq!(rule.to_string(), "[div:ops, obj:user, act:read]");
    }

    #[test]
    fn short_rules_do_not_parse() {
        let short = vec!["div:ops".to_string(), "obj:user".to_string()];
        assert_eq!(PolicyRule::from_slice(&short), None);

        let full = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(PolicyRule::from_slice(&full), Some(PolicyRule::new("a", "b", "c")));
    }

    #[test]
    fn new_divisions_start_without_grants() {
        assert!(default_division_policies("div:new").is_empty());
    }
}
