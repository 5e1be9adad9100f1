use async_trait::async_trait;
use thiserror::Error;

use crate::permissions::{Action, Resource};
use crate::policy::{PolicyError, PolicyRule};

/// Read side of the policy repository, as seen by request handling.
#[async_trait]
pub trait PolicyEnforcer: Send + Sync {
    /// Decide `(subject, object, action)` against the loaded policy set.
    /// `object` and `action` are in prefixed form.
    async fn enforce(&self, subject: &str, object: &str, action: &str) -> Result<bool, PolicyError>;

    /// Every rule currently granted to `subject`.
    async fn get_policies(&self, subject: &str) -> Result<Vec<PolicyRule>, PolicyError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: {subject} may not {action} on {resource}")]
    Forbidden {
        subject: String,
        resource: String,
        action: String,
    },

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// Authorize `subject` for `action` on `resource`.
///
/// - No IO beyond the enforcer's in-memory cache
/// - No panics
pub async fn authorize<E>(
    enforcer: &E,
    subject: &str,
    resource: &Resource,
    action: &Action,
) -> Result<(), AuthzError>
where
    E: PolicyEnforcer + ?Sized,
{
    if enforcer
        .enforce(subject, &resource.prefixed(), &action.prefixed())
        .await?
    {
        Ok(())
    } else {
        Err(AuthzError::Forbidden {
            subject: subject.to_string(),
            resource: resource.to_string(),
            action: action.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    struct FixedEnforcer(HashSet<PolicyRule>);

    #[async_trait]
    impl PolicyEnforcer for FixedEnforcer {
        async fn enforce(&self, subject: &str, object: &str, action: &str) -> Result<bool, PolicyError> {
            Ok(self.0.contains(&PolicyRule::new(subject, object, action)))
        }

        async fn get_policies(&self, subject: &str) -> Result<Vec<PolicyRule>, PolicyError> {
            Ok(self.0.iter().filter(|r| r.subject == subject).cloned().collect())
        }
    }

    #[tokio::test]
    async fn authorize_uses_prefixed_columns() {
        let enforcer = FixedEnforcer(
            [PolicyRule::grant("div:ops", &Resource::USER, &Action::READ)].into_iter().collect(),
        );

        authorize(&enforcer, "div:ops", &Resource::USER, &Action::READ).await.unwrap();

        let err = authorize(&enforcer, "div:ops", &Resource::USER, &Action::DELETE)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AuthzError::Forbidden {
                subject: "div:ops".to_string(),
                resource: "user".to_string(),
                action: "delete".to_string(),
            }
        );
    }
}
