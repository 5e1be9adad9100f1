//! API-side access guard.
//!
//! Resolves the caller from a session token, then decides a route's
//! [`AccessRule`] in this order:
//!
//! 1. Hierarchy filter: a non-root caller may not act on a root account.
//! 2. Root callers pass.
//! 3. Root-only rules reject everyone else.
//! 4. The policy repository decides `(div:<subject>, obj:<resource>, act:<action>)`.
//! 5. Self privilege: a caller may act on their own account without a grant.
//!
//! The administrative side renders and replaces a subject's permission view
//! through the catalog translator and the repository's transactional handle.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use gatehouse_auth::{
    Action, AuthError, AuthService, AuthzError, Permission, PermissionCatalog, PolicyError,
    PolicyRule, PolicyTransaction, Resource, SessionProvider, UserDirectory, authorize,
    default_division_policies,
};
use gatehouse_core::UserId;
use gatehouse_infra::PolicyRepository;

use crate::context::{SubjectContext, UserContext};

/// Access requirements of one route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRule {
    resource: Resource,
    action: Action,
    root_only: bool,
    self_privilege: bool,
    hierarchy_filter: bool,
}

impl AccessRule {
    pub fn new(resource: Resource, action: Action) -> Self {
        Self {
            resource,
            action,
            root_only: false,
            self_privilege: false,
            hierarchy_filter: false,
        }
    }

    /// Only root accounts pass.
    pub fn root_only(mut self) -> Self {
        self.root_only = true;
        self
    }

    /// The caller may act on their own account without a grant.
    pub fn self_privilege(mut self) -> Self {
        self.self_privilege = true;
        self
    }

    /// A non-root caller may not act on a root account.
    pub fn hierarchy_filter(mut self) -> Self {
        self.hierarchy_filter = true;
        self
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn action(&self) -> &Action {
        &self.action
    }
}

/// Rules added and removed by [`AccessGuard::replace_permissions`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionChange {
    pub added: Vec<PolicyRule>,
    pub removed: Vec<PolicyRule>,
}

pub struct AccessGuard<P, D> {
    auth: Arc<AuthService<P, D>>,
    policies: PolicyRepository,
    catalog: Arc<PermissionCatalog>,
}

impl<P, D> AccessGuard<P, D>
where
    P: SessionProvider,
    D: UserDirectory,
{
    pub fn new(
        auth: Arc<AuthService<P, D>>,
        policies: PolicyRepository,
        catalog: Arc<PermissionCatalog>,
    ) -> Self {
        Self {
            auth,
            policies,
            catalog,
        }
    }

    pub fn policies(&self) -> &PolicyRepository {
        &self.policies
    }

    pub fn catalog(&self) -> &PermissionCatalog {
        &self.catalog
    }

    /// Resolve the caller and require `subject` to hold `action` on `resource`.
    pub async fn check(
        &self,
        token: &str,
        subject: &SubjectContext,
        resource: &Resource,
        action: &Action,
    ) -> Result<UserContext, AuthError> {
        let rule = AccessRule::new(resource.clone(), action.clone());
        self.authorize(token, subject, &rule, None).await
    }

    /// Resolve the caller and decide `rule`.
    ///
    /// `target` is the account a route acts on, when it has one. Without a
    /// target the hierarchy filter and self privilege do not apply.
    #[instrument(
        skip(self, token, rule),
        fields(
            subject = %subject.division(),
            resource = %rule.resource,
            action = %rule.action,
            target = ?target
        ),
        err
    )]
    pub async fn authorize(
        &self,
        token: &str,
        subject: &SubjectContext,
        rule: &AccessRule,
        target: Option<UserId>,
    ) -> Result<UserContext, AuthError> {
        let user = self.auth.request_user(token).await?;
        let caller = UserContext::new(token, user);

        if rule.hierarchy_filter && !caller.is_root() {
            if let Some(target) = target {
                let aimed = self
                    .auth
                    .users()
                    .get_user(target)
                    .await
                    .map_err(|e| AuthError::internal("get_user", e))?
                    .ok_or(AuthError::AccountNotFound)?;
                if aimed.is_root {
                    return Err(AuthError::NoHierarchyPermission);
                }
            }
        }

        if caller.is_root() {
            return Ok(caller);
        }
        if rule.root_only {
            return Err(AuthError::NoPermission);
        }

        match authorize(
            &self.policies,
            &subject.subject(),
            &rule.resource,
            &rule.action,
        )
        .await
        {
            Ok(()) => return Ok(caller),
            Err(AuthzError::Forbidden { .. }) => {}
            Err(AuthzError::Policy(err)) => return Err(AuthError::internal("enforce", err)),
        }

        if rule.self_privilege && target == Some(caller.user().id) {
            return Ok(caller);
        }
        Err(AuthError::NoPermission)
    }

    /// Current permission view of `subject`, rendered over the catalog.
    pub async fn permissions_for(
        &self,
        subject: &SubjectContext,
    ) -> Result<Vec<Permission>, AuthError> {
        let rules = self
            .policies
            .get_policies(&subject.subject())
            .await
            .map_err(|e| AuthError::internal("get_policies", e))?;
        Ok(self.catalog.policies_to_permissions(&rules))
    }

    /// Seed a newly created division with its default grants.
    #[instrument(skip(self), fields(subject = %subject.division()), err)]
    pub async fn provision_division(&self, subject: &SubjectContext) -> Result<(), AuthError> {
        let defaults = default_division_policies(&subject.subject());
        self.policies
            .add_policies_ex(&defaults)
            .await
            .map_err(|e| AuthError::internal("provision_division", e))
    }

    /// Replace `subject`'s grants with the submitted permission view.
    ///
    /// Runs on a transactional handle bound to `tx`: the diff is applied,
    /// `tx` is committed (or rolled back on failure), and only then is the
    /// shared cache released and reloaded. Unavailable or unknown actions in
    /// `permissions` are dropped by the translator.
    #[instrument(skip(self, tx, permissions), fields(subject = %subject.division()), err)]
    pub async fn replace_permissions<T>(
        &self,
        tx: T,
        subject: &SubjectContext,
        permissions: &[Permission],
    ) -> Result<PermissionChange, AuthError>
    where
        T: PolicyTransaction + 'static,
    {
        let subject = subject.subject();
        let desired: BTreeSet<PolicyRule> = self
            .catalog
            .permissions_to_policies(&subject, permissions)
            .into_iter()
            .collect();

        let tx = Arc::new(tx);
        let store_tx = tx.clone();
        let change = self
            .policies
            .transaction(tx, move |tx_repo| async move {
                match apply_diff(&tx_repo, &subject, &desired).await {
                    Ok(change) => {
                        store_tx.commit().await?;
                        Ok(change)
                    }
                    Err(err) => {
                        if let Err(rollback) = store_tx.rollback().await {
                            warn!(error = %rollback, "policy rollback failed");
                        }
                        Err(err)
                    }
                }
            })
            .await
            .map_err(|e: PolicyError| AuthError::internal("replace_permissions", e))?;

        info!(
            added = change.added.len(),
            removed = change.removed.len(),
            "permissions replaced"
        );
        Ok(change)
    }
}

async fn apply_diff(
    repo: &PolicyRepository,
    subject: &str,
    desired: &BTreeSet<PolicyRule>,
) -> Result<PermissionChange, PolicyError> {
    let current: BTreeSet<PolicyRule> = repo.get_policies(subject).await?.into_iter().collect();
    let removed: Vec<PolicyRule> = current.difference(desired).cloned().collect();
    let added: Vec<PolicyRule> = desired.difference(&current).cloned().collect();

    repo.remove_policies(&removed).await?;
    repo.add_policies_ex(&added).await?;
    Ok(PermissionChange { added, removed })
}
