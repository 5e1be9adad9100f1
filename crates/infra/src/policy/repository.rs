//! Cached policy enforcer with a coarse process-wide lock.
//!
//! ## Lock discipline
//!
//! A shared handle serializes through one `RwLock<()>` gate:
//!
//! | Operation | Gate mode |
//! |-----------|-----------|
//! | `enforce`, `load_policy`, `get_policies` | read |
//! | `add_policies_ex`, `remove_policies` | write |
//! | `begin_with_tx` | write, held until the guard is closed or dropped |
//!
//! A transactional handle never touches the gate: its origin's write permit
//! is held by the [`PolicyTxGuard`] for the handle's whole lifetime. Every
//! other caller of the origin therefore waits for the full transaction, not
//! only for its writes. Narrowing this would let shared reads race the
//! external commit/rollback against the post-close reload.
//!
//! `load_policy` builds a fresh enforcer from the adapter and swaps it in
//! under the enforcer's own write lock, so a concurrent `enforce` sees either
//! the old or the new rule set, never a mix.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use casbin::{CoreApi, DefaultModel, Enforcer, MemoryAdapter, MgmtApi};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, RwLockReadGuard};
use tracing::{debug, error, instrument, warn};

use gatehouse_auth::{PolicyAdapter, PolicyEnforcer, PolicyError, PolicyRule};

use super::MODEL_CONF;

/// Policy repository: the single decision point for `(subject, object, action)`.
///
/// Cheap to clone; clones share the cache and the gate.
#[derive(Clone)]
pub struct PolicyRepository {
    inner: Arc<Inner>,
}

struct Inner {
    adapter: Arc<dyn PolicyAdapter>,
    enforcer: RwLock<Enforcer>,
    gate: Arc<RwLock<()>>,
    with_tx: bool,
    stale: AtomicBool,
}

impl core::fmt::Debug for PolicyRepository {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PolicyRepository")
            .field("with_tx", &self.inner.with_tx)
            .field("stale", &self.inner.stale.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl PolicyRepository {
    /// Build a shared handle and load every rule from `adapter`.
    pub async fn new<A>(adapter: A) -> Result<Self, PolicyError>
    where
        A: PolicyAdapter + 'static,
    {
        Self::build(Arc::new(adapter), Arc::new(RwLock::new(())), false).await
    }

    async fn build(
        adapter: Arc<dyn PolicyAdapter>,
        gate: Arc<RwLock<()>>,
        with_tx: bool,
    ) -> Result<Self, PolicyError> {
        let rules = adapter.load_policies().await?;
        let enforcer = build_enforcer(&rules).await?;
        Ok(Self {
            inner: Arc::new(Inner {
                adapter,
                enforcer: RwLock::new(enforcer),
                gate,
                with_tx,
                stale: AtomicBool::new(false),
            }),
        })
    }

    /// Whether this handle is bound to an in-flight transaction.
    pub fn with_tx(&self) -> bool {
        self.inner.with_tx
    }

    /// Decide `(subject, object, action)`; `object`/`action` are prefixed.
    pub async fn enforce(
        &self,
        subject: &str,
        object: &str,
        action: &str,
    ) -> Result<bool, PolicyError> {
        let _gate = self.read_gate().await;
        self.refresh_if_stale().await?;

        let enforcer = self.inner.enforcer.read().await;
        enforcer
            .enforce((subject, object, action))
            .map_err(|e| PolicyError::enforcer("enforce", e))
    }

    /// Rebuild the cache from the adapter.
    #[instrument(skip(self), fields(with_tx = self.inner.with_tx), err)]
    pub async fn load_policy(&self) -> Result<(), PolicyError> {
        let _gate = self.read_gate().await;
        self.reload().await
    }

    /// Every cached rule whose subject is `subject`.
    pub async fn get_policies(&self, subject: &str) -> Result<Vec<PolicyRule>, PolicyError> {
        let _gate = self.read_gate().await;
        self.refresh_if_stale().await?;

        let enforcer = self.inner.enforcer.read().await;
        Ok(enforcer
            .get_filtered_policy(0, vec![subject.to_string()])
            .iter()
            .filter_map(|values| PolicyRule::from_slice(values))
            .collect())
    }

    /// Add rules, skipping any the cache already holds.
    ///
    /// The adapter is written first; the cache follows only on success.
    #[instrument(skip(self, rules), fields(with_tx = self.inner.with_tx, requested = rules.len()), err)]
    pub async fn add_policies_ex(&self, rules: &[PolicyRule]) -> Result<(), PolicyError> {
        let _gate = self.write_gate().await;
        self.refresh_if_stale().await?;

        let mut enforcer = self.inner.enforcer.write().await;
        let fresh: Vec<PolicyRule> = rules
            .iter()
            .filter(|rule| !enforcer.has_policy(rule.to_vec()))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if fresh.is_empty() {
            debug!("all rules already present");
            return Ok(());
        }

        self.inner.adapter.add_policies(&fresh).await?;
        enforcer
            .add_policies(fresh.iter().map(PolicyRule::to_vec).collect())
            .await
            .map_err(|e| PolicyError::enforcer("add_policies_ex", e))?;
        debug!(added = fresh.len(), "policies added");
        Ok(())
    }

    /// Remove rules; rules that are not present are ignored.
    #[instrument(skip(self, rules), fields(with_tx = self.inner.with_tx, requested = rules.len()), err)]
    pub async fn remove_policies(&self, rules: &[PolicyRule]) -> Result<(), PolicyError> {
        let _gate = self.write_gate().await;
        self.refresh_if_stale().await?;

        let mut enforcer = self.inner.enforcer.write().await;
        let present: Vec<PolicyRule> = rules
            .iter()
            .filter(|rule| enforcer.has_policy(rule.to_vec()))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if present.is_empty() {
            return Ok(());
        }

        self.inner.adapter.remove_policies(&present).await?;
        enforcer
            .remove_policies(present.iter().map(PolicyRule::to_vec).collect())
            .await
            .map_err(|e| PolicyError::enforcer("remove_policies", e))?;
        debug!(removed = present.len(), "policies removed");
        Ok(())
    }

    /// Bind a second handle to a transaction-scoped adapter and take the
    /// origin's exclusive lock.
    ///
    /// The returned handle has its own enforcer, loaded from `adapter`.
    /// Close the guard on every exit path of the enclosing transaction; the
    /// origin reloads from its own adapter when it does.
    #[instrument(skip(self, adapter), err)]
    pub async fn begin_with_tx<A>(
        &self,
        adapter: A,
    ) -> Result<(PolicyRepository, PolicyTxGuard), PolicyError>
    where
        A: PolicyAdapter + 'static,
    {
        if self.inner.with_tx {
            return Err(PolicyError::Transaction(
                "begin_with_tx called on a transactional handle".to_string(),
            ));
        }

        let tx_repo = Self::build(Arc::new(adapter), self.inner.gate.clone(), true).await?;
        let permit = self.inner.gate.clone().write_owned().await;
        debug!("policy transaction opened");

        Ok((
            tx_repo,
            PolicyTxGuard {
                permit: Some(permit),
                origin: self.clone(),
            },
        ))
    }

    /// Run `f` against a transactional handle and close the guard afterwards,
    /// whatever `f` returns.
    ///
    /// Committing or rolling back the store transaction is `f`'s job.
    pub async fn transaction<A, F, Fut, T, E>(&self, adapter: A, f: F) -> Result<T, E>
    where
        A: PolicyAdapter + 'static,
        F: FnOnce(PolicyRepository) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<PolicyError>,
    {
        let (tx_repo, guard) = self.begin_with_tx(adapter).await?;
        let result = f(tx_repo).await;
        guard.close().await;
        result
    }

    async fn read_gate(&self) -> Option<RwLockReadGuard<'_, ()>> {
        if self.inner.with_tx {
            None
        } else {
            Some(self.inner.gate.read().await)
        }
    }

    async fn write_gate(&self) -> Option<tokio::sync::RwLockWriteGuard<'_, ()>> {
        if self.inner.with_tx {
            None
        } else {
            Some(self.inner.gate.write().await)
        }
    }

    async fn reload(&self) -> Result<(), PolicyError> {
        let rules = self.inner.adapter.load_policies().await?;
        let fresh = build_enforcer(&rules).await?;
        *self.inner.enforcer.write().await = fresh;
        self.inner.stale.store(false, Ordering::SeqCst);
        debug!(rules = rules.len(), "policy cache reloaded");
        Ok(())
    }

    async fn refresh_if_stale(&self) -> Result<(), PolicyError> {
        if self.inner.stale.load(Ordering::SeqCst) {
            self.reload().await?;
        }
        Ok(())
    }

    fn mark_stale(&self) {
        self.inner.stale.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PolicyEnforcer for PolicyRepository {
    async fn enforce(&self, subject: &str, object: &str, action: &str) -> Result<bool, PolicyError> {
        PolicyRepository::enforce(self, subject, object, action).await
    }

    async fn get_policies(&self, subject: &str) -> Result<Vec<PolicyRule>, PolicyError> {
        PolicyRepository::get_policies(self, subject).await
    }
}

/// Exclusive hold on a shared [`PolicyRepository`] for one transaction.
///
/// `close()` releases the lock and reloads the origin. Dropping the guard
/// without closing it still releases the lock, but the reload is deferred to
/// the origin's next operation.
#[must_use = "close the guard to release the lock and reload the policy cache"]
pub struct PolicyTxGuard {
    permit: Option<OwnedRwLockWriteGuard<()>>,
    origin: PolicyRepository,
}

impl core::fmt::Debug for PolicyTxGuard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PolicyTxGuard")
            .field("held", &self.permit.is_some())
            .finish()
    }
}

impl PolicyTxGuard {
    /// Mark the origin stale, release the lock, then reload the origin.
    ///
    /// A writer queued behind the lock reloads before it consults the
    /// cache. A reload failure is logged, not returned; the origin stays
    /// stale and retries the reload on its next operation.
    pub async fn close(mut self) {
        // Anyone who gets the gate before the reload below refreshes first.
        self.origin.mark_stale();
        self.permit.take();
        if let Err(err) = self.origin.load_policy().await {
            self.origin.mark_stale();
            error!(op = "close_tx", error = %err, "policy reload after transaction failed");
        }
    }
}

impl Drop for PolicyTxGuard {
    fn drop(&mut self) {
        if self.permit.take().is_some() {
            self.origin.mark_stale();
            warn!("policy transaction guard dropped without close; reload deferred");
        }
    }
}

async fn build_enforcer(rules: &[PolicyRule]) -> Result<Enforcer, PolicyError> {
    let model = DefaultModel::from_str(MODEL_CONF)
        .await
        .map_err(|e| PolicyError::enforcer("load_model", e))?;
    let mut enforcer = Enforcer::new(model, MemoryAdapter::default())
        .await
        .map_err(|e| PolicyError::enforcer("new_enforcer", e))?;

    for rule in rules {
        enforcer
            .add_policy(rule.to_vec())
            .await
            .map_err(|e| PolicyError::enforcer("load_policy", e))?;
    }
    Ok(enforcer)
}
