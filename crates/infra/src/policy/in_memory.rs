use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;

use gatehouse_auth::{PolicyAdapter, PolicyError, PolicyRule, PolicyTransaction};

type RuleSet = Arc<RwLock<BTreeSet<PolicyRule>>>;

/// In-memory policy store.
///
/// Intended for tests/dev. `begin()` opens a staged transaction whose
/// changes reach the shared rule set only on `commit()`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPolicyAdapter {
    rules: RuleSet,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryPolicyAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: impl IntoIterator<Item = PolicyRule>) -> Self {
        Self {
            rules: Arc::new(RwLock::new(rules.into_iter().collect())),
            unavailable: Arc::default(),
        }
    }

    /// Simulate an outage: every call fails until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> Result<Vec<PolicyRule>, PolicyError> {
        let rules = self.rules.read().map_err(|_| poisoned("snapshot"))?;
        Ok(rules.iter().cloned().collect())
    }

    /// Open a transaction. Its writes are staged until `commit()`.
    pub fn begin(&self) -> Result<InMemoryPolicyTx, PolicyError> {
        Ok(InMemoryPolicyTx {
            base: self.rules.clone(),
            staged: Mutex::new(Some(Delta::default())),
            unavailable: self.unavailable.clone(),
        })
    }

    fn check(&self, op: &'static str) -> Result<(), PolicyError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PolicyError::adapter(op, "store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl PolicyAdapter for InMemoryPolicyAdapter {
    async fn load_policies(&self) -> Result<Vec<PolicyRule>, PolicyError> {
        self.check("load_policies")?;
        self.snapshot()
    }

    async fn add_policies(&self, rules: &[PolicyRule]) -> Result<(), PolicyError> {
        self.check("add_policies")?;
        let mut stored = self.rules.write().map_err(|_| poisoned("add_policies"))?;
        stored.extend(rules.iter().cloned());
        Ok(())
    }

    async fn remove_policies(&self, rules: &[PolicyRule]) -> Result<(), PolicyError> {
        self.check("remove_policies")?;
        let mut stored = self.rules.write().map_err(|_| poisoned("remove_policies"))?;
        for rule in rules {
            stored.remove(rule);
        }
        Ok(())
    }

    async fn auto_migrate(&self) -> Result<(), PolicyError> {
        Ok(())
    }
}

/// Writes staged by one transaction, relative to the shared set.
#[derive(Debug, Default)]
struct Delta {
    added: BTreeSet<PolicyRule>,
    removed: BTreeSet<PolicyRule>,
}

impl Delta {
    fn add(&mut self, rule: &PolicyRule) {
        self.removed.remove(rule);
        self.added.insert(rule.clone());
    }

    fn remove(&mut self, rule: &PolicyRule) {
        self.added.remove(rule);
        self.removed.insert(rule.clone());
    }

    fn apply(&self, rules: &mut BTreeSet<PolicyRule>) {
        for rule in &self.removed {
            rules.remove(rule);
        }
        rules.extend(self.added.iter().cloned());
    }
}

/// A staged transaction over an [`InMemoryPolicyAdapter`].
///
/// Reads see the shared set as it is now, with this transaction's writes
/// layered on top. `commit()` replays those writes onto the shared set, so
/// rules stored by others since `begin()` survive.
#[derive(Debug)]
pub struct InMemoryPolicyTx {
    base: RuleSet,
    staged: Mutex<Option<Delta>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryPolicyTx {
    /// Replay staged writes onto the shared set.
    pub fn commit(&self) -> Result<(), PolicyError> {
        let delta = self
            .staged
            .lock()
            .map_err(|_| poisoned("commit"))?
            .take()
            .ok_or_else(closed)?;
        let mut rules = self.base.write().map_err(|_| poisoned("commit"))?;
        delta.apply(&mut rules);
        Ok(())
    }

    /// Discard staged writes. Rolling back a closed transaction is a no-op.
    pub fn rollback(&self) {
        if let Ok(mut staged) = self.staged.lock() {
            staged.take();
        }
    }

    fn with_staged<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut Delta) -> Result<T, PolicyError>,
    ) -> Result<T, PolicyError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PolicyError::adapter(op, "store unavailable"));
        }
        let mut staged = self.staged.lock().map_err(|_| poisoned(op))?;
        let delta = staged.as_mut().ok_or_else(closed)?;
        f(delta)
    }
}

#[async_trait]
impl PolicyAdapter for InMemoryPolicyTx {
    async fn load_policies(&self) -> Result<Vec<PolicyRule>, PolicyError> {
        self.with_staged("load_policies", |delta| {
            let mut rules = self.base.read().map_err(|_| poisoned("load_policies"))?.clone();
            delta.apply(&mut rules);
            Ok(rules.into_iter().collect())
        })
    }

    async fn add_policies(&self, rules: &[PolicyRule]) -> Result<(), PolicyError> {
        self.with_staged("add_policies", |delta| {
            rules.iter().for_each(|rule| delta.add(rule));
            Ok(())
        })
    }

    async fn remove_policies(&self, rules: &[PolicyRule]) -> Result<(), PolicyError> {
        self.with_staged("remove_policies", |delta| {
            rules.iter().for_each(|rule| delta.remove(rule));
            Ok(())
        })
    }

    async fn auto_migrate(&self) -> Result<(), PolicyError> {
        Ok(())
    }
}

#[async_trait]
impl PolicyTransaction for InMemoryPolicyTx {
    async fn commit(&self) -> Result<(), PolicyError> {
        InMemoryPolicyTx::commit(self)
    }

    async fn rollback(&self) -> Result<(), PolicyError> {
        InMemoryPolicyTx::rollback(self);
        Ok(())
    }
}

fn poisoned(op: &'static str) -> PolicyError {
    PolicyError::adapter(op, "lock poisoned")
}

fn closed() -> PolicyError {
    PolicyError::Transaction("transaction already closed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(sub: &str) -> PolicyRule {
        PolicyRule::new(sub, "obj:user", "act:read")
    }

    #[tokio::test]
    async fn staged_changes_publish_on_commit() {
        let store = InMemoryPolicyAdapter::with_rules([rule("div:a")]);
        let tx = store.begin().unwrap();
        tx.add_policies(&[rule("div:b")]).await.unwrap();
        tx.remove_policies(&[rule("div:a")]).await.unwrap();

        assert_eq!(store.snapshot().unwrap(), vec![rule("div:a")]);
        assert_eq!(tx.load_policies().await.unwrap(), vec![rule("div:b")]);

        tx.commit().unwrap();
        assert_eq!(store.snapshot().unwrap(), vec![rule("div:b")]);
        assert!(matches!(tx.commit(), Err(PolicyError::Transaction(_))));
    }

    #[tokio::test]
    async fn sequential_transactions_keep_each_others_writes() {
        let store = InMemoryPolicyAdapter::new();
        let first = store.begin().unwrap();
        let second = store.begin().unwrap();

        first.add_policies(&[rule("div:a")]).await.unwrap();
        first.commit().unwrap();

        // Written outside any transaction after both began.
        store.add_policies(&[rule("div:c")]).await.unwrap();

        second.add_policies(&[rule("div:b")]).await.unwrap();
        assert_eq!(
            second.load_policies().await.unwrap(),
            vec![rule("div:a"), rule("div:b"), rule("div:c")]
        );
        second.commit().unwrap();

        assert_eq!(
            store.snapshot().unwrap(),
            vec![rule("div:a"), rule("div:b"), rule("div:c")]
        );
    }

    #[tokio::test]
    async fn staged_remove_then_add_keeps_the_rule() {
        let store = InMemoryPolicyAdapter::with_rules([rule("div:a")]);
        let tx = store.begin().unwrap();
        tx.remove_policies(&[rule("div:a")]).await.unwrap();
        tx.add_policies(&[rule("div:a")]).await.unwrap();
        tx.commit().unwrap();

        assert_eq!(store.snapshot().unwrap(), vec![rule("div:a")]);
    }

    #[tokio::test]
    async fn rollback_discards_changes() {
        let store = InMemoryPolicyAdapter::new();
        let tx = store.begin().unwrap();
        tx.add_policies(&[rule("div:a")]).await.unwrap();
        tx.rollback();

        assert!(store.load_policies().await.unwrap().is_empty());
        assert!(tx.load_policies().await.is_err());
    }

    #[tokio::test]
    async fn outage_fails_every_call() {
        let store = InMemoryPolicyAdapter::new();
        store.set_unavailable(true);
        let err = store.load_policies().await.unwrap_err();
        assert_eq!(
            err,
            PolicyError::Adapter { op: "load_policies", message: "store unavailable".to_string() }
        );
        store.set_unavailable(false);
        assert!(store.load_policies().await.is_ok());
    }
}
