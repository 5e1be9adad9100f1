//! Postgres-backed policy adapter.
//!
//! Rules live in a casbin-shaped table (`id`, `ptype`, `v0..v5`). Only `p`
//! rows with three columns are used; `v3..v5` stay empty. A unique index over
//! `(ptype, v0..v5)` makes inserts idempotent at the database level.
//!
//! The adapter is bound either to the pool or to one [`PgPolicyTx`]. A
//! transaction-bound adapter sees its own uncommitted writes, which is what
//! the repository's transactional handle loads from.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tokio::sync::{Mutex, MutexGuard};
use tracing::instrument;

use gatehouse_auth::{PolicyAdapter, PolicyError, PolicyRule, PolicyTransaction};

const PTYPE: &str = "p";

/// Shared handle to one in-flight Postgres transaction.
///
/// Clones refer to the same transaction. After `commit` or `rollback` every
/// clone fails with [`PolicyError::Transaction`].
#[derive(Debug, Clone)]
pub struct PgPolicyTx {
    tx: Arc<Mutex<Option<Transaction<'static, Postgres>>>>,
}

impl PgPolicyTx {
    pub async fn begin(pool: &PgPool) -> Result<Self, PolicyError> {
        let tx = pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(Self {
            tx: Arc::new(Mutex::new(Some(tx))),
        })
    }

    pub async fn commit(&self) -> Result<(), PolicyError> {
        let tx = self.tx.lock().await.take().ok_or_else(closed)?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    pub async fn rollback(&self) -> Result<(), PolicyError> {
        let tx = self.tx.lock().await.take().ok_or_else(closed)?;
        tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))
    }
}

#[derive(Debug, Clone)]
enum Conn {
    Pool(PgPool),
    Tx(PgPolicyTx),
}

/// Policy adapter over a casbin-shaped Postgres table.
#[derive(Debug, Clone)]
pub struct PgPolicyAdapter {
    conn: Conn,
    table: String,
}

impl PgPolicyAdapter {
    /// Adapter over the pool. `table` must be a plain SQL identifier.
    pub fn new(pool: PgPool, table: impl Into<String>) -> Result<Self, PolicyError> {
        Ok(Self {
            conn: Conn::Pool(pool),
            table: validate_table(table.into())?,
        })
    }

    /// Adapter bound to `tx`, using the same table as `self`.
    pub fn with_tx(&self, tx: PgPolicyTx) -> Self {
        Self {
            conn: Conn::Tx(tx),
            table: self.table.clone(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    async fn lease(&self, op: &'static str) -> Result<Lease<'_>, PolicyError> {
        match &self.conn {
            Conn::Pool(pool) => pool
                .acquire()
                .await
                .map(Lease::Pooled)
                .map_err(|e| map_sqlx_error(op, e)),
            Conn::Tx(tx) => Ok(Lease::Tx(tx.tx.lock().await)),
        }
    }
}

/// A connection borrowed for one adapter call.
enum Lease<'a> {
    Pooled(PoolConnection<Postgres>),
    Tx(MutexGuard<'a, Option<Transaction<'static, Postgres>>>),
}

impl Lease<'_> {
    fn conn(&mut self) -> Result<&mut PgConnection, PolicyError> {
        match self {
            Lease::Pooled(conn) => Ok(&mut **conn),
            Lease::Tx(guard) => guard.as_mut().map(|tx| &mut **tx).ok_or_else(closed),
        }
    }
}

#[async_trait]
impl PolicyAdapter for PgPolicyAdapter {
    #[instrument(skip(self), fields(table = %self.table), err)]
    async fn load_policies(&self) -> Result<Vec<PolicyRule>, PolicyError> {
        let mut lease = self.lease("load_policies").await?;
        select_rules(lease.conn()?, &self.table)
            .await
            .map_err(|e| map_sqlx_error("load_policies", e))
    }

    #[instrument(skip(self, rules), fields(table = %self.table, count = rules.len()), err)]
    async fn add_policies(&self, rules: &[PolicyRule]) -> Result<(), PolicyError> {
        let mut lease = self.lease("add_policies").await?;
        let conn = lease.conn()?;
        for rule in rules {
            insert_rule(&mut *conn, &self.table, rule)
                .await
                .map_err(|e| map_sqlx_error("add_policies", e))?;
        }
        Ok(())
    }

    #[instrument(skip(self, rules), fields(table = %self.table, count = rules.len()), err)]
    async fn remove_policies(&self, rules: &[PolicyRule]) -> Result<(), PolicyError> {
        let mut lease = self.lease("remove_policies").await?;
        let conn = lease.conn()?;
        for rule in rules {
            delete_rule(&mut *conn, &self.table, rule)
                .await
                .map_err(|e| map_sqlx_error("remove_policies", e))?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(table = %self.table), err)]
    async fn auto_migrate(&self) -> Result<(), PolicyError> {
        let mut lease = self.lease("auto_migrate").await?;
        create_table(lease.conn()?, &self.table)
            .await
            .map_err(|e| map_sqlx_error("auto_migrate", e))
    }
}

/// Only a transaction-bound adapter can commit or roll back.
#[async_trait]
impl PolicyTransaction for PgPolicyAdapter {
    async fn commit(&self) -> Result<(), PolicyError> {
        match &self.conn {
            Conn::Tx(tx) => tx.commit().await,
            Conn::Pool(_) => Err(not_in_tx()),
        }
    }

    async fn rollback(&self) -> Result<(), PolicyError> {
        match &self.conn {
            Conn::Tx(tx) => tx.rollback().await,
            Conn::Pool(_) => Err(not_in_tx()),
        }
    }
}

async fn create_table(conn: &mut PgConnection, table: &str) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id BIGSERIAL PRIMARY KEY,
            ptype VARCHAR(100) NOT NULL,
            v0 VARCHAR(100) NOT NULL DEFAULT '',
            v1 VARCHAR(100) NOT NULL DEFAULT '',
            v2 VARCHAR(100) NOT NULL DEFAULT '',
            v3 VARCHAR(100) NOT NULL DEFAULT '',
            v4 VARCHAR(100) NOT NULL DEFAULT '',
            v5 VARCHAR(100) NOT NULL DEFAULT ''
        )
        "#
    ))
    .execute(&mut *conn)
    .await?;

    sqlx::query(&format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_{table} ON {table} \
         (ptype, v0, v1, v2, v3, v4, v5)"
    ))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn select_rules(conn: &mut PgConnection, table: &str) -> Result<Vec<PolicyRule>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT v0, v1, v2 FROM {table} WHERE ptype = $1 ORDER BY id ASC"
    ))
    .bind(PTYPE)
    .fetch_all(conn)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(PolicyRule::new(
                row.try_get::<String, _>("v0")?,
                row.try_get::<String, _>("v1")?,
                row.try_get::<String, _>("v2")?,
            ))
        })
        .collect()
}

async fn insert_rule(conn: &mut PgConnection, table: &str, rule: &PolicyRule) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        "INSERT INTO {table} (ptype, v0, v1, v2) VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING"
    ))
    .bind(PTYPE)
    .bind(&rule.subject)
    .bind(&rule.object)
    .bind(&rule.action)
    .execute(conn)
    .await?;
    Ok(())
}

async fn delete_rule(conn: &mut PgConnection, table: &str, rule: &PolicyRule) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        "DELETE FROM {table} WHERE ptype = $1 AND v0 = $2 AND v1 = $3 AND v2 = $4"
    ))
    .bind(PTYPE)
    .bind(&rule.subject)
    .bind(&rule.object)
    .bind(&rule.action)
    .execute(conn)
    .await?;
    Ok(())
}

/// Table names are interpolated into SQL, so only `[A-Za-z_][A-Za-z0-9_]*`
/// is accepted.
fn validate_table(table: String) -> Result<String, PolicyError> {
    let mut chars = table.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid && table.len() <= 63 {
        Ok(table)
    } else {
        Err(PolicyError::adapter(
            "new",
            format!("invalid policy table name: {table:?}"),
        ))
    }
}

fn map_sqlx_error(op: &'static str, err: sqlx::Error) -> PolicyError {
    match err {
        sqlx::Error::PoolClosed => PolicyError::adapter(op, "connection pool closed"),
        sqlx::Error::Database(db) => PolicyError::adapter(
            op,
            format!("database error {}: {}", db.code().unwrap_or_default(), db.message()),
        ),
        other => PolicyError::adapter(op, other),
    }
}

fn not_in_tx() -> PolicyError {
    PolicyError::Transaction("adapter is not bound to a transaction".to_string())
}

fn closed() -> PolicyError {
    PolicyError::Transaction("transaction already closed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_are_plain_identifiers() {
        assert_eq!(validate_table("casbin_rule".into()).unwrap(), "casbin_rule");
        assert!(validate_table("_rules2".into()).is_ok());

        for bad in ["", "2rules", "rules;drop", "public.rules", "a b"] {
            assert!(validate_table(bad.into()).is_err(), "{bad:?} accepted");
        }
        assert!(validate_table("r".repeat(64)).is_err());
    }

    #[test]
    fn pool_closed_keeps_operation_name() {
        let err = map_sqlx_error("load_policies", sqlx::Error::PoolClosed);
        assert_eq!(
            err,
            PolicyError::Adapter {
                op: "load_policies",
                message: "connection pool closed".to_string()
            }
        );
    }
}
