//! Postgres-backed user directory.
//!
//! Reads the `users` table owned by the relational schema (migrations are
//! external). Soft-deleted rows (`deleted_at` set) are invisible.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::instrument;

use gatehouse_auth::{User, UserDirectory};
use gatehouse_core::{DomainError, UserId};

#[derive(Debug, Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    email: String,
    name: String,
    password: String,
    is_root: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = DomainError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let id = u64::try_from(row.id)
            .map_err(|_| DomainError::invalid_id(format!("negative user id {}", row.id)))?;
        Ok(User {
            id: UserId::new(id),
            email: row.email,
            name: row.name,
            password_hash: row.password,
            is_root: row.is_root,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_USER: &str = "SELECT id, email, name, password, is_root, created_at, updated_at \
                           FROM users WHERE deleted_at IS NULL";

#[async_trait]
impl UserDirectory for PgUserDirectory {
    #[instrument(skip(self), err)]
    async fn get_user(&self, id: UserId) -> Result<Option<User>, DomainError> {
        let row: Option<UserRow> = sqlx::query_as(&format!("{SELECT_USER} AND id = $1"))
            .bind(db_id(id)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_user", e))?;
        row.map(User::try_from).transpose()
    }

    #[instrument(skip(self), err)]
    async fn get_user_by_account(&self, email: &str) -> Result<Option<User>, DomainError> {
        let row: Option<UserRow> = sqlx::query_as(&format!("{SELECT_USER} AND email = $1"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_user_by_account", e))?;
        row.map(User::try_from).transpose()
    }

    #[instrument(skip(self, password_hash), err)]
    async fn update_user_password(&self, id: UserId, password_hash: &str) -> Result<(), DomainError> {
        let result = sqlx::query(
            "UPDATE users SET password = $1, updated_at = NOW() \
             WHERE id = $2 AND deleted_at IS NULL",
        )
        .bind(password_hash)
        .bind(db_id(id)?)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_user_password", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound);
        }
        Ok(())
    }
}

fn db_id(id: UserId) -> Result<i64, DomainError> {
    i64::try_from(id.get()).map_err(|_| DomainError::invalid_id(format!("user id {id} out of range")))
}

fn map_sqlx_error(op: &'static str, err: sqlx::Error) -> DomainError {
    DomainError::storage(format!("{op}: {err}"))
}
