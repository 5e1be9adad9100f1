//! Password hashing (bcrypt).
//!
//! Hashing and verification are CPU-bound and run on the blocking pool.

use bcrypt::{DEFAULT_COST, hash, verify};

use crate::error::AuthError;

/// bcrypt only looks at the first 72 bytes; longer inputs are refused.
pub const MAX_PASSWORD_BYTES: usize = 72;

#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self { cost: DEFAULT_COST }
    }
}

impl PasswordHasher {
    pub fn with_cost(cost: u32) -> Self {
        Self { cost }
    }

    pub async fn hash(&self, password: &str) -> Result<String, AuthError> {
        if password.len() > MAX_PASSWORD_BYTES {
            return Err(AuthError::PasswordTooLong);
        }
        let password = password.to_string();
        let cost = self.cost;

        tokio::task::spawn_blocking(move || hash(password, cost))
            .await
            .map_err(|e| AuthError::internal("hash_password join", e))?
            .map_err(|e| AuthError::internal("hash_password", e))
    }

    /// `Ok(false)` on mismatch; errors only for malformed hashes.
    pub async fn verify(&self, password: &str, password_hash: &str) -> Result<bool, AuthError> {
        if password.len() > MAX_PASSWORD_BYTES {
            return Ok(false);
        }
        let password = password.to_string();
        let password_hash = password_hash.to_string();

        tokio::task::spawn_blocking(move || verify(password, &password_hash))
            .await
            .map_err(|e| AuthError::internal("verify_password join", e))?
            .map_err(|e| AuthError::internal("verify_password", e))
    }
}
