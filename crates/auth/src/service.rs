//! Authentication use-cases built on the session manager.
//!
//! Sessions carry the JSON-serialized user under [`SID_USER`]; everything
//! else a flow stores is flow-specific.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::error::AuthError;
use crate::password::PasswordHasher;
use crate::session::{Session, SessionManager, SessionProvider};
use crate::user::{User, UserDirectory};

pub const SID_USER: &str = "user";
pub const RESET_APPROVER: &str = "resetPwdApprover";
pub const RESET_APPROVER_IP: &str = "resetPwdApproverIP";

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct Login {
    /// Escaped session id for the transport.
    pub token: String,
    pub user: User,
}

pub struct AuthService<P, D> {
    sessions: Arc<SessionManager<P>>,
    users: Arc<D>,
    hasher: PasswordHasher,
}

impl<P, D> AuthService<P, D>
where
    P: SessionProvider,
    D: UserDirectory,
{
    pub fn new(sessions: Arc<SessionManager<P>>, users: Arc<D>, hasher: PasswordHasher) -> Self {
        Self {
            sessions,
            users,
            hasher,
        }
    }

    pub fn sessions(&self) -> &SessionManager<P> {
        &self.sessions
    }

    pub fn users(&self) -> &D {
        &self.users
    }

    /// Verify credentials and open a session holding the user.
    #[instrument(skip(self, password), err)]
    pub async fn login(&self, account: &str, password: &str) -> Result<Login, AuthError> {
        let user = self
            .users
            .get_user_by_account(account)
            .await
            .map_err(|e| AuthError::internal("get_user_by_account", e))?
            .ok_or(AuthError::AccountNotFound)?;

        if !self.hasher.verify(password, &user.password_hash).await? {
            warn!(user_id = %user.id, "login rejected: wrong password");
            return Err(AuthError::WrongPassword);
        }

        let carrier = self.sessions.session_start("").await?;
        carrier.session.set(SID_USER, &encode_user(&user)?).await?;

        info!(user_id = %user.id, "login");
        Ok(Login {
            token: carrier.id,
            user,
        })
    }

    pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
        self.sessions.session_destroy(token).await?;
        Ok(())
    }

    /// Resolve the user a session token belongs to.
    pub async fn request_user(&self, token: &str) -> Result<User, AuthError> {
        if token.is_empty() {
            return Err(AuthError::InvalidSession);
        }

        let carrier = self.sessions.session_start(token).await?;
        let value = carrier
            .session
            .get(SID_USER)
            .await?
            .ok_or(AuthError::InvalidSession)?;

        User::from_session_value(&value).map_err(|e| AuthError::internal("decode session user", e))
    }

    /// Issue a password-reset token for `account`, approved by a root user.
    #[instrument(skip(self, approver_token), err)]
    pub async fn forgot_password(
        &self,
        approver_token: &str,
        account: &str,
        client_ip: &str,
    ) -> Result<String, AuthError> {
        let approver = self.request_user(approver_token).await?;
        if !approver.is_root {
            return Err(AuthError::NoHierarchyPermission);
        }

        let user = self
            .users
            .get_user_by_account(account)
            .await
            .map_err(|e| AuthError::internal("get_user_by_account", e))?
            .ok_or(AuthError::AccountNotFound)?;

        let carrier = self.sessions.session_start("").await?;
        carrier.session.set(SID_USER, &encode_user(&user)?).await?;
        carrier.session.set(RESET_APPROVER, &encode_user(&approver)?).await?;
        carrier.session.set(RESET_APPROVER_IP, client_ip).await?;

        info!(user_id = %user.id, approver_id = %approver.id, "password reset issued");
        Ok(carrier.id)
    }

    /// Consume a reset token: store the new hash and end the reset session.
    #[instrument(skip_all, err)]
    pub async fn reset_password(&self, reset_token: &str, password: &str) -> Result<(), AuthError> {
        let user = self.request_user(reset_token).await?;
        let password_hash = self.hasher.hash(password).await?;

        self.users
            .update_user_password(user.id, &password_hash)
            .await
            .map_err(|e| AuthError::internal("update_user_password", e))?;

        self.sessions.session_destroy(reset_token).await?;
        Ok(())
    }
}

fn encode_user(user: &User) -> Result<String, AuthError> {
    user.to_session_value()
        .map_err(|e| AuthError::internal("encode session user", e))
}
