//! User record and the directory it is read from.
//!
//! The relational store and its row mapping are external; the directory trait
//! is the only thing this crate needs from it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatehouse_core::{DomainError, UserId};

/// An account as stored in sessions and returned from login.
///
/// The password hash is never serialized, so a session never carries it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,
    #[serde(skip)]
    pub password_hash: String,
    pub is_root: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn to_session_value(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_session_value(value: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(value)
    }
}

/// Lookup and credential updates against the user store.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, id: UserId) -> Result<Option<User>, DomainError>;

    async fn get_user_by_account(&self, email: &str) -> Result<Option<User>, DomainError>;

    /// Replace the stored hash; `NotFound` if the user does not exist.
    async fn update_user_password(&self, id: UserId, password_hash: &str) -> Result<(), DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_value_omits_password_hash() {
        let now = Utc::now();
        let user = User {
            id: UserId::new(7),
            email: "root@example.com".to_string(),
            name: "Root".to_string(),
            password_hash: "$2b$04$secret".to_string(),
            is_root: true,
            created_at: now,
            updated_at: now,
        };

        let value = user.to_session_value().unwrap();
        assert!(!value.contains("secret"));
        assert!(value.contains("\"isRoot\":true"));

        let restored = User::from_session_value(&value).unwrap();
        assert_eq!(restored.id, user.id);
        assert!(restored.password_hash.is_empty());
    }
}
