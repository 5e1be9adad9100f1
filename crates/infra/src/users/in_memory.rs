use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use gatehouse_auth::{User, UserDirectory};
use gatehouse_core::{DomainError, UserId};

/// In-memory user directory.
///
/// Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<UserId, User>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user. Emails must stay unique.
    pub fn insert(&self, user: User) -> Result<(), DomainError> {
        let mut users = self.users.write().map_err(|_| poisoned())?;
        if users
            .values()
            .any(|u| u.email == user.email && u.id != user.id)
        {
            return Err(DomainError::conflict(format!(
                "email already registered: {}",
                user.email
            )));
        }
        users.insert(user.id, user);
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get_user(&self, id: UserId) -> Result<Option<User>, DomainError> {
        let users = self.users.read().map_err(|_| poisoned())?;
        Ok(users.get(&id).cloned())
    }

    async fn get_user_by_account(&self, email: &str) -> Result<Option<User>, DomainError> {
        let users = self.users.read().map_err(|_| poisoned())?;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn update_user_password(&self, id: UserId, password_hash: &str) -> Result<(), DomainError> {
        let mut users = self.users.write().map_err(|_| poisoned())?;
        let user = users.get_mut(&id).ok_or(DomainError::NotFound)?;
        user.password_hash = password_hash.to_string();
        user.updated_at = Utc::now();
        Ok(())
    }
}

fn poisoned() -> DomainError {
    DomainError::storage("user directory lock poisoned")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: u64, email: &str) -> User {
        let now = Utc::now();
        User {
            id: UserId::new(id),
            email: email.to_string(),
            name: email.to_string(),
            password_hash: String::new(),
            is_root: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn lookup_and_password_update() {
        let dir = InMemoryUserDirectory::new();
        dir.insert(user(1, "a@example.com")).unwrap();

        let found = dir.get_user_by_account("a@example.com").await.unwrap().unwrap();
        assert_eq!(found.id, UserId::new(1));
        assert!(dir.get_user_by_account("b@example.com").await.unwrap().is_none());

        dir.update_user_password(UserId::new(1), "hash").await.unwrap();
        let updated = dir.get_user(UserId::new(1)).await.unwrap().unwrap();
        assert_eq!(updated.password_hash, "hash");

        assert_eq!(
            dir.update_user_password(UserId::new(9), "hash").await,
            Err(DomainError::NotFound)
        );
    }

    #[test]
    fn duplicate_email_is_a_conflict() {
        let dir = InMemoryUserDirectory::new();
        dir.insert(user(1, "a@example.com")).unwrap();
        assert!(matches!(
            dir.insert(user(2, "a@example.com")),
            Err(DomainError::Conflict(_))
        ));
    }
}
