//! In-process doubles for session and user storage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use gatehouse_core::{DomainError, UserId};

use crate::session::{INIT_FIELD, Session, SessionError, SessionProvider};
use crate::user::{User, UserDirectory};

type Store = Arc<Mutex<HashMap<String, HashMap<String, String>>>>;

#[derive(Debug, Clone)]
pub struct MapSession {
    sid: String,
    store: Store,
}

#[async_trait]
impl Session for MapSession {
    async fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        let mut store = self.store.lock().unwrap();
        let fields = store.get_mut(&self.sid).ok_or(SessionError::NotFound)?;
        fields.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        let store = self.store.lock().unwrap();
        Ok(store.get(&self.sid).and_then(|f| f.get(key).cloned()))
    }

    async fn delete(&self, key: &str) -> Result<(), SessionError> {
        if let Some(fields) = self.store.lock().unwrap().get_mut(&self.sid) {
            fields.remove(key);
        }
        Ok(())
    }

    fn session_id(&self) -> &str {
        &self.sid
    }
}

#[derive(Debug, Default)]
pub struct MapProvider {
    store: Store,
    broken: bool,
    gc_runs: Mutex<u32>,
}

impl MapProvider {
    /// A provider whose store calls all fail.
    pub fn broken() -> Self {
        Self { broken: true, ..Default::default() }
    }

    pub fn gc_runs(&self) -> u32 {
        *self.gc_runs.lock().unwrap()
    }

    pub fn contains(&self, sid: &str) -> bool {
        self.store.lock().unwrap().contains_key(sid)
    }
}

#[async_trait]
impl SessionProvider for MapProvider {
    type Session = MapSession;

    async fn session_init(&self, sid: &str) -> Result<MapSession, SessionError> {
        if self.broken {
            return Err(SessionError::store("hset_ex", "connection refused"));
        }
        let mut fields = HashMap::new();
        fields.insert(INIT_FIELD.to_string(), "1".to_string());
        self.store.lock().unwrap().insert(sid.to_string(), fields);
        Ok(MapSession { sid: sid.to_string(), store: self.store.clone() })
    }

    async fn session_read(&self, sid: &str) -> Result<MapSession, SessionError> {
        if self.broken {
            return Err(SessionError::store("expire", "connection refused"));
        }
        if !self.store.lock().unwrap().contains_key(sid) {
            return Err(SessionError::NotFound);
        }
        Ok(MapSession { sid: sid.to_string(), store: self.store.clone() })
    }

    async fn session_destroy(&self, sid: &str) -> Result<(), SessionError> {
        self.store.lock().unwrap().remove(sid);
        Ok(())
    }

    async fn session_gc(&self, _max_life_time: Duration) {
        *self.gc_runs.lock().unwrap() += 1;
    }
}

#[derive(Debug, Default)]
pub struct MapDirectory {
    users: Mutex<HashMap<UserId, User>>,
}

impl MapDirectory {
    pub fn insert(&self, id: u64, email: &str, password_hash: &str, is_root: bool) -> User {
        let now = Utc::now();
        let user = User {
            id: UserId::new(id),
            email: email.to_string(),
            name: email.split('@').next().unwrap_or(email).to_string(),
            password_hash: password_hash.to_string(),
            is_root,
            created_at: now,
            updated_at: now,
        };
        self.users.lock().unwrap().insert(user.id, user.clone());
        user
    }

    pub fn password_hash(&self, id: u64) -> Option<String> {
        self.users
            .lock()
            .unwrap()
            .get(&UserId::new(id))
            .map(|u| u.password_hash.clone())
    }
}

#[async_trait]
impl UserDirectory for MapDirectory {
    async fn get_user(&self, id: UserId) -> Result<Option<User>, DomainError> {
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }

    async fn get_user_by_account(&self, email: &str) -> Result<Option<User>, DomainError> {
        Ok(self.users.lock().unwrap().values().find(|u| u.email == email).cloned())
    }

    async fn update_user_password(&self, id: UserId, password_hash: &str) -> Result<(), DomainError> {
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(&id).ok_or(DomainError::NotFound)?;
        user.password_hash = password_hash.to_string();
        user.updated_at = Utc::now();
        Ok(())
    }
}
