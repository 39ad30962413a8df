use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::repo::{StoreError, UserStore};
use super::repo_types::{normalize_email, NewUser, User, UserUpdate};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    by_email: HashMap<String, Uuid>,
}

impl Inner {
    fn find_valid_reset(&self, token: &str, now: OffsetDateTime) -> Option<Uuid> {
        self.users
            .values()
            .find(|u| {
                u.reset
                    .as_ref()
                    .is_some_and(|r| r.token == token && r.is_valid_at(now))
            })
            .map(|u| u.id)
    }
}

/// Process-local store. Every mutation holds the write lock for its whole
/// check-and-write, which gives the same atomicity as the Postgres constraints.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: RwLock<Inner>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_email
            .get(&normalize_email(email))
            .and_then(|id| inner.users.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn find_by_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .find_valid_reset(token, now)
            .and_then(|id| inner.users.get(&id))
            .cloned())
    }

    async fn list(&self) -> Result<Vec<User>, StoreError> {
        let mut users: Vec<User> = self.inner.read().await.users.values().cloned().collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }

    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let email = normalize_email(&new.email);
        let mut inner = self.inner.write().await;
        if inner.by_email.contains_key(&email) {
            return Err(StoreError::DuplicateEmail);
        }
        let user = User {
            id: Uuid::new_v4(),
            name: new.name,
            email: email.clone(),
            password_hash: new.password_hash,
            role: new.role,
            reset: None,
            created_at: OffsetDateTime::now_utc(),
        };
        inner.by_email.insert(email, user.id);
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update(&self, id: Uuid, fields: UserUpdate) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;
        let current_email = inner
            .users
            .get(&id)
            .map(|u| u.email.clone())
            .ok_or(StoreError::NotFound)?;

        let new_email = fields.email.as_deref().map(normalize_email);
        if let Some(email) = &new_email {
            if *email != current_email && inner.by_email.contains_key(email) {
                return Err(StoreError::DuplicateEmail);
            }
        }

        let user = inner.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        if let Some(name) = fields.name {
            user.name = name;
        }
        if let Some(email) = new_email.clone() {
            user.email = email;
        }
        if let Some(role) = fields.role {
            user.role = role;
        }
        if let Some(hash) = fields.password_hash {
            user.password_hash = hash;
        }
        if let Some(reset) = fields.reset {
            user.reset = reset;
        }
        let updated = user.clone();

        if let Some(email) = new_email {
            if email != current_email {
                inner.by_email.remove(&current_email);
                inner.by_email.insert(email, id);
            }
        }
        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let user = inner.users.remove(&id).ok_or(StoreError::NotFound)?;
        inner.by_email.remove(&user.email);
        Ok(())
    }

    async fn consume_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
        password_hash: &str,
    ) -> Result<Option<User>, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(id) = inner.find_valid_reset(token, now) else {
            return Ok(None);
        };
        let user = inner.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        user.password_hash = password_hash.to_string();
        user.reset = None;
        Ok(Some(user.clone()))
    }
}
