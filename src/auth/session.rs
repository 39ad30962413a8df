//! Server-side sessions keyed by an opaque cookie value.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use super::guards::Principal;
use super::token::new_session_id;
use crate::clock::Clock;

pub const SESSION_COOKIE: &str = "devdash.sid";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, principal: Principal) -> Result<String, SessionError>;
    async fn get(&self, session_id: &str) -> Result<Option<Principal>, SessionError>;
    /// Idempotent: destroying an unknown id succeeds.
    async fn destroy(&self, session_id: &str) -> Result<(), SessionError>;
    async fn destroy_for_user(&self, user_id: Uuid) -> Result<usize, SessionError>;
}

#[derive(Debug, Clone)]
struct Session {
    principal: Principal,
    created_at: OffsetDateTime,
    last_seen: OffsetDateTime,
}

/// In-process session table with an optional idle timeout. Sharded, so
/// lookups for different sessions do not contend.
pub struct MemorySessionStore {
    sessions: DashMap<String, Session>,
    ttl: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl MemorySessionStore {
    pub fn new(ttl: Option<Duration>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
            clock,
        }
    }

    fn is_expired(&self, session: &Session, now: OffsetDateTime) -> bool {
        match self.ttl {
            Some(ttl) => now - session.last_seen >= ttl,
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn purge_expired(&self) -> usize {
        if self.ttl.is_none() {
            return 0;
        }
        let now = self.clock.now();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !self.is_expired(s, now));
        before.saturating_sub(self.sessions.len())
    }

    /// Periodically drops idle sessions so abandoned logins do not accumulate.
    pub fn spawn_cleanup(self: Arc<Self>, every: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            loop {
                tick.tick().await;
                let removed = self.purge_expired();
                if removed > 0 {
                    info!(removed, "expired sessions purged");
                }
            }
        })
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, principal: Principal) -> Result<String, SessionError> {
        let id = new_session_id();
        let now = self.clock.now();
        debug!(user_id = %principal.id, "session created");
        self.sessions.insert(
            id.clone(),
            Session {
                principal,
                created_at: now,
                last_seen: now,
            },
        );
        Ok(id)
    }

    async fn get(&self, session_id: &str) -> Result<Option<Principal>, SessionError> {
        let now = self.clock.now();
        if self.ttl.is_none() {
            return Ok(self.sessions.get(session_id).map(|s| s.principal.clone()));
        }

        {
            let Some(mut session) = self.sessions.get_mut(session_id) else {
                return Ok(None);
            };
            if !self.is_expired(&session, now) {
                session.last_seen = now;
                return Ok(Some(session.principal.clone()));
            }
        }

        // shard guard released above; a concurrent touch wins over removal
        if let Some((_, session)) = self
            .sessions
            .remove_if(session_id, |_, s| self.is_expired(s, now))
        {
            debug!(
                user_id = %session.principal.id,
                age = %(now - session.created_at),
                "session idle timeout"
            );
        }
        Ok(None)
    }

    async fn destroy(&self, session_id: &str) -> Result<(), SessionError> {
        self.sessions.remove(session_id);
        Ok(())
    }

    async fn destroy_for_user(&self, user_id: Uuid) -> Result<usize, SessionError> {
        let mut removed = 0;
        self.sessions.retain(|_, s| {
            let keep = s.principal.id != user_id;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::users::Role;

    fn principal() -> Principal {
        Principal {
            id: Uuid::new_v4(),
            name: "Linus".into(),
            email: "linus@example.com".into(),
            role: Role::User,
        }
    }

    #[tokio::test]
    async fn create_get_destroy() {
        let store = MemorySessionStore::new(None, Arc::new(ManualClock::default()));
        let p = principal();
        let id = store.create(p.clone()).await.unwrap();
        assert_eq!(id.len(), 64);
        assert_eq!(store.get(&id).await.unwrap(), Some(p));

        store.destroy(&id).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), None);
        // second destroy is not an error
        store.destroy(&id).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_session_is_absent() {
        let store = MemorySessionStore::new(None, Arc::new(ManualClock::default()));
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn idle_ttl_expires_sessions_and_activity_extends_them() {
        let clock = Arc::new(ManualClock::default());
        let store = MemorySessionStore::new(Some(Duration::from_secs(60)), clock.clone());
        let id = store.create(principal()).await.unwrap();

        clock.advance(time::Duration::seconds(45));
        assert!(store.get(&id).await.unwrap().is_some());
        clock.advance(time::Duration::seconds(45));
        assert!(store.get(&id).await.unwrap().is_some());

        clock.advance(time::Duration::seconds(60));
        assert!(store.get(&id).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn purge_removes_only_idle_sessions() {
        let clock = Arc::new(ManualClock::default());
        let store = MemorySessionStore::new(Some(Duration::from_secs(60)), clock.clone());
        store.create(principal()).await.unwrap();
        clock.advance(time::Duration::seconds(61));
        let fresh = store.create(principal()).await.unwrap();

        assert_eq!(store.purge_expired(), 1);
        assert!(store.get(&fresh).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn destroy_for_user_drops_all_their_sessions() {
        let store = MemorySessionStore::new(None, Arc::new(ManualClock::default()));
        let p = principal();
        store.create(p.clone()).await.unwrap();
        store.create(p.clone()).await.unwrap();
        let other = store.create(principal()).await.unwrap();

        assert_eq!(store.destroy_for_user(p.id).await.unwrap(), 2);
        assert!(store.get(&other).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn concurrent_lookups_on_distinct_sessions_all_resolve() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemorySessionStore::new(Some(Duration::from_secs(60)), clock));
        let mut handles = Vec::new();
        for _ in 0..64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let p = principal();
                let id = store.create(p.clone()).await.unwrap();
                for _ in 0..10 {
                    assert_eq!(store.get(&id).await.unwrap().as_ref(), Some(&p));
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.len(), 64);
    }
}
