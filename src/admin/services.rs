use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dto::{EditUserRequest, NotifyUsersRequest, PublicUser};
use crate::{
    auth::{services::is_valid_email, session::SessionStore},
    error::AppError,
    mail::{Mailer, OutboundEmail},
    users::{normalize_email, StoreError, UserStore, UserUpdate},
};

fn store_error(e: StoreError) -> AppError {
    match e {
        StoreError::NotFound => AppError::NotFound,
        StoreError::DuplicateEmail => AppError::EmailInUse,
        other => AppError::Store(other),
    }
}

/// User management behind the admin guard.
pub struct AdminService {
    store: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    mailer: Arc<dyn Mailer>,
}

impl AdminService {
    pub fn new(
        store: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            store,
            sessions,
            mailer,
        }
    }

    pub async fn list_users(&self) -> Result<Vec<PublicUser>, AppError> {
        let users = self.store.list().await?;
        Ok(users.into_iter().map(PublicUser::from).collect())
    }

    #[instrument(skip(self, req))]
    pub async fn edit_user(&self, id: Uuid, req: EditUserRequest) -> Result<PublicUser, AppError> {
        let name = req.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::Validation("Name is required".into()));
        }
        let email = normalize_email(&req.email);
        if !is_valid_email(&email) {
            return Err(AppError::Validation("Invalid email".into()));
        }

        let user = self
            .store
            .update(
                id,
                UserUpdate {
                    name: Some(name),
                    email: Some(email),
                    role: Some(req.role),
                    ..Default::default()
                },
            )
            .await
            .map_err(store_error)?;
        info!(user_id = %id, role = %user.role, "user edited");
        Ok(user.into())
    }

    #[instrument(skip(self))]
    pub async fn delete_user(&self, id: Uuid) -> Result<(), AppError> {
        self.store.delete(id).await.map_err(store_error)?;
        match self.sessions.destroy_for_user(id).await {
            Ok(n) => info!(user_id = %id, sessions = n, "user deleted"),
            Err(e) => warn!(user_id = %id, error = %e, "user deleted; session cleanup failed"),
        }
        Ok(())
    }

    /// One message addressed to every user. Nothing is written, so a mailer
    /// failure needs no compensation.
    #[instrument(skip(self, req), fields(subject = %req.subject))]
    pub async fn notify_users(&self, req: NotifyUsersRequest) -> Result<usize, AppError> {
        let recipients: Vec<String> = self
            .store
            .list()
            .await?
            .into_iter()
            .map(|u| u.email)
            .collect();
        let count = recipients.len();
        if count == 0 {
            info!("no users to notify");
            return Ok(0);
        }
        self.mailer
            .send(OutboundEmail::new(recipients, req.subject, req.body))
            .await?;
        info!(recipients = count, "notification handed to mailer");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{guards::Principal, session::MemorySessionStore},
        clock::ManualClock,
        mail::{FailingMailer, RecordingMailer},
        users::{MemoryUserStore, NewUser, Role, User},
    };

    struct Fixture {
        admin: AdminService,
        store: Arc<MemoryUserStore>,
        sessions: Arc<MemorySessionStore>,
        mailer: Arc<RecordingMailer>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryUserStore::new());
        let sessions = Arc::new(MemorySessionStore::new(None, Arc::new(ManualClock::default())));
        let mailer = Arc::new(RecordingMailer::new());
        Fixture {
            admin: AdminService::new(store.clone(), sessions.clone(), mailer.clone()),
            store,
            sessions,
            mailer,
        }
    }

    async fn seed(store: &MemoryUserStore, email: &str) -> User {
        store
            .create(NewUser {
                name: "Someone".into(),
                email: email.into(),
                password_hash: "$argon2id$v=19$stub".into(),
                role: Role::User,
            })
            .await
            .unwrap()
    }

    fn edit(email: &str, role: Role) -> EditUserRequest {
        EditUserRequest {
            name: "Renamed".into(),
            email: email.into(),
            role,
        }
    }

    #[tokio::test]
    async fn list_users_returns_public_views() {
        let f = fixture();
        seed(&f.store, "a@x.com").await;
        seed(&f.store, "b@x.com").await;
        let users = f.admin.list_users().await.unwrap();
        assert_eq!(users.len(), 2);
    }

    #[tokio::test]
    async fn edit_user_updates_fields() {
        let f = fixture();
        let user = seed(&f.store, "a@x.com").await;
        let view = f.admin.edit_user(user.id, edit("NEW@x.com", Role::Admin)).await.unwrap();
        assert_eq!(view.name, "Renamed");
        assert_eq!(view.email, "new@x.com");
        assert_eq!(view.role, Role::Admin);
        assert!(f.store.find_by_email("a@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn edit_missing_user_is_not_found() {
        let f = fixture();
        let err = f.admin.edit_user(Uuid::new_v4(), edit("z@x.com", Role::User)).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }

    #[tokio::test]
    async fn edit_to_taken_email_is_rejected() {
        let f = fixture();
        seed(&f.store, "a@x.com").await;
        let b = seed(&f.store, "b@x.com").await;
        let err = f.admin.edit_user(b.id, edit("A@X.com", Role::User)).await.unwrap_err();
        assert!(matches!(err, AppError::EmailInUse));
    }

    #[tokio::test]
    async fn delete_user_removes_record_and_sessions() {
        let f = fixture();
        let user = seed(&f.store, "a@x.com").await;
        let sid = f.sessions.create(Principal::from(&user)).await.unwrap();

        f.admin.delete_user(user.id).await.unwrap();
        assert!(f.store.find_by_id(user.id).await.unwrap().is_none());
        assert!(f.sessions.get(&sid).await.unwrap().is_none());

        let err = f.admin.delete_user(user.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }

    #[tokio::test]
    async fn notify_sends_one_bulk_message() {
        let f = fixture();
        seed(&f.store, "a@x.com").await;
        seed(&f.store, "b@x.com").await;
        let n = f
            .admin
            .notify_users(NotifyUsersRequest {
                subject: "Maintenance".into(),
                body: "Down at noon".into(),
            })
            .await
            .unwrap();
        assert_eq!(n, 2);
        let sent = f.mailer.sent();
        assert_eq!(sent.len(), 1);
        let mut to = sent[0].to.clone();
        to.sort();
        assert_eq!(to, vec!["a@x.com".to_string(), "b@x.com".to_string()]);
        assert_eq!(sent[0].subject, "Maintenance");
    }

    #[tokio::test]
    async fn notify_reports_mailer_failure_without_touching_users() {
        let store = Arc::new(MemoryUserStore::new());
        seed(&store, "a@x.com").await;
        let admin = AdminService::new(
            store.clone(),
            Arc::new(MemorySessionStore::new(None, Arc::new(ManualClock::default()))),
            Arc::new(FailingMailer),
        );
        let err = admin
            .notify_users(NotifyUsersRequest {
                subject: "s".into(),
                body: "b".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Mailer(_)));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
