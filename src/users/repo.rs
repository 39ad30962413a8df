use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{normalize_email, NewUser, ResetToken, Role, User, UserUpdate};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error("user not found")]
    NotFound,
    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateEmail,
            sqlx::Error::RowNotFound => StoreError::NotFound,
            _ => StoreError::Backend(e.to_string()),
        }
    }
}

/// Persistence for user records. Emails are compared case-insensitively.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    /// Only returns a user whose token is still valid at `now`.
    async fn find_by_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError>;
    async fn list(&self) -> Result<Vec<User>, StoreError>;
    async fn create(&self, new: NewUser) -> Result<User, StoreError>;
    async fn update(&self, id: Uuid, fields: UserUpdate) -> Result<User, StoreError>;
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
    /// Sets `password_hash` and clears the reset token in one step, only if
    /// `token` matches an unexpired reset. At most one caller wins per token.
    async fn consume_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
        password_hash: &str,
    ) -> Result<Option<User>, StoreError>;
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    password_hash: String,
    role: String,
    reset_token: Option<String>,
    reset_token_expires_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = row.role.parse::<Role>().map_err(StoreError::Backend)?;
        let reset = match (row.reset_token, row.reset_token_expires_at) {
            (Some(token), Some(expires_at)) => Some(ResetToken { token, expires_at }),
            _ => None,
        };
        Ok(User {
            id: row.id,
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            role,
            reset,
            created_at: row.created_at,
        })
    }
}

const USER_COLUMNS: &str =
    "id, name, email, password_hash, role, reset_token, reset_token_expires_at, created_at";

/// Postgres-backed store. Email uniqueness rests on the `lower(email)` unique index.
#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn into_user(row: Option<UserRow>) -> Result<Option<User>, StoreError> {
    row.map(User::try_from).transpose()
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = $1"
        ))
        .bind(normalize_email(email))
        .fetch_optional(&self.db)
        .await?;
        into_user(row)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        into_user(row)
    }

    async fn find_by_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE reset_token = $1 AND reset_token_expires_at > $2"
        ))
        .bind(token)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        into_user(row)
    }

    async fn list(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC"
        ))
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(User::try_from).collect()
    }

    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (name, email, password_hash, role) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(&new.name)
        .bind(normalize_email(&new.email))
        .bind(&new.password_hash)
        .bind(new.role.as_str())
        .fetch_one(&self.db)
        .await?;
        User::try_from(row)
    }

    async fn update(&self, id: Uuid, fields: UserUpdate) -> Result<User, StoreError> {
        // COALESCE keeps the current value for fields left as None.
        let (set_reset, reset_token, reset_expires) = match fields.reset {
            Some(Some(reset)) => (true, Some(reset.token), Some(reset.expires_at)),
            Some(None) => (true, None, None),
            None => (false, None, None),
        };
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET \
                name = COALESCE($2, name), \
                email = COALESCE($3, email), \
                role = COALESCE($4, role), \
                password_hash = COALESCE($5, password_hash), \
                reset_token = CASE WHEN $6 THEN $7 ELSE reset_token END, \
                reset_token_expires_at = CASE WHEN $6 THEN $8 ELSE reset_token_expires_at END \
             WHERE id = $1 \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(fields.name)
        .bind(fields.email.as_deref().map(normalize_email))
        .bind(fields.role.map(Role::as_str))
        .bind(fields.password_hash)
        .bind(set_reset)
        .bind(reset_token)
        .bind(reset_expires)
        .fetch_optional(&self.db)
        .await?
        .ok_or(StoreError::NotFound)?;
        User::try_from(row)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn consume_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
        password_hash: &str,
    ) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET \
                password_hash = $3, \
                reset_token = NULL, \
                reset_token_expires_at = NULL \
             WHERE reset_token = $1 AND reset_token_expires_at > $2 \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(token)
        .bind(now)
        .bind(password_hash)
        .fetch_optional(&self.db)
        .await?;
        into_user(row)
    }
}
