use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use time::Duration;
use tracing::{info, instrument, warn};

use super::{
    dto::{ForgotPasswordRequest, LoginRequest, RegisterRequest, ResetPasswordRequest},
    guards::Principal,
    password::Hasher,
    rate_limit::LoginRateLimiter,
    session::SessionStore,
    token::new_reset_token,
};
use crate::{
    clock::Clock,
    config::AppConfig,
    error::AppError,
    mail::{Mailer, OutboundEmail},
    users::{normalize_email, NewUser, ResetToken, Role, StoreError, User, UserStore, UserUpdate},
};

pub const DASHBOARD_PATH: &str = "/dashboard";
pub const ADMIN_HOME_PATH: &str = "/admin";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Where a freshly logged-in principal lands.
pub fn landing_page(role: Role) -> &'static str {
    match role {
        Role::Admin => ADMIN_HOME_PATH,
        Role::User => DASHBOARD_PATH,
    }
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub base_url: String,
    pub reset_token_ttl: Duration,
    pub min_password_length: usize,
    pub reveal_unknown_accounts: bool,
}

impl From<&AppConfig> for AuthSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            reset_token_ttl: Duration::minutes(cfg.reset_token_ttl_minutes),
            min_password_length: cfg.min_password_length,
            reveal_unknown_accounts: cfg.reveal_unknown_accounts,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub session_id: String,
    pub principal: Principal,
    pub redirect_url: &'static str,
}

/// Registration, login/logout and the password-reset protocol.
pub struct AuthService {
    store: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    limiter: LoginRateLimiter,
    mailer: Arc<dyn Mailer>,
    hasher: Hasher,
    clock: Arc<dyn Clock>,
    settings: AuthSettings,
    // verified against when the email is unknown, so both failure paths cost the same
    dummy_hash: String,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        limiter: LoginRateLimiter,
        mailer: Arc<dyn Mailer>,
        hasher: Hasher,
        clock: Arc<dyn Clock>,
        settings: AuthSettings,
    ) -> anyhow::Result<Self> {
        let dummy_hash = hasher.hash(&new_reset_token())?;
        Ok(Self {
            store,
            sessions,
            limiter,
            mailer,
            hasher,
            clock,
            settings,
            dummy_hash,
        })
    }

    pub fn limiter(&self) -> &LoginRateLimiter {
        &self.limiter
    }

    fn check_password(&self, password: &str, confirm: &str) -> Result<(), AppError> {
        if password != confirm {
            return Err(AppError::PasswordMismatch);
        }
        if password.chars().count() < self.settings.min_password_length {
            return Err(AppError::Validation(format!(
                "Password must be at least {} characters",
                self.settings.min_password_length
            )));
        }
        Ok(())
    }

    async fn hash(&self, password: String) -> Result<String, AppError> {
        self.hasher
            .hash_blocking(password)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))
    }

    #[instrument(skip(self, req), fields(email = %req.email))]
    pub async fn register(&self, req: RegisterRequest) -> Result<User, AppError> {
        self.check_password(&req.password, &req.confirm_password)?;

        let email = normalize_email(&req.email);
        if !is_valid_email(&email) {
            return Err(AppError::Validation("Invalid email".into()));
        }
        let name = req.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::Validation("Name is required".into()));
        }

        if self.store.find_by_email(&email).await?.is_some() {
            warn!("email already in use");
            return Err(AppError::EmailInUse);
        }

        let password_hash = self.hash(req.password).await?;
        let user = self
            .store
            .create(NewUser {
                name,
                email,
                password_hash,
                role: Role::User,
            })
            .await
            .map_err(|e| match e {
                // lost a race with a concurrent registration
                StoreError::DuplicateEmail => AppError::EmailInUse,
                other => AppError::Store(other),
            })?;

        info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    #[instrument(skip(self, req), fields(email = %req.email))]
    pub async fn login(&self, client_key: &str, req: LoginRequest) -> Result<LoginOutcome, AppError> {
        let now = self.clock.now();
        if let Err(retry_after) = self.limiter.hit(client_key, now) {
            return Err(AppError::TooManyAttempts {
                retry_after_secs: retry_after.whole_seconds().max(1) as u64,
            });
        }

        let user = match self.store.find_by_email(&req.email).await? {
            Some(user) => user,
            None => {
                self.hasher
                    .verify_blocking(req.password, self.dummy_hash.clone())
                    .await;
                warn!("login unknown email");
                return Err(AppError::InvalidCredentials);
            }
        };

        if !self
            .hasher
            .verify_blocking(req.password, user.password_hash.clone())
            .await
        {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AppError::InvalidCredentials);
        }

        let principal = Principal::from(&user);
        let session_id = self.sessions.create(principal.clone()).await?;
        info!(user_id = %user.id, role = %user.role, "user logged in");
        Ok(LoginOutcome {
            session_id,
            redirect_url: landing_page(principal.role),
            principal,
        })
    }

    #[instrument(skip_all)]
    pub async fn logout(&self, session_id: &str) -> Result<(), AppError> {
        self.sessions
            .destroy(session_id)
            .await
            .map_err(AppError::LogoutFailed)
    }

    /// Session lookup followed by a fresh read of the user record, so role and
    /// email edits apply to live sessions. A session whose user is gone is dropped.
    pub async fn resolve_principal(&self, session_id: &str) -> Result<Option<Principal>, AppError> {
        let Some(snapshot) = self.sessions.get(session_id).await? else {
            return Ok(None);
        };
        match self.store.find_by_id(snapshot.id).await? {
            Some(user) => Ok(Some(Principal::from(&user))),
            None => {
                warn!(user_id = %snapshot.id, "session refers to a deleted user");
                self.sessions.destroy(session_id).await?;
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, req), fields(email = %req.email))]
    pub async fn forgot_password(&self, req: ForgotPasswordRequest) -> Result<(), AppError> {
        let Some(user) = self.store.find_by_email(&req.email).await? else {
            if self.settings.reveal_unknown_accounts {
                return Err(AppError::UnknownAccount);
            }
            info!("password reset requested for unknown email");
            return Ok(());
        };

        // Overwrites any outstanding token: one active reset per user.
        let token = new_reset_token();
        let expires_at = self.clock.now() + self.settings.reset_token_ttl;
        self.store
            .update(
                user.id,
                UserUpdate {
                    reset: Some(Some(ResetToken {
                        token: token.clone(),
                        expires_at,
                    })),
                    ..Default::default()
                },
            )
            .await?;

        let link = format!("{}/reset-password/{}", self.settings.base_url, token);
        self.mailer
            .send(OutboundEmail::new(
                vec![user.email.clone()],
                "Password Reset",
                format!(
                    "You requested a password reset. Click the link below to reset your password:\n{link}"
                ),
            ))
            .await?;

        info!(user_id = %user.id, "password reset link issued");
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn reset_password(&self, token: &str, req: ResetPasswordRequest) -> Result<(), AppError> {
        self.check_password(&req.password, &req.confirm_password)?;

        let now = self.clock.now();
        // cheap rejection before paying for a hash
        if self.store.find_by_reset_token(token, now).await?.is_none() {
            return Err(AppError::InvalidOrExpiredToken);
        }

        let password_hash = self.hash(req.password).await?;
        let user = self
            .store
            .consume_reset_token(token, now, &password_hash)
            .await?
            .ok_or(AppError::InvalidOrExpiredToken)?;

        match self.sessions.destroy_for_user(user.id).await {
            Ok(n) if n > 0 => info!(user_id = %user.id, sessions = n, "sessions revoked after reset"),
            Ok(_) => {}
            Err(e) => warn!(user_id = %user.id, error = %e, "could not revoke sessions after reset"),
        }
        info!(user_id = %user.id, "password reset completed");
        Ok(())
    }
}
