use std::{str::FromStr, time::Duration};

use anyhow::{bail, Context};
use serde::Deserialize;

/// Upper bound for minute-valued windows (one week).
pub const MAX_WINDOW_MINUTES: u64 = 7 * 24 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Idle timeout; `None` keeps sessions until logout or restart.
    pub ttl_seconds: Option<u64>,
    pub cookie_secure: bool,
}

impl SessionConfig {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_seconds.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub window_minutes: u64,
    pub max_attempts: u32,
}

/// Outgoing SMTP relay. Without it mail only reaches the log.
#[derive(Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// STARTTLS on the submission port; `false` talks plaintext (local relays only).
    pub starttls: bool,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("starttls", &self.starttls)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub from: String,
    pub smtp: Option<SmtpConfig>,
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub send_timeout_secs: u64,
    pub backoff_base_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HashConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: Option<DatabaseConfig>,
    pub base_url: String,
    pub session: SessionConfig,
    pub login_rate_limit: RateLimitConfig,
    pub reset_token_ttl_minutes: i64,
    pub min_password_length: usize,
    pub reveal_unknown_accounts: bool,
    /// Key the login limiter on `X-Forwarded-For`/`X-Real-IP` instead of the peer address.
    pub trust_proxy_headers: bool,
    pub mail: MailConfig,
    pub hash: HashConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: None,
            cookie_secure: false,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_minutes: 15,
            max_attempts: 5,
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from: "no-reply@localhost".into(),
            smtp: None,
            queue_capacity: 256,
            max_attempts: 3,
            send_timeout_secs: 10,
            backoff_base_ms: 500,
        }
    }
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            memory_kib: argon2::Params::DEFAULT_M_COST,
            iterations: argon2::Params::DEFAULT_T_COST,
            parallelism: argon2::Params::DEFAULT_P_COST,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: None,
            base_url: "http://localhost:3000".into(),
            session: SessionConfig::default(),
            login_rate_limit: RateLimitConfig::default(),
            reset_token_ttl_minutes: 60,
            min_password_length: 8,
            reveal_unknown_accounts: true,
            trust_proxy_headers: false,
            mail: MailConfig::default(),
            hash: HashConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let database = match std::env::var("DATABASE_URL") {
            Ok(url) => Some(DatabaseConfig {
                url,
                max_connections: env_or("DB_MAX_CONNECTIONS", 10)?,
                acquire_timeout_secs: env_or("DB_ACQUIRE_TIMEOUT_SECS", 5)?,
            }),
            Err(_) => None,
        };

        let session = SessionConfig {
            ttl_seconds: env_opt("SESSION_TTL_SECONDS")?,
            cookie_secure: env_or("SESSION_COOKIE_SECURE", defaults.session.cookie_secure)?,
        };

        let login_rate_limit = RateLimitConfig {
            window_minutes: env_or(
                "LOGIN_RATE_WINDOW_MINUTES",
                defaults.login_rate_limit.window_minutes,
            )?,
            max_attempts: env_or(
                "LOGIN_RATE_MAX_ATTEMPTS",
                defaults.login_rate_limit.max_attempts,
            )?,
        };

        let smtp = match std::env::var("SMTP_HOST") {
            Ok(host) => Some(SmtpConfig {
                host,
                port: env_or("SMTP_PORT", 587)?,
                username: std::env::var("SMTP_USER").ok(),
                password: std::env::var("SMTP_PASSWORD").ok(),
                starttls: env_or("SMTP_STARTTLS", true)?,
            }),
            Err(_) => None,
        };

        let mail = MailConfig {
            from: std::env::var("MAIL_FROM").unwrap_or(defaults.mail.from),
            smtp,
            queue_capacity: env_or("MAIL_QUEUE_CAPACITY", defaults.mail.queue_capacity)?,
            max_attempts: env_or("MAIL_MAX_ATTEMPTS", defaults.mail.max_attempts)?,
            send_timeout_secs: env_or("MAIL_SEND_TIMEOUT_SECS", defaults.mail.send_timeout_secs)?,
            backoff_base_ms: env_or("MAIL_BACKOFF_BASE_MS", defaults.mail.backoff_base_ms)?,
        };

        let hash = HashConfig {
            memory_kib: env_or("HASH_MEMORY_KIB", defaults.hash.memory_kib)?,
            iterations: env_or("HASH_ITERATIONS", defaults.hash.iterations)?,
            parallelism: env_or("HASH_PARALLELISM", defaults.hash.parallelism)?,
        };

        let cfg = Self {
            database,
            base_url: std::env::var("BASE_URL").unwrap_or(defaults.base_url),
            session,
            login_rate_limit,
            reset_token_ttl_minutes: env_or(
                "RESET_TOKEN_TTL_MINUTES",
                defaults.reset_token_ttl_minutes,
            )?,
            min_password_length: env_or("MIN_PASSWORD_LENGTH", defaults.min_password_length)?,
            reveal_unknown_accounts: env_or(
                "REVEAL_UNKNOWN_ACCOUNTS",
                defaults.reveal_unknown_accounts,
            )?,
            trust_proxy_headers: env_or("TRUST_PROXY_HEADERS", defaults.trust_proxy_headers)?,
            mail,
            hash,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects values the time arithmetic downstream cannot represent.
    pub fn validate(&self) -> anyhow::Result<()> {
        let window = self.login_rate_limit.window_minutes;
        if !(1..=MAX_WINDOW_MINUTES).contains(&window) {
            bail!("LOGIN_RATE_WINDOW_MINUTES must be between 1 and {MAX_WINDOW_MINUTES}, got {window}");
        }
        if self.login_rate_limit.max_attempts == 0 {
            bail!("LOGIN_RATE_MAX_ATTEMPTS must be at least 1");
        }
        let reset = self.reset_token_ttl_minutes;
        if !(1..=MAX_WINDOW_MINUTES as i64).contains(&reset) {
            bail!("RESET_TOKEN_TTL_MINUTES must be between 1 and {MAX_WINDOW_MINUTES}, got {reset}");
        }
        if self.session.ttl_seconds == Some(0) {
            bail!("SESSION_TTL_SECONDS must be positive when set");
        }
        Ok(())
    }
}

fn env_opt<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => {
            let value = raw
                .trim()
                .parse::<T>()
                .with_context(|| format!("parse {key}"))?;
            Ok(Some(value))
        }
        Err(_) => Ok(None),
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(env_opt(key)?.unwrap_or(default))
}
