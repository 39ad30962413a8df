use std::{sync::Arc, time::Duration};

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::{
    admin::AdminService,
    auth::{
        password::Hasher, rate_limit::LoginRateLimiter, services::AuthSettings,
        session::{MemorySessionStore, SessionStore},
        AuthService,
    },
    clock::{Clock, SystemClock},
    config::AppConfig,
    mail::{LogMailer, MailQueue, Mailer, SmtpMailer},
    users::{MemoryUserStore, PgUserStore, UserStore},
};

const SESSION_SWEEP_EVERY: Duration = Duration::from_secs(60);
const LIMITER_SWEEP_EVERY: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn UserStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub auth: Arc<AuthService>,
    pub admin: Arc<AdminService>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Production wiring: Postgres when `DATABASE_URL` is set, background
    /// session/limiter sweeps and the mail worker.
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn UserStore> = match &config.database {
            Some(db) => {
                let pool = PgPoolOptions::new()
                    .max_connections(db.max_connections)
                    .acquire_timeout(Duration::from_secs(db.acquire_timeout_secs))
                    .connect(&db.url)
                    .await
                    .context("connect to database")?;
                sqlx::migrate!("./migrations")
                    .run(&pool)
                    .await
                    .context("run migrations")?;
                info!("using postgres user store");
                Arc::new(PgUserStore::new(pool))
            }
            None => {
                info!("DATABASE_URL not set; using in-memory user store");
                Arc::new(MemoryUserStore::new())
            }
        };

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let sessions = Arc::new(MemorySessionStore::new(config.session.ttl(), clock.clone()));
        if config.session.ttl().is_some() {
            sessions.clone().spawn_cleanup(SESSION_SWEEP_EVERY);
        }

        let transport: Arc<dyn Mailer> = match &config.mail.smtp {
            Some(smtp) => Arc::new(SmtpMailer::new(smtp, &config.mail.from)?),
            None => {
                warn!("SMTP_HOST not set; outgoing mail is only logged");
                Arc::new(LogMailer::new(config.mail.from.clone()))
            }
        };
        let (mail_queue, _worker) = MailQueue::spawn(transport, &config.mail);

        let state = Self::assemble(config, store, sessions, Arc::new(mail_queue), clock)?;

        let limiter = state.auth.limiter().clone();
        let clock = state.clock.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(LIMITER_SWEEP_EVERY);
            loop {
                tick.tick().await;
                limiter.cleanup(clock.now());
            }
        });

        Ok(state)
    }

    /// Everything in process memory; the caller picks the mailer and clock.
    pub fn in_memory(
        config: AppConfig,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let sessions = Arc::new(MemorySessionStore::new(config.session.ttl(), clock.clone()));
        Self::assemble(config, Arc::new(MemoryUserStore::new()), sessions, mailer, clock)
    }

    fn assemble(
        config: AppConfig,
        store: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let hasher = Hasher::new(&config.hash)?;
        let auth = AuthService::new(
            store.clone(),
            sessions.clone(),
            LoginRateLimiter::from_config(&config.login_rate_limit),
            mailer.clone(),
            hasher,
            clock.clone(),
            AuthSettings::from(&config),
        )?;
        let admin = AdminService::new(store.clone(), sessions.clone(), mailer);

        Ok(Self {
            config: Arc::new(config),
            store,
            sessions,
            auth: Arc::new(auth),
            admin: Arc::new(admin),
            clock,
        })
    }
}
