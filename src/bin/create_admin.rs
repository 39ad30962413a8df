//! Provisions an administrator account directly in the configured database.
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use devdash::{
    auth::password::Hasher,
    config::AppConfig,
    init_tracing,
    users::{normalize_email, NewUser, PgUserStore, Role, StoreError, UserStore},
};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "create-admin", about = "Create a user with the admin role")]
struct Args {
    #[arg(long)]
    email: String,

    #[arg(long)]
    password: String,

    #[arg(long, default_value = "Admin")]
    name: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let config = AppConfig::from_env()?;
    let Some(db) = config.database.as_ref() else {
        bail!("DATABASE_URL must be set to provision an admin");
    };
    if args.password.chars().count() < config.min_password_length {
        bail!(
            "password must be at least {} characters",
            config.min_password_length
        );
    }

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(db.acquire_timeout_secs))
        .connect(&db.url)
        .await
        .context("connect to database")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("run migrations")?;

    let hasher = Hasher::new(&config.hash)?;
    let password_hash = hasher.hash(&args.password)?;
    let store = PgUserStore::new(pool);

    let user = match store
        .create(NewUser {
            name: args.name,
            email: normalize_email(&args.email),
            password_hash,
            role: Role::Admin,
        })
        .await
    {
        Ok(user) => user,
        Err(StoreError::DuplicateEmail) => bail!("a user with email {} already exists", args.email),
        Err(e) => return Err(e).context("create admin user"),
    };

    info!(user_id = %user.id, email = %user.email, "admin user created");
    Ok(())
}
