//! Session-authenticated dashboard service: accounts, password reset and an
//! admin panel over a pluggable user store.
pub mod admin;
pub mod app;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod mail;
pub mod pages;
pub mod state;
pub mod users;

/// Installs the global tracing subscriber. `RUST_LOG` filters, `LOG_FORMAT=json`
/// switches to JSON lines.
pub fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "devdash=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}
