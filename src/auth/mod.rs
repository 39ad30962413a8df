use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod extractors;
pub mod guards;
pub mod handlers;
pub mod password;
pub mod rate_limit;
pub mod services;
pub mod session;
pub mod token;

pub use guards::Principal;
pub use services::AuthService;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::auth_routes())
}
