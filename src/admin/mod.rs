use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod handlers;
pub mod services;

pub use services::AdminService;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::admin_routes())
}
