use axum::{
    extract::{Path, State},
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::dto::{EditUserRequest, NotifyUsersRequest, PublicUser};
use crate::{
    auth::{
        dto::MessageResponse,
        extractors::{AdminUser, Payload},
    },
    error::AppError,
    state::AppState,
};

pub const USERS_PATH: &str = "/admin/users";

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin", get(admin_home))
        .route("/admin/users", get(list_users))
        .route("/admin/users/edit/:id", post(edit_user))
        .route("/admin/users/delete/:id", post(delete_user))
        .route("/admin/notify-users", post(notify_users))
}

/// Ids that do not parse cannot name a user.
fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    raw.parse().map_err(|_| AppError::NotFound)
}

async fn admin_home(_admin: AdminUser) -> Json<MessageResponse> {
    Json(MessageResponse::new("Welcome to the Admin Dashboard"))
}

#[instrument(skip_all, fields(admin_id = %admin.0.id))]
pub async fn list_users(
    State(state): State<AppState>,
    admin: AdminUser,
) -> Result<Json<Vec<PublicUser>>, AppError> {
    Ok(Json(state.admin.list_users().await?))
}

#[instrument(skip(state, admin, payload), fields(admin_id = %admin.0.id))]
pub async fn edit_user(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<String>,
    Payload(payload): Payload<EditUserRequest>,
) -> Result<Redirect, AppError> {
    state.admin.edit_user(parse_id(&id)?, payload).await?;
    Ok(Redirect::to(USERS_PATH))
}

#[instrument(skip(state, admin), fields(admin_id = %admin.0.id))]
pub async fn delete_user(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<String>,
) -> Result<Redirect, AppError> {
    state.admin.delete_user(parse_id(&id)?).await?;
    Ok(Redirect::to(USERS_PATH))
}

#[instrument(skip(state, admin, payload), fields(admin_id = %admin.0.id))]
pub async fn notify_users(
    State(state): State<AppState>,
    admin: AdminUser,
    Payload(payload): Payload<NotifyUsersRequest>,
) -> Result<Redirect, AppError> {
    state.admin.notify_users(payload).await?;
    Ok(Redirect::to(USERS_PATH))
}
