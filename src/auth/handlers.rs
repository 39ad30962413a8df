use axum::{
    extract::{Path, State},
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::{
    cookie::{Cookie, SameSite},
    CookieJar,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            ForgotPasswordRequest, LoginRequest, MessageResponse, RedirectResponse,
            RegisterRequest, ResetPasswordRequest,
        },
        extractors::{ClientKey, CurrentUser, Payload},
        session::SESSION_COOKIE,
    },
    error::{AppError, LOGIN_PATH},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", get(logout))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password/:token", post(reset_password))
}

/// Browser-session cookie: no Max-Age/Expires, idle expiry is enforced server-side.
fn session_cookie(value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, value))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .secure(secure)
        .build()
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Payload(payload): Payload<RegisterRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state.auth.register(payload).await?;
    Ok(Json(MessageResponse::new("Registration successful")))
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    ClientKey(client): ClientKey,
    jar: CookieJar,
    Payload(payload): Payload<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state.auth.login(&client, payload).await?;

    let jar = jar.add(session_cookie(
        outcome.session_id,
        state.config.session.cookie_secure,
    ));
    Ok((
        jar,
        Json(RedirectResponse {
            message: "Login successful".into(),
            redirect_url: outcome.redirect_url.into(),
        }),
    ))
}

#[instrument(skip_all, fields(user_id = %user.0.id))]
pub async fn logout(
    State(state): State<AppState>,
    user: CurrentUser,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.auth.logout(cookie.value_trimmed()).await?;
    }

    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    Ok((
        jar,
        Json(RedirectResponse {
            message: "Logout successful".into(),
            redirect_url: LOGIN_PATH.into(),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Payload(payload): Payload<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state.auth.forgot_password(payload).await?;
    Ok(Json(MessageResponse::new("Password reset link sent")))
}

#[instrument(skip_all)]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Payload(payload): Payload<ResetPasswordRequest>,
) -> Result<Redirect, AppError> {
    state.auth.reset_password(&token, payload).await?;
    Ok(Redirect::to(LOGIN_PATH))
}
