use std::net::SocketAddr;

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequest, FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap},
    Form, Json,
};
use axum_extra::extract::CookieJar;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{
    guards::{require_admin, require_authenticated, Principal},
    session::SESSION_COOKIE,
};
use crate::{error::AppError, state::AppState};

/// Session id from the request cookies. RFC 6265 quoted values are unwrapped.
pub fn session_id_from_headers(headers: &HeaderMap) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value_trimmed().to_string())
        .filter(|value| !value.is_empty())
}

async fn resolve(parts: &Parts, state: &AppState) -> Result<Option<Principal>, AppError> {
    match session_id_from_headers(&parts.headers) {
        Some(session_id) => state.auth.resolve_principal(&session_id).await,
        None => Ok(None),
    }
}

/// Any logged-in user. Rejects with 401 and a `Location: /login` hint.
pub struct CurrentUser(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let principal = require_authenticated(resolve(parts, state).await?)?;
        Ok(CurrentUser(principal))
    }
}

/// Logged-in user with the admin role. 401 without a session, 403 otherwise.
pub struct AdminUser(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let admin = require_admin(resolve(parts, state).await?).map_err(|e| {
            if matches!(e, AppError::Forbidden) {
                debug!(path = %parts.uri.path(), "non-admin denied");
            }
            e
        })?;
        Ok(AdminUser(admin))
    }
}

/// Identity the login limiter counts against.
pub struct ClientKey(pub String);

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    let first_hop = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    first_hop
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
        .map(str::to_string)
}

#[async_trait]
impl FromRequestParts<AppState> for ClientKey {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if state.config.trust_proxy_headers {
            if let Some(ip) = forwarded_for(&parts.headers) {
                return Ok(ClientKey(ip));
            }
        }
        let key = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Ok(ClientKey(key))
    }
}

/// Body accepted either as JSON or as an urlencoded form.
pub struct Payload<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for Payload<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

        if is_form {
            let Form(value) = Form::<T>::from_request(req, state)
                .await
                .map_err(|e| AppError::Validation(e.body_text()))?;
            Ok(Payload(value))
        } else {
            let Json(value) = Json::<T>::from_request(req, state)
                .await
                .map_err(|e| AppError::Validation(e.body_text()))?;
            Ok(Payload(value))
        }
    }
}
