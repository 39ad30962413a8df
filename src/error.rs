//! Request-level error type and its HTTP mapping.
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::auth::session::SessionError;
use crate::mail::MailerError;
use crate::users::StoreError;

pub const LOGIN_PATH: &str = "/login";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Passwords do not match")]
    PasswordMismatch,

    #[error("{0}")]
    Validation(String),

    #[error("Email already in use")]
    EmailInUse,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Too many login attempts, please try again later.")]
    TooManyAttempts { retry_after_secs: u64 },

    #[error("No account found with that email")]
    UnknownAccount,

    #[error("Token is invalid or expired")]
    InvalidOrExpiredToken,

    #[error("Authentication required")]
    Unauthorized,

    #[error("Access denied")]
    Forbidden,

    #[error("User not found")]
    NotFound,

    #[error("Logout failed")]
    LogoutFailed(#[source] SessionError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("mailer error: {0}")]
    Mailer(#[from] MailerError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        AppError::Internal(e.to_string())
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::PasswordMismatch
            | AppError::Validation(_)
            | AppError::EmailInUse
            | AppError::InvalidCredentials
            | AppError::UnknownAccount
            | AppError::InvalidOrExpiredToken => StatusCode::BAD_REQUEST,
            AppError::TooManyAttempts { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::LogoutFailed(_)
            | AppError::Store(_)
            | AppError::Mailer(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the client. Backend failures collapse to a generic
    /// text; their detail only goes to the server log.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Store(_) | AppError::Internal(_) => "Internal server error".to_string(),
            AppError::Mailer(_) => "Error sending email".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }

        let body = Json(json!({ "message": self.public_message() }));
        let mut response = (status, body).into_response();

        match &self {
            AppError::Unauthorized => {
                response
                    .headers_mut()
                    .insert(header::LOCATION, HeaderValue::from_static(LOGIN_PATH));
            }
            AppError::TooManyAttempts { retry_after_secs } => {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
            }
            _ => {}
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(AppError::PasswordMismatch.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::EmailInUse.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::InvalidCredentials.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::TooManyAttempts { retry_after_secs: 1 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(AppError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::Store(StoreError::Backend("x".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::LogoutFailed(SessionError::Backend("x".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn backend_details_are_not_exposed() {
        let err = AppError::Store(StoreError::Backend("connection refused to 10.0.0.5".into()));
        assert_eq!(err.public_message(), "Internal server error");
        let err = AppError::Mailer(MailerError::Transport("535 auth failed".into()));
        assert_eq!(err.public_message(), "Error sending email");
    }

    #[test]
    fn unauthorized_redirects_to_login() {
        let response = AppError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), LOGIN_PATH);
    }

    #[test]
    fn too_many_attempts_sets_retry_after() {
        let response = AppError::TooManyAttempts { retry_after_secs: 120 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "120");
    }

    #[test]
    fn responses_are_json() {
        let response = AppError::Forbidden.into_response();
        assert!(response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .contains("application/json"));
    }
}
