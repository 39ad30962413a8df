use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::users::{Role, User};

/// Authenticated identity attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
        }
    }
}

pub fn require_authenticated(principal: Option<Principal>) -> Result<Principal, AppError> {
    principal.ok_or(AppError::Unauthorized)
}

/// Role is read from the session-resolved principal only.
pub fn require_admin(principal: Option<Principal>) -> Result<Principal, AppError> {
    let principal = require_authenticated(principal)?;
    if !principal.is_admin() {
        return Err(AppError::Forbidden);
    }
    Ok(principal)
}
