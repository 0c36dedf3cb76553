use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload};
use futures::future::{Ready, ready};

use crate::{
    error::AppError,
    model::{role::Role, user::Account},
};

/// The account behind a verified bearer token, as currently stored.
/// Inserted into request extensions by `auth_middleware`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: u64,
    pub username: String,
    pub role: Role,
}

impl From<Account> for AuthUser {
    fn from(account: Account) -> Self {
        Self {
            user_id: account.id,
            username: account.username,
            role: account.role,
        }
    }
}

impl FromRequest for AuthUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<AuthUser>()
                .cloned()
                .ok_or_else(|| AppError::Unauthorized("Missing token".into()).into()),
        )
    }
}

impl AuthUser {
    pub fn require_role(&self, role: Role) -> Result<(), AppError> {
        if self.role == role {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!("{role} only")))
        }
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        self.require_role(Role::Admin)
    }

    /// Admins see everyone; employees only themselves.
    pub fn can_access(&self, user_id: u64) -> bool {
        self.role == Role::Admin || self.user_id == user_id
    }
}
