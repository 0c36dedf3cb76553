use actix_web::middleware::Next;
use actix_web::{
    Error, HttpMessage, ResponseError,
    body::BoxBody,
    dev::{ServiceRequest, ServiceResponse},
    web::Data,
};
use tracing::debug;

use crate::auth::auth::AuthUser;
use crate::auth::jwt::verify_token;
use crate::config::Config;
use crate::error::AppError;
use crate::store::Store;

/// Verify `Authorization: Bearer <jwt>` and attach the caller as
/// [`AuthUser`]. Requests without a valid token never reach the handler.
pub async fn auth_middleware(
    req: ServiceRequest,
    next: Next<BoxBody>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let outcome = authenticate(&req).await;

    match outcome {
        Ok(user) => {
            req.extensions_mut().insert(user);
            next.call(req).await
        }
        Err(e) => Ok(req.into_response(e.error_response())),
    }
}

/// The token only identifies the account; role and username are read
/// from the store on every request.
async fn authenticate(req: &ServiceRequest) -> Result<AuthUser, AppError> {
    let config = req
        .app_data::<Data<Config>>()
        .ok_or_else(|| AppError::Internal("App config missing".into()))?;
    let store = req
        .app_data::<Data<dyn Store>>()
        .ok_or_else(|| AppError::Internal("Store missing".into()))?;

    let header_value = req
        .headers()
        .get("Authorization")
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".into()))?
        .to_str()
        .map_err(|_| AppError::Unauthorized("Invalid Authorization header encoding".into()))?;

    let token = header_value.strip_prefix("Bearer ").ok_or_else(|| {
        AppError::Unauthorized("Authorization header must start with Bearer".into())
    })?;

    let claims = verify_token(token, &config.jwt_secret).map_err(|e| {
        debug!(error = %e, "Rejected bearer token");
        AppError::Unauthorized("Invalid or expired token".into())
    })?;

    let account = store.find_account(claims.user_id).await?.ok_or_else(|| {
        debug!(user_id = claims.user_id, "Token for a deleted account");
        AppError::Unauthorized("Account no longer exists".into())
    })?;

    Ok(AuthUser::from(account))
}
