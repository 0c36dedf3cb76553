use crate::{
    auth::{auth::AuthUser, handlers::create_account, password::hash_password},
    error::AppError,
    model::{
        role::Role,
        user::{Account, AccountChanges, normalize_username},
    },
    store::{Store, StoreError},
    utils::username_index::UsernameIndex,
};
use actix_web::{HttpResponse, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use utoipa::ToSchema;

/// An account as returned by the API; the password hash never leaves
/// the server.
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    #[schema(example = 1)]
    pub id: u64,
    #[schema(example = "juan")]
    pub username: String,
    pub role: Role,
    #[schema(example = "2025-01-06T08:00:00Z", format = "date-time", value_type = String)]
    pub created_at: DateTime<Utc>,
    #[schema(example = "2025-01-06T08:00:00Z", format = "date-time", value_type = String)]
    pub updated_at: DateTime<Utc>,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            username: account.username.clone(),
            role: account.role,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct AddUser {
    #[schema(example = "maria")]
    pub username: String,
    #[schema(example = "s3cret")]
    pub password: String,
    /// Defaults to `employee`
    pub role: Option<Role>,
}

#[derive(Deserialize, ToSchema)]
pub struct EditUser {
    #[schema(example = "maria")]
    pub username: Option<String>,
    pub role: Option<Role>,
    /// Rehashed when present and non-empty
    pub password: Option<String>,
}

/// List all accounts
#[utoipa::path(
    get,
    path = "/api/users",
    responses(
        (status = 200, description = "All accounts", body = [AccountResponse]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin only"),
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Users"
)]
pub async fn list_users(
    auth: AuthUser,
    store: web::Data<dyn Store>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;

    let accounts = store.list_accounts().await?;
    let body: Vec<AccountResponse> = accounts.iter().map(AccountResponse::from).collect();

    Ok(HttpResponse::Ok().json(body))
}

/// Add an account
#[utoipa::path(
    post,
    path = "/api/users/add",
    request_body = AddUser,
    responses(
        (status = 201, description = "Account created", body = Object, example = json!({
            "message": "Employee added successfully",
            "employee": {"id": 3, "username": "maria", "role": "employee"}
        })),
        (status = 400, description = "Empty field or duplicate username"),
        (status = 403, description = "Admin only"),
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Users"
)]
pub async fn add_user(
    auth: AuthUser,
    store: web::Data<dyn Store>,
    index: web::Data<UsernameIndex>,
    body: web::Json<AddUser>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;

    let account = create_account(
        store.get_ref(),
        index.get_ref(),
        &body.username,
        &body.password,
        body.role.unwrap_or_default(),
    )
    .await?;

    Ok(HttpResponse::Created().json(json!({
        "message": "Employee added successfully",
        "employee": AccountResponse::from(&account),
    })))
}

/// Edit an account
#[utoipa::path(
    put,
    path = "/api/users/edit/{id}",
    params(("id" = u64, Path, description = "Account id")),
    request_body = EditUser,
    responses(
        (status = 200, description = "Account updated", body = Object, example = json!({
            "message": "Employee updated successfully",
            "employee": {"id": 3, "username": "maria", "role": "admin"}
        })),
        (status = 400, description = "Empty username or duplicate username"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Employee not found"),
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Users"
)]
pub async fn edit_user(
    auth: AuthUser,
    store: web::Data<dyn Store>,
    index: web::Data<UsernameIndex>,
    path: web::Path<u64>,
    body: web::Json<EditUser>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let id = path.into_inner();
    let body = body.into_inner();

    let current = store
        .find_account(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Employee not found".into()))?;

    let mut changes = AccountChanges {
        role: body.role,
        ..Default::default()
    };

    if let Some(username) = body.username {
        let username = username.trim();
        if username.is_empty() {
            return Err(AppError::BadRequest("Username must not be empty".into()));
        }

        let renamed = normalize_username(username) != normalize_username(&current.username);
        if renamed && !index.is_available(username, store.get_ref()).await? {
            return Err(StoreError::DuplicateUsername.into());
        }
        changes.username = Some(username.to_string());
    }

    if let Some(password) = body.password.filter(|p| !p.is_empty()) {
        changes.password = Some(hash_password(&password)?);
    }

    let updated = store
        .update_account(id, changes)
        .await?
        .ok_or_else(|| AppError::NotFound("Employee not found".into()))?;

    if normalize_username(&updated.username) != normalize_username(&current.username) {
        index.forget(&current.username).await;
        index.mark_taken(&updated.username).await;
    }

    info!(admin = auth.user_id, user_id = id, "Account updated");

    Ok(HttpResponse::Ok().json(json!({
        "message": "Employee updated successfully",
        "employee": AccountResponse::from(&updated),
    })))
}

/// Delete an account; its attendance history is kept
#[utoipa::path(
    delete,
    path = "/api/users/delete/{id}",
    params(("id" = u64, Path, description = "Account id")),
    responses(
        (status = 200, description = "Account deleted", body = Object, example = json!({
            "message": "User deleted successfully"
        })),
        (status = 403, description = "Admin only"),
        (status = 404, description = "User not found"),
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Users"
)]
pub async fn delete_user(
    auth: AuthUser,
    store: web::Data<dyn Store>,
    index: web::Data<UsernameIndex>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let id = path.into_inner();

    let deleted = store
        .delete_account(id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    index.forget(&deleted.username).await;
    info!(admin = auth.user_id, user_id = id, "Account deleted");

    Ok(HttpResponse::Ok().json(json!({ "message": "User deleted successfully" })))
}
