use crate::{
    api::users::AccountResponse,
    auth::{
        auth::AuthUser,
        jwt::generate_access_token,
        password::{hash_password, verify_password},
    },
    config::Config,
    error::AppError,
    model::{
        role::Role,
        user::{Account, NewAccount},
    },
    models::{LoginReqDto, LoginResponse, RegisterReq, SessionUser},
    store::{Store, StoreError},
    utils::username_index::UsernameIndex,
};
use actix_web::{HttpResponse, web};
use once_cell::sync::Lazy;
use serde_json::json;
use tracing::{debug, error, info, instrument};

/// Verified against when the username is unknown so both failure paths
/// cost one Argon2 run.
static TIMING_GUARD_HASH: Lazy<String> =
    Lazy::new(|| hash_password("dtr-timing-guard").unwrap_or_default());

/// Validate, hash and insert a new account, keeping the username index in
/// sync. Shared by registration, admin creation and the startup seed.
pub async fn create_account(
    store: &dyn Store,
    index: &UsernameIndex,
    username: &str,
    password: &str,
    role: Role,
) -> Result<Account, AppError> {
    let username = username.trim();

    if username.is_empty() || password.is_empty() {
        return Err(AppError::BadRequest(
            "Username and password must not be empty".into(),
        ));
    }

    if !index.is_available(username, store).await? {
        return Err(StoreError::DuplicateUsername.into());
    }

    let account = store
        .insert_account(NewAccount {
            username: username.to_string(),
            password: hash_password(password)?,
            role,
        })
        .await?;

    index.mark_taken(&account.username).await;
    info!(user_id = account.id, role = %account.role, "Account created");

    Ok(account)
}

/// Register as an employee
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterReq,
    responses(
        (status = 201, description = "User registered", body = Object, example = json!({
            "message": "User registered successfully",
            "user": {"id": 2, "username": "juan", "role": "employee"}
        })),
        (status = 400, description = "Empty field or duplicate username", body = Object, example = json!({
            "message": "Username already exists"
        })),
    ),
    tag = "Auth"
)]
#[instrument(name = "auth_register", skip(store, index, body), fields(username = %body.username))]
pub async fn register(
    body: web::Json<RegisterReq>,
    store: web::Data<dyn Store>,
    index: web::Data<UsernameIndex>,
) -> Result<HttpResponse, AppError> {
    let account = create_account(
        store.get_ref(),
        index.get_ref(),
        &body.username,
        &body.password,
        Role::Employee,
    )
    .await?;

    Ok(HttpResponse::Created().json(json!({
        "message": "User registered successfully",
        "user": AccountResponse::from(&account),
    })))
}

/// Log in and receive a bearer token
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginReqDto,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 400, description = "Missing username or password"),
        (status = 401, description = "Invalid credentials"),
    ),
    tag = "Auth"
)]
#[instrument(name = "auth_login", skip(store, config, body), fields(username = %body.username))]
pub async fn login(
    body: web::Json<LoginReqDto>,
    store: web::Data<dyn Store>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    info!("Login request received");

    // 1️⃣ Basic validation
    if body.username.trim().is_empty() || body.password.is_empty() {
        info!("Validation failed: empty username or password");
        return Err(AppError::BadRequest("Username or password required".into()));
    }

    // 2️⃣ Fetch user
    debug!("Fetching user from store");
    let account = match store.find_account_by_username(&body.username).await {
        Ok(Some(account)) => account,
        Ok(None) => {
            let _ = verify_password(&body.password, &TIMING_GUARD_HASH);
            info!("Invalid credentials: user not found");
            return Err(AppError::Unauthorized("Invalid credentials".into()));
        }
        Err(e) => {
            error!(error = %e, "Store error while fetching user");
            return Err(e.into());
        }
    };

    // 3️⃣ Verify password
    if let Err(e) = verify_password(&body.password, &account.password) {
        info!(error = %e, "Invalid credentials: password mismatch");
        return Err(AppError::Unauthorized("Invalid credentials".into()));
    }

    // 4️⃣ Issue token
    let token = generate_access_token(&account, &config.jwt_secret, config.access_token_ttl)?;

    info!(user_id = account.id, "Login successful");

    Ok(HttpResponse::Ok().json(LoginResponse {
        token,
        user: SessionUser {
            id: account.id,
            username: account.username,
            role: account.role,
        },
    }))
}

/// Identity and role behind the presented token
#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Current session", body = SessionUser),
        (status = 401, description = "Missing or invalid token"),
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Auth"
)]
pub async fn me(auth: AuthUser) -> HttpResponse {
    HttpResponse::Ok().json(SessionUser {
        id: auth.user_id,
        username: auth.username,
        role: auth.role,
    })
}
