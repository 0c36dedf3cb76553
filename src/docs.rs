use crate::api::attendance::{DtrEntryResponse, DtrResponse, PunchReq};
use crate::api::users::{AccountResponse, AddUser, EditUser};
use crate::model::{attendance::PunchKind, role::Role};
use crate::models::{LoginReqDto, LoginResponse, RegisterReq, SessionUser};
use utoipa::Modify;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "DTR Tracker API",
        version = "1.0.0",
        description = r#"
## Daily Time Record (DTR) Tracker

Employees clock in and out across a morning and an afternoon shift;
administrators manage accounts and review or export attendance.

### 🔹 Key Features
- **Punches**
  - `morningIn`, `morningOut`, `afternoonIn`, `afternoonOut`, one record per employee per day
  - Repeated or out-of-order punches are rejected
- **Records**
  - Per-day lookup, full listing with usernames, CSV export
- **Accounts**
  - Register, log in, and admin create/edit/delete

### 🔐 Security
Endpoints other than register and login need a **JWT Bearer** token.
Account management and the full listing are **admin** only.

---
Built with **Rust**, **Actix Web**, **SQLx**, and **Utoipa**.
"#,
    ),
    paths(
        crate::auth::handlers::register,
        crate::auth::handlers::login,
        crate::auth::handlers::me,

        crate::api::attendance::record_time,
        crate::api::attendance::list_all,
        crate::api::attendance::export,
        crate::api::attendance::get_for_user,

        crate::api::users::list_users,
        crate::api::users::add_user,
        crate::api::users::edit_user,
        crate::api::users::delete_user
    ),
    components(
        schemas(
            Role,
            PunchKind,
            RegisterReq,
            LoginReqDto,
            LoginResponse,
            SessionUser,
            PunchReq,
            DtrResponse,
            DtrEntryResponse,
            AccountResponse,
            AddUser,
            EditUser
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Registration, login and session APIs"),
        (name = "Attendance", description = "Time record APIs"),
        (name = "Users", description = "Account management APIs"),
    )
)]
pub struct ApiDoc;

/// Prefix the handlers are documented under.
const DOCUMENTED_PREFIX: &str = "/api";

/// The document with every path moved under `api_prefix`.
pub fn openapi_for(api_prefix: &str) -> openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    let prefix = api_prefix.trim_end_matches('/');

    if prefix != DOCUMENTED_PREFIX {
        doc.paths.paths = std::mem::take(&mut doc.paths.paths)
            .into_iter()
            .map(|(path, item)| {
                let rest = path.strip_prefix(DOCUMENTED_PREFIX).unwrap_or(path.as_str());
                (format!("{prefix}{rest}"), item)
            })
            .collect();
    }

    doc
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
