use crate::{
    api::{attendance, users},
    auth::{handlers, middleware::auth_middleware},
    config::Config,
    error::AppError,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_cors::Cors;
use actix_web::{http::header, middleware::from_fn, web};
use std::sync::Arc;

// Helper to build a per-route limiter
fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
    let burst = requests_per_min.max(1);
    let per_ms = 60_000 / burst as u64;
    let cfg = GovernorConfigBuilder::default()
        .per_millisecond(per_ms.max(1))
        .burst_size(burst)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .unwrap_or_default();
    Governor::new(&cfg)
}

/// CORS for browser clients served from another origin. No configured
/// origins means any origin is echoed back.
pub fn build_cors(allowed_origins: &[String]) -> Cors {
    let cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allowed_headers(vec![header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers(vec![header::CONTENT_DISPOSITION])
        .max_age(3600);

    if allowed_origins.is_empty() {
        return cors.allow_any_origin();
    }

    allowed_origins
        .iter()
        .fold(cors, |cors, origin| cors.allowed_origin(origin))
}

pub fn configure(cfg: &mut web::ServiceConfig, config: Config) {
    let login_limiter = Arc::new(build_limiter(config.rate_login_per_min));
    let register_limiter = Arc::new(build_limiter(config.rate_register_per_min));
    let protected_limiter = Arc::new(build_limiter(config.rate_protected_per_min));

    // Extractor failures answer with the same JSON body as handler errors.
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _| AppError::BadRequest(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _| AppError::BadRequest(err.to_string()).into()),
    )
    .app_data(
        web::PathConfig::default()
            .error_handler(|_, _| AppError::NotFound("Not found".into()).into()),
    );

    cfg.service(
        web::scope(&config.api_prefix)
            // Public, except /auth/me
            .service(
                web::scope("/auth")
                    .service(
                        web::resource("/login")
                            .wrap(login_limiter.clone())
                            .route(web::post().to(handlers::login)),
                    )
                    .service(
                        web::resource("/register")
                            .wrap(register_limiter)
                            .route(web::post().to(handlers::register)),
                    )
                    .service(
                        web::resource("/me")
                            .wrap(from_fn(auth_middleware))
                            .wrap(protected_limiter.clone())
                            .route(web::get().to(handlers::me)),
                    ),
            )
            // Protected routes
            .service(
                web::scope("/dtr")
                    .wrap(from_fn(auth_middleware))
                    .wrap(protected_limiter.clone())
                    .service(web::resource("/time").route(web::post().to(attendance::record_time)))
                    .service(web::resource("/all").route(web::get().to(attendance::list_all)))
                    .service(web::resource("/export").route(web::get().to(attendance::export)))
                    // /dtr/{user_id}?date=YYYY-MM-DD
                    .service(
                        web::resource("/{user_id}").route(web::get().to(attendance::get_for_user)),
                    ),
            )
            .service(
                web::scope("/users")
                    .wrap(from_fn(auth_middleware))
                    .wrap(protected_limiter)
                    .service(web::resource("").route(web::get().to(users::list_users)))
                    .service(web::resource("/add").route(web::post().to(users::add_user)))
                    .service(web::resource("/edit/{id}").route(web::put().to(users::edit_user)))
                    .service(
                        web::resource("/delete/{id}").route(web::delete().to(users::delete_user)),
                    ),
            ),
    );
}

// LOGIN
//  └─ token (ACCESS_TOKEN_TTL, default one working day)

// API REQUEST
//  └─ Authorization: Bearer token

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{handlers::create_account, jwt::generate_access_token},
        model::{
            role::Role,
            user::{Account, AccountChanges},
        },
        store::{MemoryStore, Store},
        utils::username_index::UsernameIndex,
    };
    use actix_web::{
        App,
        http::{Method, StatusCode},
        test,
    };
    use serde_json::{Value, json};

    const SECRET: &str = "test-secret";

    fn test_config() -> Config {
        Config {
            database_url: "memory".into(),
            jwt_secret: SECRET.into(),
            server_addr: "127.0.0.1:0".into(),
            access_token_ttl: 3600,
            rate_login_per_min: 1000,
            rate_register_per_min: 1000,
            rate_protected_per_min: 1000,
            api_prefix: "/api".into(),
            log_dir: "logs".into(),
            cors_allowed_origins: Vec::new(),
            default_admin_username: None,
            default_admin_password: None,
        }
    }

    struct Harness {
        store: web::Data<dyn Store>,
        index: web::Data<UsernameIndex>,
        config: Config,
    }

    impl Harness {
        fn new() -> Self {
            let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
            Self {
                store: web::Data::from(store),
                index: web::Data::new(UsernameIndex::default()),
                config: test_config(),
            }
        }

        async fn account(&self, username: &str, password: &str, role: Role) -> Account {
            create_account(self.store.get_ref(), self.index.get_ref(), username, password, role)
                .await
                .unwrap()
        }

        fn token(&self, account: &Account) -> String {
            generate_access_token(account, SECRET, 3600).unwrap()
        }
    }

    macro_rules! test_app {
        ($h:expr) => {
            test::init_service(
                App::new()
                    .app_data($h.store.clone())
                    .app_data($h.index.clone())
                    .app_data(web::Data::new($h.config.clone()))
                    .configure(|cfg| configure(cfg, $h.config.clone())),
            )
            .await
        };
    }

    fn request(method: &str, uri: &str, token: Option<&str>) -> test::TestRequest {
        let req = match method {
            "POST" => test::TestRequest::post(),
            "PUT" => test::TestRequest::put(),
            "DELETE" => test::TestRequest::delete(),
            _ => test::TestRequest::get(),
        }
        .uri(uri)
        .peer_addr("127.0.0.1:40000".parse().unwrap());

        match token {
            Some(t) => req.insert_header(("Authorization", format!("Bearer {t}"))),
            None => req,
        }
    }

    #[actix_web::test]
    async fn register_twice_fails_with_duplicate_username() {
        let h = Harness::new();
        let app = test_app!(h);

        let body = json!({"username": "juan", "password": "pw"});
        let first = test::call_service(
            &app,
            request("POST", "/api/auth/register", None)
                .set_json(&body)
                .to_request(),
        )
        .await;
        assert_eq!(first.status(), StatusCode::CREATED);
        let created: Value = test::read_body_json(first).await;
        assert_eq!(created["user"]["role"], "employee");
        assert!(created["user"].get("password").is_none());

        let second = test::call_service(
            &app,
            request("POST", "/api/auth/register", None)
                .set_json(json!({"username": "JUAN", "password": "other"}))
                .to_request(),
        )
        .await;
        assert_eq!(second.status(), StatusCode::BAD_REQUEST);
        let err: Value = test::read_body_json(second).await;
        assert_eq!(err["message"], "Username already exists");
    }

    #[actix_web::test]
    async fn register_rejects_empty_fields() {
        let h = Harness::new();
        let app = test_app!(h);

        let resp = test::call_service(
            &app,
            request("POST", "/api/auth/register", None)
                .set_json(json!({"username": "   ", "password": "pw"}))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn login_checks_password_and_returns_stored_role() {
        let h = Harness::new();
        let admin = h.account("Rhu admin", "Rhu321", Role::Admin).await;
        let app = test_app!(h);

        let wrong = test::call_service(
            &app,
            request("POST", "/api/auth/login", None)
                .set_json(json!({"username": "Rhu admin", "password": "nope"}))
                .to_request(),
        )
        .await;
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let unknown = test::call_service(
            &app,
            request("POST", "/api/auth/login", None)
                .set_json(json!({"username": "ghost", "password": "Rhu321"}))
                .to_request(),
        )
        .await;
        assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);

        let ok = test::call_service(
            &app,
            request("POST", "/api/auth/login", None)
                .set_json(json!({"username": "Rhu admin", "password": "Rhu321"}))
                .to_request(),
        )
        .await;
        assert_eq!(ok.status(), StatusCode::OK);
        let body: Value = test::read_body_json(ok).await;
        assert_eq!(body["user"]["role"], "admin");
        assert_eq!(body["user"]["id"], admin.id);

        let token = body["token"].as_str().unwrap();
        let me = test::call_service(&app, request("GET", "/api/auth/me", Some(token)).to_request()).await;
        assert_eq!(me.status(), StatusCode::OK);
        let me: Value = test::read_body_json(me).await;
        assert_eq!(me["username"], "Rhu admin");
    }

    #[actix_web::test]
    async fn protected_routes_require_a_valid_token() {
        let h = Harness::new();
        let app = test_app!(h);

        let missing = test::call_service(&app, request("GET", "/api/users", None).to_request()).await;
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
        let err: Value = test::read_body_json(missing).await;
        assert_eq!(err["message"], "Missing Authorization header");

        let bogus = test::call_service(
            &app,
            request("GET", "/api/dtr/all", Some("not.a.jwt")).to_request(),
        )
        .await;
        assert_eq!(bogus.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn morning_in_then_out_yields_one_record() {
        let h = Harness::new();
        let employee = h.account("juan", "pw", Role::Employee).await;
        let token = h.token(&employee);
        let app = test_app!(h);

        for kind in ["morningIn", "morningOut"] {
            let resp = test::call_service(
                &app,
                request("POST", "/api/dtr/time", Some(&token))
                    .set_json(json!({"userId": employee.id, "type": kind}))
                    .to_request(),
            )
            .await;
            assert_eq!(resp.status(), StatusCode::OK, "punch {kind}");
        }

        let resp = test::call_service(
            &app,
            request("GET", &format!("/api/dtr/{}", employee.id), Some(&token)).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let dtr: Value = test::read_body_json(resp).await;
        assert!(dtr["morningIn"].is_string());
        assert!(dtr["morningOut"].is_string());
        assert!(dtr["afternoonIn"].is_null());
        assert!(dtr["afternoonOut"].is_null());
        assert_eq!(dtr["type"], "morningIn");

        let all = h
            .store
            .list_dtrs(&Default::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[actix_web::test]
    async fn repeated_and_out_of_order_punches_are_rejected() {
        let h = Harness::new();
        let employee = h.account("juan", "pw", Role::Employee).await;
        let token = h.token(&employee);
        let app = test_app!(h);

        let punch = |kind: &str| {
            request("POST", "/api/dtr/time", Some(&token))
                .set_json(json!({"type": kind}))
                .to_request()
        };

        let early_out = test::call_service(&app, punch("afternoonOut")).await;
        assert_eq!(early_out.status(), StatusCode::BAD_REQUEST);

        let first = test::call_service(&app, punch("morningIn")).await;
        assert_eq!(first.status(), StatusCode::OK);

        let again = test::call_service(&app, punch("morningIn")).await;
        assert_eq!(again.status(), StatusCode::BAD_REQUEST);
        let err: Value = test::read_body_json(again).await;
        assert_eq!(err["message"], "morningIn already recorded for today");

        let unknown_kind = test::call_service(&app, punch("lunch")).await;
        assert_eq!(unknown_kind.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn employees_cannot_punch_or_read_for_others() {
        let h = Harness::new();
        let ana = h.account("ana", "pw", Role::Employee).await;
        let ben = h.account("ben", "pw", Role::Employee).await;
        let admin = h.account("boss", "pw", Role::Admin).await;
        let ana_token = h.token(&ana);
        let admin_token = h.token(&admin);
        let app = test_app!(h);

        let resp = test::call_service(
            &app,
            request("POST", "/api/dtr/time", Some(&ana_token))
                .set_json(json!({"userId": ben.id, "type": "morningIn"}))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = test::call_service(
            &app,
            request("GET", &format!("/api/dtr/{}", ben.id), Some(&ana_token)).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        // Admins may punch on someone's behalf.
        let resp = test::call_service(
            &app,
            request("POST", "/api/dtr/time", Some(&admin_token))
                .set_json(json!({"userId": ben.id, "type": "morningIn"}))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = test::call_service(
            &app,
            request("POST", "/api/dtr/time", Some(&admin_token))
                .set_json(json!({"userId": 999, "type": "morningIn"}))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn record_for_day_without_punches_is_not_found() {
        let h = Harness::new();
        let ana = h.account("ana", "pw", Role::Employee).await;
        let token = h.token(&ana);
        let app = test_app!(h);

        let resp = test::call_service(
            &app,
            request("GET", &format!("/api/dtr/{}?date=2020-01-01", ana.id), Some(&token))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = test::call_service(
            &app,
            request("GET", &format!("/api/dtr/{}?date=yesterday", ana.id), Some(&token))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn admin_lists_records_with_usernames_and_exports_csv() {
        let h = Harness::new();
        let ana = h.account("ana", "pw", Role::Employee).await;
        let admin = h.account("boss", "pw", Role::Admin).await;
        let ana_token = h.token(&ana);
        let admin_token = h.token(&admin);
        let app = test_app!(h);

        let resp = test::call_service(
            &app,
            request("POST", "/api/dtr/time", Some(&ana_token))
                .set_json(json!({"type": "morningIn"}))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let forbidden = test::call_service(
            &app,
            request("GET", "/api/dtr/all", Some(&ana_token)).to_request(),
        )
        .await;
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

        let resp = test::call_service(
            &app,
            request("GET", "/api/dtr/all", Some(&admin_token)).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let all: Value = test::read_body_json(resp).await;
        assert_eq!(all.as_array().unwrap().len(), 1);
        assert_eq!(all[0]["username"], "ana");
        assert_eq!(all[0]["userId"], ana.id);

        let resp = test::call_service(
            &app,
            request("GET", "/api/dtr/export", Some(&admin_token)).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let disposition = resp
            .headers()
            .get("content-disposition")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.contains("DTR_Report_"));
        let body = test::read_body(resp).await;
        let csv = String::from_utf8(body.to_vec()).unwrap();
        assert!(csv.starts_with("Employee,Date,Morning In"));
        assert!(csv.lines().nth(1).unwrap().starts_with("ana,"));
    }

    #[actix_web::test]
    async fn admin_manages_accounts() {
        let h = Harness::new();
        let admin = h.account("boss", "pw", Role::Admin).await;
        let token = h.token(&admin);
        let app = test_app!(h);

        let resp = test::call_service(
            &app,
            request("POST", "/api/users/add", Some(&token))
                .set_json(json!({"username": "maria", "password": "pw"}))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: Value = test::read_body_json(resp).await;
        assert_eq!(created["employee"]["role"], "employee");
        let maria_id = created["employee"]["id"].as_u64().unwrap();

        let dup = test::call_service(
            &app,
            request("POST", "/api/users/add", Some(&token))
                .set_json(json!({"username": "maria", "password": "pw"}))
                .to_request(),
        )
        .await;
        assert_eq!(dup.status(), StatusCode::BAD_REQUEST);

        let resp = test::call_service(
            &app,
            request("PUT", &format!("/api/users/edit/{maria_id}"), Some(&token))
                .set_json(json!({"username": "maria.s", "role": "admin", "password": "new"}))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let edited: Value = test::read_body_json(resp).await;
        assert_eq!(edited["employee"]["username"], "maria.s");
        assert_eq!(edited["employee"]["role"], "admin");

        // New password works, and the old name is free again.
        let login = test::call_service(
            &app,
            request("POST", "/api/auth/login", None)
                .set_json(json!({"username": "maria.s", "password": "new"}))
                .to_request(),
        )
        .await;
        assert_eq!(login.status(), StatusCode::OK);
        assert!(h.index.is_available("maria", h.store.get_ref()).await.unwrap());

        let resp = test::call_service(&app, request("GET", "/api/users", Some(&token)).to_request()).await;
        let list: Value = test::read_body_json(resp).await;
        assert_eq!(list.as_array().unwrap().len(), 2);
        assert!(list[0].get("password").is_none());

        let resp = test::call_service(
            &app,
            request("PUT", "/api/users/edit/999", Some(&token))
                .set_json(json!({"role": "admin"}))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = test::call_service(
            &app,
            request("DELETE", &format!("/api/users/delete/{maria_id}"), Some(&token)).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = test::call_service(
            &app,
            request("DELETE", &format!("/api/users/delete/{maria_id}"), Some(&token)).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let err: Value = test::read_body_json(resp).await;
        assert_eq!(err["message"], "User not found");
    }

    #[actix_web::test]
    async fn employees_cannot_manage_accounts() {
        let h = Harness::new();
        let ana = h.account("ana", "pw", Role::Employee).await;
        let token = h.token(&ana);
        let app = test_app!(h);

        let resp = test::call_service(&app, request("GET", "/api/users", Some(&token)).to_request()).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = test::call_service(
            &app,
            request("DELETE", &format!("/api/users/delete/{}", ana.id), Some(&token)).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
    #[actix_web::test]
    async fn tokens_follow_the_stored_account() {
        let h = Harness::new();
        let boss = h.account("boss", "pw", Role::Admin).await;
        let lead = h.account("lead", "pw", Role::Admin).await;
        let boss_token = h.token(&boss);
        let lead_token = h.token(&lead);
        let app = test_app!(h);

        let add_admin = |token: &str| {
            request("POST", "/api/users/add", Some(token))
                .set_json(json!({"username": "mallory", "password": "pw", "role": "admin"}))
                .to_request()
        };

        h.store
            .update_account(
                lead.id,
                AccountChanges {
                    role: Some(Role::Employee),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let demoted = test::call_service(&app, add_admin(&lead_token)).await;
        assert_eq!(demoted.status(), StatusCode::FORBIDDEN);

        let me = test::call_service(&app, request("GET", "/api/auth/me", Some(&lead_token)).to_request()).await;
        let me: Value = test::read_body_json(me).await;
        assert_eq!(me["role"], "employee");

        h.store.delete_account(boss.id).await.unwrap();

        let deleted = test::call_service(&app, add_admin(&boss_token)).await;
        assert_eq!(deleted.status(), StatusCode::UNAUTHORIZED);
        let err: Value = test::read_body_json(deleted).await;
        assert_eq!(err["message"], "Account no longer exists");

        assert!(h.store.find_account_by_username("mallory").await.unwrap().is_none());
    }

    #[actix_web::test]
    async fn punch_accepts_user_id_as_string() {
        let h = Harness::new();
        let employee = h.account("juan", "pw", Role::Employee).await;
        let token = h.token(&employee);
        let app = test_app!(h);

        let resp = test::call_service(
            &app,
            request("POST", "/api/dtr/time", Some(&token))
                .set_json(json!({"userId": employee.id.to_string(), "type": "morningIn"}))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["dtr"]["userId"], employee.id);

        let resp = test::call_service(
            &app,
            request("POST", "/api/dtr/time", Some(&token))
                .set_json(json!({"userId": "juan", "type": "morningOut"}))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    fn preflight(origin: &str) -> test::TestRequest {
        test::TestRequest::default()
            .method(Method::OPTIONS)
            .uri("/api/dtr/time")
            .insert_header(("Origin", origin))
            .insert_header(("Access-Control-Request-Method", "POST"))
            .insert_header(("Access-Control-Request-Headers", "authorization, content-type"))
    }

    #[actix_web::test]
    async fn cors_preflight_from_browser_origin() {
        let h = Harness::new();
        let app = test::init_service(
            App::new()
                .wrap(build_cors(&[]))
                .app_data(h.store.clone())
                .app_data(h.index.clone())
                .app_data(web::Data::new(h.config.clone()))
                .configure(|cfg| configure(cfg, h.config.clone())),
        )
        .await;

        let resp = test::call_service(&app, preflight("http://localhost:3000").to_request()).await;
        assert!(resp.status().is_success());
        assert_eq!(
            resp.headers().get("access-control-allow-origin").unwrap(),
            "http://localhost:3000"
        );
    }

    #[actix_web::test]
    async fn cors_echoes_a_configured_origin() {
        let h = Harness::new();
        let origins = vec!["https://dtr.example.com".to_string()];
        let app = test::init_service(
            App::new()
                .wrap(build_cors(&origins))
                .app_data(h.store.clone())
                .app_data(h.index.clone())
                .app_data(web::Data::new(h.config.clone()))
                .configure(|cfg| configure(cfg, h.config.clone())),
        )
        .await;

        let resp = test::call_service(&app, preflight("https://dtr.example.com").to_request()).await;
        assert!(resp.status().is_success());
        assert_eq!(
            resp.headers().get("access-control-allow-origin").unwrap(),
            "https://dtr.example.com"
        );
    }
}
