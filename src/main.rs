use actix_web::middleware::NormalizePath;
use actix_web::web::Data;
use actix_web::{App, HttpServer, Responder, get};

mod api;
mod auth;
mod config;
mod db;
mod docs;
mod error;
mod model;
mod models;
mod routes;
mod store;
mod utils;

use config::Config;
use db::{init_store, seed_default_admin};

use crate::store::Store;
use crate::utils::username_index::UsernameIndex;
use tracing::{error, info};
use tracing_appender::rolling;
use utoipa_swagger_ui::SwaggerUi;

#[get("/")]
async fn index() -> impl Responder {
    "DTR tracker is running"
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Rolling daily log
    let file_appender = rolling::daily(&config.log_dir, "dtr.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_target(false) // removes module path
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .pretty()
        .init();

    info!("Server starting...");

    let store = init_store(&config.database_url).await?;
    let store_data: Data<dyn Store> = Data::from(store.clone());
    let usernames = Data::new(UsernameIndex::default());

    if let Some((username, password)) = config.default_admin() {
        if let Err(e) = seed_default_admin(store.as_ref(), &usernames, username, password).await {
            error!(error = %e, "Error creating default admin");
        }
    }

    let usernames_for_warmup = usernames.clone();
    actix_web::rt::spawn(async move {
        if let Err(e) = usernames_for_warmup.warmup(store.as_ref(), 250).await {
            error!(error = %e, "Failed to warm up username index");
        }
    });

    // Clone values for the closure (avoid move issues)
    let server_addr = config.server_addr.clone();
    let config_data = config.clone();
    let openapi = docs::openapi_for(&config.api_prefix);

    HttpServer::new(move || {
        App::new()
            .wrap(routes::build_cors(&config.cors_allowed_origins))
            .wrap(actix_web::middleware::Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}") // ← wildcard {_:.*} to match JS/CSS files
                    .url("/api-doc/openapi.json", openapi.clone()),
            )
            .app_data(store_data.clone())
            .app_data(usernames.clone())
            .app_data(Data::new(config.clone()))
            .service(index)
            .configure(|cfg| routes::configure(cfg, config_data.clone()))
    })
    .bind(server_addr)?
    .run()
    .await?;

    Ok(())
}
