use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::MySqlPool;
use tracing::{info, warn};

use crate::{
    auth::handlers::create_account,
    model::role::Role,
    store::{MemoryStore, MySqlStore, Store},
    utils::username_index::UsernameIndex,
};

/// `DATABASE_URL=memory` keeps everything in process; anything else is a
/// MySQL connection string.
pub async fn init_store(database_url: &str) -> Result<Arc<dyn Store>> {
    if database_url.trim() == "memory" {
        warn!("Using in-memory store; data is lost on restart");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let pool = MySqlPool::connect(database_url)
        .await
        .context("Failed to connect to database")?;

    let store = MySqlStore::new(pool);
    store
        .ensure_schema()
        .await
        .context("Failed to create tables")?;

    Ok(Arc::new(store))
}

/// Create the configured admin account unless the username already exists.
pub async fn seed_default_admin(
    store: &dyn Store,
    index: &UsernameIndex,
    username: &str,
    password: &str,
) -> Result<()> {
    if store.find_account_by_username(username).await?.is_some() {
        info!(username, "Default admin already exists");
        return Ok(());
    }

    create_account(store, index, username, password, Role::Admin).await?;

    info!(username, "Default admin created");
    Ok(())
}
