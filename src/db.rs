//! Database instance module
use std::sync::LazyLock;

use surrealdb::{Surreal, engine::any::Any};

use crate::config::{DatabaseAuthMethod, DatabaseConfig};

pub static DB: LazyLock<Surreal<Any>> = LazyLock::new(Surreal::init);

#[tracing::instrument(skip(config))]
pub async fn init_database(config: &DatabaseConfig) -> surrealdb::Result<()> {
    tracing::info!("Connecting to database at {}", config.database_url);
    DB.connect(config.database_url.as_str()).await?;

    match config.db_auth_method {
        DatabaseAuthMethod::Root => {
            tracing::info!("Signing in as root user");
            DB.signin(surrealdb::opt::auth::Root {
                username: config.root_username.as_deref().unwrap_or("root"),
                password: config.root_password.as_deref().unwrap_or("root"),
            })
            .await?;
        }
        DatabaseAuthMethod::None => {
            tracing::info!("No authentication configured");
        }
    }

    tracing::info!(
        "Using namespace '{}' and database '{}'",
        config.db_namespace,
        config.db_database
    );
    DB.use_ns(config.db_namespace.as_str())
        .use_db(config.db_database.as_str())
        .await?;

    tracing::info!("Database initialization complete");
    Ok(())
}

/// Fresh in-memory database, isolated from every other handle
#[cfg(test)]
pub async fn memory() -> Surreal<Any> {
    let db = surrealdb::engine::any::connect("mem://")
        .await
        .expect("in-memory database");
    db.use_ns("test").use_db("test").await.expect("namespace");
    db
}
