//! Standalone migration runner.
//!
//! Connects using the loaded configuration (or `APP__DATABASE_URL`) and
//! applies all pending migrations, then exits.

use anyhow::Context;
use stockroom_api::db;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let pool = db::create_db_pool()
        .await
        .context("failed to connect to database")?;

    db::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;

    info!("migrations applied");
    Ok(())
}
