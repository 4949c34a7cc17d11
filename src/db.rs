use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::config::StoreConfig;

pub async fn connect(cfg: &StoreConfig) -> anyhow::Result<PgPool> {
    let url = cfg
        .database_url
        .as_deref()
        .context("DATABASE_URL is required for the postgres store")?;
    let db = PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .acquire_timeout(cfg.timeout())
        .connect(url)
        .await
        .context("connect to database")?;
    Ok(db)
}

pub async fn migrate(db: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(db)
        .await
        .context("run migrations")?;
    Ok(())
}
