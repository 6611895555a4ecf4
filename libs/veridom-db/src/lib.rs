pub mod models;
pub mod repositories;

pub use sqlx;

use anyhow::{Context, Result};
use sqlx::{PgPool, postgres::PgPoolOptions};

pub async fn connect(url: &str) -> Result<PgPool> {
    if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
        return Err(anyhow::anyhow!(
            "DATABASE_URL must start with postgres:// or postgresql://"
        ));
    }

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run DB migrations")?;

    Ok(pool)
}
