use crate::models::domain::Domain;
use anyhow::{Context, Result};
use sqlx::PgPool;

#[derive(Debug, Clone)]
pub struct DomainRepository {
    pool: PgPool,
}

impl DomainRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: i64) -> Result<Option<Domain>> {
        sqlx::query_as::<_, Domain>("SELECT * FROM domains WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch domain")
    }

    pub async fn get_by_hostname(&self, hostname: &str) -> Result<Option<Domain>> {
        sqlx::query_as::<_, Domain>("SELECT * FROM domains WHERE hostname = $1")
            .bind(hostname)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch domain by hostname")
    }

    pub async fn register(&self, hostname: &str, site_id: i64) -> Result<Domain> {
        sqlx::query_as::<_, Domain>(
            "INSERT INTO domains (hostname, site_id) VALUES ($1, $2) RETURNING *",
        )
        .bind(hostname)
        .bind(site_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to register domain")
    }
}
