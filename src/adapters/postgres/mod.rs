//! Postgres-backed persistence.

mod video_repository;

pub use video_repository::PostgresVideoRepository;

use crate::config::DatabaseConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Build the shared connection pool from configuration.
pub async fn connect(cfg: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(cfg.max_open_conns)
        .min_connections(cfg.max_idle_conns)
        .max_lifetime(cfg.conn_max_lifetime)
        .connect(&cfg.url())
        .await
}
