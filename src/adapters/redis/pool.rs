//! Redis connection pool shared by the queue and the playlist cache.

use crate::config::RedisConfig;
use deadpool_redis::{Config, Pool, PoolConfig, Runtime};

#[derive(Clone)]
pub struct RedisPool {
    pub(super) pool: Pool,
}

impl RedisPool {
    /// Create a pool from configuration. One pool per process.
    pub fn connect(cfg: &RedisConfig) -> Result<Self, String> {
        let mut pool_cfg = Config::from_url(cfg.url());
        pool_cfg.pool = Some(PoolConfig::new(cfg.pool_size));
        let pool = pool_cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| format!("failed to create redis pool: {}", e))?;
        Ok(Self { pool })
    }

    /// Liveness check for the health endpoint.
    pub async fn ping(&self) -> bool {
        let Ok(mut conn) = self.pool.get().await else {
            return false;
        };
        let pong: Result<String, _> = deadpool_redis::redis::cmd("PING")
            .query_async(&mut conn)
            .await;
        pong.is_ok()
    }
}
