//! Redis manifest cache for the HLS read path.
//!
//! Keys are `playlist:<video_id>:master` and `playlist:<video_id>:<quality>`
//! with a one hour TTL. On-miss population and the admin invalidation scan
//! are the only write paths.

use super::pool::RedisPool;
use crate::ports::cache::{CacheError, PlaylistCache};
use async_trait::async_trait;
use deadpool_redis::redis;
use deadpool_redis::redis::AsyncCommands;
use uuid::Uuid;

const TTL_SECONDS: u64 = 3600;
const SCAN_COUNT: usize = 100;

fn playlist_key(video_id: Uuid, name: &str) -> String {
    format!("playlist:{}:{}", video_id, name)
}

#[derive(Clone)]
pub struct RedisPlaylistCache {
    redis: RedisPool,
}

impl RedisPlaylistCache {
    pub fn new(redis: RedisPool) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl PlaylistCache for RedisPlaylistCache {
    async fn get(&self, video_id: Uuid, name: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.redis.pool.get().await?;
        let value: Option<String> = conn.get(playlist_key(video_id, name)).await?;
        Ok(value.filter(|v| !v.is_empty()))
    }

    async fn set(&self, video_id: Uuid, name: &str, content: &str) -> Result<(), CacheError> {
        let mut conn = self.redis.pool.get().await?;
        conn.set_ex::<_, _, ()>(playlist_key(video_id, name), content, TTL_SECONDS)
            .await?;
        Ok(())
    }

    async fn invalidate(&self, video_id: Uuid) -> Result<u64, CacheError> {
        let mut conn = self.redis.pool.get().await?;
        let pattern = format!("playlist:{}:*", video_id);

        let mut deleted: u64 = 0;
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let removed: u64 = conn.del(keys).await?;
                deleted += removed;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let id = Uuid::nil();
        assert_eq!(
            playlist_key(id, "master"),
            "playlist:00000000-0000-0000-0000-000000000000:master"
        );
        assert_eq!(
            playlist_key(id, "720p"),
            "playlist:00000000-0000-0000-0000-000000000000:720p"
        );
    }
}
