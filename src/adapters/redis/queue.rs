//! Redis job queue: one list per priority tier, a sorted set for delayed
//! retries, and a capped archive list for terminally failed jobs.

use super::pool::RedisPool;
use crate::domain::jobs::{
    CleanupPayload, JobEnvelope, QueueTier, ThumbnailPayload, VideoProcessingPayload,
    TYPE_CLEANUP, TYPE_THUMBNAIL_GENERATION, TYPE_VIDEO_PROCESSING,
};
use crate::domain::quality::all_quality_names;
use crate::ports::queue::{JobQueue, QueueError, QueueStats};
use async_trait::async_trait;
use deadpool_redis::redis::AsyncCommands;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const QUEUE_PREFIX: &str = "calloway:queue:";
const DELAYED_KEY: &str = "calloway:queue:delayed";
const ARCHIVE_KEY: &str = "calloway:queue:archived";
/// Jobs promoted per `promote_due` pass
const PROMOTE_BATCH: isize = 100;
/// Archived jobs retained for inspection
const ARCHIVE_CAP: isize = 1000;

fn tier_key(tier: QueueTier) -> String {
    format!("{}{}", QUEUE_PREFIX, tier.as_str())
}

fn epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[derive(Clone)]
pub struct RedisJobQueue {
    redis: RedisPool,
}

impl RedisJobQueue {
    pub fn new(redis: RedisPool) -> Self {
        Self { redis }
    }

    async fn push(&self, job: &JobEnvelope) -> Result<(), QueueError> {
        let mut conn = self.redis.pool.get().await?;
        let json = serde_json::to_string(job)?;
        conn.lpush::<_, _, ()>(tier_key(job.queue), json).await?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue_video_processing(
        &self,
        video_id: Uuid,
        priority: i32,
    ) -> Result<String, QueueError> {
        let payload = VideoProcessingPayload {
            video_id,
            qualities: all_quality_names(),
            priority,
        };
        let job = JobEnvelope::new(
            TYPE_VIDEO_PROCESSING,
            QueueTier::from_priority(priority),
            serde_json::to_value(&payload)?,
        );
        self.push(&job).await?;
        tracing::info!(
            video_id = %video_id,
            task_id = %job.id,
            queue = job.queue.as_str(),
            "video processing task enqueued"
        );
        Ok(job.id)
    }

    async fn enqueue_thumbnail(&self, video_id: Uuid) -> Result<String, QueueError> {
        let payload = ThumbnailPayload { video_id };
        let job = JobEnvelope::new(
            TYPE_THUMBNAIL_GENERATION,
            QueueTier::Default,
            serde_json::to_value(&payload)?,
        );
        self.push(&job).await?;
        tracing::info!(video_id = %video_id, task_id = %job.id, "thumbnail task enqueued");
        Ok(job.id)
    }

    async fn enqueue_cleanup(
        &self,
        video_id: Uuid,
        paths: Vec<String>,
    ) -> Result<String, QueueError> {
        let payload = CleanupPayload { video_id, paths };
        let job = JobEnvelope::new(
            TYPE_CLEANUP,
            QueueTier::Default,
            serde_json::to_value(&payload)?,
        );
        self.push(&job).await?;
        tracing::info!(video_id = %video_id, task_id = %job.id, "cleanup task enqueued");
        Ok(job.id)
    }

    async fn dequeue(
        &self,
        preferred: QueueTier,
        timeout_secs: f64,
    ) -> Result<Option<JobEnvelope>, QueueError> {
        let mut conn = self.redis.pool.get().await?;

        // Non-blocking sweep: the preferred tier first, then the rest in
        // descending priority. The caller rotates `preferred` to get the
        // 6:3:1 proportional split.
        let mut order = vec![preferred];
        for tier in QueueTier::ALL {
            if tier != preferred {
                order.push(tier);
            }
        }
        for tier in &order {
            let json: Option<String> = conn.rpop(tier_key(*tier), None).await?;
            if let Some(json) = json {
                return Ok(Some(serde_json::from_str(&json)?));
            }
        }

        // Everything empty: block across all tiers until something arrives
        // or the timeout elapses.
        let keys: Vec<String> = order.iter().map(|t| tier_key(*t)).collect();
        let result: Option<(String, String)> = conn.brpop(keys, timeout_secs).await?;
        match result {
            Some((_, json)) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn schedule_retry(&self, job: JobEnvelope, delay: Duration) -> Result<(), QueueError> {
        let mut conn = self.redis.pool.get().await?;
        let json = serde_json::to_string(&job)?;
        let due = epoch_secs() + delay.as_secs_f64();
        conn.zadd::<_, _, _, ()>(DELAYED_KEY, json, due).await?;
        Ok(())
    }

    async fn promote_due(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.pool.get().await?;
        let now = epoch_secs();
        let due: Vec<String> = conn
            .zrangebyscore_limit(DELAYED_KEY, "-inf", now, 0, PROMOTE_BATCH)
            .await?;

        let mut promoted = 0;
        for json in due {
            // Only the claimer of the zset entry may requeue it; a second
            // promoter sees zrem return 0 and skips.
            let removed: i64 = conn.zrem(DELAYED_KEY, &json).await?;
            if removed == 0 {
                continue;
            }
            let job: JobEnvelope = serde_json::from_str(&json)?;
            conn.lpush::<_, _, ()>(tier_key(job.queue), json).await?;
            promoted += 1;
        }
        Ok(promoted)
    }

    async fn archive(&self, job: &JobEnvelope) -> Result<(), QueueError> {
        let mut conn = self.redis.pool.get().await?;
        let json = serde_json::to_string(job)?;
        conn.lpush::<_, _, ()>(ARCHIVE_KEY, json).await?;
        conn.ltrim::<_, ()>(ARCHIVE_KEY, 0, ARCHIVE_CAP - 1).await?;
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut conn = self.redis.pool.get().await?;
        let critical: u64 = conn.llen(tier_key(QueueTier::Critical)).await?;
        let default: u64 = conn.llen(tier_key(QueueTier::Default)).await?;
        let low: u64 = conn.llen(tier_key(QueueTier::Low)).await?;
        let delayed: u64 = conn.zcard(DELAYED_KEY).await?;
        let archived: u64 = conn.llen(ARCHIVE_KEY).await?;
        Ok(QueueStats {
            critical,
            default,
            low,
            delayed,
            archived,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_keys() {
        assert_eq!(tier_key(QueueTier::Critical), "calloway:queue:critical");
        assert_eq!(tier_key(QueueTier::Default), "calloway:queue:default");
        assert_eq!(tier_key(QueueTier::Low), "calloway:queue:low");
    }

    #[test]
    fn test_epoch_monotonic_enough() {
        let a = epoch_secs();
        let b = epoch_secs();
        assert!(b >= a);
        assert!(a > 1_600_000_000.0);
    }
}
