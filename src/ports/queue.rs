//! The durable job queue: typed enqueue for producers, tiered dequeue plus
//! retry/archival primitives for the worker runtime.

use crate::domain::jobs::{JobEnvelope, QueueTier};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug)]
pub enum QueueError {
    Backend(String),
    Serialization(String),
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Backend(e) => write!(f, "queue backend error: {}", e),
            QueueError::Serialization(e) => write!(f, "queue serialization error: {}", e),
        }
    }
}

impl std::error::Error for QueueError {}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

/// Pending/delayed/archived counts for the admin stats endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub critical: u64,
    pub default: u64,
    pub low: u64,
    pub delayed: u64,
    pub archived: u64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a full processing run for a video. Returns the task id.
    async fn enqueue_video_processing(
        &self,
        video_id: Uuid,
        priority: i32,
    ) -> Result<String, QueueError>;

    /// Enqueue standalone thumbnail regeneration. Returns the task id.
    async fn enqueue_thumbnail(&self, video_id: Uuid) -> Result<String, QueueError>;

    /// Enqueue removal of derived artifacts after a video is deleted.
    async fn enqueue_cleanup(
        &self,
        video_id: Uuid,
        paths: Vec<String>,
    ) -> Result<String, QueueError>;

    /// Pop one job, checking `preferred` first, then the remaining tiers,
    /// then blocking across all tiers for up to `timeout_secs`.
    async fn dequeue(
        &self,
        preferred: QueueTier,
        timeout_secs: f64,
    ) -> Result<Option<JobEnvelope>, QueueError>;

    /// Park a job for redelivery after `delay`.
    async fn schedule_retry(&self, job: JobEnvelope, delay: Duration) -> Result<(), QueueError>;

    /// Move due delayed jobs back onto their tier queues. Returns how many
    /// were promoted.
    async fn promote_due(&self) -> Result<usize, QueueError>;

    /// Record a terminally failed job.
    async fn archive(&self, job: &JobEnvelope) -> Result<(), QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;
}
