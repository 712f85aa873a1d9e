//! Queue job types, payloads, and retry policies.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub const TYPE_VIDEO_PROCESSING: &str = "video:process";
pub const TYPE_THUMBNAIL_GENERATION: &str = "video:thumbnail";
pub const TYPE_CLEANUP: &str = "video:cleanup";

/// Priority tier a job is dispatched from. Tiers share workers in a 6:3:1
/// proportional split rather than strict priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueTier {
    Critical,
    Default,
    Low,
}

impl QueueTier {
    /// Map a numeric job priority onto a tier.
    pub fn from_priority(priority: i32) -> Self {
        if priority >= 2 {
            QueueTier::Critical
        } else if priority <= -1 {
            QueueTier::Low
        } else {
            QueueTier::Default
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueTier::Critical => "critical",
            QueueTier::Default => "default",
            QueueTier::Low => "low",
        }
    }

    /// Dispatch weight (critical:default:low = 6:3:1).
    pub fn weight(&self) -> usize {
        match self {
            QueueTier::Critical => 6,
            QueueTier::Default => 3,
            QueueTier::Low => 1,
        }
    }

    /// Tiers in descending priority, used as the fallback scan order.
    pub const ALL: [QueueTier; 3] = [QueueTier::Critical, QueueTier::Default, QueueTier::Low];
}

/// Wire representation of a queued job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    /// Task id, minted at enqueue time
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub queue: QueueTier,
    pub payload: serde_json::Value,
    /// Completed delivery attempts so far
    #[serde(default)]
    pub attempt: u32,
}

impl JobEnvelope {
    pub fn new(task_type: &str, queue: QueueTier, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_type: task_type.to_string(),
            queue,
            payload,
            attempt: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoProcessingPayload {
    pub video_id: Uuid,
    pub qualities: Vec<String>,
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailPayload {
    pub video_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupPayload {
    pub video_id: Uuid,
    pub paths: Vec<String>,
}

/// Per-type delivery policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub timeout: Duration,
    backoff: &'static [Duration],
}

const PROCESSING_BACKOFF: [Duration; 3] = [
    Duration::from_secs(60),
    Duration::from_secs(5 * 60),
    Duration::from_secs(30 * 60),
];

const DEFAULT_BACKOFF: [Duration; 2] = [Duration::from_secs(30), Duration::from_secs(5 * 60)];

impl RetryPolicy {
    /// Policy for a job type string. Unknown types get the default policy.
    pub fn for_task_type(task_type: &str) -> Self {
        match task_type {
            TYPE_VIDEO_PROCESSING => Self {
                max_retries: 3,
                timeout: Duration::from_secs(60 * 60),
                backoff: &PROCESSING_BACKOFF,
            },
            TYPE_THUMBNAIL_GENERATION | TYPE_CLEANUP => Self {
                max_retries: 2,
                timeout: Duration::from_secs(5 * 60),
                backoff: &DEFAULT_BACKOFF,
            },
            _ => Self {
                max_retries: 2,
                timeout: Duration::from_secs(5 * 60),
                backoff: &DEFAULT_BACKOFF,
            },
        }
    }

    /// Delay before retry number `attempt` (0-based). Attempts past the end
    /// of the schedule reuse the last entry.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let idx = (attempt as usize).min(self.backoff.len() - 1);
        self.backoff[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_from_priority() {
        assert_eq!(QueueTier::from_priority(2), QueueTier::Critical);
        assert_eq!(QueueTier::from_priority(5), QueueTier::Critical);
        assert_eq!(QueueTier::from_priority(1), QueueTier::Default);
        assert_eq!(QueueTier::from_priority(0), QueueTier::Default);
        assert_eq!(QueueTier::from_priority(-1), QueueTier::Low);
        assert_eq!(QueueTier::from_priority(-10), QueueTier::Low);
    }

    #[test]
    fn test_tier_weights() {
        assert_eq!(QueueTier::Critical.weight(), 6);
        assert_eq!(QueueTier::Default.weight(), 3);
        assert_eq!(QueueTier::Low.weight(), 1);
    }

    #[test]
    fn test_processing_payload_wire_shape() {
        let payload = VideoProcessingPayload {
            video_id: Uuid::nil(),
            qualities: vec!["360p".to_string(), "720p".to_string()],
            priority: 0,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json["video_id"],
            "00000000-0000-0000-0000-000000000000".to_string()
        );
        assert_eq!(json["qualities"][1], "720p");
        assert_eq!(json["priority"], 0);
    }

    #[test]
    fn test_envelope_roundtrip() {
        let env = JobEnvelope::new(
            TYPE_VIDEO_PROCESSING,
            QueueTier::Critical,
            serde_json::json!({"video_id": Uuid::nil()}),
        );
        let raw = serde_json::to_string(&env).unwrap();
        assert!(raw.contains("\"type\":\"video:process\""));
        assert!(raw.contains("\"queue\":\"critical\""));
        let back: JobEnvelope = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.id, env.id);
        assert_eq!(back.attempt, 0);
    }

    #[test]
    fn test_retry_policies() {
        let p = RetryPolicy::for_task_type(TYPE_VIDEO_PROCESSING);
        assert_eq!(p.max_retries, 3);
        assert_eq!(p.timeout, Duration::from_secs(3600));
        assert_eq!(p.backoff_for(0), Duration::from_secs(60));
        assert_eq!(p.backoff_for(1), Duration::from_secs(300));
        assert_eq!(p.backoff_for(2), Duration::from_secs(1800));
        assert_eq!(p.backoff_for(7), Duration::from_secs(1800));

        let t = RetryPolicy::for_task_type(TYPE_THUMBNAIL_GENERATION);
        assert_eq!(t.max_retries, 2);
        assert_eq!(t.timeout, Duration::from_secs(300));
    }
}
