//! Manifest cache fronting the HLS read path.
//!
//! Values are manifest text. Segment files never go through this cache.

use async_trait::async_trait;
use std::fmt;
use uuid::Uuid;

#[derive(Debug)]
pub enum CacheError {
    Backend(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Backend(e) => write!(f, "cache error: {}", e),
        }
    }
}

impl std::error::Error for CacheError {}

/// `name` is `"master"` or a quality label; the adapter owns key layout.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlaylistCache: Send + Sync {
    async fn get(&self, video_id: Uuid, name: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, video_id: Uuid, name: &str, content: &str) -> Result<(), CacheError>;

    /// Drop every cached manifest for the video. Returns deleted key count.
    async fn invalidate(&self, video_id: Uuid) -> Result<u64, CacheError>;
}
