//! Conversions from the Redis client errors into the port error types.

use crate::ports::cache::CacheError;
use crate::ports::queue::QueueError;
use deadpool_redis::redis::RedisError;
use deadpool_redis::PoolError;

impl From<RedisError> for QueueError {
    fn from(err: RedisError) -> Self {
        QueueError::Backend(err.to_string())
    }
}

impl From<PoolError> for QueueError {
    fn from(err: PoolError) -> Self {
        QueueError::Backend(err.to_string())
    }
}

impl From<RedisError> for CacheError {
    fn from(err: RedisError) -> Self {
        CacheError::Backend(err.to_string())
    }
}

impl From<PoolError> for CacheError {
    fn from(err: PoolError) -> Self {
        CacheError::Backend(err.to_string())
    }
}
