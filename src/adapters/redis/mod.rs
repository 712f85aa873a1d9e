//! Redis-backed adapters: the job queue and the playlist cache.

mod error;
mod playlist_cache;
mod pool;
mod queue;

pub use playlist_cache::RedisPlaylistCache;
pub use pool::RedisPool;
pub use queue::RedisJobQueue;
