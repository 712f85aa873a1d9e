//! Configuration for the API and worker processes.
//!
//! All values come from environment variables with sensible defaults;
//! `Config::from_env()` validates the result before either process starts.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub storage: StorageConfig,
    pub worker: WorkerConfig,
    /// Log level filter for tracing (`trace`..`error`)
    pub log_level: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// HTTP server bind address
    pub host: String,
    /// HTTP server port
    pub port: u16,
    /// Deployment environment (`development` / `production`)
    pub environment: String,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// How long to wait for in-flight requests on shutdown
    pub shutdown_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub ssl_mode: String,
    pub max_open_conns: u32,
    pub max_idle_conns: u32,
    pub conn_max_lifetime: Duration,
}

#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub db: i64,
    pub pool_size: usize,
    pub min_idle_conns: usize,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    /// Root of the on-disk media tree; raw uploads live under `<root>/raw`
    pub upload_path: PathBuf,
    /// Maximum accepted upload size in bytes
    pub max_file_size: u64,
    /// Directory for generated thumbnails
    pub thumbnail_path: PathBuf,
    /// Directory for per-video derived artifacts (`<dir>/<video_id>/...`)
    pub transcoded_path: PathBuf,
    /// MIME types accepted by the upload endpoint
    pub allowed_formats: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub max_concurrent_jobs: usize,
    /// Operational ceiling for background jobs; per-type policies are
    /// stricter for the known job types
    pub job_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, String> {
        dotenv::dotenv().ok();

        let cfg = Self {
            server: ServerConfig {
                host: env_or("SERVER_HOST", "0.0.0.0"),
                port: env_parse_or("SERVER_PORT", 8080),
                environment: env_or("ENVIRONMENT", "development"),
                read_timeout: secs_env("SERVER_READ_TIMEOUT", 10),
                write_timeout: secs_env("SERVER_WRITE_TIMEOUT", 10),
                shutdown_timeout: secs_env("SERVER_SHUTDOWN_TIMEOUT", 30),
            },
            database: DatabaseConfig {
                host: env_or("DB_HOST", "localhost"),
                port: env_parse_or("DB_PORT", 5432),
                user: env_or("DB_USER", "postgres"),
                password: env_or("DB_PASSWORD", "postgres"),
                name: env_or("DB_NAME", "video_streaming"),
                ssl_mode: env_or("DB_SSLMODE", "disable"),
                max_open_conns: env_parse_or("DB_MAX_OPEN_CONNS", 25),
                max_idle_conns: env_parse_or("DB_MAX_IDLE_CONNS", 5),
                conn_max_lifetime: secs_env("DB_CONN_MAX_LIFETIME", 300),
            },
            redis: RedisConfig {
                host: env_or("REDIS_HOST", "localhost"),
                port: env_parse_or("REDIS_PORT", 6379),
                password: env_or("REDIS_PASSWORD", ""),
                db: env_parse_or("REDIS_DB", 0),
                pool_size: env_parse_or("REDIS_POOL_SIZE", 10),
                min_idle_conns: env_parse_or("REDIS_MIN_IDLE_CONNS", 2),
            },
            storage: StorageConfig {
                upload_path: PathBuf::from(env_or("STORAGE_UPLOAD_PATH", "./web/uploads")),
                max_file_size: env_parse_or("STORAGE_MAX_FILE_SIZE", 2 * 1024 * 1024 * 1024),
                thumbnail_path: PathBuf::from(env_or(
                    "STORAGE_THUMBNAIL_PATH",
                    "./web/uploads/thumbnails",
                )),
                transcoded_path: PathBuf::from(env_or(
                    "STORAGE_TRANSCODED_PATH",
                    "./web/uploads/processed",
                )),
                allowed_formats: vec![
                    "video/mp4".to_string(),
                    "video/mpeg".to_string(),
                    "video/quicktime".to_string(),
                    "video/webm".to_string(),
                    "video/x-msvideo".to_string(),
                    "video/x-matroska".to_string(),
                ],
            },
            worker: WorkerConfig {
                max_concurrent_jobs: env_parse_or("WORKER_MAX_CONCURRENT_JOBS", 4),
                job_timeout: secs_env("WORKER_JOB_TIMEOUT", 1800),
            },
            log_level: env_or("LOG_LEVEL", "info"),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server port is required".to_string());
        }
        if self.database.host.is_empty() || self.database.name.is_empty() {
            return Err("database configuration is incomplete".to_string());
        }
        if self.storage.max_file_size == 0 {
            return Err("max file size must be positive".to_string());
        }
        if self.worker.max_concurrent_jobs == 0 {
            return Err("worker concurrency must be positive".to_string());
        }
        Ok(())
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl DatabaseConfig {
    /// Postgres connection URL for sqlx.
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.name, self.ssl_mode
        )
    }
}

impl RedisConfig {
    /// Redis connection URL for deadpool.
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.db)
        } else {
            format!(
                "redis://:{}@{}:{}/{}",
                self.password, self.host, self.port, self.db
            )
        }
    }
}

impl StorageConfig {
    /// Directory raw uploads are stored in.
    pub fn raw_dir(&self) -> PathBuf {
        self.upload_path.join("raw")
    }

    /// Stored path of an uploaded source file.
    pub fn raw_path(&self, id: Uuid, ext: &str) -> PathBuf {
        self.raw_dir().join(format!("{}{}", id, ext))
    }

    /// Per-video derived artifact directory.
    pub fn processed_dir(&self, id: Uuid) -> PathBuf {
        self.transcoded_path.join(id.to_string())
    }

    /// Progressive output for one quality.
    pub fn mp4_path(&self, id: Uuid, quality: &str) -> PathBuf {
        self.processed_dir(id).join(format!("{}.mp4", quality))
    }

    /// HLS tree root for a video.
    pub fn hls_dir(&self, id: Uuid) -> PathBuf {
        self.processed_dir(id).join("hls")
    }

    /// Per-quality HLS variant directory.
    pub fn variant_dir(&self, id: Uuid, quality: &str) -> PathBuf {
        self.hls_dir(id).join(quality)
    }

    pub fn master_path(&self, id: Uuid) -> PathBuf {
        self.hls_dir(id).join("master.m3u8")
    }

    pub fn variant_playlist_path(&self, id: Uuid, quality: &str) -> PathBuf {
        self.variant_dir(id, quality).join("playlist.m3u8")
    }

    pub fn segment_path(&self, id: Uuid, quality: &str, segment: &str) -> PathBuf {
        self.variant_dir(id, quality).join(segment)
    }

    pub fn thumbnail_file(&self, id: Uuid) -> PathBuf {
        self.thumbnail_path.join(format!("{}.jpg", id))
    }

    /// True when `path` lives under one of the storage roots. Used by the
    /// cleanup job to refuse payloads that point outside the media tree.
    pub fn owns(&self, path: &Path) -> bool {
        path.starts_with(&self.upload_path)
            || path.starts_with(&self.thumbnail_path)
            || path.starts_with(&self.transcoded_path)
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn secs_env(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_parse_or(key, default_secs))
}
