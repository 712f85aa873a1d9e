//! Calloway - Video-on-Demand Ingestion & Streaming Platform
//!
//! Hexagonal Architecture:
//! - domain/: Pure business logic (video record, quality catalog, jobs)
//! - ports/: Trait definitions (repository, queue, playlist cache)
//! - media/: ffprobe/ffmpeg subprocess orchestration
//! - adapters/: Concrete implementations (Postgres, Redis, HTTP)
//! - application/: Services (upload, processing pipeline, worker runtime)
//! - config: Environment configuration
//!
//! # Processes
//! - `api`: HTTP server for uploads, metadata, streaming, and admin
//! - `worker`: pool of job workers driving the transcode/HLS pipeline

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod media;
pub mod ports;

// Re-exports for convenience
pub use config::Config;
