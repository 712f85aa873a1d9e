//! Worker binary: drains the job queues and drives the processing pipeline.

use calloway::adapters::postgres::{self, PostgresVideoRepository};
use calloway::adapters::redis::{RedisJobQueue, RedisPool};
use calloway::application::handlers::{CleanupHandler, ThumbnailHandler};
use calloway::application::pipeline::ProcessVideoPipeline;
use calloway::application::worker::{JobHandler, WorkerRuntime};
use calloway::domain::jobs::{TYPE_CLEANUP, TYPE_THUMBNAIL_GENERATION, TYPE_VIDEO_PROCESSING};
use calloway::media::FfmpegProcessor;
use calloway::Config;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        environment = %config.server.environment,
        concurrency = config.worker.max_concurrent_jobs,
        "starting video processing worker"
    );

    let db = match postgres::connect(&config.database).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!("database connection established");

    let redis = match RedisPool::connect(&config.redis) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("failed to connect to redis: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!("redis connection established");

    let repo = Arc::new(PostgresVideoRepository::new(db));
    let queue = Arc::new(RedisJobQueue::new(redis));
    let media = Arc::new(FfmpegProcessor::new());

    let pipeline = Arc::new(ProcessVideoPipeline::new(
        repo.clone(),
        media.clone(),
        config.storage.clone(),
    ));
    let thumbnails = Arc::new(ThumbnailHandler::new(
        repo.clone(),
        media,
        config.storage.clone(),
    ));
    let cleanup = Arc::new(CleanupHandler::new(config.storage.clone()));

    let mut handlers: HashMap<&'static str, Arc<dyn JobHandler>> = HashMap::new();
    handlers.insert(TYPE_VIDEO_PROCESSING, pipeline);
    handlers.insert(TYPE_THUMBNAIL_GENERATION, thumbnails);
    handlers.insert(TYPE_CLEANUP, cleanup);

    let runtime = Arc::new(WorkerRuntime::new(
        queue,
        repo,
        handlers,
        config.worker.max_concurrent_jobs,
        config.server.shutdown_timeout,
    ));

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    runtime.run(shutdown).await;
    tracing::info!("worker exited gracefully");
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    }
}
