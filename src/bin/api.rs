//! API binary: HTTP server for uploads, metadata, streaming, and admin.

use calloway::adapters::http::{router, AppState};
use calloway::adapters::postgres::{self, PostgresVideoRepository};
use calloway::adapters::redis::{RedisJobQueue, RedisPlaylistCache, RedisPool};
use calloway::application::upload::UploadService;
use calloway::media::FfmpegProcessor;
use calloway::Config;
use std::sync::Arc;
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
        port = config.server.port,
        "starting video streaming api"
    );

    let db = match postgres::connect(&config.database).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
        tracing::error!("failed to run migrations: {}", e);
        std::process::exit(1);
    }
    tracing::info!("database connection established");

    let redis = match RedisPool::connect(&config.redis) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("failed to connect to redis: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!("redis connection established");

    for dir in [
        config.storage.raw_dir(),
        config.storage.thumbnail_path.clone(),
        config.storage.transcoded_path.clone(),
    ] {
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            tracing::error!(path = %dir.display(), "failed to create storage directory: {}", e);
            std::process::exit(1);
        }
    }

    let repo = Arc::new(PostgresVideoRepository::new(db.clone()));
    let queue = Arc::new(RedisJobQueue::new(redis.clone()));
    let cache = Arc::new(RedisPlaylistCache::new(redis.clone()));
    let media = Arc::new(FfmpegProcessor::new());
    let uploads = Arc::new(UploadService::new(
        repo.clone(),
        queue.clone(),
        media,
        config.storage.clone(),
    ));

    let state = AppState {
        config: Arc::new(config.clone()),
        db,
        redis,
        repo,
        queue,
        cache,
        uploads,
    };

    let app = router(state);
    let address = config.server.address();
    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(address = %address, "failed to bind listener: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!(address = %address, "http server starting");
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("server error: {}", e);
        std::process::exit(1);
    }
    tracing::info!("server exited gracefully");
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
