//! HTTP inbound adapter: router, shared state, and middleware.

pub mod admin;
pub mod response;
pub mod streaming;
pub mod validation;
pub mod videos;

use crate::adapters::redis::RedisPool;
use crate::application::upload::UploadService;
use crate::config::Config;
use crate::ports::cache::PlaylistCache;
use crate::ports::queue::JobQueue;
use crate::ports::repository::VideoRepository;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Slack on top of the configured max file size for the multipart framing
/// and metadata fields.
const BODY_LIMIT_SLACK: u64 = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: PgPool,
    pub redis: RedisPool,
    pub repo: Arc<dyn VideoRepository>,
    pub queue: Arc<dyn JobQueue>,
    pub cache: Arc<dyn PlaylistCache>,
    pub uploads: Arc<UploadService>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = state.config.storage.max_file_size + BODY_LIMIT_SLACK;

    Router::new()
        .route("/health", get(health))
        .route("/api/videos/upload", post(videos::upload))
        .route("/api/videos", get(videos::list))
        .route("/api/videos/{id}", get(videos::get).delete(videos::delete))
        .route("/api/videos/{id}/status", get(videos::status))
        .route(
            "/api/videos/{id}/hls/master.m3u8",
            get(streaming::master_playlist),
        )
        .route(
            "/api/videos/{id}/hls/{quality}/playlist.m3u8",
            get(streaming::variant_playlist),
        )
        .route(
            "/api/videos/{id}/hls/{quality}/{segment}",
            get(streaming::segment),
        )
        .route(
            "/api/videos/{id}/stream/{quality}",
            get(streaming::mp4_fallback),
        )
        .route("/api/admin/videos/{id}/retry", post(admin::retry))
        .route("/api/admin/videos/{id}/cache", delete(admin::clear_cache))
        .route("/api/admin/queue/stats", get(admin::queue_stats))
        .layer(middleware::from_fn(request_id))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit as usize))
        .with_state(state)
}

/// GET /health — liveness of the database and the cache backend.
async fn health(State(state): State<AppState>) -> Response {
    let database = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();
    let redis = state.redis.ping().await;

    let healthy = database && redis;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "checks": { "database": database, "redis": redis },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
        .into_response()
}

/// Attach an `X-Request-ID` to every response, honoring an incoming one.
async fn request_id(request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}
