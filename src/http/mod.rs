//! The HTTP boundary.
//!
//! | Route                      | Handler                         |
//! |----------------------------|---------------------------------|
//! | `GET /health`              | liveness check                  |
//! | `POST /api/projects`       | [`projects::create_project`]    |
//! | `POST /api/upload`         | [`upload::upload`]              |
//! | `GET /p/{projectId}/...`   | static files from `projects/`   |
//!
//! Everything under `/api` allows cross-origin calls from any origin and
//! answers `OPTIONS` preflights.

pub mod error;
pub mod projects;
pub mod upload;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use dropsite_archive::Limits;
use dropsite_config::Config;
use dropsite_ingest::{IngestOptions, Pipeline};
use dropsite_storage::WorkspaceStore;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    pub public_base_url: Option<Arc<str>>,
    pub max_upload_size: u64,
}

impl AppState {
    pub fn new(store: WorkspaceStore, config: &Config) -> Self {
        let options = IngestOptions {
            limits: Limits {
                max_entries: config.max_archive_entries,
                max_decompressed_size: config.max_archive_decompressed_size,
            },
            allowed_file_types: config.allowed_file_types.clone(),
            concurrency: config.ingest_concurrency,
        };
        Self {
            pipeline: Pipeline::new(store, options),
            public_base_url: config.public_base_url.as_deref().map(|url| Arc::from(url.trim_end_matches('/'))),
            max_upload_size: config.max_upload_size,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let published = ServeDir::new(state.pipeline.store().projects_dir());
    let cors = CorsLayer::new().allow_origin(Any).allow_methods([Method::POST, Method::OPTIONS]).allow_headers(Any);
    let api = Router::new()
        .route("/projects", post(projects::create_project).options(preflight))
        // Part sizes are enforced while streaming each file to disk instead.
        .route("/upload", post(upload::upload).options(preflight).layer(DefaultBodyLimit::disable()))
        .layer(cors);
    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .nest_service("/p", published)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bare `OPTIONS` requests that aren't CORS preflights still get a 200.
async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
