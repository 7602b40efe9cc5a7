pub mod api;

use std::sync::Arc;

use axum::{
    http::Uri,
    routing::{get, post},
    Router,
};

mod client;
mod config;
mod error;
mod routes;

pub use client::HttpBackend;
pub use config::{AppState, BackendConfig, FileMetadataSource};

use self::{error::ServerError, routes::*};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/entities/:type_name", post(post_entities))
        .route("/fact/:type_name", post(post_fact))
        .route("/aggregate/:type_name", post(post_aggregate))
        .route("/explain/:type_name", post(post_explain))
        .route("/health", get(get_health))
        .fallback(not_found)
        .with_state(state)
}

async fn not_found(uri: Uri) -> ServerError {
    ServerError::NotFound(uri)
}
