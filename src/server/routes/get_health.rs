use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::server::config::AppState;

#[axum_macros::debug_handler]
pub async fn get_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.backend.ping().await.is_ok() {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::GATEWAY_TIMEOUT
    }
}
