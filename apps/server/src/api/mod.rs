//! API layer - routes and handlers

pub mod duration;
pub mod queue;
pub mod wire;

use axum::{response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/",
            get(queue::receive)
                .post(queue::send)
                .put(queue::extend)
                .delete(queue::delete),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "sqlq-server"
    }))
}
