//! Host resource usage.

use axum::{Json, Router, extract::State, routing::get};

use crate::api::models::ResourceResponse;
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/resources", get(resources))
}

async fn resources(State(state): State<AppState>) -> Json<ResourceResponse> {
    let sampler = state.resources.clone();
    // sysinfo refreshes read /proc synchronously.
    let usage = tokio::task::spawn_blocking(move || sampler.sample())
        .await
        .ok();
    Json(ResourceResponse {
        usage,
        live_jobs: state.orchestrator.live_count(),
    })
}
