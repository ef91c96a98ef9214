use axum::Router;
use axum::http::Method;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::handlers::{self, events, runs};

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/threads/{thread_id}/assistants/{mode}/runs",
            post(runs::enqueue_run),
        )
        .route(
            "/api/threads/{thread_id}/assistant-runs",
            get(runs::list_thread_runs),
        )
        .route("/api/assistant-runs/{run_id}", get(runs::get_run))
        .route("/api/assistant-runs/{run_id}/claim", post(runs::claim_run))
        .route(
            "/api/assistant-runs/{run_id}/complete",
            post(runs::complete_run),
        )
        .route(
            "/api/assistant-runs/{run_id}/cancel",
            post(runs::cancel_run),
        )
        .route("/api/events", get(events::list_events))
        .route("/api/events/stream", get(events::stream_events))
        .route("/api/health", get(handlers::health))
        .layer(build_cors())
        .with_state(state)
}
