pub mod events;
pub mod runs;

use axum::Json;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "openship",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
