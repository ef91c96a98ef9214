//! HTTP boundary: translates requests into core calls and core outcomes
//! into status codes. No domain decisions live here.

pub(crate) mod auth;
pub(crate) mod error;
mod handlers;
mod router;

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tracing::info;

use crate::core::events::EventLog;
use crate::core::events::stream::StreamDispatcher;
use crate::core::graph::SharedAccessResolver;
use crate::core::runs::RunCoordinator;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<RunCoordinator>,
    pub events: EventLog,
    pub dispatcher: StreamDispatcher,
    pub access: SharedAccessResolver,
}

pub fn build_router(state: AppState) -> Router {
    router::build_api_router(state)
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("OpenShip API listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
