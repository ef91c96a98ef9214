//! Event log endpoints: cursor-paged polling and the SSE live stream.

use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};

use super::super::AppState;
use super::super::auth;
use super::super::error::ApiError;
use crate::core::events::Cursor;

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 500;
const SSE_RETRY: Duration = Duration::from_secs(3);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn list_events(
    Query(query): Query<EventsQuery>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    auth::caller_user(&headers)?;
    let org_id = auth::caller_org(&headers)?;
    let since = decode_since(query.since.as_deref())?;
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

    let items = state.events.query(&org_id, since, limit).await?;
    let next_cursor = items.last().map(|e| e.cursor.encode());
    Ok(Json(serde_json::json!({
        "items": items,
        "next_cursor": next_cursor,
        "page": 1,
        "page_size": limit,
    })))
}

/// Live stream. `Last-Event-ID` (set by the browser on reconnect) wins over
/// the `since` query parameter. The poll task and the heartbeat are both
/// tied to the response body, so a dropped connection cancels them together.
pub async fn stream_events(
    Query(query): Query<EventsQuery>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    auth::caller_user(&headers)?;
    let org_id = auth::caller_org(&headers)?;

    let resume_token = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
        .or(query.since.clone());
    let since = decode_since(resume_token.as_deref())?;

    let (tx, rx) = tokio::sync::mpsc::channel(64);
    let dispatcher = state.dispatcher.clone();
    tokio::spawn(async move {
        dispatcher.run(&org_id, since, tx).await;
    });

    let retry_hint = tokio_stream::once(Ok::<_, Infallible>(
        SseEvent::default().retry(SSE_RETRY),
    ));
    let events = ReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok::<_, Infallible>(
            SseEvent::default()
                .id(event.cursor.encode())
                .event(event.event_type.clone())
                .data(data),
        )
    });

    Ok(Sse::new(retry_hint.chain(events)).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    ))
}

fn decode_since(token: Option<&str>) -> Result<Option<Cursor>, ApiError> {
    match token {
        Some(token) if !token.trim().is_empty() => Ok(Some(Cursor::decode(token)?)),
        _ => Ok(None),
    }
}
