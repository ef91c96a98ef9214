//! Append-only, per-tenant domain event log.
//!
//! Events are derived notifications: the run store stays the source of
//! truth, and consumers that suspect a missed event reconcile by re-polling
//! from their last cursor.

pub mod cursor;
pub mod stream;

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::core::store::RunStore;
pub use cursor::{Cursor, CursorError};

pub mod types {
    //! Event type tags, dotted like the rest of the OpenShip surface.
    pub const RUN_STARTED: &str = "assistant.run.started";
    pub const RUN_WAITING_INPUT: &str = "assistant.run.waiting_input";
    pub const RUN_PROGRESS: &str = "assistant.run.progress";
    pub const RUN_COMPLETED: &str = "assistant.run.completed";
    pub const RUN_FAILED: &str = "assistant.run.failed";
    pub const RUN_CANCELLED: &str = "assistant.run.cancelled";
    pub const MATRIX_CHANGED: &str = "system.matrix.changed";
    pub const CHAT_FINISHED: &str = "assistant.chat.finished";
}

pub const AGGREGATE_RUN: &str = "assistant_run";
pub const AGGREGATE_THREAD: &str = "thread";

/// One immutable fact in the log.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Event {
    #[serde(serialize_with = "serialize_cursor")]
    pub cursor: Cursor,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub org_id: String,
    pub trace_id: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

fn serialize_cursor<S: serde::Serializer>(cursor: &Cursor, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&cursor.encode())
}

/// A fact to append; the store assigns the cursor and timestamp.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub org_id: String,
    pub trace_id: String,
    pub payload: serde_json::Value,
}

/// Handle for appending and querying events. Cheap to clone.
#[derive(Clone)]
pub struct EventLog {
    store: Arc<RunStore>,
}

impl EventLog {
    pub fn new(store: Arc<RunStore>) -> Self {
        Self { store }
    }

    /// Durably append one event and return it with its assigned cursor.
    pub async fn append(&self, event: NewEvent) -> Result<Event> {
        self.store.append_event(event).await
    }

    /// Events for `org_id` with cursor strictly greater than `since`, in
    /// ascending cursor order, up to `limit`. Safe to call repeatedly with
    /// the last-seen cursor for gap-free consumption.
    pub async fn query(
        &self,
        org_id: &str,
        since: Option<Cursor>,
        limit: usize,
    ) -> Result<Vec<Event>> {
        self.store.list_events(org_id, since, limit).await
    }
}
