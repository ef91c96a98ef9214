//! Durable storage for agent runs and the event log.
//!
//! The store handle is constructed once by the composition root and passed
//! in everywhere it is needed; nothing holds it as ambient global state.
//! All run state transitions are single conditional UPDATE statements so
//! that "claim succeeds at most once" and "complete/cancel is idempotent"
//! hold across concurrent callers without any application-level lock.

mod events;
mod runs;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::info;

pub use runs::{ClaimOutcome, FinalizeOutcome};

pub struct RunStore {
    db: Arc<Mutex<Connection>>,
}

impl RunStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Connection::open(path)?;
        info!("Run store opened at {}", path.display());
        Self::with_connection(db)
    }

    /// In-memory store for tests and ephemeral deployments.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(db: Connection) -> Result<Self> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS agent_runs (
                run_id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                org_id TEXT NOT NULL,
                requested_by TEXT NOT NULL,
                mode TEXT NOT NULL,
                prompt TEXT NOT NULL,
                system_prompt TEXT,
                chat_message_id TEXT,
                model TEXT NOT NULL,
                status TEXT NOT NULL,
                runner_id TEXT,
                run_result_status TEXT,
                run_messages TEXT,
                run_changes TEXT,
                run_error TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_ms INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                aggregate_type TEXT NOT NULL,
                aggregate_id TEXT NOT NULL,
                org_id TEXT NOT NULL,
                trace_id TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_events_org_cursor
             ON events (org_id, created_ms, id)",
            [],
        )?;

        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_agent_runs_thread
             ON agent_runs (thread_id, created_at)",
            [],
        )?;

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    pub(crate) fn db(&self) -> &Arc<Mutex<Connection>> {
        &self.db
    }
}
