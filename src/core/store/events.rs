use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::params;

use super::RunStore;
use crate::core::events::{Cursor, Event, NewEvent};

impl RunStore {
    /// Append one event. The stored creation milliseconds are clamped to be
    /// monotonically non-decreasing across the whole log, so the (ms, id)
    /// cursor never moves backwards even if the wall clock does.
    pub async fn append_event(&self, event: NewEvent) -> Result<Event> {
        let db = self.db().lock().await;
        let now = Utc::now();
        db.execute(
            "INSERT INTO events (created_ms, event_type, aggregate_type, aggregate_id,
                org_id, trace_id, payload_json, created_at)
             VALUES (MAX(?1, COALESCE((SELECT MAX(created_ms) FROM events), 0)),
                     ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                now.timestamp_millis(),
                event.event_type,
                event.aggregate_type,
                event.aggregate_id,
                event.org_id,
                event.trace_id,
                serde_json::to_string(&event.payload)?,
                now.to_rfc3339(),
            ],
        )?;
        let id = db.last_insert_rowid();
        let ms: i64 = db.query_row(
            "SELECT created_ms FROM events WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;

        Ok(Event {
            cursor: Cursor::new(ms, id),
            event_type: event.event_type,
            aggregate_type: event.aggregate_type,
            aggregate_id: event.aggregate_id,
            org_id: event.org_id,
            trace_id: event.trace_id,
            payload: event.payload,
            created_at: now,
        })
    }

    /// Keyset page of events for one tenant, strictly after `since`, in
    /// ascending (created_ms, id) order.
    pub async fn list_events(
        &self,
        org_id: &str,
        since: Option<Cursor>,
        limit: usize,
    ) -> Result<Vec<Event>> {
        let db = self.db().lock().await;
        let since = since.unwrap_or(Cursor::new(-1, -1));
        let mut stmt = db.prepare(
            "SELECT id, created_ms, event_type, aggregate_type, aggregate_id,
                    org_id, trace_id, payload_json, created_at
             FROM events
             WHERE org_id = ?1
               AND (created_ms > ?2 OR (created_ms = ?2 AND id > ?3))
             ORDER BY created_ms ASC, id ASC
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![org_id, since.ms, since.seq, limit as i64],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                ))
            },
        )?;

        let mut out = Vec::new();
        for row in rows {
            let (id, ms, event_type, aggregate_type, aggregate_id, org, trace_id, payload, created_at) =
                row?;
            out.push(Event {
                cursor: Cursor::new(ms, id),
                event_type,
                aggregate_type,
                aggregate_id,
                org_id: org,
                trace_id,
                payload: serde_json::from_str(&payload).context("decoding event payload")?,
                created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                    .with_context(|| format!("invalid event timestamp '{created_at}'"))?
                    .with_timezone(&Utc),
            });
        }
        Ok(out)
    }
}
