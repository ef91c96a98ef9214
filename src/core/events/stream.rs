//! Polling dispatcher that turns the event log into a live per-tenant feed.
//!
//! Delivery is at-least-once: if a send fails or the subscriber drops, the
//! subscriber reconnects with its last cursor and the log replays from
//! there. The dispatcher itself keeps no state beyond the loop-local cursor.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{Cursor, Event, EventLog};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Clone)]
pub struct StreamDispatcher {
    log: EventLog,
    poll_interval: Duration,
    page_size: usize,
}

impl StreamDispatcher {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            poll_interval: DEFAULT_POLL_INTERVAL,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_timing(log: EventLog, poll_interval: Duration, page_size: usize) -> Self {
        Self {
            log,
            poll_interval,
            page_size,
        }
    }

    /// Pump events for one tenant into `tx` until the receiver goes away.
    /// `since` is exclusive: the event at that cursor is not re-sent.
    pub async fn run(&self, org_id: &str, since: Option<Cursor>, tx: mpsc::Sender<Event>) {
        let mut cursor = since;
        loop {
            if tx.is_closed() {
                debug!(org_id, "Event subscriber disconnected");
                return;
            }

            let page = match self.log.query(org_id, cursor, self.page_size).await {
                Ok(page) => page,
                Err(err) => {
                    warn!(org_id, "Event poll failed: {err:#}");
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
            };

            if page.is_empty() {
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }

            for event in page {
                let next = event.cursor;
                if tx.send(event).await.is_err() {
                    return;
                }
                cursor = Some(next);
            }
            // A full page means more may be waiting; drain before sleeping.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::{AGGREGATE_RUN, NewEvent, types};
    use crate::core::store::RunStore;
    use std::sync::Arc;

    fn new_event(org_id: &str, event_type: &str) -> NewEvent {
        NewEvent {
            event_type: event_type.to_string(),
            aggregate_type: AGGREGATE_RUN.to_string(),
            aggregate_id: "R1".to_string(),
            org_id: org_id.to_string(),
            trace_id: "trace-1".to_string(),
            payload: serde_json::json!({}),
        }
    }

    fn dispatcher(log: EventLog) -> StreamDispatcher {
        StreamDispatcher::with_timing(log, Duration::from_millis(5), 2)
    }

    #[tokio::test]
    async fn delivers_backlog_then_new_events_in_order() {
        let store = Arc::new(RunStore::open_in_memory().unwrap());
        let log = EventLog::new(store);
        log.append(new_event("org-1", types::RUN_STARTED)).await.unwrap();
        log.append(new_event("org-1", types::RUN_PROGRESS)).await.unwrap();
        log.append(new_event("org-1", types::RUN_COMPLETED)).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let pump = {
            let dispatcher = dispatcher(log.clone());
            tokio::spawn(async move { dispatcher.run("org-1", None, tx).await })
        };

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(rx.recv().await.expect("event delivered").event_type);
        }
        assert_eq!(
            seen,
            vec![types::RUN_STARTED, types::RUN_PROGRESS, types::RUN_COMPLETED]
        );

        log.append(new_event("org-1", types::CHAT_FINISHED)).await.unwrap();
        let late = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("dispatcher keeps polling")
            .expect("channel still open");
        assert_eq!(late.event_type, types::CHAT_FINISHED);

        drop(rx);
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn resumes_strictly_after_the_given_cursor() {
        let store = Arc::new(RunStore::open_in_memory().unwrap());
        let log = EventLog::new(store);
        let first = log.append(new_event("org-1", types::RUN_STARTED)).await.unwrap();
        log.append(new_event("org-1", types::RUN_COMPLETED)).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let pump = {
            let dispatcher = dispatcher(log);
            tokio::spawn(async move { dispatcher.run("org-1", Some(first.cursor), tx).await })
        };

        let event = rx.recv().await.expect("one replayed event");
        assert_eq!(event.event_type, types::RUN_COMPLETED);

        drop(rx);
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn stops_when_the_subscriber_goes_away() {
        let store = Arc::new(RunStore::open_in_memory().unwrap());
        let log = EventLog::new(store);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let dispatcher = dispatcher(log);
        tokio::time::timeout(
            Duration::from_secs(1),
            dispatcher.run("org-1", None, tx),
        )
        .await
        .expect("run returns once the channel is closed");
    }

    #[tokio::test]
    async fn tenants_never_see_each_other() {
        let store = Arc::new(RunStore::open_in_memory().unwrap());
        let log = EventLog::new(store);
        log.append(new_event("org-2", types::RUN_STARTED)).await.unwrap();
        log.append(new_event("org-1", types::RUN_STARTED)).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let pump = {
            let dispatcher = dispatcher(log);
            tokio::spawn(async move { dispatcher.run("org-1", None, tx).await })
        };

        let event = rx.recv().await.expect("event delivered");
        assert_eq!(event.org_id, "org-1");

        drop(rx);
        pump.await.unwrap();
    }
}
