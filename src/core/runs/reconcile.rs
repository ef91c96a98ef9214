//! Completion reconciliation: turns a runner's raw report into the final
//! run outcome, applying side effects (graph bundle, transcript) before the
//! lifecycle manager persists the terminal state.

use tracing::warn;

use crate::core::events::{AGGREGATE_THREAD, EventLog, NewEvent, types};
use crate::core::graph::{SharedActionStore, SharedGraphStore};
use crate::core::runs::messages::{
    DEFAULT_SUCCESS_MESSAGE, RECONCILE_FAILURE_PREFIX, is_reconcile_failure, normalize_messages,
};
use crate::core::runs::types::{AgentRun, CompleteRun, ResultStatus, RunError, RunOutcome};

pub struct Reconciler {
    graph: SharedGraphStore,
    actions: SharedActionStore,
    events: EventLog,
}

impl Reconciler {
    pub fn new(graph: SharedGraphStore, actions: SharedActionStore, events: EventLog) -> Self {
        Self {
            graph,
            actions,
            events,
        }
    }

    /// Reconcile a completion report against the system graph and thread
    /// transcript. Returns the outcome to persist; a graph-apply failure
    /// downgrades a reported success to failed rather than erroring out.
    pub async fn reconcile(
        &self,
        run: &AgentRun,
        request: &CompleteRun,
    ) -> Result<RunOutcome, RunError> {
        let mut status = request.status;
        let mut error = request.error.clone();

        let mut messages: Vec<String> = normalize_messages(&request.messages)
            .into_iter()
            .filter(|m| !is_reconcile_failure(m))
            .collect();
        if messages.is_empty() {
            messages = synthesize_messages(request, &error);
        }

        let changes = request.changes.clone();

        if status == ResultStatus::Success
            && !changes.is_empty()
            && !request.bundle_files.is_empty()
        {
            match self.apply_bundle(run, request).await {
                Ok(()) => {
                    let payload = serde_json::json!({
                        "thread_id": run.thread_id,
                        "run_id": run.run_id,
                        "change_count": changes.len(),
                    });
                    self.publish(run, types::MATRIX_CHANGED, payload).await;
                }
                Err(reason) => {
                    status = ResultStatus::Failed;
                    let notice = format!("{RECONCILE_FAILURE_PREFIX} {reason}");
                    error = Some(match error {
                        Some(existing) => format!("{existing}; {notice}"),
                        None => notice.clone(),
                    });
                    messages.push(notice);
                }
            }
        }

        let outcome = RunOutcome {
            status,
            messages,
            changes,
            error,
        };
        self.record_transcript(run, &outcome).await;
        Ok(outcome)
    }

    /// Stage the bundle into a scratch directory and hand it to the graph
    /// store. The directory is removed on every exit path.
    async fn apply_bundle(&self, run: &AgentRun, request: &CompleteRun) -> Result<(), String> {
        let staging = tempfile::tempdir().map_err(|err| format!("staging bundle: {err}"))?;
        for file in &request.bundle_files {
            let path = staging.path().join(&file.path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| format!("staging '{}': {err}", file.path))?;
            }
            std::fs::write(&path, &file.content)
                .map_err(|err| format!("staging '{}': {err}", file.path))?;
        }

        self.graph
            .apply_bundle(&run.thread_id, staging.path(), &request.bundle_files)
            .await
            .map_err(|err| err.reason)
    }

    /// Write the user-visible transcript. Failures here are logged and never
    /// change the already-determined outcome.
    async fn record_transcript(&self, run: &AgentRun, outcome: &RunOutcome) {
        let action_id = match self
            .actions
            .begin_action(&run.thread_id, &run.requested_by)
            .await
        {
            Ok(id) => id,
            Err(err) => {
                warn!(run_id = %run.run_id, "Transcript action failed: {err:#}");
                return;
            }
        };

        let body = outcome.messages.join("\n\n");
        if let Err(err) = self
            .actions
            .append_response_message(&action_id, &run.thread_id, &body)
            .await
        {
            warn!(run_id = %run.run_id, "Transcript response failed: {err:#}");
            if let Err(err) = self.actions.commit_empty_action(&action_id).await {
                warn!(run_id = %run.run_id, "Transcript commit failed: {err:#}");
            }
            return;
        }

        let payload = serde_json::json!({
            "thread_id": run.thread_id,
            "run_id": run.run_id,
            "action_id": action_id,
        });
        self.publish(run, types::CHAT_FINISHED, payload).await;

        if outcome.status == ResultStatus::Success && !outcome.changes.is_empty() {
            if let Err(err) = self
                .actions
                .append_changes(&action_id, &run.thread_id, &outcome.changes)
                .await
            {
                warn!(run_id = %run.run_id, "Transcript changes failed: {err:#}");
            }
        }
    }

    async fn publish(&self, run: &AgentRun, event_type: &str, payload: serde_json::Value) {
        let event = NewEvent {
            event_type: event_type.to_string(),
            aggregate_type: AGGREGATE_THREAD.to_string(),
            aggregate_id: run.thread_id.clone(),
            org_id: run.org_id.clone(),
            trace_id: run.run_id.clone(),
            payload,
        };
        if let Err(err) = self.events.append(event).await {
            warn!(run_id = %run.run_id, "Event append failed: {err:#}");
        }
    }
}

fn synthesize_messages(request: &CompleteRun, error: &Option<String>) -> Vec<String> {
    if !request.changes.is_empty() {
        return request.changes.iter().map(|c| c.summary_line()).collect();
    }
    match (request.status, error) {
        (ResultStatus::Failed, Some(reason)) => vec![reason.clone()],
        (ResultStatus::Failed, None) => vec!["Execution failed.".to_string()],
        (ResultStatus::Success, _) => vec![DEFAULT_SUCCESS_MESSAGE.to_string()],
    }
}
