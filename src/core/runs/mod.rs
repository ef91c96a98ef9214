//! Agent-run lifecycle: queued -> running -> {success, failed}, with
//! cancellation allowed from either non-terminal state. The store's
//! conditional updates are the sole arbiter of every transition; this
//! module sequences validation, reconciliation, and event publication
//! around them.

pub mod messages;
pub mod reconcile;
pub mod types;

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::events::{AGGREGATE_RUN, EventLog, NewEvent, types as event_types};
use crate::core::store::{ClaimOutcome, FinalizeOutcome, RunStore};
use reconcile::Reconciler;
use types::{AgentRun, CompleteRun, EnqueueRun, RunError, RunStatus};

pub struct RunCoordinator {
    store: Arc<RunStore>,
    events: EventLog,
    reconciler: Reconciler,
}

impl RunCoordinator {
    pub fn new(store: Arc<RunStore>, events: EventLog, reconciler: Reconciler) -> Self {
        Self {
            store,
            events,
            reconciler,
        }
    }

    /// Create a run in `queued` state and announce it.
    pub async fn enqueue(&self, request: EnqueueRun) -> Result<AgentRun, RunError> {
        if request.prompt.trim().is_empty() {
            return Err(RunError::InvalidRequest("prompt is required".to_string()));
        }

        let now = Utc::now();
        let run = AgentRun {
            run_id: Uuid::new_v4().to_string(),
            thread_id: request.thread_id,
            project_id: request.project_id,
            org_id: request.org_id,
            requested_by: request.requested_by,
            mode: request.mode,
            prompt: request.prompt,
            system_prompt: request.system_prompt,
            chat_message_id: request.chat_message_id,
            model: request.model,
            status: RunStatus::Queued,
            runner_id: None,
            run_result_status: None,
            run_messages: None,
            run_changes: None,
            run_error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        };
        self.store.insert_run(&run).await?;
        info!(run_id = %run.run_id, thread_id = %run.thread_id, "Run enqueued");

        self.publish(&run, event_types::RUN_STARTED).await;
        self.publish(&run, event_types::RUN_WAITING_INPUT).await;
        Ok(run)
    }

    pub async fn get(&self, run_id: &str) -> Result<AgentRun, RunError> {
        self.store.get_run(run_id).await?.ok_or(RunError::NotFound)
    }

    pub async fn list_for_thread(
        &self,
        thread_id: &str,
        limit: usize,
    ) -> Result<Vec<AgentRun>, RunError> {
        Ok(self.store.list_runs_for_thread(thread_id, limit).await?)
    }

    /// Move a queued run to `running` on behalf of a runner. At most one
    /// caller wins; everyone else sees NotClaimable.
    pub async fn claim(&self, run_id: &str, runner_id: &str) -> Result<AgentRun, RunError> {
        match self.store.claim_run(run_id, runner_id, Utc::now()).await? {
            ClaimOutcome::Claimed(run) => {
                info!(run_id = %run.run_id, runner_id, "Run claimed");
                self.publish(&run, event_types::RUN_PROGRESS).await;
                Ok(run)
            }
            ClaimOutcome::Unavailable => Err(RunError::NotClaimable),
            ClaimOutcome::NotFound => Err(RunError::NotFound),
        }
    }

    /// Finalize a run with the runner's report. Reconciliation side effects
    /// (bundle apply, transcript) happen before the conditional persist, so
    /// a run that lost a cancel race still never flips terminal state: the
    /// store refuses the update and the caller sees AlreadyFinalized.
    pub async fn complete(
        &self,
        run_id: &str,
        request: CompleteRun,
    ) -> Result<AgentRun, RunError> {
        if request.messages.is_empty() {
            return Err(RunError::InvalidRequest(
                "completion requires at least one message".to_string(),
            ));
        }
        for change in &request.changes {
            change.validate().map_err(RunError::InvalidRequest)?;
        }
        for file in &request.bundle_files {
            file.validate().map_err(RunError::InvalidRequest)?;
        }

        let run = self.get(run_id).await?;
        if run.status.is_terminal() {
            return Err(RunError::AlreadyFinalized);
        }

        let outcome = self.reconciler.reconcile(&run, &request).await?;
        let persisted = self
            .store
            .finalize_run(run_id, &outcome, request.runner_id.as_deref(), Utc::now())
            .await?;
        match persisted {
            FinalizeOutcome::Finalized(run) => {
                info!(run_id = %run.run_id, status = run.status.as_str(), "Run finalized");
                let event_type = match run.status {
                    RunStatus::Failed => event_types::RUN_FAILED,
                    _ => event_types::RUN_COMPLETED,
                };
                self.publish(&run, event_type).await;
                Ok(run)
            }
            FinalizeOutcome::AlreadyFinalized => Err(RunError::AlreadyFinalized),
            FinalizeOutcome::NotFound => Err(RunError::NotFound),
        }
    }

    /// Cancel a non-terminal run. The reason lands in run_error only when
    /// nothing set one earlier.
    pub async fn cancel(&self, run_id: &str, reason: &str) -> Result<AgentRun, RunError> {
        match self.store.cancel_run(run_id, reason, Utc::now()).await? {
            FinalizeOutcome::Finalized(run) => {
                info!(run_id = %run.run_id, "Run cancelled");
                self.publish(&run, event_types::RUN_CANCELLED).await;
                Ok(run)
            }
            FinalizeOutcome::AlreadyFinalized => Err(RunError::AlreadyFinalized),
            FinalizeOutcome::NotFound => Err(RunError::NotFound),
        }
    }

    /// Best effort: a failed append is logged and never rolls back the
    /// state transition it announces.
    async fn publish(&self, run: &AgentRun, event_type: &str) {
        let event = NewEvent {
            event_type: event_type.to_string(),
            aggregate_type: AGGREGATE_RUN.to_string(),
            aggregate_id: run.run_id.clone(),
            org_id: run.org_id.clone(),
            trace_id: run.run_id.clone(),
            payload: serde_json::json!({
                "run_id": run.run_id,
                "thread_id": run.thread_id,
                "status": run.status.as_str(),
                "mode": run.mode.as_str(),
            }),
        };
        if let Err(err) = self.events.append(event).await {
            warn!(run_id = %run.run_id, event_type, "Event append failed: {err:#}");
        }
    }
}
