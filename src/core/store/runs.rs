use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};

use super::RunStore;
use crate::core::runs::types::{
    AgentRun, PlanChange, ResultStatus, RunMode, RunOutcome, RunStatus,
};

const RUN_COLUMNS: &str = "run_id, thread_id, project_id, org_id, requested_by, mode, prompt,
     system_prompt, chat_message_id, model, status, runner_id, run_result_status,
     run_messages, run_changes, run_error, created_at, started_at, completed_at";

/// Result of the conditional queued -> running transition.
#[derive(Debug)]
pub enum ClaimOutcome {
    Claimed(AgentRun),
    Unavailable,
    NotFound,
}

/// Result of a conditional transition into a terminal state.
#[derive(Debug)]
pub enum FinalizeOutcome {
    Finalized(AgentRun),
    AlreadyFinalized,
    NotFound,
}

impl RunStore {
    pub async fn insert_run(&self, run: &AgentRun) -> Result<()> {
        let db = self.db().lock().await;
        db.execute(
            "INSERT INTO agent_runs (run_id, thread_id, project_id, org_id, requested_by, mode,
                prompt, system_prompt, chat_message_id, model, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                run.run_id,
                run.thread_id,
                run.project_id,
                run.org_id,
                run.requested_by,
                run.mode.as_str(),
                run.prompt,
                run.system_prompt,
                run.chat_message_id,
                run.model,
                run.status.as_str(),
                run.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<AgentRun>> {
        let db = self.db().lock().await;
        fetch_run(&db, run_id)
    }

    pub async fn list_runs_for_thread(&self, thread_id: &str, limit: usize) -> Result<Vec<AgentRun>> {
        let db = self.db().lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM agent_runs
             WHERE thread_id = ?1 ORDER BY created_at DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![thread_id, limit as i64], raw_run_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_run()?);
        }
        Ok(out)
    }

    /// Claim is the sole concurrency-control point: the UPDATE only fires
    /// while the run is still `queued`, so at most one caller wins.
    pub async fn claim_run(
        &self,
        run_id: &str,
        runner_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        let db = self.db().lock().await;
        let changed = db.execute(
            "UPDATE agent_runs
             SET status = 'running', runner_id = ?2, started_at = ?3
             WHERE run_id = ?1 AND status = 'queued'",
            params![run_id, runner_id, now.to_rfc3339()],
        )?;

        if changed == 1 {
            let run = fetch_run(&db, run_id)?
                .ok_or_else(|| anyhow!("run '{run_id}' vanished after claim"))?;
            return Ok(ClaimOutcome::Claimed(run));
        }
        match fetch_run(&db, run_id)? {
            Some(_) => Ok(ClaimOutcome::Unavailable),
            None => Ok(ClaimOutcome::NotFound),
        }
    }

    /// Conditional transition into success/failed. Refuses to touch a run
    /// that some other caller already finalized.
    pub async fn finalize_run(
        &self,
        run_id: &str,
        outcome: &RunOutcome,
        runner_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<FinalizeOutcome> {
        let db = self.db().lock().await;
        let changed = db.execute(
            "UPDATE agent_runs
             SET status = ?2, run_result_status = ?3, run_messages = ?4, run_changes = ?5,
                 run_error = COALESCE(?6, run_error), runner_id = COALESCE(?7, runner_id),
                 completed_at = ?8
             WHERE run_id = ?1 AND status IN ('queued', 'running')",
            params![
                run_id,
                outcome.status.terminal_run_status().as_str(),
                outcome.status.as_str(),
                serde_json::to_string(&outcome.messages)?,
                serde_json::to_string(&outcome.changes)?,
                outcome.error,
                runner_id,
                now.to_rfc3339(),
            ],
        )?;

        finalize_outcome(&db, run_id, changed)
    }

    /// Conditional transition into cancelled. The reason only lands in
    /// run_error when nothing set it earlier.
    pub async fn cancel_run(
        &self,
        run_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<FinalizeOutcome> {
        let db = self.db().lock().await;
        let changed = db.execute(
            "UPDATE agent_runs
             SET status = 'cancelled', run_result_status = 'failed',
                 run_error = COALESCE(run_error, ?2), completed_at = ?3
             WHERE run_id = ?1 AND status IN ('queued', 'running')",
            params![run_id, reason, now.to_rfc3339()],
        )?;

        finalize_outcome(&db, run_id, changed)
    }
}

fn finalize_outcome(db: &Connection, run_id: &str, changed: usize) -> Result<FinalizeOutcome> {
    if changed == 1 {
        let run =
            fetch_run(db, run_id)?.ok_or_else(|| anyhow!("run '{run_id}' vanished after update"))?;
        return Ok(FinalizeOutcome::Finalized(run));
    }
    match fetch_run(db, run_id)? {
        Some(_) => Ok(FinalizeOutcome::AlreadyFinalized),
        None => Ok(FinalizeOutcome::NotFound),
    }
}

fn fetch_run(db: &Connection, run_id: &str) -> Result<Option<AgentRun>> {
    let mut stmt = db.prepare(&format!(
        "SELECT {RUN_COLUMNS} FROM agent_runs WHERE run_id = ?1 LIMIT 1"
    ))?;
    let mut rows = stmt.query(params![run_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(raw_run_from_row(row)?.into_run()?)),
        None => Ok(None),
    }
}

/// Raw column values; enum and JSON decoding happens outside the rusqlite
/// row closure so parse failures surface as real errors.
struct RawRun {
    run_id: String,
    thread_id: String,
    project_id: String,
    org_id: String,
    requested_by: String,
    mode: String,
    prompt: String,
    system_prompt: Option<String>,
    chat_message_id: Option<String>,
    model: String,
    status: String,
    runner_id: Option<String>,
    run_result_status: Option<String>,
    run_messages: Option<String>,
    run_changes: Option<String>,
    run_error: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

fn raw_run_from_row(row: &Row<'_>) -> rusqlite::Result<RawRun> {
    Ok(RawRun {
        run_id: row.get(0)?,
        thread_id: row.get(1)?,
        project_id: row.get(2)?,
        org_id: row.get(3)?,
        requested_by: row.get(4)?,
        mode: row.get(5)?,
        prompt: row.get(6)?,
        system_prompt: row.get(7)?,
        chat_message_id: row.get(8)?,
        model: row.get(9)?,
        status: row.get(10)?,
        runner_id: row.get(11)?,
        run_result_status: row.get(12)?,
        run_messages: row.get(13)?,
        run_changes: row.get(14)?,
        run_error: row.get(15)?,
        created_at: row.get(16)?,
        started_at: row.get(17)?,
        completed_at: row.get(18)?,
    })
}

impl RawRun {
    fn into_run(self) -> Result<AgentRun> {
        let mode = RunMode::from_status(&self.mode)
            .ok_or_else(|| anyhow!("unknown run mode '{}'", self.mode))?;
        let status = RunStatus::from_status(&self.status)
            .ok_or_else(|| anyhow!("unknown run status '{}'", self.status))?;
        let run_result_status = match self.run_result_status.as_deref() {
            Some(value) => Some(
                ResultStatus::from_status(value)
                    .ok_or_else(|| anyhow!("unknown result status '{value}'"))?,
            ),
            None => None,
        };
        let run_messages: Option<Vec<String>> = self
            .run_messages
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .context("decoding run_messages")?;
        let run_changes: Option<Vec<PlanChange>> = self
            .run_changes
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .context("decoding run_changes")?;

        Ok(AgentRun {
            run_id: self.run_id,
            thread_id: self.thread_id,
            project_id: self.project_id,
            org_id: self.org_id,
            requested_by: self.requested_by,
            mode,
            prompt: self.prompt,
            system_prompt: self.system_prompt,
            chat_message_id: self.chat_message_id,
            model: self.model,
            status,
            runner_id: self.runner_id,
            run_result_status,
            run_messages,
            run_changes,
            run_error: self.run_error,
            created_at: parse_ts(&self.created_at)?,
            started_at: self.started_at.as_deref().map(parse_ts).transpose()?,
            completed_at: self.completed_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("invalid timestamp '{value}'"))?
        .with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_run(run_id: &str) -> AgentRun {
        AgentRun {
            run_id: run_id.to_string(),
            thread_id: "thread-1".to_string(),
            project_id: "project-1".to_string(),
            org_id: "org-1".to_string(),
            requested_by: "user-1".to_string(),
            mode: RunMode::Direct,
            prompt: "Add a load balancer".to_string(),
            system_prompt: None,
            chat_message_id: None,
            model: "gpt-5".to_string(),
            status: RunStatus::Queued,
            runner_id: None,
            run_result_status: None,
            run_messages: None,
            run_changes: None,
            run_error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    fn outcome(status: ResultStatus, messages: &[&str], error: Option<&str>) -> RunOutcome {
        RunOutcome {
            status,
            messages: messages.iter().map(ToString::to_string).collect(),
            changes: Vec::new(),
            error: error.map(ToString::to_string),
        }
    }

    #[tokio::test]
    async fn insert_then_get_roundtrips_the_run() {
        let store = RunStore::open_in_memory().unwrap();
        store.insert_run(&sample_run("R1")).await.unwrap();

        let run = store.get_run("R1").await.unwrap().expect("run exists");
        assert_eq!(run.status, RunStatus::Queued);
        assert_eq!(run.mode, RunMode::Direct);
        assert!(run.completed_at.is_none());
        assert!(store.get_run("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_succeeds_exactly_once() {
        let store = RunStore::open_in_memory().unwrap();
        store.insert_run(&sample_run("R1")).await.unwrap();

        let first = store.claim_run("R1", "runner-1", Utc::now()).await.unwrap();
        let ClaimOutcome::Claimed(run) = first else {
            panic!("first claim should win");
        };
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.runner_id.as_deref(), Some("runner-1"));
        assert!(run.started_at.is_some());

        let second = store.claim_run("R1", "runner-2", Utc::now()).await.unwrap();
        assert!(matches!(second, ClaimOutcome::Unavailable));

        let missing = store.claim_run("nope", "runner-3", Utc::now()).await.unwrap();
        assert!(matches!(missing, ClaimOutcome::NotFound));
    }

    #[tokio::test]
    async fn finalize_is_idempotent_and_preserves_the_first_result() {
        let store = RunStore::open_in_memory().unwrap();
        store.insert_run(&sample_run("R1")).await.unwrap();
        store.claim_run("R1", "runner-1", Utc::now()).await.unwrap();

        let first = store
            .finalize_run(
                "R1",
                &outcome(ResultStatus::Success, &["Done."], None),
                None,
                Utc::now(),
            )
            .await
            .unwrap();
        let FinalizeOutcome::Finalized(run) = first else {
            panic!("first finalize should succeed");
        };
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.run_messages.as_deref(), Some(&["Done.".to_string()][..]));

        let second = store
            .finalize_run(
                "R1",
                &outcome(ResultStatus::Failed, &["Overwritten?"], Some("late")),
                None,
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(matches!(second, FinalizeOutcome::AlreadyFinalized));

        let run = store.get_run("R1").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.run_messages.as_deref(), Some(&["Done.".to_string()][..]));
        assert!(run.run_error.is_none());
    }

    #[tokio::test]
    async fn cancel_sets_failed_result_and_keeps_existing_error() {
        let store = RunStore::open_in_memory().unwrap();
        store.insert_run(&sample_run("R1")).await.unwrap();

        let cancelled = store
            .cancel_run("R1", "user requested", Utc::now())
            .await
            .unwrap();
        let FinalizeOutcome::Finalized(run) = cancelled else {
            panic!("cancel on queued run should succeed");
        };
        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.run_result_status, Some(ResultStatus::Failed));
        assert_eq!(run.run_error.as_deref(), Some("user requested"));
        assert!(run.completed_at.is_some());

        let again = store.cancel_run("R1", "too late", Utc::now()).await.unwrap();
        assert!(matches!(again, FinalizeOutcome::AlreadyFinalized));
        let run = store.get_run("R1").await.unwrap().unwrap();
        assert_eq!(run.run_error.as_deref(), Some("user requested"));
    }

    #[tokio::test]
    async fn finalize_after_cancel_reports_conflict() {
        let store = RunStore::open_in_memory().unwrap();
        store.insert_run(&sample_run("R1")).await.unwrap();
        store.cancel_run("R1", "user requested", Utc::now()).await.unwrap();

        let late = store
            .finalize_run(
                "R1",
                &outcome(ResultStatus::Success, &["Done."], None),
                None,
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(matches!(late, FinalizeOutcome::AlreadyFinalized));
        let run = store.get_run("R1").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn list_runs_for_thread_is_newest_first() {
        let store = RunStore::open_in_memory().unwrap();
        let mut older = sample_run("R1");
        older.created_at = Utc::now() - chrono::Duration::seconds(10);
        store.insert_run(&older).await.unwrap();
        store.insert_run(&sample_run("R2")).await.unwrap();

        let mut other_thread = sample_run("R3");
        other_thread.thread_id = "thread-2".to_string();
        store.insert_run(&other_thread).await.unwrap();

        let runs = store.list_runs_for_thread("thread-1", 10).await.unwrap();
        assert_eq!(
            runs.iter().map(|r| r.run_id.as_str()).collect::<Vec<_>>(),
            vec!["R2", "R1"]
        );
    }
}
