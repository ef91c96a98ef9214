use chrono::{DateTime, Utc};

/// How the agent is asked to act on the thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Direct,
    Plan,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Direct => "direct",
            RunMode::Plan => "plan",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "direct" => Some(RunMode::Direct),
            "plan" => Some(RunMode::Plan),
            _ => None,
        }
    }
}

/// Lifecycle status of a run. Transitions are one-directional:
/// queued -> running -> {success, failed}, and queued|running -> cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(RunStatus::Queued),
            "running" => Some(RunStatus::Running),
            "success" => Some(RunStatus::Success),
            "failed" => Some(RunStatus::Failed),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// What the runner (or the reconciler, after downgrading) reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Failed,
}

impl ResultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultStatus::Success => "success",
            ResultStatus::Failed => "failed",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "success" => Some(ResultStatus::Success),
            "failed" => Some(ResultStatus::Failed),
            _ => None,
        }
    }

    pub fn terminal_run_status(self) -> RunStatus {
        match self {
            ResultStatus::Success => RunStatus::Success,
            ResultStatus::Failed => RunStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Create,
    Update,
    Delete,
}

impl ChangeOp {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeOp::Create => "create",
            ChangeOp::Update => "update",
            ChangeOp::Delete => "delete",
        }
    }
}

/// One graph mutation produced by a run. The target key and the snapshots
/// stay opaque structured values; only the reconciler replays them.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PlanChange {
    pub entity: String,
    pub op: ChangeOp,
    pub target: serde_json::Value,
    #[serde(default)]
    pub previous: Option<serde_json::Value>,
    #[serde(default)]
    pub current: Option<serde_json::Value>,
}

impl PlanChange {
    /// Create must carry no previous snapshot; Delete no current one.
    pub fn validate(&self) -> Result<(), String> {
        match self.op {
            ChangeOp::Create if self.previous.is_some() => Err(format!(
                "create change for '{}' must not carry a previous snapshot",
                self.entity
            )),
            ChangeOp::Delete if self.current.is_some() => Err(format!(
                "delete change for '{}' must not carry a current snapshot",
                self.entity
            )),
            _ => Ok(()),
        }
    }

    pub fn summary_line(&self) -> String {
        let target = match &self.target {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        format!("{} {} {}", self.op.as_str(), self.entity, target)
    }
}

/// One file of the bundle a runner produced for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BundleFile {
    pub path: String,
    pub content: String,
}

impl BundleFile {
    /// Bundle paths are staged into a scratch directory, so they must stay
    /// relative and free of parent traversal.
    pub fn validate(&self) -> Result<(), String> {
        let path = self.path.trim();
        if path.is_empty() {
            return Err("bundle file path is required".to_string());
        }
        if path.starts_with('/') || path.starts_with('\\') {
            return Err(format!("bundle file path '{path}' must be relative"));
        }
        if path
            .split(['/', '\\'])
            .any(|segment| segment == ".." || segment.is_empty())
        {
            return Err(format!("bundle file path '{path}' is not allowed"));
        }
        Ok(())
    }
}

/// One attempt to have an agent act on a thread.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AgentRun {
    pub run_id: String,
    pub thread_id: String,
    pub project_id: String,
    pub org_id: String,
    pub requested_by: String,
    pub mode: RunMode,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub chat_message_id: Option<String>,
    pub model: String,
    pub status: RunStatus,
    pub runner_id: Option<String>,
    pub run_result_status: Option<ResultStatus>,
    pub run_messages: Option<Vec<String>>,
    pub run_changes: Option<Vec<PlanChange>>,
    pub run_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Request to create a run in `queued` state.
#[derive(Debug, Clone)]
pub struct EnqueueRun {
    pub thread_id: String,
    pub project_id: String,
    pub org_id: String,
    pub requested_by: String,
    pub mode: RunMode,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub chat_message_id: Option<String>,
    pub model: String,
}

/// Request to finalize a run with the runner's result.
#[derive(Debug, Clone)]
pub struct CompleteRun {
    pub status: ResultStatus,
    pub messages: Vec<String>,
    pub changes: Vec<PlanChange>,
    pub error: Option<String>,
    pub runner_id: Option<String>,
    pub bundle_files: Vec<BundleFile>,
}

/// Finalized result the reconciler hands back for persistence.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: ResultStatus,
    pub messages: Vec<String>,
    pub changes: Vec<PlanChange>,
    pub error: Option<String>,
}

/// Why a lifecycle operation could not be performed.
#[derive(Debug)]
pub enum RunError {
    NotFound,
    NotClaimable,
    AlreadyFinalized,
    InvalidRequest(String),
    Storage(anyhow::Error),
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::NotFound => f.write_str("run not found"),
            RunError::NotClaimable => f.write_str("run is not in a claimable state"),
            RunError::AlreadyFinalized => f.write_str("run is already finalized"),
            RunError::InvalidRequest(reason) => write!(f, "invalid request: {reason}"),
            RunError::Storage(err) => write!(f, "storage failure: {err}"),
        }
    }
}

impl std::error::Error for RunError {}

impl From<anyhow::Error> for RunError {
    fn from(err: anyhow::Error) -> Self {
        RunError::Storage(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_roundtrips_through_snake_case() {
        for status in [
            RunStatus::Queued,
            RunStatus::Running,
            RunStatus::Success,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(RunStatus::from_status(status.as_str()), Some(status));
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert_eq!(RunStatus::from_status("paused"), None);
    }

    #[test]
    fn terminal_statuses_are_exactly_success_failed_cancelled() {
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Success.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn create_change_rejects_previous_snapshot() {
        let change = PlanChange {
            entity: "nodes".to_string(),
            op: ChangeOp::Create,
            target: serde_json::json!({"id": "n1"}),
            previous: Some(serde_json::json!({"name": "old"})),
            current: Some(serde_json::json!({"name": "new"})),
        };
        assert!(change.validate().is_err());
    }

    #[test]
    fn delete_change_rejects_current_snapshot() {
        let change = PlanChange {
            entity: "edges".to_string(),
            op: ChangeOp::Delete,
            target: serde_json::json!("e1"),
            previous: Some(serde_json::json!({"from": "a"})),
            current: Some(serde_json::json!({"from": "b"})),
        };
        assert!(change.validate().is_err());
    }

    #[test]
    fn update_change_allows_both_snapshots() {
        let change = PlanChange {
            entity: "nodes".to_string(),
            op: ChangeOp::Update,
            target: serde_json::json!("n1"),
            previous: Some(serde_json::json!({"name": "old"})),
            current: Some(serde_json::json!({"name": "new"})),
        };
        assert!(change.validate().is_ok());
        assert_eq!(change.summary_line(), "update nodes n1");
    }

    #[test]
    fn bundle_paths_must_stay_inside_the_staging_dir() {
        let ok = BundleFile {
            path: "systems/main.ts".to_string(),
            content: "x".to_string(),
        };
        assert!(ok.validate().is_ok());

        for bad in ["", "/etc/passwd", "../escape.ts", "a/../../b.ts", "a//b"] {
            let file = BundleFile {
                path: bad.to_string(),
                content: String::new(),
            };
            assert!(file.validate().is_err(), "expected '{bad}' to be rejected");
        }
    }
}
