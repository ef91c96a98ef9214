//! Contracts to the rest of the product: the system graph, thread
//! transcripts, and access resolution. The runtime only depends on these
//! traits; the in-memory implementations back tests and single-node
//! deployments until the real backends are wired in.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::core::runs::types::{BundleFile, PlanChange};

/// Why a bundle could not be applied to the system graph.
#[derive(Debug)]
pub struct GraphApplyError {
    pub reason: String,
}

impl GraphApplyError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for GraphApplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}

impl std::error::Error for GraphApplyError {}

/// Applies a staged file bundle to a thread's system graph.
#[async_trait]
pub trait SystemGraphStore: Send + Sync {
    async fn apply_bundle(
        &self,
        thread_id: &str,
        staged_dir: &Path,
        files: &[BundleFile],
    ) -> Result<(), GraphApplyError>;
}

/// Persists the user-visible transcript of a run: an action row, its
/// response message, and (on success) its change set.
#[async_trait]
pub trait ThreadActionStore: Send + Sync {
    async fn begin_action(&self, thread_id: &str, requested_by: &str) -> anyhow::Result<String>;
    async fn append_response_message(
        &self,
        action_id: &str,
        thread_id: &str,
        body: &str,
    ) -> anyhow::Result<()>;
    async fn append_changes(
        &self,
        action_id: &str,
        thread_id: &str,
        changes: &[PlanChange],
    ) -> anyhow::Result<()>;
    async fn commit_empty_action(&self, action_id: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadAccess {
    pub org_id: String,
    pub project_id: String,
    pub can_edit: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AccessError {
    Denied,
    UnknownThread,
}

impl std::fmt::Display for AccessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessError::Denied => f.write_str("access denied"),
            AccessError::UnknownThread => f.write_str("unknown thread"),
        }
    }
}

impl std::error::Error for AccessError {}

/// Maps (user, thread) to the tenant scope the caller may act in. Resolved
/// at the boundary before any call reaches the run coordinator.
#[async_trait]
pub trait AccessResolver: Send + Sync {
    async fn resolve_thread(
        &self,
        user_id: &str,
        thread_id: &str,
    ) -> Result<ThreadAccess, AccessError>;
}

/// In-memory graph store. `fail_with` injects an apply failure so tests can
/// drive the downgrade path.
#[derive(Default)]
pub struct InMemoryGraphStore {
    applied: Mutex<Vec<(String, Vec<BundleFile>)>>,
    fail_with: Mutex<Option<String>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_next_apply(&self, reason: &str) {
        *self.fail_with.lock().await = Some(reason.to_string());
    }

    pub async fn applied_bundles(&self) -> Vec<(String, Vec<BundleFile>)> {
        self.applied.lock().await.clone()
    }
}

#[async_trait]
impl SystemGraphStore for InMemoryGraphStore {
    async fn apply_bundle(
        &self,
        thread_id: &str,
        staged_dir: &Path,
        files: &[BundleFile],
    ) -> Result<(), GraphApplyError> {
        if let Some(reason) = self.fail_with.lock().await.take() {
            return Err(GraphApplyError::new(reason));
        }
        for file in files {
            let staged = staged_dir.join(&file.path);
            if !staged.is_file() {
                return Err(GraphApplyError::new(format!(
                    "staged file '{}' is missing",
                    file.path
                )));
            }
        }
        self.applied
            .lock()
            .await
            .push((thread_id.to_string(), files.to_vec()));
        Ok(())
    }
}

/// One transcript row as recorded by the in-memory action store.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionRow {
    Response { thread_id: String, body: String },
    Changes {
        thread_id: String,
        changes: Vec<PlanChange>,
    },
}

#[derive(Default)]
pub struct InMemoryActionStore {
    rows: Mutex<HashMap<String, Vec<ActionRow>>>,
}

impl InMemoryActionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn rows_for(&self, action_id: &str) -> Vec<ActionRow> {
        self.rows
            .lock()
            .await
            .get(action_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn action_ids(&self) -> Vec<String> {
        self.rows.lock().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ThreadActionStore for InMemoryActionStore {
    async fn begin_action(&self, _thread_id: &str, _requested_by: &str) -> anyhow::Result<String> {
        let action_id = Uuid::new_v4().to_string();
        self.rows.lock().await.insert(action_id.clone(), Vec::new());
        Ok(action_id)
    }

    async fn append_response_message(
        &self,
        action_id: &str,
        thread_id: &str,
        body: &str,
    ) -> anyhow::Result<()> {
        let mut rows = self.rows.lock().await;
        rows.entry(action_id.to_string())
            .or_default()
            .push(ActionRow::Response {
                thread_id: thread_id.to_string(),
                body: body.to_string(),
            });
        Ok(())
    }

    async fn append_changes(
        &self,
        action_id: &str,
        thread_id: &str,
        changes: &[PlanChange],
    ) -> anyhow::Result<()> {
        let mut rows = self.rows.lock().await;
        rows.entry(action_id.to_string())
            .or_default()
            .push(ActionRow::Changes {
                thread_id: thread_id.to_string(),
                changes: changes.to_vec(),
            });
        Ok(())
    }

    async fn commit_empty_action(&self, _action_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Static access table: every known thread maps to its tenant scope plus
/// the users allowed to edit it. Unknown users are denied, unknown threads
/// are distinguished so the boundary can answer 404 instead of 403.
#[derive(Default)]
pub struct StaticAccessResolver {
    threads: HashMap<String, (ThreadAccess, Vec<String>)>,
    default_access: Option<ThreadAccess>,
}

impl StaticAccessResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver that grants every user edit access to every thread under a
    /// single default tenant. Used by single-node deployments where access
    /// control lives upstream.
    pub fn permissive(org_id: &str, project_id: &str) -> Self {
        Self {
            threads: HashMap::new(),
            default_access: Some(ThreadAccess {
                org_id: org_id.to_string(),
                project_id: project_id.to_string(),
                can_edit: true,
            }),
        }
    }

    pub fn grant(&mut self, thread_id: &str, access: ThreadAccess, users: &[&str]) {
        self.threads.insert(
            thread_id.to_string(),
            (access, users.iter().map(ToString::to_string).collect()),
        );
    }
}

#[async_trait]
impl AccessResolver for StaticAccessResolver {
    async fn resolve_thread(
        &self,
        user_id: &str,
        thread_id: &str,
    ) -> Result<ThreadAccess, AccessError> {
        if let Some(access) = &self.default_access {
            return Ok(access.clone());
        }
        let (access, users) = self
            .threads
            .get(thread_id)
            .ok_or(AccessError::UnknownThread)?;
        if users.iter().any(|u| u == user_id) {
            Ok(access.clone())
        } else {
            Err(AccessError::Denied)
        }
    }
}

pub type SharedGraphStore = Arc<dyn SystemGraphStore>;
pub type SharedActionStore = Arc<dyn ThreadActionStore>;
pub type SharedAccessResolver = Arc<dyn AccessResolver>;

#[cfg(test)]
mod tests {
    use super::*;

    fn access(org: &str) -> ThreadAccess {
        ThreadAccess {
            org_id: org.to_string(),
            project_id: "project-1".to_string(),
            can_edit: true,
        }
    }

    #[tokio::test]
    async fn static_resolver_distinguishes_denied_from_unknown() {
        let mut resolver = StaticAccessResolver::new();
        resolver.grant("thread-1", access("org-1"), &["alice"]);

        assert_eq!(
            resolver.resolve_thread("alice", "thread-1").await,
            Ok(access("org-1"))
        );
        assert_eq!(
            resolver.resolve_thread("mallory", "thread-1").await,
            Err(AccessError::Denied)
        );
        assert_eq!(
            resolver.resolve_thread("alice", "thread-9").await,
            Err(AccessError::UnknownThread)
        );
    }

    #[tokio::test]
    async fn permissive_resolver_grants_everyone() {
        let resolver = StaticAccessResolver::permissive("org-1", "project-1");
        let granted = resolver.resolve_thread("anyone", "any-thread").await.unwrap();
        assert_eq!(granted.org_id, "org-1");
        assert!(granted.can_edit);
    }

    #[tokio::test]
    async fn in_memory_graph_store_rejects_unstaged_files() {
        let store = InMemoryGraphStore::new();
        let dir = tempfile::tempdir().unwrap();
        let files = vec![BundleFile {
            path: "main.ts".to_string(),
            content: "x".to_string(),
        }];
        let err = store
            .apply_bundle("thread-1", dir.path(), &files)
            .await
            .unwrap_err();
        assert!(err.reason.contains("main.ts"));

        std::fs::write(dir.path().join("main.ts"), "x").unwrap();
        store
            .apply_bundle("thread-1", dir.path(), &files)
            .await
            .unwrap();
        assert_eq!(store.applied_bundles().await.len(), 1);
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let store = InMemoryGraphStore::new();
        store.fail_next_apply("disk full").await;
        let dir = tempfile::tempdir().unwrap();

        let err = store.apply_bundle("t", dir.path(), &[]).await.unwrap_err();
        assert_eq!(err.reason, "disk full");
        store.apply_bundle("t", dir.path(), &[]).await.unwrap();
    }
}
