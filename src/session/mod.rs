//! Session persistence: resumable run state and the append-only conversation log.

pub mod conversation;

use crate::error::{GraphError, GraphResult};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Currently being driven by the executor.
    Active,
    /// Suspended at a pause node, resumable.
    Paused,
    /// Reached a terminal node or otherwise finished successfully.
    Completed,
    /// Ended with a fatal error.
    Failed,
}

/// Wall-clock markers for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTimestamps {
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Last time the session was persisted.
    pub updated_at: DateTime<Utc>,
    /// When the run reached a terminal state, if it has.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Aggregate progress counters for a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionProgress {
    /// Total steps executed so far.
    pub steps_executed: u32,
    /// Sum of per-step latencies.
    pub total_latency_ms: u64,
    /// Node ids that were entered, in order, including repeats.
    pub nodes_executed: Vec<String>,
    /// Node ids that failed at least once.
    pub nodes_with_failures: Vec<String>,
    /// Sum of LLM tokens consumed.
    pub total_tokens: u64,
}

/// The outcome recorded when a run finishes (successfully or not).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResult {
    /// Whether the run succeeded.
    pub success: bool,
    /// The final memory snapshot or node output surfaced to the caller.
    pub output: serde_json::Value,
    /// Human-readable failure reason, present iff `success` is false.
    pub error: Option<String>,
}

impl Default for SessionResult {
    fn default() -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: None,
        }
    }
}

/// The full persisted state of a single run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// Globally unique session id, `session_{YYYYMMDD}_{HHMMSS}_{8-hex}`.
    pub session_id: String,
    /// The goal this session pursues.
    pub goal_id: String,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Timestamps.
    pub timestamps: SessionTimestamps,
    /// Progress counters.
    pub progress: SessionProgress,
    /// Terminal result, populated once `status` leaves `active`/`paused`.
    pub result: SessionResult,
    /// The node a paused/resumed run should continue from.
    pub current_node_id: Option<String>,
    /// Full shared-memory snapshot at the time of persistence.
    pub memory_snapshot: HashMap<String, serde_json::Value>,
}

impl SessionState {
    /// Generate a fresh session id: `session_{YYYYMMDD}_{HHMMSS}_{8-hex}`.
    pub fn generate_id(now: DateTime<Utc>) -> String {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..8)
            .map(|_| {
                let n: u8 = rng.gen_range(0..16);
                std::char::from_digit(n as u32, 16).unwrap()
            })
            .collect();
        format!("session_{}_{}", now.format("%Y%m%d_%H%M%S"), suffix)
    }

    /// Construct a new active session for `goal_id`.
    pub fn new(goal_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: Self::generate_id(now),
            goal_id: goal_id.into(),
            status: SessionStatus::Active,
            timestamps: SessionTimestamps {
                started_at: now,
                updated_at: now,
                completed_at: None,
            },
            progress: SessionProgress::default(),
            result: SessionResult::default(),
            current_node_id: None,
            memory_snapshot: HashMap::new(),
        }
    }

    /// Mark the session paused at `node_id`.
    pub fn pause_at(&mut self, node_id: impl Into<String>, now: DateTime<Utc>) {
        self.status = SessionStatus::Paused;
        self.current_node_id = Some(node_id.into());
        self.timestamps.updated_at = now;
    }

    /// Mark the session finished, successfully or not.
    pub fn finish(&mut self, result: SessionResult, now: DateTime<Utc>) {
        self.status = if result.success {
            SessionStatus::Completed
        } else {
            SessionStatus::Failed
        };
        self.result = result;
        self.timestamps.updated_at = now;
        self.timestamps.completed_at = Some(now);
    }
}

/// Persists [`SessionState`] under `{base}/sessions/{session_id}/state.json`
/// using write-temp-then-rename so readers never observe a torn file.
#[derive(Clone)]
pub struct SessionStore {
    base_dir: PathBuf,
}

impl SessionStore {
    /// Construct a store rooted at `base_dir` (the agent's base directory,
    /// not the `sessions/` subdirectory itself).
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.base_dir.join("sessions").join(session_id)
    }

    fn state_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("state.json")
    }

    /// Atomically persist `state`.
    pub async fn save(&self, state: &SessionState) -> GraphResult<()> {
        let dir = self.session_dir(&state.session_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| GraphError::storage_error(format!("creating session dir: {e}")))?;

        let final_path = self.state_path(&state.session_id);
        let tmp_path = dir.join(format!("state.json.tmp-{}", uuid::Uuid::new_v4()));

        let payload = serde_json::to_vec_pretty(state)
            .map_err(|e| GraphError::storage_error(format!("serializing session state: {e}")))?;

        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| GraphError::storage_error(format!("creating temp state file: {e}")))?;
        file.write_all(&payload)
            .await
            .map_err(|e| GraphError::storage_error(format!("writing temp state file: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| GraphError::storage_error(format!("fsyncing temp state file: {e}")))?;
        drop(file);

        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|e| GraphError::storage_error(format!("renaming temp state file: {e}")))?;
        Ok(())
    }

    /// Load a session by id.
    pub async fn load(&self, session_id: &str) -> GraphResult<SessionState> {
        let path = self.state_path(session_id);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| GraphError::storage_error(format!("reading session state: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| GraphError::storage_error(format!("parsing session state: {e}")))
    }

    /// List all session ids with a parseable `state.json`, skipping any
    /// entry whose state file is missing or malformed.
    pub async fn list_sessions(&self) -> GraphResult<Vec<String>> {
        let sessions_dir = self.base_dir.join("sessions");
        if !sessions_dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = tokio::fs::read_dir(&sessions_dir)
            .await
            .map_err(|e| GraphError::storage_error(format!("listing sessions dir: {e}")))?;

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| GraphError::storage_error(format!("reading sessions dir entry: {e}")))?
        {
            let Some(id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if self.load(&id).await.is_ok() {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Path to a session's directory, for collaborators (e.g. the
    /// conversation store) that nest their own files under it.
    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id)
    }

    /// The base directory this store is rooted at.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let mut state = SessionState::new("goal1", Utc::now());
        state.progress.steps_executed = 3;

        store.save(&state).await.unwrap();
        let loaded = store.load(&state.session_id).await.unwrap();
        assert_eq!(loaded.session_id, state.session_id);
        assert_eq!(loaded.progress.steps_executed, 3);
    }

    #[tokio::test]
    async fn list_sessions_skips_unparseable_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let state = SessionState::new("goal1", Utc::now());
        store.save(&state).await.unwrap();

        let broken_dir = dir.path().join("sessions").join("session_broken");
        tokio::fs::create_dir_all(&broken_dir).await.unwrap();
        tokio::fs::write(broken_dir.join("state.json"), b"not json")
            .await
            .unwrap();

        let ids = store.list_sessions().await.unwrap();
        assert_eq!(ids, vec![state.session_id]);
    }

    #[test]
    fn generated_ids_follow_the_expected_shape() {
        let id = SessionState::generate_id(Utc::now());
        assert!(id.starts_with("session_"));
        let suffix = id.rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), 8);
    }
}
