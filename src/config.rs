//! Process-wide runtime configuration, assembled from environment variables
//! recognized by the core. Credentials are resolved through the external
//! credential store, never read from the environment directly.

use std::path::PathBuf;
use std::time::Duration;

/// Which vector-index implementation backs episodic memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorBackendKind {
    /// Non-persistent, in-process cosine-similarity index.
    Memory,
    /// Single-file on-disk index, loaded eagerly.
    Local,
    /// Delegates to an external HTTP index service.
    External,
}

impl VectorBackendKind {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "local" => Self::Local,
            "external" => Self::External,
            _ => Self::Memory,
        }
    }
}

/// Log output shape, selected independently of log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable text, for local development.
    Text,
    /// Newline-delimited JSON, for log aggregation.
    Json,
}

impl LogFormat {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Process-wide configuration assembled once at startup and shared by every
/// run on the process.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Base directory under which `sessions/`, `episodes.jsonl`,
    /// `vector_index/`, `traces/`, and `audit.log` are laid out.
    pub base_dir: PathBuf,
    /// Vector backend selection for episodic memory.
    pub vector_backend: VectorBackendKind,
    /// Default model identifier for nodes that don't declare their own.
    pub default_model: String,
    /// Model used for cleanup re-issue requests (§4.2.2).
    pub cleanup_model: String,
    /// Timeout applied to approval-gate waits, overriding the policy
    /// default when set.
    pub approval_timeout: Duration,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            vector_backend: VectorBackendKind::Memory,
            default_model: "mock-default".to_string(),
            cleanup_model: "mock-cleanup".to_string(),
            approval_timeout: Duration::from_secs(300),
            log_format: LogFormat::Text,
        }
    }
}

impl RuntimeConfig {
    /// Build a configuration from the environment, falling back to defaults
    /// for anything unset or unparseable.
    ///
    /// Recognized variables: `AGENT_GRAPH_BASE_DIR`,
    /// `AGENT_GRAPH_VECTOR_BACKEND` (`memory` | `local` | `external`),
    /// `AGENT_GRAPH_DEFAULT_MODEL`, `AGENT_GRAPH_CLEANUP_MODEL`,
    /// `AGENT_GRAPH_APPROVAL_TIMEOUT_SECONDS`, `AGENT_GRAPH_LOG_FORMAT`
    /// (`text` | `json`).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_dir: std::env::var("AGENT_GRAPH_BASE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.base_dir),
            vector_backend: std::env::var("AGENT_GRAPH_VECTOR_BACKEND")
                .ok()
                .map(|v| VectorBackendKind::parse(&v))
                .unwrap_or(defaults.vector_backend),
            default_model: std::env::var("AGENT_GRAPH_DEFAULT_MODEL").unwrap_or(defaults.default_model),
            cleanup_model: std::env::var("AGENT_GRAPH_CLEANUP_MODEL").unwrap_or(defaults.cleanup_model),
            approval_timeout: std::env::var("AGENT_GRAPH_APPROVAL_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.approval_timeout),
            log_format: std::env::var("AGENT_GRAPH_LOG_FORMAT")
                .ok()
                .map(|v| LogFormat::parse(&v))
                .unwrap_or(defaults.log_format),
        }
    }

    /// Path under which session directories live: `{base}/sessions`.
    pub fn sessions_dir(&self) -> PathBuf {
        self.base_dir.join("sessions")
    }

    /// Path to the append-only episode log: `{base}/episodes.jsonl`.
    pub fn episodes_path(&self) -> PathBuf {
        self.base_dir.join("episodes.jsonl")
    }

    /// Path under which a local vector index persists:
    /// `{base}/vector_index`.
    pub fn vector_index_dir(&self) -> PathBuf {
        self.base_dir.join("vector_index")
    }

    /// Path under which per-run traces are optionally persisted:
    /// `{base}/traces`.
    pub fn traces_dir(&self) -> PathBuf {
        self.base_dir.join("traces")
    }

    /// Path to the optional newline-JSON audit log: `{base}/audit.log`.
    pub fn audit_log_path(&self) -> PathBuf {
        self.base_dir.join("audit.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_in_process_mock_models() {
        let config = RuntimeConfig::default();
        assert_eq!(config.default_model, "mock-default");
        assert_eq!(config.vector_backend, VectorBackendKind::Memory);
    }

    #[test]
    fn derived_paths_are_rooted_at_base_dir() {
        let config = RuntimeConfig {
            base_dir: PathBuf::from("/tmp/agent-graph"),
            ..RuntimeConfig::default()
        };
        assert_eq!(config.sessions_dir(), PathBuf::from("/tmp/agent-graph/sessions"));
        assert_eq!(config.episodes_path(), PathBuf::from("/tmp/agent-graph/episodes.jsonl"));
        assert_eq!(config.audit_log_path(), PathBuf::from("/tmp/agent-graph/audit.log"));
    }

    #[test]
    fn vector_backend_kind_parses_known_variants() {
        assert_eq!(VectorBackendKind::parse("local"), VectorBackendKind::Local);
        assert_eq!(VectorBackendKind::parse("EXTERNAL"), VectorBackendKind::External);
        assert_eq!(VectorBackendKind::parse("garbage"), VectorBackendKind::Memory);
    }

    #[test]
    fn log_format_parses_known_variants() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("text"), LogFormat::Text);
        assert_eq!(LogFormat::parse("whatever"), LogFormat::Text);
    }
}
