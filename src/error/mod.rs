//! Error types and handling for the AgentGraph runtime.

use thiserror::Error;

/// Result type alias for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

/// Comprehensive, wire-visible error taxonomy for the AgentGraph runtime.
///
/// Variants map onto the error kinds a session's `result.error` field or a
/// blocked tool call's JSON-encoded error content can surface. `category()`
/// gives the stable string tag recorded in traces and audit events;
/// `is_recoverable()` tells the executor whether an error is eligible for
/// `retry_on`.
#[derive(Error, Debug)]
pub enum GraphError {
    /// The graph, node, or edge spec failed validation before a run started.
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    /// Graph structure is invalid in a way discovered after validation, e.g.
    /// while mutating an already-validated graph at runtime.
    #[error("graph structure error: {0}")]
    GraphStructure(String),

    /// A scoped memory view rejected a read or write outside its declared
    /// readable/writable key sets.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A tool call was blocked by the guardrail permission or risk pipeline.
    #[error("guardrail block: {0}")]
    GuardrailBlock(String),

    /// An approval gate denied the call.
    #[error("approval denied: {0}")]
    ApprovalDenied(String),

    /// An approval gate timed out waiting for an external decision.
    #[error("approval timed out after {seconds}s")]
    ApprovalTimeout {
        /// Configured timeout, in seconds.
        seconds: u64,
    },

    /// A node returned without satisfying its declared non-nullable output
    /// contract keys.
    #[error("output contract violation on node '{node_id}': missing key(s) {missing:?}")]
    OutputContractViolation {
        /// Node that violated its contract.
        node_id: String,
        /// Output keys that were required but absent.
        missing: Vec<String>,
    },

    /// A node was entered more times than its `max_node_visits` allows.
    #[error("node '{node_id}' reached its visit limit of {limit}")]
    NodeVisitLimitReached {
        /// Node that hit its visit bound.
        node_id: String,
        /// The configured limit.
        limit: u32,
    },

    /// No outgoing edge was eligible and the node is neither terminal nor a
    /// pause node.
    #[error("no eligible outgoing edge from node '{node_id}'")]
    NoEligibleEdge {
        /// Node with no eligible edge.
        node_id: String,
    },

    /// A back-edge loop exceeded its configured bound with no alternative
    /// route out.
    #[error("loop bound exceeded at node '{node_id}'")]
    LoopBoundExceeded {
        /// Node where the loop bound was exceeded.
        node_id: String,
    },

    /// The LLM provider returned an error.
    #[error("LLM error: {0}")]
    LLMError(String),

    /// A tool invocation failed.
    #[error("tool error: {0}")]
    ToolError(String),

    /// An operation exceeded its configured timeout.
    #[error("operation timed out after {seconds}s")]
    Timeout {
        /// Number of seconds before timeout.
        seconds: u64,
    },

    /// A shared-memory write failed schema validation or tripped the
    /// anti-hallucination code-indicator scan.
    #[error("memory write error ({kind}): {message}")]
    MemoryWriteError {
        /// Stable tag for the failure: `"schema"` or `"hallucinated_code"`.
        kind: String,
        /// Human-readable detail.
        message: String,
    },

    /// A session, conversation, episode, or trace persistence operation
    /// failed.
    #[error("storage error: {0}")]
    StorageError(String),

    /// The run was cancelled via the session-level cancel flag.
    #[error("run cancelled: {0}")]
    Cancelled(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// I/O errors.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Configuration errors.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Generic internal errors that don't fit another category.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GraphError {
    /// Create an invalid-spec error.
    pub fn invalid_spec<S: Into<String>>(message: S) -> Self {
        Self::InvalidSpec(message.into())
    }

    /// Create a graph-structure error.
    pub fn graph_structure<S: Into<String>>(message: S) -> Self {
        Self::GraphStructure(message.into())
    }

    /// Create a storage error.
    pub fn storage_error<S: Into<String>>(message: S) -> Self {
        Self::StorageError(message.into())
    }

    /// Create a configuration error.
    pub fn configuration_error<S: Into<String>>(message: S) -> Self {
        Self::ConfigurationError(message.into())
    }

    /// Create a timeout error.
    pub fn timeout(seconds: u64) -> Self {
        Self::Timeout { seconds }
    }

    /// Create a schema-kind memory write error.
    pub fn memory_schema<S: Into<String>>(message: S) -> Self {
        Self::MemoryWriteError {
            kind: "schema".to_string(),
            message: message.into(),
        }
    }

    /// Create a hallucinated-code-kind memory write error.
    pub fn memory_hallucinated_code<S: Into<String>>(message: S) -> Self {
        Self::MemoryWriteError {
            kind: "hallucinated_code".to_string(),
            message: message.into(),
        }
    }

    /// Whether this error kind may be retried by the executor when listed in
    /// a node's `retry_on`.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GraphError::Timeout { .. }
                | GraphError::LLMError(_)
                | GraphError::ToolError(_)
                | GraphError::StorageError(_)
        )
    }

    /// Stable category tag, used in trace records and audit events.
    pub fn category(&self) -> &'static str {
        match self {
            GraphError::InvalidSpec(_) => "invalid_spec",
            GraphError::GraphStructure(_) => "graph_structure",
            GraphError::PermissionDenied(_) => "permission_denied",
            GraphError::GuardrailBlock(_) => "guardrail_block",
            GraphError::ApprovalDenied(_) => "approval_denied",
            GraphError::ApprovalTimeout { .. } => "approval_timeout",
            GraphError::OutputContractViolation { .. } => "output_contract_violation",
            GraphError::NodeVisitLimitReached { .. } => "node_visit_limit_reached",
            GraphError::NoEligibleEdge { .. } => "no_eligible_edge",
            GraphError::LoopBoundExceeded { .. } => "loop_bound_exceeded",
            GraphError::LLMError(_) => "llm_error",
            GraphError::ToolError(_) => "tool_error",
            GraphError::Timeout { .. } => "timeout",
            GraphError::MemoryWriteError { .. } => "memory_write_error",
            GraphError::StorageError(_) => "storage_error",
            GraphError::Cancelled(_) => "cancelled",
            GraphError::SerializationError(_) => "serialization",
            GraphError::IoError(_) => "io",
            GraphError::ConfigurationError(_) => "configuration",
            GraphError::Internal(_) => "internal",
        }
    }
}

/// Extension trait for converting foreign errors to `GraphError`.
pub trait IntoGraphError<T> {
    /// Convert the result into a `GraphResult`.
    fn into_graph_error(self) -> GraphResult<T>;
}

impl<T, E> IntoGraphError<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn into_graph_error(self) -> GraphResult<T> {
        self.map_err(|e| GraphError::Internal(e.to_string()))
    }
}
