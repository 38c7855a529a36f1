//! Tools: a registry of callable handlers and the thin dispatch layer the
//! executor drives a turn's tool calls through.
//!
//! Concrete tool implementations are an out-of-scope collaborator; this
//! module specifies the registry, the richer per-tool [`traits::Tool`]
//! trait implementations plug into, and [`ToolExecutor`], which adapts that
//! richer interface to the tool executor contract:
//! `{tool_name, input, tool_use_id} → {content, is_error}`.

/// Core traits and types for tools.
pub mod traits;
/// Tool registry for managing and discovering tools.
pub mod registry;

pub use registry::{ToolRegistry, ToolRegistryBuilder};
pub use traits::{Tool, ToolError, ToolInput, ToolMetadata, ToolOutput, ToolResult};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Execution policy applied by [`ToolExecutor`] around every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Per-call timeout. The concurrency model's default is 10s for
    /// network-bound tools.
    pub timeout: Duration,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

/// Running execution statistics for one tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolStats {
    /// Number of times the tool has been invoked.
    pub call_count: u64,
    /// Number of calls that returned an error result.
    pub error_count: u64,
    /// Total wall-clock time spent in the tool, in milliseconds.
    pub total_duration_ms: u64,
}

impl ToolStats {
    fn record(&mut self, duration_ms: u64, is_error: bool) {
        self.call_count += 1;
        self.total_duration_ms += duration_ms;
        if is_error {
            self.error_count += 1;
        }
    }
}

/// A request to invoke one tool, as surfaced by an LLM turn's tool calls.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    /// Name the registry resolves the handler by.
    pub tool_name: String,
    /// Input payload.
    pub input: serde_json::Value,
    /// Id of the originating model tool call, echoed back so the result can
    /// be matched to its request in history.
    pub tool_use_id: String,
}

/// The result of a tool call, in the shape the LLM turn loop feeds back
/// into history as a tool-result message.
#[derive(Debug, Clone)]
pub struct ToolCallResult {
    /// Result content (JSON-encoded on success; a human-readable reason on
    /// error).
    pub content: String,
    /// Whether this result represents a failure.
    pub is_error: bool,
}

impl ToolCallResult {
    fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Resolves tool calls by name against a [`ToolRegistry`] and adapts the
/// richer [`Tool`] trait to the tool executor contract. Unknown tool names
/// and execution failures both yield an error result rather than
/// propagating — guardrail-level blocking happens upstream of this type.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    config: ToolConfig,
    stats: Mutex<HashMap<String, ToolStats>>,
}

impl ToolExecutor {
    /// Construct an executor dispatching through `registry`.
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self::with_config(registry, ToolConfig::default())
    }

    /// Construct an executor with a non-default timeout policy.
    pub fn with_config(registry: Arc<ToolRegistry>, config: ToolConfig) -> Self {
        Self {
            registry,
            config,
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Dispatch one tool call. Never fails: an unknown tool, a validation
    /// error, a timeout, or an execution error all surface as
    /// `ToolCallResult { is_error: true, .. }`.
    pub async fn call(&self, request: ToolCallRequest) -> ToolCallResult {
        let start = Instant::now();
        let result = self.dispatch(&request).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let mut stats = self.stats.lock().await;
        stats
            .entry(request.tool_name.clone())
            .or_default()
            .record(elapsed_ms, result.is_error);

        result
    }

    async fn dispatch(&self, request: &ToolCallRequest) -> ToolCallResult {
        let Some(tool) = self.registry.get(&request.tool_name) else {
            return ToolCallResult::error(format!("unknown tool '{}'", request.tool_name));
        };

        let input = ToolInput::new(request.input.clone());
        if let Err(e) = tool.validate_input(&input).await {
            return ToolCallResult::error(e.to_string());
        }

        match tokio::time::timeout(self.config.timeout, tool.execute(input)).await {
            Ok(Ok(output)) => ToolCallResult::ok(output.data.to_string()),
            Ok(Err(e)) => ToolCallResult::error(e.to_string()),
            Err(_) => ToolCallResult::error(format!(
                "tool '{}' timed out after {:?}",
                request.tool_name, self.config.timeout
            )),
        }
    }

    /// Snapshot the per-tool call statistics gathered so far.
    pub async fn stats(&self) -> HashMap<String, ToolStats> {
        self.stats.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    #[derive(Debug)]
    struct EchoTool {
        metadata: ToolMetadata,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn metadata(&self) -> &ToolMetadata {
            &self.metadata
        }

        async fn execute(&self, input: ToolInput) -> ToolResult<ToolOutput> {
            Ok(ToolOutput::new(input.data))
        }
    }

    #[derive(Debug)]
    struct FailingTool {
        metadata: ToolMetadata,
    }

    #[async_trait]
    impl Tool for FailingTool {
        fn metadata(&self) -> &ToolMetadata {
            &self.metadata
        }

        async fn execute(&self, _input: ToolInput) -> ToolResult<ToolOutput> {
            Err(ToolError::ExecutionError {
                message: "boom".to_string(),
            })
        }
    }

    fn registry_with(tool: impl Tool + 'static) -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(tool).unwrap();
        Arc::new(registry)
    }

    #[tokio::test]
    async fn unknown_tool_yields_error_result_not_a_panic() {
        let executor = ToolExecutor::new(Arc::new(ToolRegistry::new()));
        let result = executor
            .call(ToolCallRequest {
                tool_name: "does_not_exist".to_string(),
                input: json!({}),
                tool_use_id: "call-1".to_string(),
            })
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn known_tool_executes_and_returns_content() {
        let registry = registry_with(EchoTool {
            metadata: ToolMetadata::new("echo", "Echo", "echoes its input"),
        });
        let executor = ToolExecutor::new(registry);
        let result = executor
            .call(ToolCallRequest {
                tool_name: "echo".to_string(),
                input: json!({"x": 1}),
                tool_use_id: "call-1".to_string(),
            })
            .await;
        assert!(!result.is_error);
        assert_eq!(result.content, json!({"x": 1}).to_string());
    }

    #[tokio::test]
    async fn tool_execution_error_is_surfaced_not_propagated() {
        let registry = registry_with(FailingTool {
            metadata: ToolMetadata::new("failing", "Failing", "always fails"),
        });
        let executor = ToolExecutor::new(registry);
        let result = executor
            .call(ToolCallRequest {
                tool_name: "failing".to_string(),
                input: json!({}),
                tool_use_id: "call-1".to_string(),
            })
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("boom"));
    }

    #[tokio::test]
    async fn stats_accumulate_across_calls() {
        let registry = registry_with(EchoTool {
            metadata: ToolMetadata::new("echo", "Echo", "echoes its input"),
        });
        let executor = ToolExecutor::new(registry);
        for _ in 0..3 {
            executor
                .call(ToolCallRequest {
                    tool_name: "echo".to_string(),
                    input: json!({}),
                    tool_use_id: "call-1".to_string(),
                })
                .await;
        }
        let stats = executor.stats().await;
        assert_eq!(stats["echo"].call_count, 3);
        assert_eq!(stats["echo"].error_count, 0);
    }
}
