//! The language-model provider contract.
//!
//! The concrete model backing a run is an out-of-scope collaborator (see
//! the purpose notes in the crate root docs): this module specifies only
//! the request/response shape and the trait a provider must satisfy so the
//! executor can drive a turn loop against any of them, including a
//! deterministic mock used in tests.

pub mod providers;

use crate::error::{GraphError, GraphResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A message role in a completion request's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The system prompt.
    System,
    /// A user-authored or tool-triggered turn.
    User,
    /// Model-authored content, possibly carrying tool calls.
    Assistant,
    /// A tool result being fed back to the model.
    Tool,
}

/// One entry in a completion request's message history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Who authored this message.
    pub role: MessageRole,
    /// Text content. Empty for an assistant message that only carries tool
    /// calls.
    pub content: String,
    /// Tool calls emitted by the assistant in this message, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For a `Tool`-role message, the id of the call this is a result for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Construct a plain-text message with the given role.
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Construct a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Construct an assistant text message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Construct an assistant message carrying tool calls instead of text.
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: String::new(),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Construct a tool-result message answering `tool_call_id`.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A tool the model is permitted to call in a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name, matched against the tool registry.
    pub name: String,
    /// Human-readable description surfaced to the model.
    pub description: String,
    /// JSON Schema of the tool's input.
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Construct a tool definition.
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// One tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call id, echoed back in the paired tool result.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Tool input arguments.
    pub arguments: serde_json::Value,
}

/// A request to the model provider. See the LLM provider contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation history, not including the system prompt.
    pub messages: Vec<Message>,
    /// System prompt, if any.
    pub system: Option<String>,
    /// Response token budget.
    pub max_tokens: Option<u32>,
    /// Tools the model may call this turn.
    pub tools: Option<Vec<ToolDefinition>>,
    /// Per-call timeout; the executor's default is 30s if unset.
    pub timeout: Option<Duration>,
}

impl CompletionRequest {
    /// Construct a request against `model` with the given history.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            system: None,
            max_tokens: None,
            tools: None,
            timeout: None,
        }
    }

    /// Attach a system prompt.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set the response token budget.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Offer a set of callable tools.
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Override the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Token accounting for one completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt (system + history).
    pub prompt_tokens: u32,
    /// Tokens consumed by the completion.
    pub completion_tokens: u32,
}

impl TokenUsage {
    /// Total tokens across prompt and completion.
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// The model's response to a completion request. See the LLM provider
/// contract: `complete(...) → {content, tool_calls, usage, error?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Text content of the response. Empty when the response is tool calls
    /// only.
    pub content: String,
    /// Tool calls requested by the model, if any.
    pub tool_calls: Vec<ToolCall>,
    /// Token usage for this call.
    pub usage: TokenUsage,
    /// A non-fatal provider-reported error surfaced alongside a (possibly
    /// partial) response, e.g. a content filter notice.
    pub error: Option<String>,
}

impl CompletionResponse {
    /// Whether the model produced at least one tool call this turn.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A pluggable language-model provider. Deterministic-replay wrappers (for
/// tests and offline evaluation) implement the same contract so the
/// executor never needs to know which kind of provider it is driving.
#[async_trait::async_trait]
pub trait LLMProvider: Send + Sync + std::fmt::Debug {
    /// Provider name, used for diagnostics and routing.
    fn name(&self) -> &str;

    /// Models this provider can serve.
    fn supported_models(&self) -> Vec<String>;

    /// Whether `model` is one this provider can serve.
    fn supports_model(&self, model: &str) -> bool {
        self.supported_models().iter().any(|m| m == model)
    }

    /// Issue one completion request.
    async fn complete(&self, request: CompletionRequest) -> GraphResult<CompletionResponse>;
}

/// Apply `request.timeout` (default 30s per the concurrency model) around a
/// provider call, translating an elapsed deadline into `GraphError::Timeout`.
pub async fn complete_with_timeout(
    provider: &dyn LLMProvider,
    request: CompletionRequest,
) -> GraphResult<CompletionResponse> {
    let timeout = request.timeout.unwrap_or(Duration::from_secs(30));
    let seconds = timeout.as_secs();
    match tokio::time::timeout(timeout, provider.complete(request)).await {
        Ok(result) => result,
        Err(_) => Err(GraphError::timeout(seconds)),
    }
}
