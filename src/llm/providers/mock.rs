//! A deterministic, in-process provider for development and tests.

use crate::error::{GraphError, GraphResult};
use crate::llm::{CompletionRequest, CompletionResponse, LLMProvider, TokenUsage, ToolCall};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Cycles through a fixed set of canned responses, optionally emitting a
/// tool call when the request offers tools.
#[derive(Debug)]
pub struct MockProvider {
    delay: Duration,
    responses: Vec<String>,
    index: AtomicUsize,
    tool_call_on_first_turn: Mutex<bool>,
}

impl MockProvider {
    /// Construct a provider with a single default response.
    pub fn new() -> Self {
        Self::with_responses(vec!["ok".to_string()])
    }

    /// Construct a provider cycling through `responses` in order.
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            delay: Duration::ZERO,
            responses,
            index: AtomicUsize::new(0),
            tool_call_on_first_turn: Mutex::new(false),
        }
    }

    /// Simulate network latency.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make the first call that offers tools emit a call to the first tool
    /// instead of text, exercising the tool-call/tool-result turn loop.
    pub fn with_tool_call_on_first_turn(self) -> Self {
        *self.tool_call_on_first_turn.lock().unwrap() = true;
        self
    }

    fn next_response(&self) -> String {
        let i = self.index.fetch_add(1, Ordering::SeqCst);
        self.responses[i % self.responses.len()].clone()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LLMProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn supported_models(&self) -> Vec<String> {
        vec!["mock-default".to_string(), "mock-cleanup".to_string()]
    }

    async fn complete(&self, request: CompletionRequest) -> GraphResult<CompletionResponse> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if !self.supports_model(&request.model) {
            return Err(GraphError::LLMError(format!(
                "mock provider does not support model '{}'",
                request.model
            )));
        }

        let prompt_tokens = request
            .system
            .iter()
            .map(|s| s.split_whitespace().count())
            .sum::<usize>()
            + request
                .messages
                .iter()
                .map(|m| m.content.split_whitespace().count())
                .sum::<usize>();

        let mut emit_tool_call = false;
        if let Some(tools) = &request.tools {
            if !tools.is_empty() {
                let mut flag = self.tool_call_on_first_turn.lock().unwrap();
                if *flag {
                    emit_tool_call = true;
                    *flag = false;
                }
            }
        }

        if emit_tool_call {
            let tool = &request.tools.as_ref().unwrap()[0];
            return Ok(CompletionResponse {
                content: String::new(),
                tool_calls: vec![ToolCall {
                    id: format!("call-{}", uuid::Uuid::new_v4()),
                    name: tool.name.clone(),
                    arguments: serde_json::json!({}),
                }],
                usage: TokenUsage {
                    prompt_tokens: prompt_tokens as u32,
                    completion_tokens: 1,
                },
                error: None,
            });
        }

        let content = self.next_response();
        let completion_tokens = content.split_whitespace().count() as u32;
        Ok(CompletionResponse {
            content,
            tool_calls: Vec::new(),
            usage: TokenUsage {
                prompt_tokens: prompt_tokens as u32,
                completion_tokens,
            },
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Message, ToolDefinition};

    #[tokio::test]
    async fn unsupported_model_is_an_llm_error() {
        let provider = MockProvider::new();
        let request = CompletionRequest::new("gpt-5", vec![Message::user("hi")]);
        let result = provider.complete(request).await;
        assert!(matches!(result, Err(GraphError::LLMError(_))));
    }

    #[tokio::test]
    async fn responses_cycle_in_order() {
        let provider = MockProvider::with_responses(vec!["a".into(), "b".into()]);
        let req = || CompletionRequest::new("mock-default", vec![Message::user("hi")]);
        assert_eq!(provider.complete(req()).await.unwrap().content, "a");
        assert_eq!(provider.complete(req()).await.unwrap().content, "b");
        assert_eq!(provider.complete(req()).await.unwrap().content, "a");
    }

    #[tokio::test]
    async fn tool_call_on_first_turn_then_falls_back_to_text() {
        let provider = MockProvider::with_responses(vec!["done".into()]).with_tool_call_on_first_turn();
        let request = CompletionRequest::new("mock-default", vec![Message::user("hi")]).with_tools(vec![
            ToolDefinition::new("search", "search the web", serde_json::json!({"type": "object"})),
        ]);
        let first = provider.complete(request.clone()).await.unwrap();
        assert!(first.has_tool_calls());

        let second = provider.complete(request).await.unwrap();
        assert!(!second.has_tool_calls());
        assert_eq!(second.content, "done");
    }
}
