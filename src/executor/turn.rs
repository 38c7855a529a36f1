//! The LLM turn loop (§4.3): composes a message list, drives the
//! tool-call/tool-result cycle through the guardrail-wrapped tool executor,
//! and closes out with a cleanup re-issue (§4.2.2) when the output contract
//! is left unsatisfied.

use super::{CancelFlag, Executor};
use crate::error::{GraphError, GraphResult};
use crate::graph::GraphSpec;
use crate::guardrail::GuardrailVerdict;
use crate::llm::{complete_with_timeout, CompletionRequest, Message, ToolDefinition};
use crate::memory::ScopedMemory;
use crate::node::NodeSpec;
use crate::tools::ToolCallRequest;
use serde_json::Value;

/// Rough token estimate used for history trimming; the exact tokenizer is a
/// provider concern, so this mirrors the mock provider's own word-count
/// accounting rather than claiming precision.
fn estimate_tokens(messages: &[Message]) -> u32 {
    messages.iter().map(|m| m.content.split_whitespace().count() as u32).sum()
}

/// Drop the oldest history entries until the running estimate is back under
/// budget. Never drops the most recent message, so a turn can always make
/// progress even against a very tight budget.
fn trim_history(history: &mut Vec<Message>, max_tokens: u32) {
    if max_tokens == 0 {
        return;
    }
    while history.len() > 1 && estimate_tokens(history) > max_tokens {
        history.remove(0);
    }
}

fn render_inputs(node: &NodeSpec, scoped: &ScopedMemory) -> String {
    let mut lines = Vec::new();
    for key in &node.input_keys {
        match scoped.read(key) {
            Some(value) => lines.push(format!("{key}: {value}")),
            None => lines.push(format!("{key}: <absent>")),
        }
    }
    if lines.is_empty() {
        "(no declared inputs)".to_string()
    } else {
        lines.join("\n")
    }
}

impl Executor {
    /// Drives one LLM-backed node's turn to completion (§4.3): submits the
    /// composed message list, dispatches any tool calls through the
    /// guardrail pipeline, and re-invokes until the model returns a
    /// tool-call-free response or the per-turn budget is exhausted.
    pub(super) async fn run_llm_turn(
        &self,
        graph: &GraphSpec,
        node: &NodeSpec,
        scoped: &ScopedMemory,
        session_id: &str,
        cancel: &CancelFlag,
    ) -> GraphResult<Option<u64>> {
        let model = node.model.clone().unwrap_or_else(|| graph.default_model.clone());
        let max_tokens = node.max_tokens.unwrap_or(graph.max_tokens);

        let tool_defs: Vec<ToolDefinition> = node
            .tools
            .iter()
            .filter_map(|name| {
                self.tool_registry.get(name).map(|tool| {
                    let meta = tool.metadata();
                    ToolDefinition::new(
                        meta.name.clone(),
                        meta.description.clone(),
                        meta.input_schema.clone().unwrap_or_else(|| serde_json::json!({"type": "object"})),
                    )
                })
            })
            .collect();

        let mut history = vec![Message::user(render_inputs(node, scoped))];
        let mut tool_calls_made: u32 = 0;
        let mut total_tokens: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(GraphError::Cancelled("run cancelled".to_string()));
            }
            trim_history(&mut history, graph.loop_config.max_history_tokens);

            let offer_tools = !tool_defs.is_empty() && tool_calls_made < node.max_tool_calls_per_turn;
            let mut request = CompletionRequest::new(model.clone(), history.clone()).with_max_tokens(max_tokens);
            if let Some(system_prompt) = &node.system_prompt {
                request = request.with_system(system_prompt.clone());
            }
            if offer_tools {
                request = request.with_tools(tool_defs.clone());
            }

            let response = complete_with_timeout(self.llm_provider.as_ref(), request).await?;
            total_tokens += response.usage.total() as u64;

            if !response.has_tool_calls() {
                self.write_turn_output(node, scoped, &response.content)?;
                return Ok(Some(total_tokens));
            }

            history.push(Message::assistant_tool_calls(response.tool_calls.clone()));

            for call in &response.tool_calls {
                tool_calls_made += 1;
                let verdict = self
                    .guardrail
                    .check_tool_call(&call.name, &call.arguments, None, Some(session_id))
                    .await;

                let result_content = match verdict {
                    GuardrailVerdict::Block { reason } => {
                        serde_json::json!({"error": reason}).to_string()
                    }
                    GuardrailVerdict::Allow => {
                        let result = self
                            .tool_executor
                            .call(ToolCallRequest {
                                tool_name: call.name.clone(),
                                input: call.arguments.clone(),
                                tool_use_id: call.id.clone(),
                            })
                            .await;
                        result.content
                    }
                };
                history.push(Message::tool_result(call.id.clone(), result_content));
            }

            if cancel.is_cancelled() {
                return Err(GraphError::Cancelled("run cancelled".to_string()));
            }
        }
    }

    /// Re-issues a request to the (possibly smaller) cleanup model, instructed
    /// to emit only the still-missing output keys as a JSON object (§4.2.2).
    /// A response that doesn't parse to an object leaves the keys missing;
    /// the caller's validation loop decides whether to retry or fail.
    pub(super) async fn cleanup_reissue(
        &self,
        graph: &GraphSpec,
        node: &NodeSpec,
        scoped: &ScopedMemory,
        missing: &[String],
    ) -> GraphResult<()> {
        let instruction = format!(
            "Emit only a JSON object with exactly these keys: {}. No prose, no markdown fences.",
            missing.join(", ")
        );
        let request = CompletionRequest::new(graph.cleanup_llm_model.clone(), vec![Message::user(instruction)])
            .with_system(format!(
                "You are a strict formatter repairing the output of node '{}'.",
                node.id
            ))
            .with_max_tokens(node.max_tokens.unwrap_or(graph.max_tokens));

        let response = complete_with_timeout(self.llm_provider.as_ref(), request).await?;

        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(response.content.trim()) {
            for key in missing {
                if let Some(value) = map.get(key) {
                    scoped.write(key, value.clone())?;
                }
            }
        }
        Ok(())
    }

    fn write_turn_output(&self, node: &NodeSpec, scoped: &ScopedMemory, content: &str) -> GraphResult<()> {
        if node.output_keys.is_empty() {
            return Ok(());
        }
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(content.trim()) {
            let mut wrote_any = false;
            for key in &node.output_keys {
                if let Some(value) = map.get(key) {
                    scoped.write(key, value.clone())?;
                    wrote_any = true;
                }
            }
            if wrote_any {
                return Ok(());
            }
        }
        for key in &node.output_keys {
            scoped.write(key, Value::String(content.to_string()))?;
        }
        Ok(())
    }
}
