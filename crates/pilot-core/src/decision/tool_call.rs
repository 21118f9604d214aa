//! Function-calling decider with an explicit stop tool.
//!
//! The decider sees the session memory as plain text turns plus the
//! device's capability table (and the stop tool) and replies with
//! narration and zero or more function calls. A stop call anywhere in
//! the reply wins over every sibling call.

use serde_json::{Value, json};

use crate::config::DecisionConfig;
use crate::core::session::{Role, Turn};
use crate::device::CapabilityDefinition;
use crate::error::{AgentError, AgentResult};

use super::responses::{ResponsesClient, first_message_text, items_of_type};
use super::{ActionCall, Decision};

pub const STOP_TOOL: &str = "stop";

const SYSTEM_PROMPT: &str = "You are an AI assistant with mobile device use abilities.\n\
IMPORTANT\n\
- Before typing something, make sure that input is selected";

// A trailing assistant turn steers the reply toward tool calls instead
// of open-ended prose.
const ACTION_NUDGE: &str = "Based on the previous observation, I will decide on the action \
needed to execute the next step and will now use tool calls to take these actions, or use \
the stop command if the objective is complete.";

pub struct ToolCallDecider {
    client: ResponsesClient,
    model: String,
}

impl ToolCallDecider {
    pub fn new(config: &DecisionConfig) -> AgentResult<Self> {
        Ok(Self {
            client: ResponsesClient::new(config)?,
            model: config.model.clone(),
        })
    }

    pub async fn decide(
        &self,
        memory: &[Turn],
        capabilities: &[CapabilityDefinition],
    ) -> AgentResult<Decision> {
        let body = json!({
            "model": self.model,
            "input": build_input(memory),
            "tools": build_tools(capabilities),
        });
        let response = self.client.create(body).await?;
        normalize(&response.output)
    }
}

pub(crate) fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::System => "system",
        // Action records read back as assistant turns.
        Role::Assistant | Role::Action => "assistant",
    }
}

fn build_input(memory: &[Turn]) -> Vec<Value> {
    let mut input = Vec::with_capacity(memory.len() + 2);
    input.push(json!({"role": "system", "content": SYSTEM_PROMPT}));
    for turn in memory {
        input.push(json!({"role": role_name(turn.role), "content": turn.content}));
    }
    input.push(json!({"role": "assistant", "content": ACTION_NUDGE}));
    input
}

fn build_tools(capabilities: &[CapabilityDefinition]) -> Vec<Value> {
    let mut tools: Vec<Value> = capabilities
        .iter()
        .map(|def| serde_json::to_value(def).unwrap_or_default())
        .collect();
    tools.push(stop_tool());
    tools
}

fn stop_tool() -> Value {
    json!({
        "type": "function",
        "name": STOP_TOOL,
        "description": "Sends message that the task has been completed",
        "parameters": { "type": "object", "properties": {} }
    })
}

/// Normalizes raw output items to a [`Decision`].
///
/// Stop wins: a stop call discards every sibling call. No calls at all
/// also normalizes to stop, so a decider that merely narrates cannot
/// wedge the loop.
fn normalize(output: &[Value]) -> AgentResult<Decision> {
    let narration = first_message_text(output);
    let raw_calls = items_of_type(output, "function_call");

    let mut calls = Vec::with_capacity(raw_calls.len());
    for raw in raw_calls {
        let name = raw
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AgentError::malformed_response(
                    "Function call without a name.",
                    &raw.to_string(),
                )
            })?
            .to_string();
        if name == STOP_TOOL {
            return Ok(Decision::stop(narration, None));
        }
        let args = parse_arguments(raw)?;
        calls.push(ActionCall {
            name,
            args,
            call_id: raw.get("call_id").and_then(Value::as_str).map(str::to_string),
        });
    }
    Ok(Decision::act(narration, calls, None))
}

/// Function call arguments arrive as a JSON-encoded string.
fn parse_arguments(raw: &Value) -> AgentResult<Value> {
    match raw.get("arguments") {
        None | Some(Value::Null) => Ok(json!({})),
        Some(Value::String(encoded)) => serde_json::from_str(encoded).map_err(|_| {
            AgentError::malformed_response("Function call arguments are not valid JSON.", encoded)
        }),
        // Some gateways inline the object directly.
        Some(other) => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_call_wins_over_sibling_calls() {
        let output = vec![
            json!({"type": "function_call", "name": "tap", "arguments": "{\"x\":1,\"y\":2}"}),
            json!({"type": "function_call", "name": "stop", "arguments": "{}"}),
            json!({"type": "function_call", "name": "type", "arguments": "{\"text\":\"hi\"}"}),
        ];
        let decision = normalize(&output).unwrap();
        assert!(decision.stop);
        assert!(decision.calls.is_empty());
    }

    #[test]
    fn calls_are_parsed_in_order_with_decoded_arguments() {
        let output = vec![
            json!({
                "type": "message",
                "content": [{"type": "output_text", "text": "Tapping the icon."}]
            }),
            json!({
                "type": "function_call",
                "name": "tap",
                "call_id": "call_1",
                "arguments": "{\"x\": 540, \"y\": 1200}"
            }),
            json!({"type": "function_call", "name": "go_back", "arguments": "{}"}),
        ];
        let decision = normalize(&output).unwrap();
        assert!(!decision.stop);
        assert_eq!(decision.narration.as_deref(), Some("Tapping the icon."));
        assert_eq!(decision.calls.len(), 2);
        assert_eq!(decision.calls[0].name, "tap");
        assert_eq!(decision.calls[0].args["x"], 540);
        assert_eq!(decision.calls[0].call_id.as_deref(), Some("call_1"));
        assert_eq!(decision.calls[1].name, "go_back");
    }

    #[test]
    fn narration_only_reply_normalizes_to_stop() {
        let output = vec![json!({
            "type": "message",
            "content": [{"type": "output_text", "text": "Everything is done."}]
        })];
        let decision = normalize(&output).unwrap();
        assert!(decision.stop);
        assert_eq!(decision.narration.as_deref(), Some("Everything is done."));
    }

    #[test]
    fn undecodable_arguments_are_malformed() {
        let output = vec![json!({
            "type": "function_call",
            "name": "tap",
            "arguments": "{not json"
        })];
        let err = normalize(&output).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::MalformedResponse);
    }

    #[test]
    fn input_is_system_then_memory_then_nudge() {
        let memory = vec![
            Turn::new(Role::User, "OBJECTIVE: open settings"),
            Turn::new(Role::Assistant, "THOUGHT: I see the home screen"),
        ];
        let input = build_input(&memory);
        assert_eq!(input.len(), 4);
        assert_eq!(input[0]["role"], "system");
        assert_eq!(input[1]["content"], "OBJECTIVE: open settings");
        assert_eq!(input[3]["role"], "assistant");
        assert_eq!(input[3]["content"], ACTION_NUDGE);
    }

    #[test]
    fn tools_end_with_the_stop_tool() {
        let caps = vec![CapabilityDefinition::new(
            "tap",
            "Tap the screen.",
            json!({"type": "object", "properties": {}}),
        )];
        let tools = build_tools(&caps);
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[1]["name"], STOP_TOOL);
    }
}
