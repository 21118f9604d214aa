//! Computer-use decider threading screenshots through response ids.
//!
//! The first request carries the session memory; every follow-up sends
//! only a `computer_call_output` screenshot tied to the previous response
//! id, and the service reconstructs the rest. Zero computer calls in a
//! reply means the objective is complete.

use serde_json::{Value, json};

use crate::config::{DecisionConfig, DeviceKind};
use crate::core::session::Turn;
use crate::error::{AgentError, AgentResult};

use super::responses::{ResponsesClient, first_message_text, items_of_type};
use super::tool_call::role_name;
use super::{ActionCall, Decision, Previous};

const DESKTOP_INSTRUCTIONS: &str = "You are an AI assistant that can use a computer to help \
the user with their tasks. The screenshots that you receive are from a running sandbox \
instance, allowing you to see and interact with a virtual computer environment in real time. \
The virtual computer is based on Ubuntu 22.04, and it has many pre-installed applications. \
You can execute most commands and operations.";

pub struct ComputerUseDecider {
    client: ResponsesClient,
    model: String,
    display: (u32, u32),
    instructions: String,
}

impl ComputerUseDecider {
    pub fn new(
        config: &DecisionConfig,
        device: DeviceKind,
        display: (u32, u32),
    ) -> AgentResult<Self> {
        Ok(Self {
            client: ResponsesClient::new(config)?,
            model: config.computer_use_model.clone(),
            display,
            instructions: match device {
                DeviceKind::Desktop => DESKTOP_INSTRUCTIONS.to_string(),
                DeviceKind::Android => android_instructions(display),
            },
        })
    }

    pub async fn decide(
        &self,
        memory: &[Turn],
        previous: Option<Previous<'_>>,
        screenshot_b64: Option<&str>,
    ) -> AgentResult<Decision> {
        let mut body = json!({
            "model": self.model,
            "truncation": "auto",
            "reasoning": { "effort": "medium", "generate_summary": "concise" },
            "instructions": self.instructions,
            "tools": [{
                "type": "computer_use_preview",
                "display_width": self.display.0,
                "display_height": self.display.1,
                "environment": "linux",
            }],
        });

        match previous {
            None => {
                body["input"] = Value::Array(build_initial_input(memory));
            }
            Some(prev) => {
                let screenshot = screenshot_b64.ok_or_else(|| {
                    AgentError::malformed_response(
                        "Computer-use follow-up requires a screenshot.",
                        "",
                    )
                })?;
                body["previous_response_id"] = json!(prev.response_id);
                body["input"] = json!([{
                    "call_id": prev.call_id,
                    "type": "computer_call_output",
                    "output": {
                        "type": "input_image",
                        "image_url": format!("data:image/png;base64,{screenshot}"),
                    },
                }]);
            }
        }

        let response = self.client.create(body).await?;
        Ok(normalize(&response.output, response.id))
    }
}

fn android_instructions(display: (u32, u32)) -> String {
    let (width, height) = display;
    format!(
        "You are an AI assistant that can use a virtual Android device to help the user \
with their tasks. The screenshots you receive are from a running Android emulator, allowing \
you to see and interact with an emulated Android environment in real time. The emulator \
supports touch-based input, gestures, typing, launching apps, and interacting with the \
Android system like a real phone or tablet.\n\
IMPORTANT: You are given a screenshot that is exactly {width}x{height} pixels. The top-left \
corner is (0,0), the bottom-right is ({},{}). Return the pixel coordinate as seen in this \
image, counting from the full top left. All coordinates are touch coordinates in this pixel \
grid; do not perform any mouse-based scaling or window mapping.",
        width - 1,
        height - 1,
    )
}

fn build_initial_input(memory: &[Turn]) -> Vec<Value> {
    memory
        .iter()
        .map(|turn| json!({"role": role_name(turn.role), "content": turn.content}))
        .collect()
}

/// Normalizes one computer-use reply.
///
/// Only the first computer call is taken; siblings are dropped because
/// the protocol feeds exactly one screenshot back per call id.
fn normalize(output: &[Value], response_id: String) -> Decision {
    let narration = first_message_text(output);
    let computer_calls = items_of_type(output, "computer_call");

    let Some(call) = computer_calls.first() else {
        return Decision::stop(narration, Some(response_id));
    };
    let action = call.get("action").cloned().unwrap_or(json!({}));
    let name = action
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("sandbox")
        .to_string();
    let call_id = call.get("call_id").and_then(Value::as_str).map(str::to_string);

    Decision::act(
        narration,
        vec![ActionCall {
            name,
            args: action,
            call_id,
        }],
        Some(response_id),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_computer_calls_normalizes_to_stop() {
        let output = vec![json!({
            "type": "message",
            "content": [{"type": "output_text", "text": "The task is finished."}]
        })];
        let decision = normalize(&output, "resp_9".into());
        assert!(decision.stop);
        assert_eq!(decision.narration.as_deref(), Some("The task is finished."));
        assert_eq!(decision.response_id.as_deref(), Some("resp_9"));
    }

    #[test]
    fn first_computer_call_is_taken_with_its_call_id() {
        let output = vec![
            json!({
                "type": "message",
                "content": [{"type": "output_text", "text": "Clicking the button."}]
            }),
            json!({
                "type": "computer_call",
                "call_id": "call_a",
                "action": {"type": "click", "x": 100, "y": 200, "button": "left"}
            }),
            json!({
                "type": "computer_call",
                "call_id": "call_b",
                "action": {"type": "wait"}
            }),
        ];
        let decision = normalize(&output, "resp_1".into());
        assert!(!decision.stop);
        assert_eq!(decision.calls.len(), 1);
        assert_eq!(decision.calls[0].name, "click");
        assert_eq!(decision.calls[0].call_id.as_deref(), Some("call_a"));
        assert_eq!(decision.calls[0].args["x"], 100);
    }

    #[test]
    fn call_without_action_type_falls_back_to_sandbox() {
        let output = vec![json!({"type": "computer_call", "call_id": "c", "action": {}})];
        let decision = normalize(&output, "resp_2".into());
        assert_eq!(decision.calls[0].name, "sandbox");
    }

    #[test]
    fn android_instructions_pin_the_coordinate_grid() {
        let text = android_instructions((1080, 2400));
        assert!(text.contains("1080x2400"));
        assert!(text.contains("(1079,2399)"));
    }
}
