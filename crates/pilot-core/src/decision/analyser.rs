//! Perception pass: describes the current screen against the objective
//! before the decider runs.
//!
//! The analyser sees the full memory plus the fresh screenshot and
//! replies with a structured observation. The observation is appended to
//! memory as a thought, so the decider works from text rather than
//! pixels.

use serde_json::{Value, json};

use crate::config::DecisionConfig;
use crate::core::session::Turn;
use crate::error::{AgentError, AgentResult};

use super::responses::{ResponsesClient, first_message_text};
use super::tool_call;

const ANALYSIS_PROMPT: &str = "This image shows the current display of the device screen. \
Please respond in the following format\n\
The objective is: [put the objective here]\n\
On the screen, I see: [an extensive list of everything that might be relevant to the \
objective including icons, menus, apps, UI elements, and possible navigations and user \
interactions]\n\
This means the objective is: [complete|not complete]\n\
(Only continue if the objective is not complete.)\n\
The next step is to [tap|type|open] [put the next single step here] in order to \
[put what you expect to happen here].";

pub struct Analyser {
    client: ResponsesClient,
    model: String,
}

impl Analyser {
    pub fn new(config: &DecisionConfig) -> AgentResult<Self> {
        Ok(Self {
            client: ResponsesClient::new(config)?,
            model: config.model.clone(),
        })
    }

    /// Produces one observation of the current screen.
    pub async fn observe(&self, memory: &[Turn], screenshot_b64: &str) -> AgentResult<String> {
        let body = json!({
            "model": self.model,
            "input": build_input(memory, screenshot_b64),
        });
        let response = self.client.create(body).await?;
        first_message_text(&response.output).ok_or_else(|| {
            AgentError::malformed_response(
                "Analyser returned no observation.",
                &Value::Array(response.output).to_string(),
            )
        })
    }
}

fn build_input(memory: &[Turn], screenshot_b64: &str) -> Vec<Value> {
    let mut input: Vec<Value> = memory
        .iter()
        .map(|turn| json!({"role": tool_call::role_name(turn.role), "content": turn.content}))
        .collect();
    input.push(json!({
        "role": "user",
        "content": [
            { "type": "input_text", "text": ANALYSIS_PROMPT },
            {
                "type": "input_image",
                "image_url": format!("data:image/png;base64,{screenshot_b64}")
            }
        ]
    }));
    input
}
