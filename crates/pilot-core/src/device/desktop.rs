//! Desktop sandbox backend, driven through an HTTP bridge.
//!
//! The bridge fronts a remote desktop sandbox service: one endpoint to
//! create or reattach a sandbox, one to post input actions, one to fetch
//! screenshots. Creating a sandbox also starts a live view stream whose
//! URL is surfaced to the caller so a UI can embed it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::error::{AgentError, AgentResult, ErrorKind};

use super::{CapabilityDefinition, CapabilityRegistry, handler};

const SANDBOX_TIMEOUT_MS: u64 = 3_600_000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const DPI: u32 = 96;
const WAIT_SECS: u64 = 5;

/// Details of a freshly created sandbox, surfaced once per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxDetails {
    pub sandbox_id: String,
    pub stream_url: String,
}

/// Connected handle on one sandbox behind the bridge.
#[derive(Clone)]
pub struct DesktopSandbox {
    http: reqwest::Client,
    base_url: Arc<str>,
    sandbox_id: Arc<str>,
}

#[derive(Deserialize)]
struct CreateResponse {
    sandbox_id: String,
    stream_url: String,
}

// Deserializes from `{}`, unlike the unit type.
#[derive(Debug, Deserialize)]
struct NoArgs {}

#[derive(Debug, Deserialize)]
struct TypeArgs {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ClickArgs {
    x: i64,
    y: i64,
    #[serde(default = "default_button")]
    button: String,
}

fn default_button() -> String {
    "left".to_string()
}

#[derive(Debug, Deserialize)]
struct PointArgs {
    x: i64,
    y: i64,
}

#[derive(Debug, Deserialize)]
struct ScrollArgs {
    #[serde(default)]
    scroll_y: i64,
}

#[derive(Debug, Deserialize)]
struct KeypressArgs {
    keys: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct PathPoint {
    x: i64,
    y: i64,
}

#[derive(Debug, Deserialize)]
struct DragArgs {
    path: Vec<PathPoint>,
}

impl DesktopSandbox {
    /// Creates a new sandbox at the given resolution and starts its view
    /// stream. Returns the handle plus the details a UI needs to attach.
    pub async fn create(
        base_url: &str,
        resolution: (u32, u32),
    ) -> AgentResult<(Self, SandboxDetails)> {
        let http = bridge_client()?;
        let url = format!("{}/sandboxes", base_url.trim_end_matches('/'));
        let body = json!({
            "resolution": [resolution.0, resolution.1],
            "dpi": DPI,
            "timeout_ms": SANDBOX_TIMEOUT_MS,
        });
        let response = http.post(&url).json(&body).send().await.map_err(bridge_error)?;
        let response = check_status(response).await?;
        let created: CreateResponse = response.json().await.map_err(bridge_error)?;

        let details = SandboxDetails {
            sandbox_id: created.sandbox_id.clone(),
            stream_url: created.stream_url,
        };
        Ok((
            Self {
                http,
                base_url: Arc::from(base_url.trim_end_matches('/')),
                sandbox_id: Arc::from(created.sandbox_id),
            },
            details,
        ))
    }

    /// Reattaches to an existing sandbox without creating anything.
    pub fn connect(base_url: &str, sandbox_id: &str) -> AgentResult<Self> {
        Ok(Self {
            http: bridge_client()?,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            sandbox_id: Arc::from(sandbox_id),
        })
    }

    pub fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    /// Tears the sandbox down. A missing sandbox is not an error.
    pub async fn stop(&self) -> AgentResult<()> {
        let url = format!("{}/sandboxes/{}", self.base_url, self.sandbox_id);
        let response = self.http.delete(&url).send().await.map_err(bridge_error)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(response).await.map(|_| ())
    }

    async fn action(&self, body: serde_json::Value) -> AgentResult<()> {
        let url = format!("{}/sandboxes/{}/actions", self.base_url, self.sandbox_id);
        let response = self.http.post(&url).json(&body).send().await.map_err(bridge_error)?;
        check_status(response).await.map(|_| ())
    }

    /// Captures the screen as PNG bytes.
    pub async fn screenshot(&self) -> AgentResult<Vec<u8>> {
        let url = format!("{}/sandboxes/{}/screenshot", self.base_url, self.sandbox_id);
        let response = self.http.get(&url).send().await.map_err(bridge_error)?;
        let response = check_status(response).await?;
        let bytes = response.bytes().await.map_err(bridge_error)?;
        Ok(bytes.to_vec())
    }

    /// Builds the capability table for this sandbox.
    pub fn registry(&self) -> CapabilityRegistry {
        let screenshot_sandbox = self.clone();
        let mut registry = CapabilityRegistry::new(Arc::new(move || {
            let sandbox = screenshot_sandbox.clone();
            Box::pin(async move { sandbox.screenshot().await })
        }));

        let sandbox = self.clone();
        registry.register(
            type_definition(),
            handler(move |args: TypeArgs| {
                let sandbox = sandbox.clone();
                async move { sandbox.action(json!({"action": "type", "text": args.text})).await }
            }),
        );

        let sandbox = self.clone();
        registry.register(
            click_definition(),
            handler(move |args: ClickArgs| {
                let sandbox = sandbox.clone();
                async move {
                    let action = match args.button.as_str() {
                        "right" => "right_click",
                        // The model names the middle button after the wheel.
                        "wheel" => "middle_click",
                        _ => "left_click",
                    };
                    sandbox
                        .action(json!({"action": action, "x": args.x, "y": args.y}))
                        .await
                }
            }),
        );

        let sandbox = self.clone();
        registry.register(
            double_click_definition(),
            handler(move |args: PointArgs| {
                let sandbox = sandbox.clone();
                async move {
                    sandbox
                        .action(json!({"action": "double_click", "x": args.x, "y": args.y}))
                        .await
                }
            }),
        );

        let sandbox = self.clone();
        registry.register(
            scroll_definition(),
            handler(move |args: ScrollArgs| {
                let sandbox = sandbox.clone();
                async move {
                    // Horizontal scroll is not supported by the sandbox.
                    if args.scroll_y == 0 {
                        return Ok(());
                    }
                    let direction = if args.scroll_y < 0 { "up" } else { "down" };
                    sandbox
                        .action(json!({
                            "action": "scroll",
                            "direction": direction,
                            "amount": args.scroll_y.abs(),
                        }))
                        .await
                }
            }),
        );

        let sandbox = self.clone();
        registry.register(
            keypress_definition(),
            handler(move |args: KeypressArgs| {
                let sandbox = sandbox.clone();
                async move { sandbox.action(json!({"action": "press", "keys": args.keys})).await }
            }),
        );

        let sandbox = self.clone();
        registry.register(
            move_definition(),
            handler(move |args: PointArgs| {
                let sandbox = sandbox.clone();
                async move {
                    sandbox
                        .action(json!({"action": "move_mouse", "x": args.x, "y": args.y}))
                        .await
                }
            }),
        );

        let sandbox = self.clone();
        registry.register(
            drag_definition(),
            handler(move |args: DragArgs| {
                let sandbox = sandbox.clone();
                async move {
                    let (start, end) = match args.path.as_slice() {
                        [start, end] => (*start, *end),
                        _ => {
                            return Err(AgentError::with_details(
                                ErrorKind::ActionExecution,
                                "Invalid arguments for drag action",
                                "path must contain exactly two points",
                            ));
                        }
                    };
                    sandbox
                        .action(json!({
                            "action": "drag",
                            "start": [start.x, start.y],
                            "end": [end.x, end.y],
                        }))
                        .await
                }
            }),
        );

        registry.register(
            wait_definition(),
            handler(move |_args: NoArgs| async move {
                tokio::time::sleep(Duration::from_secs(WAIT_SECS)).await;
                Ok(())
            }),
        );

        registry
    }
}

fn bridge_client() -> AgentResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| {
            AgentError::with_details(
                ErrorKind::Provisioning,
                "Failed to build sandbox bridge client",
                e.to_string(),
            )
        })
}

fn bridge_error(e: reqwest::Error) -> AgentError {
    AgentError::with_details(
        ErrorKind::ActionExecution,
        "Sandbox bridge request failed",
        e.to_string(),
    )
}

async fn check_status(response: reqwest::Response) -> AgentResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AgentError::with_details(
        ErrorKind::ActionExecution,
        format!("Sandbox bridge returned {status}"),
        body,
    ))
}

fn type_definition() -> CapabilityDefinition {
    CapabilityDefinition::new(
        "type",
        "Type the given text at the current cursor position.",
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "The text to type." }
            },
            "required": ["text"]
        }),
    )
}

fn click_definition() -> CapabilityDefinition {
    CapabilityDefinition::new(
        "click",
        "Click at the specified coordinates with the given mouse button.",
        json!({
            "type": "object",
            "properties": {
                "x": { "type": "integer", "description": "Horizontal screen coordinate (pixels)" },
                "y": { "type": "integer", "description": "Vertical screen coordinate (pixels)" },
                "button": {
                    "type": "string",
                    "enum": ["left", "right", "wheel"],
                    "description": "Mouse button to click (default left)"
                }
            },
            "required": ["x", "y"]
        }),
    )
}

fn double_click_definition() -> CapabilityDefinition {
    CapabilityDefinition::new(
        "double_click",
        "Double click at the specified coordinates.",
        json!({
            "type": "object",
            "properties": {
                "x": { "type": "integer" },
                "y": { "type": "integer" }
            },
            "required": ["x", "y"]
        }),
    )
}

fn scroll_definition() -> CapabilityDefinition {
    CapabilityDefinition::new(
        "scroll",
        "Scroll vertically; negative scroll_y scrolls up, positive scrolls down.",
        json!({
            "type": "object",
            "properties": {
                "scroll_y": { "type": "integer", "description": "Vertical scroll amount" }
            },
            "required": ["scroll_y"]
        }),
    )
}

fn keypress_definition() -> CapabilityDefinition {
    CapabilityDefinition::new(
        "keypress",
        "Press one or more keys together (e.g. [\"CTRL\", \"L\"]).",
        json!({
            "type": "object",
            "properties": {
                "keys": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Key names to press simultaneously"
                }
            },
            "required": ["keys"]
        }),
    )
}

fn move_definition() -> CapabilityDefinition {
    CapabilityDefinition::new(
        "move",
        "Move the mouse cursor to the specified coordinates.",
        json!({
            "type": "object",
            "properties": {
                "x": { "type": "integer" },
                "y": { "type": "integer" }
            },
            "required": ["x", "y"]
        }),
    )
}

fn drag_definition() -> CapabilityDefinition {
    CapabilityDefinition::new(
        "drag",
        "Drag the mouse from one screen location to another.",
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "array",
                    "description": "Two points: [{x: startX, y: startY}, {x: endX, y: endY}]",
                    "items": {
                        "type": "object",
                        "properties": {
                            "x": { "type": "integer" },
                            "y": { "type": "integer" }
                        },
                        "required": ["x", "y"]
                    },
                    "minItems": 2,
                    "maxItems": 2
                }
            },
            "required": ["path"]
        }),
    )
}

fn wait_definition() -> CapabilityDefinition {
    CapabilityDefinition::new(
        "wait",
        "Pause for 5 seconds to allow the screen to settle.",
        json!({ "type": "object", "properties": {} }),
    )
}
