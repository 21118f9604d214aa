//! Android emulator backend, driven through `adb shell input`.
//!
//! Every capability maps to one input primitive on the device. Swipe-based
//! gestures take a fixed duration; the loop's settle delay covers whatever
//! animation follows.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;

use crate::error::{AgentError, AgentResult, ErrorKind};

use super::{CapabilityDefinition, CapabilityRegistry, handler};

const SCROLL_SWIPE_MS: u32 = 350;
const DRAG_SWIPE_MS: u32 = 500;
const WAIT_SECS: u64 = 5;

/// Handle on a running emulator (or attached device) via adb.
#[derive(Clone)]
pub struct AndroidDevice {
    adb_path: Arc<str>,
}

// Deserializes from `{}`, unlike the unit type.
#[derive(Debug, Deserialize)]
struct NoArgs {}

#[derive(Debug, Deserialize)]
struct TypeArgs {
    text: String,
}

#[derive(Debug, Deserialize)]
struct TapArgs {
    x: i64,
    y: i64,
}

#[derive(Debug, Deserialize)]
struct ScrollArgs {
    x: i64,
    y: i64,
    scroll_x: i64,
    scroll_y: i64,
}

#[derive(Debug, Deserialize)]
struct KeyPressArgs {
    keys: i64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct Point {
    x: i64,
    y: i64,
}

#[derive(Debug, Deserialize)]
struct DragArgs {
    path: Vec<Point>,
}

#[derive(Debug, Deserialize)]
struct LongPressArgs {
    x: i64,
    y: i64,
    // u32 so deserialization rejects durations no gesture could hold.
    #[serde(default = "default_long_press_ms")]
    duration: u32,
}

fn default_long_press_ms() -> u32 {
    1000
}

impl AndroidDevice {
    pub fn new(adb_path: impl Into<String>) -> Self {
        Self {
            adb_path: Arc::from(adb_path.into()),
        }
    }

    async fn exec(&self, args: &[&str]) -> AgentResult<Vec<u8>> {
        let output = Command::new(self.adb_path.as_ref())
            .args(args)
            .output()
            .await
            .map_err(|e| {
                AgentError::with_details(
                    ErrorKind::ActionExecution,
                    "Failed to spawn adb",
                    e.to_string(),
                )
            })?;
        if !output.status.success() {
            return Err(AgentError::with_details(
                ErrorKind::ActionExecution,
                format!("adb {} failed", args.first().copied().unwrap_or_default()),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(output.stdout)
    }

    async fn input(&self, args: &[&str]) -> AgentResult<()> {
        let mut full = vec!["shell", "input"];
        full.extend_from_slice(args);
        self.exec(&full).await.map(|_| ())
    }

    async fn swipe(&self, x1: i64, y1: i64, x2: i64, y2: i64, duration_ms: u32) -> AgentResult<()> {
        let coords = [
            x1.to_string(),
            y1.to_string(),
            x2.to_string(),
            y2.to_string(),
            duration_ms.to_string(),
        ];
        let args: Vec<&str> = std::iter::once("swipe")
            .chain(coords.iter().map(String::as_str))
            .collect();
        self.input(&args).await
    }

    async fn tap(&self, x: i64, y: i64) -> AgentResult<()> {
        self.input(&["tap", &x.to_string(), &y.to_string()]).await
    }

    async fn key_event(&self, code: i64) -> AgentResult<()> {
        self.input(&["keyevent", &code.to_string()]).await
    }

    /// Captures the screen as PNG bytes (`adb exec-out screencap -p`).
    pub async fn screenshot(&self) -> AgentResult<Vec<u8>> {
        self.exec(&["exec-out", "screencap", "-p"]).await
    }

    /// Builds the advertised capability table for this device.
    pub fn registry(&self) -> CapabilityRegistry {
        let screenshot_device = self.clone();
        let mut registry = CapabilityRegistry::new(Arc::new(move || {
            let device = screenshot_device.clone();
            Box::pin(async move { device.screenshot().await })
        }));

        let device = self.clone();
        registry.register(
            type_definition(),
            handler(move |args: TypeArgs| {
                let device = device.clone();
                async move {
                    // `input text` encodes spaces as %s.
                    let text = args.text.replace(' ', "%s");
                    device.input(&["text", &text]).await
                }
            }),
        );

        let device = self.clone();
        registry.register(
            tap_definition(),
            handler(move |args: TapArgs| {
                let device = device.clone();
                async move { device.tap(args.x, args.y).await }
            }),
        );

        let device = self.clone();
        registry.register(
            double_tap_definition(),
            handler(move |args: TapArgs| {
                let device = device.clone();
                async move {
                    device.tap(args.x, args.y).await?;
                    device.tap(args.x, args.y).await
                }
            }),
        );

        let device = self.clone();
        registry.register(
            scroll_definition(),
            handler(move |args: ScrollArgs| {
                let device = device.clone();
                async move {
                    let x2 = args.x + args.scroll_x;
                    let y2 = args.y + args.scroll_y;
                    device.swipe(args.x, args.y, x2, y2, SCROLL_SWIPE_MS).await
                }
            }),
        );

        let device = self.clone();
        registry.register(
            key_press_definition(),
            handler(move |args: KeyPressArgs| {
                let device = device.clone();
                async move { device.key_event(args.keys).await }
            }),
        );

        let device = self.clone();
        registry.register(
            drag_definition(),
            handler(move |args: DragArgs| {
                let device = device.clone();
                async move {
                    let (from, to) = match args.path.as_slice() {
                        [from, to] => (*from, *to),
                        _ => {
                            return Err(AgentError::with_details(
                                ErrorKind::ActionExecution,
                                "Invalid arguments for drag action",
                                "path must contain exactly two points",
                            ));
                        }
                    };
                    device.swipe(from.x, from.y, to.x, to.y, DRAG_SWIPE_MS).await
                }
            }),
        );

        let device = self.clone();
        registry.register(
            long_press_definition(),
            handler(move |args: LongPressArgs| {
                let device = device.clone();
                async move {
                    // A same-point swipe held for the duration.
                    device
                        .swipe(args.x, args.y, args.x, args.y, args.duration)
                        .await
                }
            }),
        );

        let device = self.clone();
        registry.register(
            go_back_definition(),
            handler(move |_args: NoArgs| {
                let device = device.clone();
                async move { device.key_event(4).await }
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

fn type_definition() -> CapabilityDefinition {
    CapabilityDefinition::new(
        "type",
        "Type the given text into the current input field on the device.",
        json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "The text to type."
                }
            },
            "required": ["text"]
        }),
    )
}

fn tap_definition() -> CapabilityDefinition {
    CapabilityDefinition::new(
        "tap",
        "Tap (single click) at the specified coordinates on the screen.",
        json!({
            "type": "object",
            "properties": {
                "x": { "type": "integer", "description": "Horizontal screen coordinate (pixels)" },
                "y": { "type": "integer", "description": "Vertical screen coordinate (pixels)" }
            },
            "required": ["x", "y"]
        }),
    )
}

fn double_tap_definition() -> CapabilityDefinition {
    CapabilityDefinition::new(
        "double_tap",
        "Double tap at the specified coordinates on the screen.",
        json!({
            "type": "object",
            "properties": {
                "x": { "type": "integer", "description": "Horizontal screen coordinate (pixels)" },
                "y": { "type": "integer", "description": "Vertical screen coordinate (pixels)" }
            },
            "required": ["x", "y"]
        }),
    )
}

fn scroll_definition() -> CapabilityDefinition {
    CapabilityDefinition::new(
        "scroll",
        "Scroll from a given coordinate by a delta x and delta y.",
        json!({
            "type": "object",
            "properties": {
                "x": { "type": "integer", "description": "Start X coordinate" },
                "y": { "type": "integer", "description": "Start Y coordinate" },
                "scroll_x": {
                    "type": "integer",
                    "description": "Pixels to scroll horizontally (positive right, negative left)"
                },
                "scroll_y": {
                    "type": "integer",
                    "description": "Pixels to scroll vertically (positive down, negative up)"
                }
            },
            "required": ["x", "y", "scroll_x", "scroll_y"]
        }),
    )
}

fn key_press_definition() -> CapabilityDefinition {
    CapabilityDefinition::new(
        "key_press",
        "Press a hardware key by Android key code.",
        json!({
            "type": "object",
            "properties": {
                "keys": { "type": "integer", "description": "The Android key event code to press" }
            },
            "required": ["keys"]
        }),
    )
}

fn drag_definition() -> CapabilityDefinition {
    CapabilityDefinition::new(
        "drag",
        "Swipe/drag from one screen location to another.",
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

fn long_press_definition() -> CapabilityDefinition {
    CapabilityDefinition::new(
        "long_press",
        "Long-press (touch and hold) at a coordinate for the given duration.",
        json!({
            "type": "object",
            "properties": {
                "x": { "type": "integer", "description": "X coordinate to long press" },
                "y": { "type": "integer", "description": "Y coordinate to long press" },
                "duration": {
                    "type": "integer",
                    "description": "Duration of long press in milliseconds (default 1000 ms)",
                    "default": 1000
                }
            },
            "required": ["x", "y"]
        }),
    )
}

fn go_back_definition() -> CapabilityDefinition {
    CapabilityDefinition::new(
        "go_back",
        "Simulate the Android back button.",
        json!({ "type": "object", "properties": {} }),
    )
}

fn wait_definition() -> CapabilityDefinition {
    CapabilityDefinition::new(
        "wait",
        "Pause for 5 seconds to allow screen transitions or async events.",
        json!({ "type": "object", "properties": {} }),
    )
}
