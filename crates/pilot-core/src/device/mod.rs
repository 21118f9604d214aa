//! Device action executors.
//!
//! Each backend exposes a fixed capability table: named, schema-described
//! operations that mutate the device (tap, type, drag, ...) plus the
//! screenshot observation. The table doubles as the tool-definition list
//! handed to the decision service.
//!
//! Dispatch policy: unknown capability names are skipped, never a fault;
//! argument shapes are validated against the declared schema before the
//! handler runs. Capabilities do not wait for the device to settle —
//! the loop inserts its own settle delay after dispatch.

pub mod android;
pub mod desktop;
pub mod resolution;

pub use resolution::ResolutionMapper;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, AgentResult, ErrorKind};

/// One named device operation, with a JSON-schema argument shape.
///
/// Serializes in the flattened function-tool layout the decision service
/// expects (`{type: "function", name, description, parameters}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl CapabilityDefinition {
    pub fn new(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            kind: "function".to_string(),
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

/// Outcome of a dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The capability ran to completion.
    Completed,
    /// The name is not in the table; treated as a no-op by contract.
    Skipped,
}

/// Async capability handler.
pub type CapabilityFuture = Pin<Box<dyn Future<Output = AgentResult<()>> + Send>>;
pub type CapabilityHandler = Arc<dyn Fn(&Value) -> CapabilityFuture + Send + Sync>;

/// Async screenshot handler returning PNG bytes.
pub type ScreenshotFuture = Pin<Box<dyn Future<Output = AgentResult<Vec<u8>>> + Send>>;
pub type ScreenshotHandler = Arc<dyn Fn() -> ScreenshotFuture + Send + Sync>;

/// Capability table for one device backend (definitions + handlers).
#[derive(Clone)]
pub struct CapabilityRegistry {
    definitions: Vec<CapabilityDefinition>,
    handlers: HashMap<String, CapabilityHandler>,
    screenshot: ScreenshotHandler,
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("definitions", &self.definitions)
            .field("handlers_len", &self.handlers.len())
            .finish()
    }
}

impl CapabilityRegistry {
    pub fn new(screenshot: ScreenshotHandler) -> Self {
        Self {
            definitions: Vec::new(),
            handlers: HashMap::new(),
            screenshot,
        }
    }

    /// Registers a capability. Later registrations replace earlier ones
    /// with the same name.
    pub fn register(&mut self, definition: CapabilityDefinition, handler: CapabilityHandler) {
        self.handlers.insert(definition.name.clone(), handler);
        self.definitions.retain(|d| d.name != definition.name);
        self.definitions.push(definition);
    }

    /// The advertised capability list (tool definitions for the decider).
    pub fn definitions(&self) -> &[CapabilityDefinition] {
        &self.definitions
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Validates arguments and invokes the named capability.
    ///
    /// Unknown names resolve to [`Dispatch::Skipped`]; handler failures and
    /// argument-shape mismatches surface as action-execution errors.
    pub async fn dispatch(&self, name: &str, args: &Value) -> AgentResult<Dispatch> {
        let Some(handler) = self.handlers.get(name) else {
            tracing::warn!(capability = name, "unknown capability, skipping");
            return Ok(Dispatch::Skipped);
        };
        if let Some(definition) = self.definitions.iter().find(|d| d.name == name) {
            validate_args(definition, args)?;
        }
        handler(args).await?;
        Ok(Dispatch::Completed)
    }

    /// Captures the current screen as PNG bytes.
    pub async fn screenshot(&self) -> AgentResult<Vec<u8>> {
        (self.screenshot)().await
    }
}

/// Checks the argument object against the capability's declared schema:
/// every `required` property must be present.
fn validate_args(definition: &CapabilityDefinition, args: &Value) -> AgentResult<()> {
    let required = definition.parameters.get("required").and_then(Value::as_array);
    let Some(required) = required else {
        return Ok(());
    };
    if required.is_empty() {
        return Ok(());
    }

    let Some(object) = args.as_object() else {
        return Err(AgentError::with_details(
            ErrorKind::ActionExecution,
            format!("Invalid arguments for {} action", definition.name),
            "expected a JSON object",
        ));
    };
    for key in required.iter().filter_map(Value::as_str) {
        if !object.contains_key(key) {
            return Err(AgentError::with_details(
                ErrorKind::ActionExecution,
                format!("Invalid arguments for {} action", definition.name),
                format!("missing required argument `{key}`"),
            ));
        }
    }
    Ok(())
}

/// Wraps a typed async function as a boxed capability handler.
pub fn handler<A, F, Fut>(f: F) -> CapabilityHandler
where
    A: for<'de> Deserialize<'de> + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AgentResult<()>> + Send + 'static,
{
    Arc::new(move |args: &Value| {
        let parsed: Result<A, _> = serde_json::from_value(args.clone());
        match parsed {
            Ok(a) => Box::pin(f(a)),
            Err(e) => Box::pin(async move {
                Err(AgentError::with_details(
                    ErrorKind::ActionExecution,
                    "Invalid action arguments",
                    e.to_string(),
                ))
            }),
        }
    })
}
