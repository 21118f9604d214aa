//! Service surface: session lifecycle and run entry points.
//!
//! Callers interact through three operations: start a session (which
//! provisions the device), run an objective against it (which returns
//! the live event stream), and stop the session. Errors that occur
//! before a stream opens are returned as [`ErrorBody`] values suitable
//! for a JSON response; once a stream is open, faults travel through it
//! as `TASK_FAILED` events instead.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, DecisionProtocol, DeviceKind};
use crate::core::agent::TaskRunner;
use crate::core::emitter::{EventEmitter, EventStream};
use crate::core::session::SessionStore;
use crate::decision::{Analyser, ComputerUseDecider, DecisionClient, ToolCallDecider};
use crate::device::android::AndroidDevice;
use crate::device::desktop::{DesktopSandbox, SandboxDetails};
use crate::device::{CapabilityRegistry, ResolutionMapper};
use crate::error::{AgentError, AgentResult, ErrorKind};
use crate::protocol::TaskEventKind;
use crate::provision;

// A freshly created sandbox needs a moment before the first screenshot.
const SANDBOX_WARMUP: Duration = Duration::from_secs(3);

/// Uniform JSON error body for the non-streaming surface.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(kind: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            kind: kind.to_string(),
            message: message.into(),
        }
    }

    /// Suggested HTTP status for this body.
    pub fn status(&self) -> u16 {
        if self.kind == ErrorKind::Validation.code() { 400 } else { 500 }
    }
}

impl From<&AgentError> for ErrorBody {
    fn from(err: &AgentError) -> Self {
        Self::new(err.kind.code(), err.message.clone())
    }
}

/// Successful start-session payload.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStarted {
    pub success: bool,
    pub message: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxDetails>,
}

/// Per-session device binding, provisioned once at session start.
struct DeviceBinding {
    registry: CapabilityRegistry,
    mapper: ResolutionMapper,
    sandbox: Option<DesktopSandbox>,
    /// Present until announced on the first stream.
    unannounced: Option<SandboxDetails>,
}

/// The service surface. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct Surface {
    config: Arc<Config>,
    store: SessionStore,
    bindings: Arc<Mutex<HashMap<String, DeviceBinding>>>,
    cancellations: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl Surface {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            store: SessionStore::new(),
            bindings: Arc::new(Mutex::new(HashMap::new())),
            cancellations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Provisions the configured device and allocates a session.
    pub async fn start_session(&self) -> AgentResult<SessionStarted> {
        let (registry, sandbox, details) = match self.config.device {
            DeviceKind::Android => {
                provision::ensure_emulator(&self.config.emulator).await?;
                let device = AndroidDevice::new(self.config.emulator.adb_path.clone());
                (device.registry(), None, None)
            }
            DeviceKind::Desktop => {
                let (sandbox, details) = DesktopSandbox::create(
                    &self.config.desktop.bridge_url,
                    self.config.resolution(),
                )
                .await?;
                (sandbox.registry(), Some(sandbox), Some(details))
            }
        };

        let (width, height) = self.config.resolution();
        let session_id = self.store.create();
        self.bindings.lock().expect("bindings lock poisoned").insert(
            session_id.clone(),
            DeviceBinding {
                registry,
                mapper: ResolutionMapper::new(width, height),
                sandbox,
                unannounced: details.clone(),
            },
        );

        tracing::info!(session = session_id, "session started");
        Ok(SessionStarted {
            success: true,
            message: "Session started successfully".to_string(),
            session_id,
            sandbox: details,
        })
    }

    /// Starts one run and returns its event stream.
    ///
    /// Validation failures are returned directly; everything after this
    /// point is reported on the stream, which always terminates and
    /// closes.
    pub fn run_objective(&self, session_id: &str, objective: &str) -> AgentResult<EventStream> {
        if session_id.is_empty() {
            return Err(AgentError::validation("Session Id is required"));
        }
        if objective.trim().is_empty() {
            return Err(AgentError::validation("Query is required"));
        }
        self.store.read(session_id)?;

        let (registry, mapper, announce) = {
            let mut bindings = self.bindings.lock().expect("bindings lock poisoned");
            let binding = bindings
                .get_mut(session_id)
                .ok_or_else(|| AgentError::validation("Invalid session"))?;
            (binding.registry.clone(), binding.mapper, binding.unannounced.take())
        };

        let decider = self.build_decider(mapper)?;
        let analyser = self.build_analyser()?;
        let runner = TaskRunner::new(
            registry,
            decider,
            analyser,
            mapper,
            self.store.clone(),
            self.config.max_iterations,
            Duration::from_millis(self.config.settle_delay_ms),
        );

        let cancel = CancellationToken::new();
        self.cancellations
            .lock()
            .expect("cancellations lock poisoned")
            .insert(session_id.to_string(), cancel.clone());

        let (emitter, stream) = EventEmitter::channel();
        let session_id = session_id.to_string();
        let objective = objective.to_string();
        let cancellations = Arc::clone(&self.cancellations);
        tokio::spawn(async move {
            if let Some(details) = announce {
                emitter.send_with_data(
                    TaskEventKind::SandboxCreated,
                    "Sandbox environment created successfully",
                    json!(details),
                );
                tokio::time::sleep(SANDBOX_WARMUP).await;
            }
            runner.run(&session_id, &objective, &cancel, &emitter).await;
            emitter.close();
            cancellations
                .lock()
                .expect("cancellations lock poisoned")
                .remove(&session_id);
        });

        Ok(stream)
    }

    /// Cancels the session's in-flight run, if any. Idempotent.
    pub fn cancel_run(&self, session_id: &str) {
        if let Some(token) = self
            .cancellations
            .lock()
            .expect("cancellations lock poisoned")
            .get(session_id)
        {
            token.cancel();
        }
    }

    /// Stops the session: cancels any run, tears down a desktop sandbox,
    /// and drops the session memory. Idempotent.
    pub async fn stop_session(&self, session_id: &str) -> AgentResult<()> {
        if session_id.is_empty() {
            return Err(AgentError::validation("Session Id is required"));
        }
        self.cancel_run(session_id);

        let binding = self
            .bindings
            .lock()
            .expect("bindings lock poisoned")
            .remove(session_id);
        if let Some(binding) = binding {
            if let Some(sandbox) = binding.sandbox {
                sandbox.stop().await?;
            }
        }

        self.store.clear(session_id);
        tracing::info!(session = session_id, "session stopped");
        Ok(())
    }

    fn build_decider(&self, mapper: ResolutionMapper) -> AgentResult<DecisionClient> {
        match self.config.decision.protocol {
            DecisionProtocol::ToolCall => Ok(DecisionClient::ToolCall(ToolCallDecider::new(
                &self.config.decision,
            )?)),
            DecisionProtocol::ComputerUse => Ok(DecisionClient::ComputerUse(
                ComputerUseDecider::new(
                    &self.config.decision,
                    self.config.device,
                    mapper.scaled_resolution(),
                )?,
            )),
        }
    }

    // The perception pass only applies to the function-calling protocol;
    // computer use carries its own vision.
    fn build_analyser(&self) -> AgentResult<Option<Analyser>> {
        let applies = self.config.decision.analyser_enabled
            && self.config.decision.protocol == DecisionProtocol::ToolCall;
        if !applies {
            return Ok(None);
        }
        Ok(Some(Analyser::new(&self.config.decision)?))
    }
}
