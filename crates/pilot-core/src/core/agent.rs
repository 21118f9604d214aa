//! The task loop orchestrator.
//!
//! One run drives a session toward a natural-language objective:
//! observe the screen, optionally run the perception pass, ask the
//! decider, narrate, and dispatch the decided actions — until the
//! decider stops, the iteration cap trips, the caller cancels, or a
//! fault surfaces. Every run emits exactly one terminal event.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::decision::{Analyser, Decision, DecisionClient, DecisionContext, Previous};
use crate::device::{CapabilityRegistry, ResolutionMapper};
use crate::error::{AgentError, AgentResult, ErrorKind};
use crate::protocol::{TaskEvent, TaskEventKind};

use super::emitter::EventEmitter;
use super::session::{Role, SessionStore, Turn};

/// Decision source for the loop. Implemented by [`DecisionClient`] in
/// production; tests script their own.
pub trait Decider: Send + Sync {
    fn decide(
        &self,
        ctx: DecisionContext<'_>,
    ) -> impl std::future::Future<Output = AgentResult<Decision>> + Send;
}

impl Decider for DecisionClient {
    async fn decide(&self, ctx: DecisionContext<'_>) -> AgentResult<Decision> {
        DecisionClient::decide(self, ctx).await
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum TaskOutcome {
    /// The decider declared the objective complete.
    Completed,
    /// A fault or the iteration cap terminated the run.
    Failed(AgentError),
    /// The caller cancelled the run.
    Aborted,
}

pub struct TaskRunner<D: Decider> {
    registry: CapabilityRegistry,
    decider: D,
    analyser: Option<Analyser>,
    mapper: ResolutionMapper,
    store: SessionStore,
    max_iterations: u32,
    settle_delay: Duration,
}

impl<D: Decider> TaskRunner<D> {
    pub fn new(
        registry: CapabilityRegistry,
        decider: D,
        analyser: Option<Analyser>,
        mapper: ResolutionMapper,
        store: SessionStore,
        max_iterations: u32,
        settle_delay: Duration,
    ) -> Self {
        Self {
            registry,
            decider,
            analyser,
            mapper,
            store,
            max_iterations,
            settle_delay,
        }
    }

    /// Runs one objective to a terminal event.
    ///
    /// The emitter is left open; the caller owns stream shutdown.
    pub async fn run(
        &self,
        session_id: &str,
        objective: &str,
        cancel: &CancellationToken,
        emitter: &EventEmitter,
    ) -> TaskOutcome {
        match self.run_inner(session_id, objective, cancel, emitter).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = %err, "task run failed");
                emitter.emit(TaskEvent::failed(&err));
                TaskOutcome::Failed(err)
            }
        }
    }

    async fn run_inner(
        &self,
        session_id: &str,
        objective: &str,
        cancel: &CancellationToken,
        emitter: &EventEmitter,
    ) -> AgentResult<TaskOutcome> {
        emitter.send(TaskEventKind::TaskStarted, "Task started");
        self.store
            .append_turn(session_id, Turn::new(Role::User, format!("OBJECTIVE: {objective}")))?;

        let mut iteration = 0u32;
        let mut previous: Option<(String, String)> = None;

        loop {
            if cancel.is_cancelled() {
                emitter.send(TaskEventKind::TaskAborted, "Task aborted by user");
                return Ok(TaskOutcome::Aborted);
            }
            iteration += 1;
            if iteration > self.max_iterations {
                let err =
                    AgentError::new(ErrorKind::IterationLimit, "Maximum iteration limit exceeded");
                emitter.emit(TaskEvent::failed(&err));
                return Ok(TaskOutcome::Failed(err));
            }
            tracing::debug!(iteration, session = session_id, "loop iteration");

            let screenshot = self.registry.screenshot().await?;
            let screenshot_b64 = BASE64.encode(self.mapper.scale_screenshot(&screenshot));

            if let Some(analyser) = &self.analyser {
                let memory = self.store.read(session_id)?.memory;
                let observation = analyser.observe(&memory, &screenshot_b64).await?;
                self.store.append_turn(
                    session_id,
                    Turn::new(Role::Assistant, format!("THOUGHT: {observation}")),
                )?;
                emitter.send(TaskEventKind::TaskReasoning, observation);
            }

            let memory = self.store.read(session_id)?.memory;
            let ctx = DecisionContext {
                memory: &memory,
                capabilities: self.registry.definitions(),
                screenshot_b64: Some(&screenshot_b64),
                previous: previous.as_ref().map(|(response_id, call_id)| Previous {
                    response_id,
                    call_id,
                }),
            };
            let decision = self.decider.decide(ctx).await?;

            if let Some(narration) = &decision.narration {
                self.store.append_turn(
                    session_id,
                    Turn::new(Role::Assistant, format!("THOUGHT: {narration}")),
                )?;
                emitter.send(TaskEventKind::TaskReasoning, narration.clone());
            }

            if decision.stop {
                emitter.send(TaskEventKind::TaskCompleted, "Task completed");
                return Ok(TaskOutcome::Completed);
            }

            for call in &decision.calls {
                if cancel.is_cancelled() {
                    emitter.send(TaskEventKind::TaskAborted, "Task aborted by user");
                    return Ok(TaskOutcome::Aborted);
                }

                // A skipped call never started: no memory turns, no action
                // event pair. The response-id thread still advances so a
                // computer-use follow-up stays valid.
                if !self.registry.contains(&call.name) {
                    tracing::warn!(capability = %call.name, "unknown capability, skipping");
                    if let (Some(response_id), Some(call_id)) =
                        (decision.response_id.clone(), call.call_id.clone())
                    {
                        previous = Some((response_id, call_id));
                    }
                    continue;
                }

                let args_text = call.args.to_string();
                self.store.append_turn(
                    session_id,
                    Turn::new(
                        Role::Action,
                        json!({
                            "type": "function_call",
                            "name": call.name,
                            "arguments": args_text,
                        })
                        .to_string(),
                    ),
                )?;
                emitter.send_with_data(
                    TaskEventKind::TaskActionStarted,
                    format!("Performing {} action", call.name),
                    json!({ "action": { "type": "function_call", "name": call.name, "args": call.args } }),
                );

                let device_args = map_args_to_device(&call.args, &self.mapper);
                self.registry.dispatch(&call.name, &device_args).await?;

                tokio::time::sleep(self.settle_delay).await;

                self.store.append_turn(
                    session_id,
                    Turn::new(
                        Role::Action,
                        format!("{} function with args {args_text} executed successfully", call.name),
                    ),
                )?;
                emitter.send_with_data(
                    TaskEventKind::TaskActionCompleted,
                    format!("Completed {} action", call.name),
                    json!({ "action": { "type": "function_call", "name": call.name, "args": call.args } }),
                );

                if let (Some(response_id), Some(call_id)) =
                    (decision.response_id.clone(), call.call_id.clone())
                {
                    previous = Some((response_id, call_id));
                }
            }
        }
    }
}

/// Maps model-space coordinates in a call's arguments back to native
/// device pixels. Fields the mapper does not recognize pass through.
fn map_args_to_device(args: &Value, mapper: &ResolutionMapper) -> Value {
    let mut mapped = args.clone();
    let Some(object) = mapped.as_object_mut() else {
        return mapped;
    };

    if let (Some(x), Some(y)) = (
        object.get("x").and_then(Value::as_i64),
        object.get("y").and_then(Value::as_i64),
    ) {
        let (dx, dy) = mapper.to_original((x, y));
        object.insert("x".into(), json!(dx));
        object.insert("y".into(), json!(dy));
    }

    if let (Some(sx), Some(sy)) = (
        object.get("scroll_x").and_then(Value::as_i64),
        object.get("scroll_y").and_then(Value::as_i64),
    ) {
        // Deltas scale like coordinates.
        let (dx, dy) = mapper.to_original((sx, sy));
        object.insert("scroll_x".into(), json!(dx));
        object.insert("scroll_y".into(), json!(dy));
    }

    if let Some(path) = object.get_mut("path").and_then(Value::as_array_mut) {
        for point in path {
            let Some(p) = point.as_object_mut() else { continue };
            if let (Some(x), Some(y)) = (
                p.get("x").and_then(Value::as_i64),
                p.get("y").and_then(Value::as_i64),
            ) {
                let (dx, dy) = mapper.to_original((x, y));
                p.insert("x".into(), json!(dx));
                p.insert("y".into(), json!(dy));
            }
        }
    }

    mapped
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use crate::decision::ActionCall;
    use crate::device::CapabilityDefinition;

    use super::*;

    struct Scripted {
        decisions: Mutex<VecDeque<Decision>>,
    }

    impl Scripted {
        fn new(decisions: Vec<Decision>) -> Self {
            Self {
                decisions: Mutex::new(decisions.into()),
            }
        }
    }

    impl Decider for Scripted {
        async fn decide(&self, _ctx: DecisionContext<'_>) -> AgentResult<Decision> {
            Ok(self
                .decisions
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Decision::stop(None, None)))
        }
    }

    fn tap_call() -> ActionCall {
        ActionCall {
            name: "tap".into(),
            args: json!({"x": 100, "y": 200}),
            call_id: None,
        }
    }

    fn registry_counting_taps(calls: Arc<AtomicUsize>) -> CapabilityRegistry {
        let mut registry =
            CapabilityRegistry::new(Arc::new(|| Box::pin(async { Ok(vec![0u8; 4]) })));
        registry.register(
            CapabilityDefinition::new(
                "tap",
                "Tap the screen.",
                json!({"type": "object", "properties": {}, "required": []}),
            ),
            Arc::new(move |_args| {
                calls.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Ok(()) })
            }),
        );
        registry
    }

    fn failing_registry() -> CapabilityRegistry {
        let mut registry =
            CapabilityRegistry::new(Arc::new(|| Box::pin(async { Ok(vec![0u8; 4]) })));
        registry.register(
            CapabilityDefinition::new(
                "tap",
                "Tap the screen.",
                json!({"type": "object", "properties": {}}),
            ),
            Arc::new(|_args| {
                Box::pin(async {
                    Err(AgentError::new(ErrorKind::ActionExecution, "device gone"))
                })
            }),
        );
        registry
    }

    fn runner<D: Decider>(
        registry: CapabilityRegistry,
        decider: D,
        store: SessionStore,
        max_iterations: u32,
    ) -> TaskRunner<D> {
        TaskRunner::new(
            registry,
            decider,
            None,
            ResolutionMapper::new(1280, 800),
            store,
            max_iterations,
            Duration::from_millis(0),
        )
    }

    #[tokio::test]
    async fn completes_after_acting_then_stopping() {
        let dispatches = Arc::new(AtomicUsize::new(0));
        let store = SessionStore::new();
        let id = store.create();
        let decider = Scripted::new(vec![
            Decision::act(Some("tapping the icon".into()), vec![tap_call()], None),
            Decision::stop(Some("objective reached".into()), None),
        ]);
        let runner = runner(
            registry_counting_taps(Arc::clone(&dispatches)),
            decider,
            store.clone(),
            25,
        );

        let (emitter, stream) = EventEmitter::channel();
        let cancel = CancellationToken::new();
        let outcome = runner.run(&id, "open settings", &cancel, &emitter).await;
        emitter.close();

        assert!(matches!(outcome, TaskOutcome::Completed));
        assert_eq!(dispatches.load(Ordering::SeqCst), 1);

        let kinds: Vec<TaskEventKind> =
            stream.collect().await.into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TaskEventKind::TaskStarted,
                TaskEventKind::TaskReasoning,
                TaskEventKind::TaskActionStarted,
                TaskEventKind::TaskActionCompleted,
                TaskEventKind::TaskReasoning,
                TaskEventKind::TaskCompleted,
            ]
        );

        let memory = store.read(&id).unwrap().memory;
        assert_eq!(memory[0].content, "OBJECTIVE: open settings");
        assert!(memory.iter().any(|t| t.content == "THOUGHT: tapping the icon"));
        assert!(memory.iter().any(|t| t.content.ends_with("executed successfully")));
    }

    #[tokio::test]
    async fn iteration_cap_fails_with_its_code() {
        let dispatches = Arc::new(AtomicUsize::new(0));
        let store = SessionStore::new();
        let id = store.create();
        let decider = Scripted::new(vec![
            Decision::act(None, vec![tap_call()], None),
            Decision::act(None, vec![tap_call()], None),
            Decision::act(None, vec![tap_call()], None),
        ]);
        let runner = runner(
            registry_counting_taps(Arc::clone(&dispatches)),
            decider,
            store,
            2,
        );

        let (emitter, stream) = EventEmitter::channel();
        let outcome = runner
            .run(&id, "keep tapping", &CancellationToken::new(), &emitter)
            .await;
        emitter.close();

        let TaskOutcome::Failed(err) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(err.kind, ErrorKind::IterationLimit);
        assert_eq!(dispatches.load(Ordering::SeqCst), 2);

        let events = stream.collect().await;
        let last = events.last().unwrap();
        assert_eq!(last.kind, TaskEventKind::TaskFailed);
        assert_eq!(last.data.as_ref().unwrap()["code"], "iteration_limit_exceeded");
        // Exactly one terminal event.
        assert_eq!(events.iter().filter(|e| e.kind.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn pre_cancelled_run_aborts_without_acting() {
        let dispatches = Arc::new(AtomicUsize::new(0));
        let store = SessionStore::new();
        let id = store.create();
        let decider = Scripted::new(vec![Decision::act(None, vec![tap_call()], None)]);
        let runner = runner(
            registry_counting_taps(Arc::clone(&dispatches)),
            decider,
            store,
            25,
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let (emitter, stream) = EventEmitter::channel();
        let outcome = runner.run(&id, "anything", &cancel, &emitter).await;
        emitter.close();

        assert!(matches!(outcome, TaskOutcome::Aborted));
        assert_eq!(dispatches.load(Ordering::SeqCst), 0);
        let kinds: Vec<TaskEventKind> =
            stream.collect().await.into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![TaskEventKind::TaskStarted, TaskEventKind::TaskAborted]);
    }

    #[tokio::test]
    async fn dispatch_failure_terminates_with_task_failed() {
        let store = SessionStore::new();
        let id = store.create();
        let decider = Scripted::new(vec![Decision::act(None, vec![tap_call()], None)]);
        let runner = runner(failing_registry(), decider, store, 25);

        let (emitter, stream) = EventEmitter::channel();
        let outcome = runner
            .run(&id, "tap it", &CancellationToken::new(), &emitter)
            .await;
        emitter.close();

        let TaskOutcome::Failed(err) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(err.kind, ErrorKind::ActionExecution);

        let events = stream.collect().await;
        assert_eq!(events.last().unwrap().kind, TaskEventKind::TaskFailed);
        assert_eq!(events.iter().filter(|e| e.kind.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn unknown_capability_is_skipped_with_no_action_events() {
        let store = SessionStore::new();
        let id = store.create();
        let decider = Scripted::new(vec![
            Decision::act(
                None,
                vec![ActionCall {
                    name: "fly".into(),
                    args: json!({}),
                    call_id: None,
                }],
                None,
            ),
            Decision::stop(None, None),
        ]);
        let runner = runner(
            registry_counting_taps(Arc::new(AtomicUsize::new(0))),
            decider,
            store.clone(),
            25,
        );

        let (emitter, stream) = EventEmitter::channel();
        let outcome = runner
            .run(&id, "do the impossible", &CancellationToken::new(), &emitter)
            .await;
        emitter.close();

        assert!(matches!(outcome, TaskOutcome::Completed));

        // A skipped call never started: no action event pair at all.
        let kinds: Vec<TaskEventKind> =
            stream.collect().await.into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![TaskEventKind::TaskStarted, TaskEventKind::TaskCompleted]);

        // And no call or completion turns in memory either.
        let memory = store.read(&id).unwrap().memory;
        assert!(memory.iter().all(|t| !t.content.contains("fly")));
    }

    #[tokio::test]
    async fn cancellation_wins_when_the_cap_would_trip_on_the_same_iteration() {
        let store = SessionStore::new();
        let id = store.create();
        let decider = Scripted::new(vec![Decision::act(None, vec![tap_call()], None)]);
        let runner = runner(
            registry_counting_taps(Arc::new(AtomicUsize::new(0))),
            decider,
            store,
            0,
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let (emitter, stream) = EventEmitter::channel();
        let outcome = runner.run(&id, "anything", &cancel, &emitter).await;
        emitter.close();

        assert!(matches!(outcome, TaskOutcome::Aborted));
        let events = stream.collect().await;
        assert_eq!(events.last().unwrap().kind, TaskEventKind::TaskAborted);
        assert!(events.iter().all(|e| e.kind != TaskEventKind::TaskFailed));
    }

    #[test]
    fn args_map_back_to_device_pixels() {
        // 2560x1440 scales down; mapping inverts the scale.
        let mapper = ResolutionMapper::new(2560, 1440);
        let scale = mapper.scale();

        let mapped = map_args_to_device(&json!({"x": 683, "y": 384, "button": "left"}), &mapper);
        let expected_x = (683f64 / scale).round() as i64;
        assert_eq!(mapped["x"], expected_x);
        assert_eq!(mapped["button"], "left");

        let mapped = map_args_to_device(
            &json!({"path": [{"x": 100, "y": 100}, {"x": 200, "y": 200}]}),
            &mapper,
        );
        let expected = (100f64 / scale).round() as i64;
        assert_eq!(mapped["path"][0]["x"], expected);

        // Identity mapper passes everything through untouched.
        let identity = ResolutionMapper::new(1280, 800);
        let args = json!({"x": 5, "y": 9, "scroll_x": 0, "scroll_y": -120});
        assert_eq!(map_args_to_device(&args, &identity), args);
    }
}
