//! Ordered event channel from the task loop to a remote listener.
//!
//! The channel is unbounded: the loop never blocks on a slow listener, and
//! events arrive in the exact order they were sent. `close` is idempotent,
//! and sends after close are silently dropped rather than treated as an
//! error, so the loop can keep narrating even when the listener is gone.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::protocol::{TaskEvent, TaskEventKind, format_frame};

/// Sending half: held by the task loop.
#[derive(Clone)]
pub struct EventEmitter {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<TaskEvent>>>>,
    closed: Arc<AtomicBool>,
}

/// Receiving half: drained by the listener (stream writer, tests).
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<TaskEvent>,
}

impl EventEmitter {
    /// Creates a connected emitter/stream pair.
    pub fn channel() -> (Self, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
                closed: Arc::new(AtomicBool::new(false)),
            },
            EventStream { rx },
        )
    }

    /// Emits an event with a message and no payload.
    pub fn send(&self, kind: TaskEventKind, message: impl Into<String>) {
        self.emit(TaskEvent::new(kind, message));
    }

    /// Emits an event with a structured payload.
    pub fn send_with_data(&self, kind: TaskEventKind, message: impl Into<String>, data: Value) {
        self.emit(TaskEvent::new(kind, message).with_data(data));
    }

    /// Emits a pre-built event (used for terminal failure payloads).
    pub fn emit(&self, event: TaskEvent) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let guard = self.tx.lock().expect("emitter lock poisoned");
        if let Some(tx) = guard.as_ref() {
            // Listener gone is not the loop's problem.
            let _ = tx.send(event);
        }
    }

    /// Closes the channel. Idempotent; subsequent sends are dropped.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the sender lets the stream observe end-of-task.
        self.tx.lock().expect("emitter lock poisoned").take();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl futures_util::Stream for EventStream {
    type Item = TaskEvent;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<TaskEvent>> {
        self.rx.poll_recv(cx)
    }
}

impl EventStream {
    /// Receives the next event, or `None` once the emitter is closed and
    /// the backlog is drained.
    pub async fn next(&mut self) -> Option<TaskEvent> {
        self.rx.recv().await
    }

    /// Receives the next event already formatted as a wire frame.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.next().await.map(|ev| format_frame(&ev))
    }

    /// Adapts the stream to yield wire frames instead of events.
    pub fn into_frames(self) -> impl futures_util::Stream<Item = String> {
        futures_util::StreamExt::map(self, |ev| format_frame(&ev))
    }

    /// Drains every remaining event (intended for tests and batch callers).
    pub async fn collect(mut self) -> Vec<TaskEvent> {
        let mut events = Vec::new();
        while let Some(ev) = self.next().await {
            events.push(ev);
        }
        events
    }
}
