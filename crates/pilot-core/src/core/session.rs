//! Process-wide session store.
//!
//! A session holds the ordered memory log that threads state across loop
//! iterations. The store is the single source of truth: the loop reads a
//! fresh snapshot whenever it needs one and pushes appends back, so reads
//! never alias live internal state. All mutation goes through the store
//! lock, which linearizes concurrent appends to the same session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AgentError, AgentResult};

/// Who produced a memory turn. A plain tag for downstream formatting,
/// not a behavioral distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Action,
}

/// One entry in a session's memory log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Snapshot of one session's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub memory: Vec<Turn>,
    pub created_at: DateTime<Utc>,
}

/// Keyed store of sessions, shared across concurrent runs.
///
/// No automatic expiry: sessions live until [`SessionStore::clear`] or
/// process restart.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<String, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new session and returns its opaque id.
    pub fn create(&self) -> String {
        let id = Uuid::new_v4().to_string();
        let session = Session {
            id: id.clone(),
            memory: Vec::new(),
            created_at: Utc::now(),
        };
        self.inner
            .lock()
            .expect("session store lock poisoned")
            .insert(id.clone(), session);
        id
    }

    /// Returns a copy-out snapshot of the session.
    ///
    /// The snapshot is unaffected by later mutation of the stored state.
    pub fn read(&self, session_id: &str) -> AgentResult<Session> {
        if session_id.is_empty() {
            return Err(AgentError::validation("Session Id is required"));
        }
        self.inner
            .lock()
            .expect("session store lock poisoned")
            .get(session_id)
            .cloned()
            .ok_or_else(|| AgentError::validation("Invalid session"))
    }

    /// Appends one turn to the session's memory log.
    pub fn append_turn(&self, session_id: &str, turn: Turn) -> AgentResult<()> {
        let mut sessions = self.inner.lock().expect("session store lock poisoned");
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| AgentError::validation("Invalid session"))?;
        session.memory.push(turn);
        Ok(())
    }

    /// Deletes the session and its memory. Idempotent.
    pub fn clear(&self, session_id: &str) {
        self.inner
            .lock()
            .expect("session store lock poisoned")
            .remove(session_id);
    }
}
