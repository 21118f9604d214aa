//! Task loop core: event emission, session memory, and the orchestrator.

pub mod agent;
pub mod emitter;
pub mod session;
