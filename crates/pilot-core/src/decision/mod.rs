//! Decision layer: turns session state and a screenshot into one
//! normalized [`Decision`] the task loop can act on.
//!
//! Two wire protocols produce decisions: function calling with an
//! explicit stop tool, and computer use threading screenshots through
//! response ids. Both shapes normalize to the same struct, so the loop
//! never branches on protocol.

pub mod analyser;
pub mod computer_use;
pub mod responses;
pub mod tool_call;

pub use analyser::Analyser;
pub use computer_use::ComputerUseDecider;
pub use tool_call::ToolCallDecider;

use serde_json::Value;

use crate::core::session::Turn;
use crate::device::CapabilityDefinition;
use crate::error::AgentResult;

/// One action the decider asked the device to perform.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionCall {
    pub name: String,
    pub args: Value,
    /// Wire call id, present only for computer-use calls.
    pub call_id: Option<String>,
}

/// Normalized decision for one iteration.
///
/// `stop` and `calls` are mutually exclusive: a stop decision carries no
/// calls, and the constructors enforce it.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub narration: Option<String>,
    pub calls: Vec<ActionCall>,
    pub stop: bool,
    /// Response id to thread into the next computer-use request.
    pub response_id: Option<String>,
}

impl Decision {
    /// A stop decision: the objective is complete (or nothing is left
    /// to do).
    pub fn stop(narration: Option<String>, response_id: Option<String>) -> Self {
        Self {
            narration,
            calls: Vec::new(),
            stop: true,
            response_id,
        }
    }

    /// An act decision with at least the intent to act. An empty call
    /// list is allowed here only transiently; normalizers collapse it
    /// to a stop decision.
    pub fn act(
        narration: Option<String>,
        calls: Vec<ActionCall>,
        response_id: Option<String>,
    ) -> Self {
        if calls.is_empty() {
            return Self::stop(narration, response_id);
        }
        Self {
            narration,
            calls,
            stop: false,
            response_id,
        }
    }
}

/// Reference to the previous computer-use exchange.
#[derive(Debug, Clone, Copy)]
pub struct Previous<'a> {
    pub response_id: &'a str,
    pub call_id: &'a str,
}

/// Everything a decider may need for one iteration. Each protocol reads
/// the subset it understands.
#[derive(Debug, Clone, Copy)]
pub struct DecisionContext<'a> {
    pub memory: &'a [Turn],
    pub capabilities: &'a [CapabilityDefinition],
    pub screenshot_b64: Option<&'a str>,
    pub previous: Option<Previous<'a>>,
}

/// Protocol-dispatched decision client.
pub enum DecisionClient {
    ToolCall(ToolCallDecider),
    ComputerUse(ComputerUseDecider),
}

impl DecisionClient {
    pub async fn decide(&self, ctx: DecisionContext<'_>) -> AgentResult<Decision> {
        match self {
            DecisionClient::ToolCall(decider) => decider.decide(ctx.memory, ctx.capabilities).await,
            DecisionClient::ComputerUse(decider) => {
                decider.decide(ctx.memory, ctx.previous, ctx.screenshot_b64).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn stop_decisions_carry_no_calls() {
        let decision = Decision::stop(Some("done".into()), None);
        assert!(decision.stop);
        assert!(decision.calls.is_empty());
    }

    #[test]
    fn act_with_no_calls_collapses_to_stop() {
        let decision = Decision::act(Some("nothing to do".into()), Vec::new(), None);
        assert!(decision.stop);
    }

    #[test]
    fn act_with_calls_is_not_stop() {
        let call = ActionCall {
            name: "tap".into(),
            args: json!({"x": 1, "y": 2}),
            call_id: None,
        };
        let decision = Decision::act(None, vec![call], None);
        assert!(!decision.stop);
        assert_eq!(decision.calls.len(), 1);
    }
}
