//! Host-facing progress events.
//!
//! The orchestrator reports progress through an injected sink rather than
//! a process-global store; the host owns the sink's lifecycle and fan-out.

use serde::{Deserialize, Serialize};

use crate::agent::state::{AgentAction, LoopState, VerificationResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    StateChanged { state: LoopState },
    IterationStarted { iteration: u32 },
    ScreenObserved {
        package: String,
        activity: String,
        element_count: usize,
        diff: String,
    },
    DecisionMade {
        iteration: u32,
        action: AgentAction,
        reasoning: String,
    },
    ActionVerified { verification: VerificationResult },
    HintInjected { text: String },
    OracleRetry { attempt: u32, delay_ms: u64, error: String },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &AgentEvent);
}

/// Discards everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &AgentEvent) {}
}

/// Forwards events to the tracing subscriber at info level.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &AgentEvent) {
        match serde_json::to_string(event) {
            Ok(json) => tracing::info!(event = %json, "agent event"),
            Err(e) => tracing::warn!(error = %e, "unserializable agent event"),
        }
    }
}
