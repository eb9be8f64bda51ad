//! The safety policy boundary.
//!
//! The engine hard-codes no privileged action types; what needs approval
//! and what is blocked outright is entirely the injected policy's call.

use serde::{Deserialize, Serialize};

use crate::agent::state::AgentAction;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PolicyDecision {
    Allowed,
    /// Terminal escalation: the run ends as NeedsHumanReview.
    NeedsApproval { reason: String },
    /// Recoverable: the action is skipped and the oracle is told why.
    Blocked { reason: String },
}

pub trait SafetyPolicy: Send + Sync {
    fn validate(&self, action: &AgentAction, iteration: u32) -> PolicyDecision;
}

/// Permissive default for hosts that gate elsewhere.
pub struct AllowAll;

impl SafetyPolicy for AllowAll {
    fn validate(&self, _action: &AgentAction, _iteration: u32) -> PolicyDecision {
        PolicyDecision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_all_allows_everything() {
        let policy = AllowAll;
        let action = AgentAction::MarkResolved {
            summary: "done".into(),
        };
        assert_eq!(policy.validate(&action, 1), PolicyDecision::Allowed);
    }
}
