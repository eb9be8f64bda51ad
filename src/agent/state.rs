use serde::{Deserialize, Serialize};

/// One step of an `update_plan` reasoning aid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step: String,
    pub status: String,
}

/// The action the oracle chose for this iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentAction {
    ClickElement {
        element_id: u32,
        expected_outcome: String,
    },
    TypeMessage {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        element_id: Option<u32>,
    },
    ScrollDown { reason: String },
    ScrollUp { reason: String },
    Wait { reason: String },
    UploadFile { file_description: String },
    PressBack { reason: String },
    RequestHumanReview {
        reason: String,
        needs_input: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        input_prompt: Option<String>,
    },
    MarkResolved { summary: String },
    /// Pure-reasoning no-op: recorded in history, never dispatched, does not
    /// consume the iteration budget.
    UpdatePlan {
        explanation: String,
        steps: Vec<PlanStep>,
    },
}

impl AgentAction {
    /// One-line descriptor, also used by the duplicate-action guard.
    pub fn describe(&self) -> String {
        match self {
            AgentAction::ClickElement { element_id, expected_outcome } => {
                format!("click element [{element_id}] expecting: {expected_outcome}")
            }
            AgentAction::TypeMessage { text, element_id } => match element_id {
                Some(id) => format!("type into [{id}]: \"{text}\""),
                None => format!("type into focused field: \"{text}\""),
            },
            AgentAction::ScrollDown { reason } => format!("scroll down ({reason})"),
            AgentAction::ScrollUp { reason } => format!("scroll up ({reason})"),
            AgentAction::Wait { reason } => format!("wait ({reason})"),
            AgentAction::UploadFile { file_description } => {
                format!("upload file: {file_description}")
            }
            AgentAction::PressBack { reason } => format!("press back ({reason})"),
            AgentAction::RequestHumanReview { reason, .. } => {
                format!("request human review: {reason}")
            }
            AgentAction::MarkResolved { summary } => format!("mark resolved: {summary}"),
            AgentAction::UpdatePlan { explanation, .. } => {
                format!("update plan: {explanation}")
            }
        }
    }

    /// Actions expected to mutate the screen, and therefore verified.
    pub fn changes_screen(&self) -> bool {
        matches!(
            self,
            AgentAction::ClickElement { .. }
                | AgentAction::TypeMessage { .. }
                | AgentAction::ScrollDown { .. }
                | AgentAction::ScrollUp { .. }
                | AgentAction::PressBack { .. }
        )
    }
}

/// Outcome of post-action verification. Informational, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VerificationResult {
    Success { observation: String },
    Warning { observation: String },
}

impl VerificationResult {
    pub fn observation(&self) -> &str {
        match self {
            VerificationResult::Success { observation }
            | VerificationResult::Warning { observation } => observation,
        }
    }
}

/// Lifecycle state of the agent loop, surfaced through the event sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

/// Terminal result of one `run()` invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RunResult {
    Resolved { summary: String, iterations: u32 },
    Failed { reason: String },
    NeedsHumanReview { reason: String, iterations: u32 },
    Cancelled,
}

/// The external goal description. Immutable for the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseContext {
    /// Human-readable name of the application being navigated.
    pub target_app: String,
    /// Package identity of that application.
    pub target_package: String,
    /// What the customer reported.
    pub issue_description: String,
    /// What a successful resolution looks like.
    pub desired_outcome: String,
    /// Order numbers, booking codes and similar correlating identifiers.
    #[serde(default)]
    pub reference_ids: Vec<String>,
    /// Optional per-app guidance supplied by the host (e.g. from a hint
    /// database the core does not own).
    #[serde(default)]
    pub app_hints: Vec<String>,
}
