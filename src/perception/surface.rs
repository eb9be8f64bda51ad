//! The automation surface boundary.
//!
//! The core never inspects native UI-tree handles; it consumes immutable
//! snapshots and hands back action specs. All resource-lifetime discipline
//! (node recycling, arena-per-capture, release on exit paths) belongs to
//! the implementation behind this trait.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::CasePilotResult;
use crate::perception::types::ScreenSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
}

/// One concrete instruction for the automation surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionSpec {
    /// Click the element at the given capture-local index. The label is a
    /// disambiguation hint for backends that re-resolve by text when the
    /// index is stale.
    Click {
        element_id: u32,
        label: Option<String>,
    },
    /// Set text on the element at the given index, or on the focused
    /// editable field when no index is supplied.
    SetText {
        element_id: Option<u32>,
        text: String,
    },
    Scroll { direction: ScrollDirection },
    /// Attach a file through the current screen's upload affordance. The
    /// backend owns file selection; the description says what to attach.
    Upload { description: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub ok: bool,
    pub detail: String,
}

impl ActionOutcome {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
        }
    }
}

/// UI capture and action execution backend.
#[async_trait]
pub trait AutomationSurface: Send + Sync {
    async fn capture_snapshot(&self) -> CasePilotResult<ScreenSnapshot>;

    async fn perform_action(&self, spec: ActionSpec) -> CasePilotResult<ActionOutcome>;

    /// Captures repeatedly until the screen stops mutating or `max_wait`
    /// elapses, returning the last capture either way.
    async fn wait_for_stable_snapshot(
        &self,
        max_wait: Duration,
        poll_interval: Duration,
    ) -> CasePilotResult<ScreenSnapshot>;

    /// Blocks until the screen changes or the timeout passes.
    async fn wait_for_change(&self, timeout: Duration) -> CasePilotResult<bool>;

    /// Global back navigation. Returns false if the backend refused it.
    async fn press_back(&self) -> CasePilotResult<bool>;
}
