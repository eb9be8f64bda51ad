//! Sub-goal progress tracking.
//!
//! A fixed ordered checklist instantiated from the case context at run
//! start. Phase and content signals mark milestones DONE in one shot —
//! reaching a later milestone implies completion of every earlier one.
//! DONE is terminal per sub-goal for the run; nothing un-marks it. The
//! rendered checklist goes into every prompt to counter goal drift.

use serde::{Deserialize, Serialize};

use crate::agent::phase::NavigationPhase;
use crate::agent::state::CaseContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubGoalStatus {
    Pending,
    InProgress,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubGoal {
    pub description: String,
    pub status: SubGoalStatus,
}

/// Milestone indices into the fixed template.
const GOAL_OPEN_APP: usize = 0;
const GOAL_FIND_ITEM: usize = 1;
const GOAL_ITEM_DETAILS: usize = 2;
const GOAL_FIND_SUPPORT_ENTRY: usize = 3;
const GOAL_REACH_SUPPORT: usize = 4;
const GOAL_ENTER_CHAT: usize = 5;
const GOAL_RESOLVE: usize = 6;

#[derive(Debug, Clone)]
pub struct SubGoalTracker {
    goals: Vec<SubGoal>,
}

impl SubGoalTracker {
    pub fn for_case(case: &CaseContext) -> Self {
        let item = case
            .reference_ids
            .first()
            .map(|id| format!("the case item ({id})"))
            .unwrap_or_else(|| "the case item".to_string());
        let descriptions = [
            format!("Open {}", case.target_app),
            format!("Locate {item}"),
            format!("Open the details page for {item}"),
            "Find the help/support entry point".to_string(),
            "Reach the support/contact page".to_string(),
            "Enter the support chat".to_string(),
            format!("Describe the issue and obtain: {}", case.desired_outcome),
        ];
        Self {
            goals: descriptions
                .into_iter()
                .map(|description| SubGoal {
                    description,
                    status: SubGoalStatus::Pending,
                })
                .collect(),
        }
    }

    pub fn goals(&self) -> &[SubGoal] {
        &self.goals
    }

    /// Marks every sub-goal up to and including `index` DONE. Idempotent;
    /// never demotes.
    pub fn mark_done_through(&mut self, index: usize) {
        for goal in self.goals.iter_mut().take(index + 1) {
            goal.status = SubGoalStatus::Done;
        }
        if let Some(next) = self.goals.get_mut(index + 1) {
            if next.status == SubGoalStatus::Pending {
                next.status = SubGoalStatus::InProgress;
            }
        }
    }

    /// Advances milestones implied by the current phase and app identity.
    pub fn observe(&mut self, phase: NavigationPhase, in_target_app: bool) {
        if in_target_app {
            self.mark_done_through(GOAL_OPEN_APP);
        }
        match phase {
            NavigationPhase::NavigatingToSupport => {}
            NavigationPhase::OnTargetPage => self.mark_done_through(GOAL_ITEM_DETAILS),
            NavigationPhase::OnSupportPage => self.mark_done_through(GOAL_REACH_SUPPORT),
            NavigationPhase::InChat => self.mark_done_through(GOAL_ENTER_CHAT),
        }
    }

    /// Called when the agent has sent a message describing the issue.
    pub fn note_issue_described(&mut self) {
        self.mark_done_through(GOAL_ENTER_CHAT);
        if self.goals[GOAL_RESOLVE].status == SubGoalStatus::Pending {
            self.goals[GOAL_RESOLVE].status = SubGoalStatus::InProgress;
        }
    }

    pub fn note_resolved(&mut self) {
        self.mark_done_through(GOAL_RESOLVE);
    }

    /// Checklist string included in every prompt.
    pub fn checklist(&self) -> String {
        self.goals
            .iter()
            .map(|g| {
                let mark = match g.status {
                    SubGoalStatus::Pending => "[ ]",
                    SubGoalStatus::InProgress => "[~]",
                    SubGoalStatus::Done => "[x]",
                };
                format!("{mark} {}", g.description)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn done_count(&self) -> usize {
        self.goals
            .iter()
            .filter(|g| g.status == SubGoalStatus::Done)
            .count()
    }

    /// Milestone index for "find the support entry point"; exposed for the
    /// guard that notices support keywords before the phase flips.
    pub fn mark_support_entry_seen(&mut self) {
        self.mark_done_through(GOAL_FIND_SUPPORT_ENTRY);
    }

    pub fn mark_item_found(&mut self) {
        self.mark_done_through(GOAL_FIND_ITEM);
    }
}
