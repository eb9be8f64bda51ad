//! Prompt construction.
//!
//! The system prompt carries the goal, the hard rules, and phase-specific
//! guidance; the per-iteration observation carries the indexed element
//! listing, the change description, loop-break warnings and the sub-goal
//! checklist. Observation header lines (`App:`/`Screen:`/`Phase:`/`Turn:`)
//! are the fields the masking summarizer scans for later.

use crate::agent::phase::NavigationPhase;
use crate::agent::state::CaseContext;
use crate::agent::subgoals::SubGoalTracker;
use crate::perception::fingerprint::ScreenDiff;
use crate::perception::types::ScreenSnapshot;

const HARD_RULES: &str = "\
Rules:
- Interact only through the provided tools; select exactly one tool per turn.
- Use the 1-based element indices from the latest observation. Indices are \
not stable across turns; always re-read the newest listing.
- Never invent information. If the app asks for data you do not have, call \
`request_human_review`.
- Never enter payment details or credentials; escalate instead.
- Call `mark_resolved` only after the support conversation confirms the \
desired outcome, and include any reference number in the summary.
- If an action had no effect, try a different element or path instead of \
repeating it.";

fn phase_guidance(phase: NavigationPhase) -> &'static str {
    match phase {
        NavigationPhase::NavigatingToSupport => {
            "Guidance: you are still navigating. Look for the case item first, \
             then a help or support entry point. Profile and settings screens \
             often hide the support link; scroll before backing out."
        }
        NavigationPhase::OnTargetPage => {
            "Guidance: you are on the case item's page. Look for a help, support \
             or contact option related to this item rather than generic FAQs."
        }
        NavigationPhase::OnSupportPage => {
            "Guidance: you are on a support page. Prefer a live chat or contact \
             option over FAQ articles; FAQ links rarely resolve a case."
        }
        NavigationPhase::InChat => {
            "Guidance: you are in the support chat. State the issue concisely \
             with the reference id, answer the agent's questions, and wait for \
             replies with `wait_for_response` instead of re-sending."
        }
    }
}

pub fn build_system_prompt(case: &CaseContext, phase: NavigationPhase) -> String {
    let mut prompt = format!(
        "You are CasePilot, an autonomous agent operating the '{}' app on behalf \
         of a customer.\n\nCase: {}\nDesired outcome: {}\n",
        case.target_app, case.issue_description, case.desired_outcome
    );
    if !case.reference_ids.is_empty() {
        prompt.push_str(&format!("Reference ids: {}\n", case.reference_ids.join(", ")));
    }
    prompt.push('\n');
    prompt.push_str(HARD_RULES);
    prompt.push_str("\n\n");
    prompt.push_str(phase_guidance(phase));
    if !case.app_hints.is_empty() {
        prompt.push_str("\n\nApp-specific hints:\n");
        for hint in &case.app_hints {
            prompt.push_str(&format!("- {hint}\n"));
        }
    }
    prompt
}

/// Renders the indexed element listing, bars and content in index order.
fn element_listing(snapshot: &ScreenSnapshot) -> String {
    let mut lines = Vec::new();
    for entry in snapshot.element_index().entries() {
        let element = &snapshot.elements[entry.position];
        lines.push(format!("[{}] {}", entry.ordinal, element.describe()));
    }
    if lines.is_empty() {
        "(no meaningful elements on screen)".to_string()
    } else {
        lines.join("\n")
    }
}

#[allow(clippy::too_many_arguments)]
pub fn build_observation(
    snapshot: &ScreenSnapshot,
    diff: &ScreenDiff,
    phase: NavigationPhase,
    turn: u32,
    subgoals: &SubGoalTracker,
    warnings: &[String],
    last_verification: Option<&str>,
) -> String {
    let mut text = format!(
        "App: {}\nScreen: {}\nPhase: {}\nTurn: {}\n",
        snapshot.package,
        snapshot.activity,
        phase.name(),
        turn
    );
    text.push_str(&format!("Change: {}\n", diff.describe()));
    if let Some(verification) = last_verification {
        text.push_str(&format!("Previous action: {verification}\n"));
    }
    for warning in warnings {
        text.push_str(warning);
        text.push('\n');
    }
    text.push_str("\nProgress:\n");
    text.push_str(&subgoals.checklist());
    text.push_str("\n\nElements:\n");
    text.push_str(&element_listing(snapshot));
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::types::{ElementBounds, UiElement};

    fn case() -> CaseContext {
        CaseContext {
            target_app: "ShopFast".into(),
            target_package: "com.shopfast".into(),
            issue_description: "Order #4411 arrived damaged".into(),
            desired_outcome: "a refund".into(),
            reference_ids: vec!["#4411".into()],
            app_hints: vec!["Support lives under Profile > Help".into()],
        }
    }

    #[test]
    fn system_prompt_carries_goal_rules_and_hints() {
        let prompt = build_system_prompt(&case(), NavigationPhase::OnSupportPage);
        assert!(prompt.contains("ShopFast"));
        assert!(prompt.contains("a refund"));
        assert!(prompt.contains("#4411"));
        assert!(prompt.contains("exactly one tool"));
        assert!(prompt.contains("live chat"));
        assert!(prompt.contains("Profile > Help"));
    }

    #[test]
    fn observation_header_matches_the_masking_fields() {
        let snapshot = ScreenSnapshot::new(
            "com.shopfast",
            "OrderDetail",
            vec![UiElement {
                class_name: "Button".into(),
                text: Some("Get help".into()),
                content_desc: None,
                clickable: true,
                editable: false,
                scrollable: false,
                checkable: false,
                checked: false,
                enabled: true,
                focused: false,
                bounds: ElementBounds { left: 0, top: 500, right: 400, bottom: 580 },
                child_count: 0,
            }],
        );
        let subgoals = SubGoalTracker::for_case(&case());
        let observation = build_observation(
            &snapshot,
            &ScreenDiff::FirstScreen,
            NavigationPhase::OnTargetPage,
            3,
            &subgoals,
            &["WARNING: test warning".into()],
            Some("Success: screen changed"),
        );
        assert!(observation.starts_with("App: com.shopfast\nScreen: OrderDetail\n"));
        assert!(observation.contains("Turn: 3"));
        assert!(observation.contains("[1] Button \"Get help\""));
        assert!(observation.contains("WARNING: test warning"));
        assert!(observation.contains("Previous action: Success"));
        assert!(observation.contains("[ ] "));
    }
}
