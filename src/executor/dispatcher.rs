//! Action dispatch and post-action verification.
//!
//! Each dispatchable `AgentAction` variant maps to exactly one automation
//! surface call. State-changing actions are verified afterwards: a short
//! fixed delay, a re-capture, and a fingerprint comparison. Verification
//! failures are warnings, not errors — they ride along in the tool result
//! so the oracle can self-correct on its next turn. Any surface exception
//! is caught here and converted to a textual failure result; the loop
//! never terminates on a dispatch error.

use std::time::Duration;

use crate::agent::state::{AgentAction, VerificationResult};
use crate::errors::CasePilotResult;
use crate::perception::fingerprint::{diff, fingerprint};
use crate::perception::surface::{ActionSpec, AutomationSurface, ScrollDirection};
use crate::perception::types::ScreenSnapshot;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Delay between a state-changing action and the verification capture.
    pub post_action_delay: Duration,
    /// How long `wait_for_response` blocks waiting for the screen to move.
    pub wait_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            post_action_delay: Duration::from_millis(1500),
            wait_timeout: Duration::from_secs(10),
        }
    }
}

/// What came back from dispatching one action.
#[derive(Debug)]
pub struct DispatchReport {
    /// Text recorded as the tool result for the oracle.
    pub result_text: String,
    pub verification: Option<VerificationResult>,
}

impl DispatchReport {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            result_text: text.into(),
            verification: None,
        }
    }

    /// Tool-result text with the verification observation appended.
    pub fn combined_text(&self) -> String {
        match &self.verification {
            Some(v) => format!("{} | {}", self.result_text, v.observation()),
            None => self.result_text.clone(),
        }
    }
}

pub struct ActionDispatcher<'a> {
    surface: &'a dyn AutomationSurface,
    config: DispatchConfig,
}

impl<'a> ActionDispatcher<'a> {
    pub fn new(surface: &'a dyn AutomationSurface, config: DispatchConfig) -> Self {
        Self { surface, config }
    }

    /// Executes one action against the surface. `snapshot` is the capture
    /// the oracle's element indices refer to.
    pub async fn execute(
        &self,
        action: &AgentAction,
        snapshot: &ScreenSnapshot,
    ) -> DispatchReport {
        let report = self.dispatch(action, snapshot).await;
        match report {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(error = %e, action = %action.describe(), "dispatch failed");
                DispatchReport::plain(format!(
                    "Action failed: {e}. The screen state is unchanged as far as known."
                ))
            }
        }
    }

    async fn dispatch(
        &self,
        action: &AgentAction,
        snapshot: &ScreenSnapshot,
    ) -> CasePilotResult<DispatchReport> {
        match action {
            AgentAction::ClickElement {
                element_id,
                expected_outcome,
            } => {
                let Some(element) = snapshot.element_by_id(*element_id) else {
                    return Ok(DispatchReport::plain(format!(
                        "No element with index [{element_id}] exists on the current \
                         screen; re-read the element list."
                    )));
                };
                let label = element.label().map(str::to_string);
                let outcome = self
                    .surface
                    .perform_action(ActionSpec::Click {
                        element_id: *element_id,
                        label: label.clone(),
                    })
                    .await?;
                if !outcome.ok {
                    return Ok(DispatchReport::plain(format!(
                        "Click on [{element_id}] failed: {}",
                        outcome.detail
                    )));
                }
                let verification = self
                    .verify_screen_change(snapshot, expected_outcome)
                    .await?;
                Ok(DispatchReport {
                    result_text: format!(
                        "Clicked [{element_id}] {}",
                        label.as_deref().unwrap_or("")
                    )
                    .trim_end()
                    .to_string(),
                    verification: Some(verification),
                })
            }

            AgentAction::TypeMessage { text, element_id } => {
                // Explicit index, else the focused editable field, else the
                // first editable on screen.
                let focused_editable = snapshot
                    .focused_element()
                    .filter(|e| e.editable)
                    .and_then(|_| {
                        snapshot
                            .element_index()
                            .entries()
                            .iter()
                            .find(|entry| Some(entry.position) == snapshot.focused)
                            .map(|entry| entry.ordinal)
                    });
                let target = element_id
                    .or(focused_editable)
                    .or_else(|| snapshot.first_editable().map(|(id, _)| id));
                let Some(target) = target else {
                    return Ok(DispatchReport::plain(
                        "No editable field is visible; cannot type.".to_string(),
                    ));
                };
                let outcome = self
                    .surface
                    .perform_action(ActionSpec::SetText {
                        element_id: Some(target),
                        text: text.clone(),
                    })
                    .await?;
                if !outcome.ok {
                    return Ok(DispatchReport::plain(format!(
                        "Typing into [{target}] failed: {}",
                        outcome.detail
                    )));
                }
                let verification = self.verify_typed_text(snapshot, text).await?;
                Ok(DispatchReport {
                    result_text: format!("Typed into [{target}]: \"{text}\""),
                    verification: Some(verification),
                })
            }

            AgentAction::ScrollDown { .. } | AgentAction::ScrollUp { .. } => {
                let direction = if matches!(action, AgentAction::ScrollDown { .. }) {
                    ScrollDirection::Down
                } else {
                    ScrollDirection::Up
                };
                let outcome = self
                    .surface
                    .perform_action(ActionSpec::Scroll { direction })
                    .await?;
                if !outcome.ok {
                    return Ok(DispatchReport::plain(format!(
                        "Scroll failed: {}",
                        outcome.detail
                    )));
                }
                let verification = self
                    .verify_screen_change(snapshot, "new content scrolled into view")
                    .await?;
                Ok(DispatchReport {
                    result_text: format!("Scrolled {direction:?}").to_lowercase(),
                    verification: Some(verification),
                })
            }

            AgentAction::Wait { reason } => {
                let changed = self.surface.wait_for_change(self.config.wait_timeout).await?;
                Ok(DispatchReport::plain(if changed {
                    format!("Waited ({reason}); the screen changed.")
                } else {
                    format!(
                        "Waited ({reason}); the screen did not change within {:?}.",
                        self.config.wait_timeout
                    )
                }))
            }

            AgentAction::UploadFile { file_description } => {
                let outcome = self
                    .surface
                    .perform_action(ActionSpec::Upload {
                        description: file_description.clone(),
                    })
                    .await?;
                Ok(DispatchReport::plain(if outcome.ok {
                    format!("Upload started: {}", outcome.detail)
                } else {
                    format!("Upload failed: {}", outcome.detail)
                }))
            }

            AgentAction::PressBack { .. } => {
                let accepted = self.surface.press_back().await?;
                if !accepted {
                    return Ok(DispatchReport::plain(
                        "Back navigation was refused by the system.".to_string(),
                    ));
                }
                let verification = self
                    .verify_screen_change(snapshot, "returned to the previous screen")
                    .await?;
                Ok(DispatchReport {
                    result_text: "Pressed back".to_string(),
                    verification: Some(verification),
                })
            }

            // Terminal and no-op variants never reach the dispatcher.
            AgentAction::RequestHumanReview { .. }
            | AgentAction::MarkResolved { .. }
            | AgentAction::UpdatePlan { .. } => Ok(DispatchReport::plain(format!(
                "Internal action not dispatched: {}",
                action.describe()
            ))),
        }
    }

    /// Re-captures after the settle delay and grades the change.
    async fn verify_screen_change(
        &self,
        before: &ScreenSnapshot,
        expectation: &str,
    ) -> CasePilotResult<VerificationResult> {
        tokio::time::sleep(self.config.post_action_delay).await;
        let after = self.surface.capture_snapshot().await?;

        if fingerprint(before) == fingerprint(&after) {
            return Ok(VerificationResult::Warning {
                observation: format!(
                    "the screen did not change (expected: {expectation}). A popup may \
                     be blocking, the target may be wrong, or a scrollable region may \
                     be exhausted"
                ),
            });
        }
        Ok(VerificationResult::Success {
            observation: diff(Some(before), &after).describe(),
        })
    }

    /// TypeMessage verification: read the field back and compare.
    async fn verify_typed_text(
        &self,
        before: &ScreenSnapshot,
        typed: &str,
    ) -> CasePilotResult<VerificationResult> {
        tokio::time::sleep(self.config.post_action_delay).await;
        let after = self.surface.capture_snapshot().await?;

        let prefix: String = typed.chars().take(20).collect();
        let field_text = after
            .first_editable()
            .and_then(|(_, el)| el.text.clone())
            .unwrap_or_default();

        if field_text.contains(prefix.as_str()) {
            return Ok(VerificationResult::Success {
                observation: "the typed text is present in the input field".into(),
            });
        }
        if field_text.trim().is_empty() && fingerprint(before) != fingerprint(&after) {
            return Ok(VerificationResult::Success {
                observation: "the input field cleared and the screen changed; the \
                              message was likely sent"
                    .into(),
            });
        }
        Ok(VerificationResult::Warning {
            observation: "the input field does not contain the typed text and the \
                          screen is unchanged; the input likely did not register"
                .into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{CasePilotError, CasePilotResult};
    use crate::perception::surface::ActionOutcome;
    use crate::perception::types::{ElementBounds, UiElement};
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn element(label: &str, top: i32, editable: bool) -> UiElement {
        UiElement {
            class_name: if editable { "EditText" } else { "Button" }.into(),
            text: Some(label.to_string()),
            content_desc: None,
            clickable: !editable,
            editable,
            scrollable: false,
            checkable: false,
            checked: false,
            enabled: true,
            focused: false,
            bounds: ElementBounds { left: 0, top, right: 600, bottom: top + 80 },
            child_count: 0,
        }
    }

    fn snap(labels: &[&str]) -> ScreenSnapshot {
        let elements = labels
            .iter()
            .enumerate()
            .map(|(i, l)| element(l, 400 + i as i32 * 100, false))
            .collect();
        ScreenSnapshot::new("com.shop", "Main", elements)
    }

    /// Surface whose captures are scripted in order; actions always succeed.
    struct ScriptedSurface {
        captures: Mutex<Vec<ScreenSnapshot>>,
        fail_actions: bool,
    }

    impl ScriptedSurface {
        fn new(captures: Vec<ScreenSnapshot>) -> Self {
            Self {
                captures: Mutex::new(captures),
                fail_actions: false,
            }
        }
    }

    #[async_trait]
    impl AutomationSurface for ScriptedSurface {
        async fn capture_snapshot(&self) -> CasePilotResult<ScreenSnapshot> {
            let mut captures = self.captures.lock().unwrap();
            if captures.len() > 1 {
                Ok(captures.remove(0))
            } else {
                captures
                    .first()
                    .cloned()
                    .ok_or_else(|| CasePilotError::Surface("no captures scripted".into()))
            }
        }

        async fn perform_action(&self, _spec: ActionSpec) -> CasePilotResult<ActionOutcome> {
            if self.fail_actions {
                Err(CasePilotError::Surface("injector crashed".into()))
            } else {
                Ok(ActionOutcome::ok("done"))
            }
        }

        async fn wait_for_stable_snapshot(
            &self,
            _max_wait: Duration,
            _poll: Duration,
        ) -> CasePilotResult<ScreenSnapshot> {
            self.capture_snapshot().await
        }

        async fn wait_for_change(&self, _timeout: Duration) -> CasePilotResult<bool> {
            Ok(false)
        }

        async fn press_back(&self) -> CasePilotResult<bool> {
            Ok(true)
        }
    }

    fn config() -> DispatchConfig {
        DispatchConfig {
            post_action_delay: Duration::from_millis(1),
            wait_timeout: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn unchanged_screen_after_click_is_a_warning() {
        let before = snap(&["Help"]);
        let surface = ScriptedSurface::new(vec![snap(&["Help"])]);
        let dispatcher = ActionDispatcher::new(&surface, config());
        let report = dispatcher
            .execute(
                &AgentAction::ClickElement {
                    element_id: 1,
                    expected_outcome: "help page opens".into(),
                },
                &before,
            )
            .await;
        assert!(matches!(
            report.verification,
            Some(VerificationResult::Warning { .. })
        ));
    }

    #[tokio::test]
    async fn changed_screen_after_click_is_a_success_with_diff() {
        let before = snap(&["Help"]);
        let surface = ScriptedSurface::new(vec![snap(&["Contact us", "FAQ"])]);
        let dispatcher = ActionDispatcher::new(&surface, config());
        let report = dispatcher
            .execute(
                &AgentAction::ClickElement {
                    element_id: 1,
                    expected_outcome: "help page opens".into(),
                },
                &before,
            )
            .await;
        match report.verification {
            Some(VerificationResult::Success { observation }) => {
                assert!(observation.contains("CONTENT_UPDATED"), "got: {observation}");
            }
            other => panic!("expected Success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_element_id_is_reported_not_raised() {
        let before = snap(&["Help"]);
        let surface = ScriptedSurface::new(vec![snap(&["Help"])]);
        let dispatcher = ActionDispatcher::new(&surface, config());
        let report = dispatcher
            .execute(
                &AgentAction::ClickElement {
                    element_id: 99,
                    expected_outcome: "anything".into(),
                },
                &before,
            )
            .await;
        assert!(report.result_text.contains("[99]"));
        assert!(report.verification.is_none());
    }

    #[tokio::test]
    async fn surface_panic_becomes_textual_failure() {
        let before = snap(&["Help"]);
        let mut surface = ScriptedSurface::new(vec![snap(&["Help"])]);
        surface.fail_actions = true;
        let dispatcher = ActionDispatcher::new(&surface, config());
        let report = dispatcher
            .execute(
                &AgentAction::ClickElement {
                    element_id: 1,
                    expected_outcome: "anything".into(),
                },
                &before,
            )
            .await;
        assert!(report.result_text.contains("Action failed"));
    }

    #[tokio::test]
    async fn typed_text_read_back_confirms_entry() {
        let before = ScreenSnapshot::new(
            "com.shop",
            "Chat",
            vec![element("", 500, true), element("Send", 700, false)],
        );
        let mut after_field = element("My order arrived damaged", 500, true);
        after_field.clickable = false;
        let after = ScreenSnapshot::new(
            "com.shop",
            "Chat",
            vec![after_field, element("Send", 700, false)],
        );
        let surface = ScriptedSurface::new(vec![after]);
        let dispatcher = ActionDispatcher::new(&surface, config());
        let report = dispatcher
            .execute(
                &AgentAction::TypeMessage {
                    text: "My order arrived damaged".into(),
                    element_id: None,
                },
                &before,
            )
            .await;
        assert!(matches!(
            report.verification,
            Some(VerificationResult::Success { .. })
        ));
    }

    #[tokio::test]
    async fn cleared_field_with_changed_screen_counts_as_sent() {
        let before = ScreenSnapshot::new(
            "com.shop",
            "Chat",
            vec![element("draft text", 500, true)],
        );
        // The sent message now shows as a bubble and a delivery receipt; the
        // input field is empty.
        let after = ScreenSnapshot::new(
            "com.shop",
            "Chat",
            vec![
                element("", 500, true),
                element("draft text", 300, false),
                element("Delivered", 400, false),
            ],
        );
        let surface = ScriptedSurface::new(vec![after]);
        let dispatcher = ActionDispatcher::new(&surface, config());
        let report = dispatcher
            .execute(
                &AgentAction::TypeMessage {
                    text: "draft text".into(),
                    element_id: None,
                },
                &before,
            )
            .await;
        match report.verification {
            Some(VerificationResult::Success { observation }) => {
                assert!(observation.contains("likely sent"), "got: {observation}");
            }
            other => panic!("expected Success, got {other:?}"),
        }
    }
}
