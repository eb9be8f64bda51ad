//! The agent loop orchestrator.
//!
//! A single sequential observe→think→act→verify loop. All mutable loop
//! state (history, counters, trackers) is owned by the engine and touched
//! only from the loop itself; hosts drive pause/cancel through a
//! `ControlHandle` whose flags are checked at the top of every iteration
//! and at every suspension point, so cancellation takes effect between
//! atomic steps and is never swallowed by the retry/backoff paths.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::agent::history::{ConversationHistory, ConversationMessage, HistoryConfig};
use crate::agent::loop_control::{DuplicateActionGuard, LoopMonitor};
use crate::agent::phase::{classify, NavigationPhase};
use crate::agent::prompt::{build_observation, build_system_prompt};
use crate::agent::state::{AgentAction, CaseContext, LoopState, RunResult};
use crate::agent::subgoals::SubGoalTracker;
use crate::config::AppConfig;
use crate::events::{AgentEvent, EventSink};
use crate::executor::dispatcher::{ActionDispatcher, DispatchConfig};
use crate::executor::safety::{PolicyDecision, SafetyPolicy};
use crate::oracle::protocol::decode_decision;
use crate::oracle::provider::DecisionOracle;
use crate::oracle::retry::BackoffPolicy;
use crate::oracle::types::Decision;
use crate::perception::fingerprint::{diff, fingerprint};
use crate::perception::surface::AutomationSurface;
use crate::perception::types::ScreenSnapshot;
use crate::session::{SessionEntry, SessionLog};

/// Cooperative pause/cancel flags shared with the host.
#[derive(Clone)]
pub struct ControlHandle {
    paused: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

impl ControlHandle {
    pub fn new() -> Self {
        Self {
            paused: Arc::new(AtomicBool::new(false)),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

impl Default for ControlHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Why the retrying oracle call gave up.
enum OracleCallEnd {
    Terminal(String),
    Cancelled,
}

pub struct AgentEngine {
    surface: Arc<dyn AutomationSurface>,
    oracle: Arc<dyn DecisionOracle>,
    policy: Box<dyn SafetyPolicy>,
    sink: Arc<dyn EventSink>,
    config: AppConfig,
    case: CaseContext,
    control: ControlHandle,
    state: LoopState,
}

impl AgentEngine {
    pub fn new(
        surface: Arc<dyn AutomationSurface>,
        oracle: Arc<dyn DecisionOracle>,
        policy: Box<dyn SafetyPolicy>,
        sink: Arc<dyn EventSink>,
        config: AppConfig,
        case: CaseContext,
    ) -> Self {
        Self {
            surface,
            oracle,
            policy,
            sink,
            config,
            case,
            control: ControlHandle::new(),
            state: LoopState::Idle,
        }
    }

    /// Handle for pausing, resuming and cancelling the run from outside.
    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    fn set_state(&mut self, state: LoopState) {
        if self.state != state {
            self.state = state.clone();
            self.sink.emit(&AgentEvent::StateChanged { state });
        }
    }

    /// Runs the loop to a terminal result. All per-run state is created
    /// here and dropped on return; nothing survives across runs.
    pub async fn run(&mut self) -> RunResult {
        self.set_state(LoopState::Running);

        let mut session = SessionLog::new();
        session.record(
            SessionEntry::now("run_started")
                .with_payload(serde_json::to_value(&self.case).unwrap_or_default()),
        );
        tracing::info!(
            session = %session.session_id,
            app = %self.case.target_app,
            "agent run started"
        );

        let mut history = ConversationHistory::new(HistoryConfig {
            keep_recent_turns: self.config.history.keep_recent_turns,
            token_budget: self.config.history.token_budget,
            max_messages: self.config.history.max_messages,
        });
        let mut subgoals = SubGoalTracker::for_case(&self.case);
        let mut monitor = LoopMonitor::new(self.config.agent.stagnation_threshold);
        let mut dup_guard = DuplicateActionGuard::new(self.config.agent.duplicate_action_limit);
        let backoff = self.config.backoff.policy();
        let dispatch_config = DispatchConfig {
            post_action_delay: self.config.agent.post_action_delay(),
            wait_timeout: self.config.agent.wait_timeout(),
        };

        let mut previous: Option<ScreenSnapshot> = None;
        let mut last_verification: Option<String> = None;
        let mut iteration: u32 = 0;
        let mut own_app_redirects: u32 = 0;

        let result = loop {
            // ── Suspension boundary: cancel / pause ───────────────────────
            if self.control.is_cancelled() {
                break RunResult::Cancelled;
            }
            if self.control.is_paused() {
                self.set_state(LoopState::Paused);
                while self.control.is_paused() {
                    if self.control.is_cancelled() {
                        break;
                    }
                    tokio::time::sleep(self.config.agent.pause_poll()).await;
                }
                if self.control.is_cancelled() {
                    break RunResult::Cancelled;
                }
                self.set_state(LoopState::Running);
            }

            iteration += 1;
            if iteration > self.config.agent.max_iterations {
                break RunResult::Failed {
                    reason: format!(
                        "iteration budget exhausted after {} iterations without resolution",
                        self.config.agent.max_iterations
                    ),
                };
            }
            self.sink.emit(&AgentEvent::IterationStarted { iteration });

            // ── Observe ──────────────────────────────────────────────────
            let snapshot = match self
                .surface
                .wait_for_stable_snapshot(
                    self.config.agent.capture_max_wait(),
                    self.config.agent.capture_poll(),
                )
                .await
            {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    break RunResult::Failed {
                        reason: format!("screen capture failed: {e}"),
                    };
                }
            };

            // Own-app guard: the agent backed out into its host app. Undo
            // and refund the iteration, this sub-step is bookkeeping. The
            // refund stops after a few consecutive redirects so a surface
            // stuck on the host app still drains the budget.
            if !self.config.agent.own_package.is_empty()
                && snapshot.package == self.config.agent.own_package
            {
                tracing::warn!("landed in own host app, pressing back");
                let _ = self.surface.press_back().await;
                let hint =
                    "NOTE: navigation left the target app and was redirected back.".to_string();
                history.push_hint(hint.clone());
                self.sink.emit(&AgentEvent::HintInjected { text: hint });
                own_app_redirects += 1;
                if own_app_redirects <= 5 {
                    iteration -= 1;
                }
                tokio::time::sleep(self.config.agent.iteration_delay()).await;
                continue;
            }
            own_app_redirects = 0;

            let screen_diff = diff(previous.as_ref(), &snapshot);
            let fp = fingerprint(&snapshot);
            let stagnation_crossed = monitor.record(fp, &screen_diff);

            let phase = classify(&snapshot);
            let in_target_app = snapshot.package == self.case.target_package;
            subgoals.observe(phase, in_target_app);

            // Content signals the phase classifier is too coarse for.
            if in_target_app {
                let labels: String = snapshot
                    .element_index()
                    .entries()
                    .iter()
                    .filter_map(|e| snapshot.elements[e.position].label())
                    .collect::<Vec<_>>()
                    .join(" ")
                    .to_lowercase();
                if self
                    .case
                    .reference_ids
                    .iter()
                    .any(|id| labels.contains(&id.to_lowercase()))
                {
                    subgoals.mark_item_found();
                }
                if phase == NavigationPhase::OnTargetPage
                    && (labels.contains("help") || labels.contains("support"))
                {
                    subgoals.mark_support_entry_seen();
                }
            }

            let mut warnings = Vec::new();
            if let Some(w) = monitor.oscillation_warning() {
                warnings.push(w);
            }
            if let Some(w) = monitor.repetition_warning() {
                warnings.push(w);
            }
            if !in_target_app && previous.is_some() {
                warnings.push(format!(
                    "WARNING: you are in '{}', not the target app '{}'.",
                    snapshot.package, self.case.target_package
                ));
            }

            if stagnation_crossed {
                let hint = "HINT: the screen has not changed for several turns. A \
                            dialog or overlay may need dismissing, or this path may \
                            be a dead end; consider pressing back or choosing a \
                            different control."
                    .to_string();
                history.push_hint(hint.clone());
                self.sink.emit(&AgentEvent::HintInjected { text: hint.clone() });
                session.record(SessionEntry::now("hint").with_text(hint));
            }

            history.mask_old_observations();
            history.compact_if_oversized();

            self.sink.emit(&AgentEvent::ScreenObserved {
                package: snapshot.package.clone(),
                activity: snapshot.activity.clone(),
                element_count: snapshot.element_index().len(),
                diff: screen_diff.describe(),
            });

            let system_prompt = build_system_prompt(&self.case, phase);
            let observation = build_observation(
                &snapshot,
                &screen_diff,
                phase,
                iteration,
                &subgoals,
                &warnings,
                last_verification.as_deref(),
            );

            // ── Think ────────────────────────────────────────────────────
            let decision = match self
                .call_oracle_with_retry(&system_prompt, &history, &observation, &backoff)
                .await
            {
                Ok(decision) => decision,
                Err(OracleCallEnd::Cancelled) => break RunResult::Cancelled,
                Err(OracleCallEnd::Terminal(reason)) => {
                    session.record(SessionEntry::now("oracle_failure").with_text(&reason));
                    break RunResult::Failed { reason };
                }
            };

            let action = decode_decision(&decision);
            self.sink.emit(&AgentEvent::DecisionMade {
                iteration,
                action: action.clone(),
                reasoning: decision.reasoning.clone(),
            });
            session.record(
                SessionEntry::now("decision")
                    .with_text(action.describe())
                    .with_payload(serde_json::to_value(&action).unwrap_or_default()),
            );

            let call_message = ConversationMessage::AssistantToolCall {
                id: decision.tool_call_id.clone(),
                tool_name: tool_name_for(&action, &decision),
                arguments: decision.raw_arguments.clone(),
                reasoning: decision.reasoning.clone(),
            };

            // update_plan is a reasoning aid: recorded, never dispatched,
            // iteration refunded.
            if let AgentAction::UpdatePlan { explanation, .. } = &action {
                history.push_turn(
                    observation,
                    call_message,
                    ConversationMessage::ToolResult {
                        id: decision.tool_call_id.clone(),
                        text: format!("Plan noted: {explanation}"),
                    },
                );
                iteration -= 1;
                previous = Some(snapshot);
                continue;
            }

            // ── Safety policy ────────────────────────────────────────────
            match self.policy.validate(&action, iteration) {
                PolicyDecision::Allowed => {}
                PolicyDecision::NeedsApproval { reason } => {
                    history.push_turn(
                        observation,
                        call_message,
                        ConversationMessage::ToolResult {
                            id: decision.tool_call_id.clone(),
                            text: format!("Escalated for approval: {reason}"),
                        },
                    );
                    session.record(SessionEntry::now("needs_approval").with_text(&reason));
                    break RunResult::NeedsHumanReview {
                        reason,
                        iterations: iteration,
                    };
                }
                PolicyDecision::Blocked { reason } => {
                    tracing::warn!(reason = %reason, "action blocked by policy");
                    history.push_turn(
                        observation,
                        call_message,
                        ConversationMessage::ToolResult {
                            id: decision.tool_call_id.clone(),
                            text: format!(
                                "Action blocked by policy: {reason}. Choose a different \
                                 approach."
                            ),
                        },
                    );
                    previous = Some(snapshot);
                    tokio::time::sleep(self.config.agent.iteration_delay()).await;
                    continue;
                }
            }

            // ── Terminal actions ─────────────────────────────────────────
            match &action {
                AgentAction::MarkResolved { summary } => {
                    subgoals.note_resolved();
                    history.push_turn(
                        observation,
                        call_message,
                        ConversationMessage::ToolResult {
                            id: decision.tool_call_id.clone(),
                            text: format!("Case closed: {summary}"),
                        },
                    );
                    session.record(SessionEntry::now("resolved").with_text(summary));
                    break RunResult::Resolved {
                        summary: summary.clone(),
                        iterations: iteration,
                    };
                }
                AgentAction::RequestHumanReview { reason, .. } => {
                    history.push_turn(
                        observation,
                        call_message,
                        ConversationMessage::ToolResult {
                            id: decision.tool_call_id.clone(),
                            text: format!("Handed off to a human: {reason}"),
                        },
                    );
                    session.record(SessionEntry::now("human_review").with_text(reason));
                    break RunResult::NeedsHumanReview {
                        reason: reason.clone(),
                        iterations: iteration,
                    };
                }
                _ => {}
            }

            // ── Duplicate-action guard ───────────────────────────────────
            let descriptor = action.describe();
            if dup_guard.should_skip(&descriptor) {
                let text = format!(
                    "Skipped: the action \"{descriptor}\" has been attempted {} times \
                     in a row without resolving the case. Choose a different element \
                     or navigation path.",
                    self.config.agent.duplicate_action_limit
                );
                history.push_turn(
                    observation,
                    call_message,
                    ConversationMessage::ToolResult {
                        id: decision.tool_call_id.clone(),
                        text: text.clone(),
                    },
                );
                self.sink.emit(&AgentEvent::HintInjected { text });
                previous = Some(snapshot);
                tokio::time::sleep(self.config.agent.iteration_delay()).await;
                continue;
            }

            // ── Act + verify ─────────────────────────────────────────────
            let dispatcher = ActionDispatcher::new(self.surface.as_ref(), dispatch_config.clone());
            let report = dispatcher.execute(&action, &snapshot).await;

            if matches!(action, AgentAction::TypeMessage { .. })
                && phase == NavigationPhase::InChat
            {
                subgoals.note_issue_described();
            }
            if let Some(verification) = &report.verification {
                self.sink.emit(&AgentEvent::ActionVerified {
                    verification: verification.clone(),
                });
            }
            last_verification = Some(report.combined_text());

            history.push_turn(
                observation,
                call_message,
                ConversationMessage::ToolResult {
                    id: decision.tool_call_id.clone(),
                    text: report.combined_text(),
                },
            );
            session.record(SessionEntry::now("tool_result").with_text(report.combined_text()));
            previous = Some(snapshot);

            tokio::time::sleep(self.config.agent.iteration_delay()).await;
        };

        let state = match &result {
            RunResult::Resolved { .. } => LoopState::Completed,
            RunResult::Failed { .. } | RunResult::NeedsHumanReview { .. } => LoopState::Failed,
            RunResult::Cancelled => LoopState::Cancelled,
        };
        self.set_state(state);
        session.record(
            SessionEntry::now("run_ended")
                .with_payload(serde_json::to_value(&result).unwrap_or_default()),
        );
        tracing::info!(session = %session.session_id, result = ?result, "agent run ended");
        result
    }

    /// One oracle consultation with classified retry. Retries never consume
    /// the iteration budget; cancellation is re-checked around every delay.
    async fn call_oracle_with_retry(
        &self,
        system_prompt: &str,
        history: &ConversationHistory,
        observation: &str,
        backoff: &BackoffPolicy,
    ) -> Result<Decision, OracleCallEnd> {
        let mut attempt: u32 = 0;
        loop {
            if self.control.is_cancelled() {
                return Err(OracleCallEnd::Cancelled);
            }
            match self
                .oracle
                .decide(system_prompt, history.messages(), observation)
                .await
            {
                Ok(decision) => return Ok(decision),
                Err(e) if e.is_terminal() => {
                    tracing::error!(error = %e, "terminal oracle failure");
                    return Err(OracleCallEnd::Terminal(format!(
                        "decision oracle failure: {e}"
                    )));
                }
                Err(e) => {
                    if attempt >= backoff.max_retries {
                        return Err(OracleCallEnd::Terminal(format!(
                            "decision oracle still failing after {} retries: {e}",
                            backoff.max_retries
                        )));
                    }
                    let delay = backoff.delay_for_attempt(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retryable oracle failure, backing off"
                    );
                    self.sink.emit(&AgentEvent::OracleRetry {
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                        error: e.to_string(),
                    });
                    tokio::time::sleep(delay).await;
                    if self.control.is_cancelled() {
                        return Err(OracleCallEnd::Cancelled);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Wire tool name for the history record; falls back to the catalogue name
/// for actions synthesized locally (e.g. the Wait fallback).
fn tool_name_for(action: &AgentAction, decision: &Decision) -> String {
    if decision.has_tool_call() {
        return decision.tool_name.clone();
    }
    match action {
        AgentAction::ClickElement { .. } => "click_element",
        AgentAction::TypeMessage { .. } => "type_message",
        AgentAction::ScrollDown { .. } => "scroll_down",
        AgentAction::ScrollUp { .. } => "scroll_up",
        AgentAction::Wait { .. } => "wait_for_response",
        AgentAction::UploadFile { .. } => "upload_file",
        AgentAction::PressBack { .. } => "press_back",
        AgentAction::RequestHumanReview { .. } => "request_human_review",
        AgentAction::MarkResolved { .. } => "mark_resolved",
        AgentAction::UpdatePlan { .. } => "update_plan",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CasePilotResult;
    use crate::events::NullSink;
    use crate::executor::safety::AllowAll;
    use crate::oracle::retry::OracleError;
    use crate::perception::surface::{ActionOutcome, ActionSpec};
    use crate::perception::types::{ElementBounds, UiElement};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    fn element(label: &str, top: i32) -> UiElement {
        UiElement {
            class_name: "Button".into(),
            text: Some(label.to_string()),
            content_desc: None,
            clickable: true,
            editable: false,
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
            .map(|(i, l)| element(l, 400 + i as i32 * 100))
            .collect();
        ScreenSnapshot::new("com.shopfast", "Main", elements)
    }

    /// Static screen; counts performed actions.
    struct StaticSurface {
        screen: ScreenSnapshot,
        performed: Mutex<Vec<ActionSpec>>,
    }

    impl StaticSurface {
        fn new(screen: ScreenSnapshot) -> Self {
            Self {
                screen,
                performed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AutomationSurface for StaticSurface {
        async fn capture_snapshot(&self) -> CasePilotResult<ScreenSnapshot> {
            Ok(self.screen.clone())
        }

        async fn perform_action(&self, spec: ActionSpec) -> CasePilotResult<ActionOutcome> {
            self.performed.lock().unwrap().push(spec);
            Ok(ActionOutcome::ok("done"))
        }

        async fn wait_for_stable_snapshot(
            &self,
            _max_wait: Duration,
            _poll: Duration,
        ) -> CasePilotResult<ScreenSnapshot> {
            Ok(self.screen.clone())
        }

        async fn wait_for_change(&self, _timeout: Duration) -> CasePilotResult<bool> {
            Ok(false)
        }

        async fn press_back(&self) -> CasePilotResult<bool> {
            Ok(true)
        }
    }

    /// Returns scripted decisions in order, repeating the last forever.
    struct ScriptedOracle {
        script: Mutex<VecDeque<Result<Decision, OracleError>>>,
        call_times: Mutex<Vec<tokio::time::Instant>>,
    }

    impl ScriptedOracle {
        fn new(script: Vec<Result<Decision, OracleError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                call_times: Mutex::new(Vec::new()),
            }
        }

        fn decision(tool: &str, args: serde_json::Value) -> Result<Decision, OracleError> {
            Ok(Decision {
                tool_call_id: format!("call_{}", uuid::Uuid::new_v4()),
                tool_name: tool.into(),
                raw_arguments: args,
                reasoning: "test reasoning".into(),
                content: String::new(),
            })
        }
    }

    #[async_trait]
    impl DecisionOracle for ScriptedOracle {
        async fn decide(
            &self,
            _system_prompt: &str,
            _history: &[ConversationMessage],
            _observation: &str,
        ) -> Result<Decision, OracleError> {
            self.call_times.lock().unwrap().push(tokio::time::Instant::now());
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap_or_else(|| {
                    Err(OracleError::Other("script exhausted".into()))
                })
            }
        }
    }

    /// Collects emitted events for assertions.
    struct CollectingSink {
        events: Mutex<Vec<AgentEvent>>,
    }

    impl CollectingSink {
        fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }

        fn hints_containing(&self, needle: &str) -> usize {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| {
                    matches!(e, AgentEvent::HintInjected { text } if text.contains(needle))
                })
                .count()
        }
    }

    impl EventSink for CollectingSink {
        fn emit(&self, event: &AgentEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn case() -> CaseContext {
        CaseContext {
            target_app: "ShopFast".into(),
            target_package: "com.shopfast".into(),
            issue_description: "Order #4411 arrived damaged".into(),
            desired_outcome: "a refund".into(),
            reference_ids: vec!["#4411".into()],
            app_hints: vec![],
        }
    }

    fn fast_config(max_iterations: u32) -> AppConfig {
        let mut config = AppConfig::default();
        config.agent.max_iterations = max_iterations;
        config.agent.post_action_delay_ms = 1;
        config.agent.iteration_delay_ms = 1;
        config.agent.pause_poll_ms = 1;
        config.agent.wait_timeout_ms = 1;
        config.agent.capture_max_wait_ms = 1;
        config.agent.capture_poll_ms = 1;
        config.backoff.base_delay_ms = 10;
        config.backoff.max_delay_ms = 1000;
        config
    }

    fn engine_with(
        oracle: Arc<dyn DecisionOracle>,
        surface: Arc<dyn AutomationSurface>,
        sink: Arc<dyn EventSink>,
        config: AppConfig,
    ) -> AgentEngine {
        AgentEngine::new(surface, oracle, Box::new(AllowAll), sink, config, case())
    }

    #[tokio::test(start_paused = true)]
    async fn mark_resolved_produces_resolved_with_summary_and_count() {
        let oracle = Arc::new(ScriptedOracle::new(vec![ScriptedOracle::decision(
            "mark_resolved",
            serde_json::json!({"summary": "Refund issued, ref #123"}),
        )]));
        let surface = Arc::new(StaticSurface::new(snap(&["Chat"])));
        let mut engine = engine_with(oracle, surface, Arc::new(NullSink), fast_config(10));

        let result = engine.run().await;
        assert_eq!(
            result,
            RunResult::Resolved {
                summary: "Refund issued, ref #123".into(),
                iterations: 1,
            }
        );
        assert_eq!(*engine.state(), LoopState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_exhaustion_fails_with_iteration_count_in_reason() {
        let oracle = Arc::new(ScriptedOracle::new(vec![ScriptedOracle::decision(
            "wait_for_response",
            serde_json::json!({"reason": "waiting for agent"}),
        )]));
        let surface = Arc::new(StaticSurface::new(snap(&["Chat"])));
        let mut engine = engine_with(oracle, surface, Arc::new(NullSink), fast_config(3));

        match engine.run().await {
            RunResult::Failed { reason } => assert!(reason.contains('3'), "got: {reason}"),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_rate_limits_fail_with_monotone_backoff() {
        let oracle = Arc::new(ScriptedOracle::new(vec![Err(OracleError::RateLimited(
            "HTTP 429".into(),
        ))]));
        let surface = Arc::new(StaticSurface::new(snap(&["Main"])));
        let mut config = fast_config(10);
        config.backoff.base_delay_ms = 100;
        config.backoff.max_delay_ms = 60_000;
        config.backoff.max_retries = 4;
        let mut engine = engine_with(oracle.clone(), surface, Arc::new(NullSink), config);

        match engine.run().await {
            RunResult::Failed { reason } => assert!(reason.contains("429"), "got: {reason}"),
            other => panic!("expected Failed, got {other:?}"),
        }

        let times = oracle.call_times.lock().unwrap();
        assert_eq!(times.len(), 5); // initial call + 4 retries
        let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        for pair in gaps.windows(2) {
            assert!(pair[1] > pair[0], "backoff not increasing: {gaps:?}");
        }
        for gap in &gaps {
            assert!(*gap <= Duration::from_millis(60_000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn third_identical_action_is_skipped_with_corrective_hint() {
        let oracle = Arc::new(ScriptedOracle::new(vec![ScriptedOracle::decision(
            "click_element",
            serde_json::json!({"elementId": 1, "expectedOutcome": "opens help"}),
        )]));
        let surface = Arc::new(StaticSurface::new(snap(&["Help", "Orders"])));
        let sink = Arc::new(CollectingSink::new());
        let mut engine = engine_with(
            oracle,
            surface.clone(),
            sink.clone(),
            fast_config(4),
        );

        let result = engine.run().await;
        assert!(matches!(result, RunResult::Failed { .. }));
        // Iterations 1 and 2 dispatch the click, iteration 3 is skipped,
        // iteration 4 starts a fresh streak after the reset.
        assert_eq!(surface.performed.lock().unwrap().len(), 3);
        assert_eq!(sink.hints_containing("has been attempted"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stagnation_hint_is_injected_once_per_crossing() {
        let oracle = Arc::new(ScriptedOracle::new(vec![ScriptedOracle::decision(
            "wait_for_response",
            serde_json::json!({"reason": "watching"}),
        )]));
        let surface = Arc::new(StaticSurface::new(snap(&["Main"])));
        let sink = Arc::new(CollectingSink::new());
        let mut engine = engine_with(oracle, surface, sink.clone(), fast_config(6));

        let _ = engine.run().await;
        // First capture is FIRST_SCREEN; iterations 2-6 are NO_CHANGE, so
        // the threshold of 3 is crossed exactly once.
        assert_eq!(sink.hints_containing("dialog or overlay"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_wins_over_everything() {
        let oracle = Arc::new(ScriptedOracle::new(vec![ScriptedOracle::decision(
            "wait_for_response",
            serde_json::json!({"reason": "watching"}),
        )]));
        let surface = Arc::new(StaticSurface::new(snap(&["Main"])));
        let mut engine = engine_with(oracle, surface, Arc::new(NullSink), fast_config(100));
        engine.control().cancel();

        assert_eq!(engine.run().await, RunResult::Cancelled);
        assert_eq!(*engine.state(), LoopState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_oracle_error_fails_without_retries() {
        let oracle = Arc::new(ScriptedOracle::new(vec![Err(OracleError::Auth(
            "bad key".into(),
        ))]));
        let surface = Arc::new(StaticSurface::new(snap(&["Main"])));
        let mut engine =
            engine_with(oracle.clone(), surface, Arc::new(NullSink), fast_config(10));

        match engine.run().await {
            RunResult::Failed { reason } => {
                assert!(reason.contains("authentication"), "got: {reason}")
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        assert_eq!(oracle.call_times.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn needs_approval_policy_escalates_to_human_review() {
        struct ApproveClicks;
        impl SafetyPolicy for ApproveClicks {
            fn validate(&self, action: &AgentAction, _iteration: u32) -> PolicyDecision {
                match action {
                    AgentAction::ClickElement { .. } => PolicyDecision::NeedsApproval {
                        reason: "clicks require a human".into(),
                    },
                    _ => PolicyDecision::Allowed,
                }
            }
        }

        let oracle = Arc::new(ScriptedOracle::new(vec![ScriptedOracle::decision(
            "click_element",
            serde_json::json!({"elementId": 1, "expectedOutcome": "opens help"}),
        )]));
        let surface = Arc::new(StaticSurface::new(snap(&["Help"])));
        let mut engine = AgentEngine::new(
            surface,
            oracle,
            Box::new(ApproveClicks),
            Arc::new(NullSink),
            fast_config(10),
            case(),
        );

        match engine.run().await {
            RunResult::NeedsHumanReview { reason, iterations } => {
                assert_eq!(reason, "clicks require a human");
                assert_eq!(iterations, 1);
            }
            other => panic!("expected NeedsHumanReview, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn request_human_review_action_is_terminal() {
        let oracle = Arc::new(ScriptedOracle::new(vec![ScriptedOracle::decision(
            "request_human_review",
            serde_json::json!({"reason": "payment details requested", "needsInput": true}),
        )]));
        let surface = Arc::new(StaticSurface::new(snap(&["Card number"])));
        let mut engine = engine_with(oracle, surface, Arc::new(NullSink), fast_config(10));

        match engine.run().await {
            RunResult::NeedsHumanReview { reason, .. } => {
                assert!(reason.contains("payment details"));
            }
            other => panic!("expected NeedsHumanReview, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn update_plan_does_not_consume_the_iteration_budget() {
        // Three plan updates, then a resolution. With max_iterations = 2
        // the run still resolves because plan updates refund their turn.
        let oracle = Arc::new(ScriptedOracle::new(vec![
            ScriptedOracle::decision(
                "update_plan",
                serde_json::json!({"explanation": "first pass", "steps": []}),
            ),
            ScriptedOracle::decision(
                "update_plan",
                serde_json::json!({"explanation": "second pass", "steps": []}),
            ),
            ScriptedOracle::decision(
                "update_plan",
                serde_json::json!({"explanation": "third pass", "steps": []}),
            ),
            ScriptedOracle::decision(
                "mark_resolved",
                serde_json::json!({"summary": "resolved in chat"}),
            ),
        ]));
        let surface = Arc::new(StaticSurface::new(snap(&["Main"])));
        let mut engine = engine_with(oracle, surface, Arc::new(NullSink), fast_config(2));

        match engine.run().await {
            RunResult::Resolved { iterations, .. } => assert_eq!(iterations, 1),
            other => panic!("expected Resolved, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn own_app_redirect_refunds_the_iteration() {
        /// First capture lands in the host app, the rest in the target.
        struct RedirectSurface {
            captures: Mutex<VecDeque<ScreenSnapshot>>,
            fallback: ScreenSnapshot,
            backs: Mutex<u32>,
        }

        #[async_trait]
        impl AutomationSurface for RedirectSurface {
            async fn capture_snapshot(&self) -> CasePilotResult<ScreenSnapshot> {
                Ok(self
                    .captures
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| self.fallback.clone()))
            }

            async fn perform_action(&self, _spec: ActionSpec) -> CasePilotResult<ActionOutcome> {
                Ok(ActionOutcome::ok("done"))
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
                *self.backs.lock().unwrap() += 1;
                Ok(true)
            }
        }

        let own_app = ScreenSnapshot::new("com.casepilot.host", "Home", vec![element("Cases", 400)]);
        let surface = Arc::new(RedirectSurface {
            captures: Mutex::new(VecDeque::from(vec![own_app])),
            fallback: snap(&["Chat"]),
            backs: Mutex::new(0),
        });
        let oracle = Arc::new(ScriptedOracle::new(vec![ScriptedOracle::decision(
            "mark_resolved",
            serde_json::json!({"summary": "done"}),
        )]));
        let mut config = fast_config(10);
        config.agent.own_package = "com.casepilot.host".into();
        let mut engine = engine_with(oracle, surface.clone(), Arc::new(NullSink), config);

        match engine.run().await {
            // The redirected turn was refunded, so the resolution lands on
            // iteration 1.
            RunResult::Resolved { iterations, .. } => assert_eq!(iterations, 1),
            other => panic!("expected Resolved, got {other:?}"),
        }
        assert_eq!(*surface.backs.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_holds_the_loop_until_resumed() {
        let oracle = Arc::new(ScriptedOracle::new(vec![ScriptedOracle::decision(
            "mark_resolved",
            serde_json::json!({"summary": "done"}),
        )]));
        let surface = Arc::new(StaticSurface::new(snap(&["Main"])));
        let mut engine = engine_with(oracle, surface, Arc::new(NullSink), fast_config(10));
        let control = engine.control();
        control.pause();

        let resumer = tokio::spawn({
            let control = control.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                control.resume();
            }
        });

        let result = engine.run().await;
        resumer.await.unwrap();
        assert!(matches!(result, RunResult::Resolved { .. }));
    }
}
