//! Conversation history and observation masking.
//!
//! The history is the multi-turn record sent to the oracle: an ordered,
//! append-only sequence where each completed iteration contributes one
//! observation, one assistant tool call and one tool result, with
//! occasional standalone hint observations in between. Masking bounds
//! growth by replacing the content of old observations in place; message
//! count and order never change, preserving prefix stability for any
//! transport-side caching.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ConversationMessage {
    UserObservation { text: String },
    AssistantToolCall {
        id: String,
        tool_name: String,
        arguments: serde_json::Value,
        reasoning: String,
    },
    ToolResult { id: String, text: String },
}

impl ConversationMessage {
    pub fn is_observation(&self) -> bool {
        matches!(self, ConversationMessage::UserObservation { .. })
    }
}

#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Most recent turns kept fully verbose.
    pub keep_recent_turns: usize,
    /// Approximate token budget for the whole history (chars / 4).
    pub token_budget: usize,
    /// Hard cap on message count before oldest-block compaction kicks in.
    pub max_messages: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            keep_recent_turns: 4,
            token_budget: 24_000,
            max_messages: 120,
        }
    }
}

pub struct ConversationHistory {
    messages: Vec<ConversationMessage>,
    config: HistoryConfig,
}

fn field_regex() -> &'static [(&'static str, Regex)] {
    static FIELDS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    FIELDS
        .get_or_init(|| {
            [
                ("app", r"(?m)^App: (.+)$"),
                ("screen", r"(?m)^Screen: (.+)$"),
                ("phase", r"(?m)^Phase: (.+)$"),
                ("turn", r"(?m)^Turn: (.+)$"),
            ]
            .into_iter()
            .map(|(name, pattern)| (name, Regex::new(pattern).expect("static pattern")))
            .collect()
        })
        .as_slice()
}

/// Compact one-line summary of a verbose observation, extracted by simple
/// field scanning of the observation's own header lines.
fn summarize_observation(text: &str) -> String {
    let mut parts = Vec::new();
    for (name, regex) in field_regex() {
        if let Some(caps) = regex.captures(text) {
            parts.push(format!("{name}={}", caps[1].trim()));
        }
    }
    if parts.is_empty() {
        let head: String = text.chars().take(80).collect();
        format!("[masked observation] {head}")
    } else {
        format!("[masked observation] {}", parts.join(" "))
    }
}

impl ConversationHistory {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            messages: Vec::new(),
            config,
        }
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Appends one completed turn: observation, tool call, result.
    pub fn push_turn(
        &mut self,
        observation: String,
        call: ConversationMessage,
        result: ConversationMessage,
    ) {
        debug_assert!(matches!(call, ConversationMessage::AssistantToolCall { .. }));
        debug_assert!(matches!(result, ConversationMessage::ToolResult { .. }));
        self.messages
            .push(ConversationMessage::UserObservation { text: observation });
        self.messages.push(call);
        self.messages.push(result);
    }

    /// Appends a standalone synthetic hint (stagnation, duplicate-action
    /// correction, overlay dismissal suggestions).
    pub fn push_hint(&mut self, text: impl Into<String>) {
        self.messages
            .push(ConversationMessage::UserObservation { text: text.into() });
    }

    /// chars / 4, the usual cheap token proxy.
    pub fn estimated_tokens(&self) -> usize {
        let chars: usize = self
            .messages
            .iter()
            .map(|m| match m {
                ConversationMessage::UserObservation { text } => text.len(),
                ConversationMessage::AssistantToolCall {
                    tool_name,
                    arguments,
                    reasoning,
                    ..
                } => tool_name.len() + arguments.to_string().len() + reasoning.len(),
                ConversationMessage::ToolResult { text, .. } => text.len(),
            })
            .sum();
        chars / 4
    }

    /// Replaces the content of every observation older than the verbose
    /// window with a one-line summary. Count and order are untouched. A
    /// second, more aggressive pass shortens yet-older observations further
    /// if the token estimate is still over budget.
    pub fn mask_old_observations(&mut self) {
        let observation_positions: Vec<usize> = self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_observation())
            .map(|(i, _)| i)
            .collect();
        let total = observation_positions.len();
        if total <= self.config.keep_recent_turns {
            return;
        }
        let mask_until = total - self.config.keep_recent_turns;

        for &pos in &observation_positions[..mask_until] {
            if let ConversationMessage::UserObservation { text } = &mut self.messages[pos] {
                if !text.starts_with("[masked observation]") {
                    *text = summarize_observation(text);
                }
            }
        }

        if self.estimated_tokens() > self.config.token_budget {
            // Still over budget: crush the oldest half of the masked region
            // down to bare markers.
            for &pos in &observation_positions[..mask_until / 2] {
                if let ConversationMessage::UserObservation { text } = &mut self.messages[pos]
                {
                    let head: String = text.chars().take(40).collect();
                    *text = head;
                }
            }
        }
    }

    /// Alternative policy for when absolute message count, not per-message
    /// size, is the constraint: collapse everything before the verbose
    /// window into a single synthetic observation. Unlike masking this
    /// reduces the message count, so it only runs past `max_messages`.
    pub fn compact_if_oversized(&mut self) {
        if self.messages.len() <= self.config.max_messages {
            return;
        }
        let observation_positions: Vec<usize> = self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_observation())
            .map(|(i, _)| i)
            .collect();
        if observation_positions.len() <= self.config.keep_recent_turns {
            return;
        }
        let cut = if self.config.keep_recent_turns == 0 {
            self.messages.len()
        } else {
            observation_positions[observation_positions.len() - self.config.keep_recent_turns]
        };

        let mut lines = Vec::new();
        for message in &self.messages[..cut] {
            match message {
                ConversationMessage::UserObservation { text } => {
                    lines.push(summarize_observation(text));
                }
                ConversationMessage::AssistantToolCall { tool_name, .. } => {
                    lines.push(format!("-> called {tool_name}"));
                }
                ConversationMessage::ToolResult { text, .. } => {
                    let head: String = text.chars().take(60).collect();
                    lines.push(format!("<- {head}"));
                }
            }
        }
        let summary = format!(
            "Compressed history of {} earlier messages:\n{}",
            cut,
            lines.join("\n")
        );

        let mut compacted = vec![ConversationMessage::UserObservation { text: summary }];
        compacted.extend_from_slice(&self.messages[cut..]);
        self.messages = compacted;
        tracing::debug!(messages = self.messages.len(), "history compacted");
    }
}
