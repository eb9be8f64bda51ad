//! Navigation phase classification.
//!
//! A pure function of the current snapshot, recomputed from scratch every
//! iteration. It is a classifier, not a state machine: it can flicker
//! between phases on ambiguous screens, and downstream consumers (sub-goal
//! tracker, prompt builder) tolerate that.

use serde::{Deserialize, Serialize};

use crate::perception::types::ScreenSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationPhase {
    NavigatingToSupport,
    OnTargetPage,
    OnSupportPage,
    InChat,
}

impl NavigationPhase {
    pub fn name(&self) -> &'static str {
        match self {
            NavigationPhase::NavigatingToSupport => "navigating to support",
            NavigationPhase::OnTargetPage => "on the case item page",
            NavigationPhase::OnSupportPage => "on the support page",
            NavigationPhase::InChat => "in the support chat",
        }
    }
}

const CHAT_KEYWORDS: &[&str] = &["send", "type a message", "chat"];
const SUPPORT_KEYWORDS: &[&str] = &["help", "support"];
const SUPPORT_ACTION_KEYWORDS: &[&str] = &["contact", "faq", "chat with us", "get help"];
const TARGET_KEYWORDS: &[&str] = &["order", "booking", "purchase", "reservation"];
const TARGET_ACTION_KEYWORDS: &[&str] = &["help", "track", "details", "view"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Classifies the snapshot into a task phase from its aggregated label text
/// and the presence of an editable field.
pub fn classify(snapshot: &ScreenSnapshot) -> NavigationPhase {
    let text: String = snapshot
        .element_index()
        .entries()
        .iter()
        .filter_map(|entry| snapshot.elements[entry.position].label())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let has_editable = snapshot
        .element_index()
        .entries()
        .iter()
        .any(|entry| snapshot.elements[entry.position].editable);

    if has_editable && contains_any(&text, CHAT_KEYWORDS) {
        NavigationPhase::InChat
    } else if contains_any(&text, SUPPORT_KEYWORDS)
        && contains_any(&text, SUPPORT_ACTION_KEYWORDS)
    {
        NavigationPhase::OnSupportPage
    } else if contains_any(&text, TARGET_KEYWORDS)
        && contains_any(&text, TARGET_ACTION_KEYWORDS)
    {
        NavigationPhase::OnTargetPage
    } else {
        NavigationPhase::NavigatingToSupport
    }
}
