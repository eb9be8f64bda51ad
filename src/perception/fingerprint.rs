//! Snapshot fingerprinting and differential change detection.
//!
//! The fingerprint is a cheap identity hash: equality means "no observable
//! change", nothing stronger. The descriptive diff is always computed
//! independently of the fingerprint comparison so a categorized cause is
//! reported whenever one exists.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::perception::types::ScreenSnapshot;

/// Number of labelled elements folded into the fingerprint.
const FINGERPRINT_ELEMENTS: usize = 20;
/// Labels are truncated before hashing; tail churn in long labels is noise.
const FINGERPRINT_LABEL_LEN: usize = 24;
/// Horizontal position bucket width in pixels.
const FINGERPRINT_X_BUCKET: i32 = 100;
/// Cap on added/removed labels reported in a content diff.
const DIFF_LABEL_LIMIT: usize = 5;

pub type Fingerprint = u64;

/// Hash over (package, screen, first N labelled elements by truncated label
/// and x-bucket).
pub fn fingerprint(snapshot: &ScreenSnapshot) -> Fingerprint {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    snapshot.package.hash(&mut hasher);
    snapshot.activity.hash(&mut hasher);

    let mut counted = 0;
    for entry in snapshot.element_index().entries() {
        let element = &snapshot.elements[entry.position];
        let Some(label) = element.label() else { continue };
        let truncated: String = label.chars().take(FINGERPRINT_LABEL_LEN).collect();
        truncated.hash(&mut hasher);
        let (cx, _) = element.bounds.center();
        (cx / FINGERPRINT_X_BUCKET).hash(&mut hasher);
        counted += 1;
        if counted >= FINGERPRINT_ELEMENTS {
            break;
        }
    }
    hasher.finish()
}

/// Categorized description of what changed between consecutive captures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScreenDiff {
    FirstScreen,
    NewApp { package: String },
    NewScreen { activity: String },
    ContentUpdated {
        added: Vec<String>,
        removed: Vec<String>,
    },
    /// Fingerprint differs but no categorized cause was found, e.g. a pure
    /// layout shift.
    ScreenChanged,
    NoChange,
}

impl ScreenDiff {
    pub fn is_no_change(&self) -> bool {
        matches!(self, ScreenDiff::NoChange)
    }

    /// Oracle-facing one-line description.
    pub fn describe(&self) -> String {
        match self {
            ScreenDiff::FirstScreen => "FIRST_SCREEN: initial capture".into(),
            ScreenDiff::NewApp { package } => {
                format!("NEW_APP: now in application '{package}'")
            }
            ScreenDiff::NewScreen { activity } => {
                format!("NEW_SCREEN: now on screen '{activity}'")
            }
            ScreenDiff::ContentUpdated { added, removed } => {
                let mut parts = Vec::new();
                if !added.is_empty() {
                    parts.push(format!("appeared: [{}]", added.join(", ")));
                }
                if !removed.is_empty() {
                    parts.push(format!("disappeared: [{}]", removed.join(", ")));
                }
                format!("CONTENT_UPDATED: {}", parts.join("; "))
            }
            ScreenDiff::ScreenChanged => {
                "SCREEN_CHANGED: layout shifted, same screen and content".into()
            }
            ScreenDiff::NoChange => {
                "NO_CHANGE: the screen did not observably change".into()
            }
        }
    }
}

fn indexed_labels(snapshot: &ScreenSnapshot) -> HashSet<String> {
    snapshot
        .element_index()
        .entries()
        .iter()
        .filter_map(|entry| snapshot.elements[entry.position].label())
        .map(str::to_string)
        .collect()
}

/// Classifies the transition from `previous` to `current`.
pub fn diff(previous: Option<&ScreenSnapshot>, current: &ScreenSnapshot) -> ScreenDiff {
    let Some(previous) = previous else {
        return ScreenDiff::FirstScreen;
    };

    if previous.package != current.package {
        return ScreenDiff::NewApp {
            package: current.package.clone(),
        };
    }
    if previous.activity != current.activity {
        return ScreenDiff::NewScreen {
            activity: current.activity.clone(),
        };
    }

    let old_labels = indexed_labels(previous);
    let new_labels = indexed_labels(current);
    if old_labels != new_labels {
        let mut added: Vec<String> = new_labels
            .difference(&old_labels)
            .cloned()
            .collect();
        let mut removed: Vec<String> = old_labels
            .difference(&new_labels)
            .cloned()
            .collect();
        added.sort();
        removed.sort();
        added.truncate(DIFF_LABEL_LIMIT);
        removed.truncate(DIFF_LABEL_LIMIT);
        return ScreenDiff::ContentUpdated { added, removed };
    }

    if fingerprint(previous) == fingerprint(current) {
        ScreenDiff::NoChange
    } else {
        ScreenDiff::ScreenChanged
    }
}
