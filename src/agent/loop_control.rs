//! Loop-break detection.
//!
//! Tracks a rolling window of recent screen fingerprints to spot
//! oscillation (A-B-A-B), repetition stalls (A-A-A) and stagnation (no
//! observable change over consecutive iterations), plus a guard against
//! the oracle repeating the exact same action. All detectors are
//! advisory: they produce warning strings and hint signals for the prompt
//! builder and never terminate the run on their own.

use std::collections::VecDeque;

use crate::perception::fingerprint::{Fingerprint, ScreenDiff};

const WINDOW_SIZE: usize = 6;
const OSCILLATION_SPAN: usize = 4;
const STALL_SPAN: usize = 3;

pub struct LoopMonitor {
    window: VecDeque<Fingerprint>,
    stagnation_threshold: u32,
    stagnation_count: u32,
}

impl LoopMonitor {
    pub fn new(stagnation_threshold: u32) -> Self {
        Self {
            window: VecDeque::with_capacity(WINDOW_SIZE),
            stagnation_threshold,
            stagnation_count: 0,
        }
    }

    /// Records this iteration's fingerprint and diff. Returns true exactly
    /// when the stagnation counter crosses its threshold, which is the
    /// signal to inject one synthetic hint message.
    pub fn record(&mut self, fingerprint: Fingerprint, diff: &ScreenDiff) -> bool {
        if self.window.len() == WINDOW_SIZE {
            self.window.pop_front();
        }
        self.window.push_back(fingerprint);

        if diff.is_no_change() {
            self.stagnation_count += 1;
            self.stagnation_count == self.stagnation_threshold
        } else {
            self.stagnation_count = 0;
            false
        }
    }

    /// Strict A-B-A-B over the last four fingerprints.
    pub fn oscillation_warning(&self) -> Option<String> {
        if self.window.len() < OSCILLATION_SPAN {
            return None;
        }
        let last: Vec<Fingerprint> = self
            .window
            .iter()
            .rev()
            .take(OSCILLATION_SPAN)
            .copied()
            .collect();
        if last[0] == last[2] && last[1] == last[3] && last[0] != last[1] {
            Some(
                "WARNING: you are oscillating between two screens without making \
                 progress. Stop repeating the same navigation and try a different \
                 path or control."
                    .to_string(),
            )
        } else {
            None
        }
    }

    /// Three identical fingerprints in a row.
    pub fn repetition_warning(&self) -> Option<String> {
        if self.window.len() < STALL_SPAN {
            return None;
        }
        let tail: Vec<Fingerprint> = self
            .window
            .iter()
            .rev()
            .take(STALL_SPAN)
            .copied()
            .collect();
        if tail.len() == STALL_SPAN && tail.iter().all(|&fp| fp == tail[0]) {
            Some(
                "WARNING: the screen has been identical for several iterations. \
                 Your recent actions are having no effect."
                    .to_string(),
            )
        } else {
            None
        }
    }

    pub fn stagnation_count(&self) -> u32 {
        self.stagnation_count
    }
}

/// Counts identical consecutive action descriptors so the orchestrator can
/// skip the Nth repeat and feed back a corrective hint instead.
pub struct DuplicateActionGuard {
    limit: u32,
    last_descriptor: Option<String>,
    repeat_count: u32,
}

impl DuplicateActionGuard {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            last_descriptor: None,
            repeat_count: 0,
        }
    }

    /// Returns true when this action is the `limit`-th identical repeat and
    /// should be skipped. The counter resets on skip and on any new action.
    pub fn should_skip(&mut self, descriptor: &str) -> bool {
        if self.last_descriptor.as_deref() == Some(descriptor) {
            self.repeat_count += 1;
        } else {
            self.last_descriptor = Some(descriptor.to_string());
            self.repeat_count = 1;
        }
        if self.repeat_count >= self.limit {
            self.repeat_count = 0;
            self.last_descriptor = None;
            true
        } else {
            false
        }
    }
}
