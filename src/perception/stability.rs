//! Fingerprint-based capture stabilization.
//!
//! Polls a capture source until consecutive snapshots hash identically for
//! a configured number of frames. Surface implementations can delegate
//! `wait_for_stable_snapshot` to this helper.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::CasePilotResult;
use crate::perception::fingerprint::{fingerprint, Fingerprint};
use crate::perception::types::ScreenSnapshot;

#[derive(Debug, Clone)]
pub struct StabilityConfig {
    pub max_wait: Duration,
    pub poll_interval: Duration,
    pub min_stable_frames: usize,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_millis(5000),
            poll_interval: Duration::from_millis(200),
            min_stable_frames: 2,
        }
    }
}

pub struct StabilityDetector {
    config: StabilityConfig,
    last_fingerprint: Option<Fingerprint>,
    stable_frames: usize,
}

impl StabilityDetector {
    pub fn new(config: StabilityConfig) -> Self {
        Self {
            config,
            last_fingerprint: None,
            stable_frames: 0,
        }
    }

    pub fn reset(&mut self) {
        self.last_fingerprint = None;
        self.stable_frames = 0;
    }

    pub fn observe(&mut self, snapshot: &ScreenSnapshot) -> bool {
        let current = fingerprint(snapshot);
        if self.last_fingerprint == Some(current) {
            self.stable_frames += 1;
        } else {
            self.stable_frames = 0;
        }
        self.last_fingerprint = Some(current);
        self.stable_frames >= self.config.min_stable_frames
    }
}

/// Captures until stable or `max_wait` elapses; the last capture is
/// returned either way so callers always have something to act on.
pub async fn wait_for_stable<F, Fut>(
    capture: F,
    config: StabilityConfig,
    cancel: Arc<AtomicBool>,
) -> CasePilotResult<ScreenSnapshot>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = CasePilotResult<ScreenSnapshot>>,
{
    let mut detector = StabilityDetector::new(config.clone());
    let start = std::time::Instant::now();
    let mut last = capture().await?;

    while start.elapsed() < config.max_wait {
        if cancel.load(Ordering::Relaxed) {
            return Ok(last);
        }
        if detector.observe(&last) {
            tracing::debug!(elapsed = ?start.elapsed(), "screen stabilized");
            return Ok(last);
        }
        tokio::time::sleep(config.poll_interval).await;
        last = capture().await?;
    }

    tracing::warn!(elapsed = ?start.elapsed(), "stabilization timeout, using last capture");
    Ok(last)
}
