//! Oracle failure classification and retry backoff.
//!
//! Failures are classified exactly once into terminal (auth, missing
//! model/resource, quota) or retryable (rate limit, 5xx, timeout,
//! connectivity, unclassified). Terminal failures end the run with a
//! user-facing message; retryable ones get exponential backoff with
//! multiplicative jitter and a bounded attempt count, after which they
//! convert to terminal.

use std::time::Duration;

use rand::Rng;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum OracleError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("model or resource not found: {0}")]
    NotFound(String),

    #[error("quota or billing exhausted: {0}")]
    Quota(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("provider server error: {0}")]
    Server(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("network failure: {0}")]
    Network(String),

    #[error("oracle call failed: {0}")]
    Other(String),
}

impl OracleError {
    /// Terminal errors are configuration problems retrying cannot fix.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OracleError::Auth(_) | OracleError::NotFound(_) | OracleError::Quota(_)
        )
    }

    /// Maps an HTTP status + body to the classification.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            let head: String = body.chars().take(200).collect();
            format!("HTTP {status}: {head}")
        };
        match status {
            401 | 403 => OracleError::Auth(detail),
            404 => OracleError::NotFound(detail),
            402 => OracleError::Quota(detail),
            429 => {
                // Providers sometimes report quota exhaustion as 429.
                if body.contains("quota") || body.contains("billing") {
                    OracleError::Quota(detail)
                } else {
                    OracleError::RateLimited(detail)
                }
            }
            500..=599 => OracleError::Server(detail),
            _ => OracleError::Other(detail),
        }
    }
}

impl From<reqwest::Error> for OracleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            OracleError::Timeout(err.to_string())
        } else if err.is_connect() {
            OracleError::Network(err.to_string())
        } else {
            OracleError::Other(err.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            max_retries: 5,
        }
    }
}

impl BackoffPolicy {
    /// base × 2^attempt, capped. Non-decreasing in `attempt`.
    pub fn raw_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(31);
        let secs = self.base_delay.as_secs_f64() * 2f64.powi(exp as i32);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Raw delay with a multiplicative jitter factor in [0.85, 1.15],
    /// clamped back under the cap.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let raw = self.raw_delay(attempt).as_secs_f64();
        let factor = rand::thread_rng().gen_range(0.85..=1.15);
        Duration::from_secs_f64((raw * factor).min(self.max_delay.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_quota_and_not_found_are_terminal() {
        assert!(OracleError::from_status(401, "").is_terminal());
        assert!(OracleError::from_status(403, "").is_terminal());
        assert!(OracleError::from_status(404, "no such model").is_terminal());
        assert!(OracleError::from_status(402, "").is_terminal());
    }

    #[test]
    fn rate_limits_and_server_errors_are_retryable() {
        assert!(!OracleError::from_status(429, "slow down").is_terminal());
        assert!(!OracleError::from_status(500, "").is_terminal());
        assert!(!OracleError::from_status(503, "").is_terminal());
    }

    #[test]
    fn quota_worded_429_is_terminal() {
        assert!(OracleError::from_status(429, "monthly quota exceeded").is_terminal());
    }

    #[test]
    fn raw_delay_is_non_decreasing_up_to_the_cap() {
        let policy = BackoffPolicy {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            max_retries: 6,
        };
        let mut previous = Duration::ZERO;
        for attempt in 0..10 {
            let delay = policy.raw_delay(attempt);
            assert!(delay >= previous, "attempt {attempt} decreased");
            assert!(delay <= policy.max_delay);
            previous = delay;
        }
        assert_eq!(policy.raw_delay(9), policy.max_delay);
    }

    #[test]
    fn jittered_delay_never_exceeds_the_cap() {
        let policy = BackoffPolicy::default();
        for attempt in 0..20 {
            assert!(policy.delay_for_attempt(attempt) <= policy.max_delay);
        }
    }
}
