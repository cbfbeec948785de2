//! Whole-invocation retry.
//!
//! The supervisor re-runs the complete pipeline as an ordinary function call.
//! It holds no transfer state: a later attempt is cheap because the planner
//! finds the markers left by an interrupted attempt and resumes those items.

use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::EngineError;

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; 0 and 1 both mean "run once"
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 1,
            interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// Identifies one run of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// 1-based
    pub number: u32,
    /// Re-invocations are children and must not start retry loops of their own
    pub is_child: bool,
}

pub struct RetrySupervisor {
    policy: RetryPolicy,
}

impl RetrySupervisor {
    pub fn new(policy: RetryPolicy) -> Self {
        RetrySupervisor { policy }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are used up. The last error is returned on exhaustion.
    ///
    /// With `is_retry_child` set the operation runs exactly once.
    pub fn run<T, F>(&self, is_retry_child: bool, mut op: F) -> Result<T, EngineError>
    where
        F: FnMut(Attempt) -> Result<T, EngineError>,
    {
        if is_retry_child || self.policy.max_attempts <= 1 {
            return op(Attempt {
                number: 1,
                is_child: is_retry_child,
            });
        }

        let mut number = 1;
        loop {
            let attempt = Attempt {
                number,
                is_child: number > 1,
            };
            match op(attempt) {
                Ok(value) => {
                    if number > 1 {
                        info!("attempt {} of {} succeeded", number, self.policy.max_attempts);
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if number >= self.policy.max_attempts => {
                    warn!("giving up after {} attempts", number);
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        "attempt {} of {} failed: {}; retrying in {}s",
                        number,
                        self.policy.max_attempts,
                        e,
                        self.policy.interval.as_secs()
                    );
                    if !self.policy.interval.is_zero() {
                        thread::sleep(self.policy.interval);
                    }
                    number += 1;
                }
            }
        }
    }
}
