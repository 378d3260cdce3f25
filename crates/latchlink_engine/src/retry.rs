//! Bounded retry decisions.

use crate::config::RetryConfig;

/// What to do after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// The attempt succeeded.
    Done,
    /// Try again no earlier than `at`.
    Retry {
        /// Earliest time of the next attempt.
        at: u64,
    },
    /// No attempts left.
    Exhausted,
}

/// Fixed-delay retry policy with an attempt bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay_ms: u64,
}

impl RetryPolicy {
    /// Creates a policy. Values below the floors are raised to them.
    pub fn new(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay_ms: delay_ms.max(100),
        }
    }

    /// Builds a policy from configuration.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.delay_ms)
    }

    /// Attempts allowed, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay between attempts.
    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    /// Decides after `attempt` attempts (1-based) have been made.
    pub fn evaluate(&self, attempt: u32, last_ok: bool, now: u64) -> RetryDecision {
        if last_ok {
            RetryDecision::Done
        } else if attempt < self.max_attempts {
            RetryDecision::Retry {
                at: now.saturating_add(self.delay_ms),
            }
        } else {
            RetryDecision::Exhausted
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Attempt bookkeeping for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts made so far.
    pub attempts: u32,
    /// Earliest time of the next attempt.
    pub next_attempt_due: u64,
}

impl RetryState {
    /// A fresh sequence whose first attempt is due at `now`.
    pub fn new(now: u64) -> Self {
        Self {
            attempts: 0,
            next_attempt_due: now,
        }
    }

    /// Whether the next attempt may run.
    pub fn is_due(&self, now: u64) -> bool {
        now >= self.next_attempt_due
    }

    /// Records one attempt and returns the policy's verdict.
    pub fn record(&mut self, policy: &RetryPolicy, ok: bool, now: u64) -> RetryDecision {
        self.attempts = self.attempts.saturating_add(1);
        let decision = policy.evaluate(self.attempts, ok, now);
        if let RetryDecision::Retry { at } = decision {
            self.next_attempt_due = at;
        }
        decision
    }
}
