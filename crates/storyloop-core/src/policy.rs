//! Retry policy and explicit retry state.
//!
//! `no_messages` failures get their own ceiling and cooldown - the API
//! returning nothing is usually transient and cheap to retry - while every
//! other kind shares one general policy. Both come from configuration,
//! never derived at runtime.
//!
//! Retry bookkeeping is an explicit [`RetryState`] value threaded through
//! the iteration driver, so repeated or concurrent runs never leak attempt
//! counts between each other.

use crate::classify::ErrorKind;
use std::time::Duration;

/// Per-kind retry ceilings and cooldowns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempt ceiling for `no_messages`.
    pub no_messages_max_attempts: u32,
    /// Attempt ceiling shared by every other kind.
    pub general_max_attempts: u32,
    /// Cooldown before retrying a `no_messages` failure.
    pub no_messages_cooldown: Duration,
    /// Cooldown shared by every other kind.
    pub general_cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            no_messages_max_attempts: 10,
            general_max_attempts: 3,
            no_messages_cooldown: Duration::from_secs(10),
            general_cooldown: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempts` failures of
    /// `kind`.
    pub fn should_retry(&self, kind: ErrorKind, attempts: u32) -> bool {
        attempts < self.max_attempts(kind)
    }

    /// Cooldown to observe before retrying `kind`.
    pub fn cooldown(&self, kind: ErrorKind) -> Duration {
        match kind {
            ErrorKind::NoMessages => self.no_messages_cooldown,
            _ => self.general_cooldown,
        }
    }

    /// Attempt ceiling for `kind`.
    pub fn max_attempts(&self, kind: ErrorKind) -> u32 {
        match kind {
            ErrorKind::NoMessages => self.no_messages_max_attempts,
            _ => self.general_max_attempts,
        }
    }
}

/// What the driver should do after a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-invoke after the cooldown.
    Retry { cooldown: Duration },
    /// Ceiling reached; abandon the iteration.
    GiveUp,
}

/// Attempt bookkeeping for the current failure streak.
///
/// Attempts reset whenever an iteration succeeds or the error kind
/// changes - a new kind of failure starts a fresh budget.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    kind: Option<ErrorKind>,
    attempts: u32,
}

impl RetryState {
    /// Fresh state with no recorded failures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a classified failure and returns the decision under
    /// `policy`. The attempt that just failed is counted before the
    /// ceiling check.
    pub fn record_failure(&mut self, kind: ErrorKind, policy: &RetryPolicy) -> RetryDecision {
        if self.kind != Some(kind) {
            self.kind = Some(kind);
            self.attempts = 0;
        }
        self.attempts += 1;
        if policy.should_retry(kind, self.attempts) {
            RetryDecision::Retry {
                cooldown: policy.cooldown(kind),
            }
        } else {
            RetryDecision::GiveUp
        }
    }

    /// Clears the streak after a successful iteration.
    pub fn record_success(&mut self) {
        self.kind = None;
        self.attempts = 0;
    }

    /// Failures recorded for the current streak.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Kind of the current streak, if any.
    pub fn kind(&self) -> Option<ErrorKind> {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_messages_ceiling_differs_from_general() {
        let policy = RetryPolicy::default();
        assert_ne!(
            policy.max_attempts(ErrorKind::NoMessages),
            policy.max_attempts(ErrorKind::RateLimit)
        );

        // Same N, different answers across the two policies
        let n = policy.general_max_attempts;
        assert!(policy.should_retry(ErrorKind::NoMessages, n));
        assert!(!policy.should_retry(ErrorKind::RateLimit, n));
    }

    #[test]
    fn test_all_general_kinds_share_one_policy() {
        let policy = RetryPolicy::default();
        for kind in [
            ErrorKind::ConnectionReset,
            ErrorKind::Timeout,
            ErrorKind::RateLimit,
            ErrorKind::ServerError,
            ErrorKind::Unknown,
        ] {
            assert_eq!(policy.max_attempts(kind), policy.general_max_attempts);
            assert_eq!(policy.cooldown(kind), policy.general_cooldown);
        }
    }

    #[test]
    fn test_no_messages_has_own_cooldown() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.cooldown(ErrorKind::NoMessages),
            policy.no_messages_cooldown
        );
        assert_ne!(policy.no_messages_cooldown, policy.general_cooldown);
    }

    #[test]
    fn test_retry_state_counts_up_to_ceiling() {
        let policy = RetryPolicy {
            general_max_attempts: 2,
            ..RetryPolicy::default()
        };
        let mut state = RetryState::new();

        assert!(matches!(
            state.record_failure(ErrorKind::Timeout, &policy),
            RetryDecision::Retry { .. }
        ));
        assert_eq!(
            state.record_failure(ErrorKind::Timeout, &policy),
            RetryDecision::GiveUp
        );
        assert_eq!(state.attempts(), 2);
    }

    #[test]
    fn test_kind_change_resets_attempts() {
        let policy = RetryPolicy::default();
        let mut state = RetryState::new();

        state.record_failure(ErrorKind::Timeout, &policy);
        state.record_failure(ErrorKind::Timeout, &policy);
        assert_eq!(state.attempts(), 2);

        state.record_failure(ErrorKind::RateLimit, &policy);
        assert_eq!(state.attempts(), 1);
        assert_eq!(state.kind(), Some(ErrorKind::RateLimit));
    }

    #[test]
    fn test_success_resets_streak() {
        let policy = RetryPolicy::default();
        let mut state = RetryState::new();

        state.record_failure(ErrorKind::ServerError, &policy);
        state.record_success();

        assert_eq!(state.attempts(), 0);
        assert_eq!(state.kind(), None);
    }

    #[test]
    fn test_retry_carries_kind_cooldown() {
        let policy = RetryPolicy::default();
        let mut state = RetryState::new();

        let decision = state.record_failure(ErrorKind::NoMessages, &policy);
        assert_eq!(
            decision,
            RetryDecision::Retry {
                cooldown: policy.no_messages_cooldown
            }
        );
    }
}
