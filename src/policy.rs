//! Retry policy
//!
//! Pure decision table for the bootstrap loop. Given where an attempt ended
//! up, say what the loop does next. No I/O here so the policy is testable
//! without a simulator.

use crate::port::port_for_attempt;

/// Where an attempt currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Pending,
    Success,
    RetryableFailure,
}

/// One launch-and-connect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// 0-based attempt index
    pub index: u32,
    /// RPC port the server for this attempt listens on
    pub port: u16,
    pub outcome: Outcome,
}

impl Attempt {
    /// A fresh attempt with its port derived from the index.
    pub fn new(index: u32, base_port: u16) -> Self {
        Self {
            index,
            port: port_for_attempt(base_port, index),
            outcome: Outcome::Pending,
        }
    }
}

/// What the bootstrap loop does after an attempt settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// Tear down and try again with the given attempt index
    Retry { next_index: u32 },
    /// Hand the session to the caller
    Succeed,
    /// Retry budget spent
    FailFatal,
}

/// Decide the next step for a settled attempt.
///
/// Returns `None` while the attempt is still `Pending`.
pub fn decide(attempt: &Attempt, max_attempts: u32) -> Option<NextAction> {
    match attempt.outcome {
        Outcome::Pending => None,
        Outcome::Success => Some(NextAction::Succeed),
        Outcome::RetryableFailure => {
            let next_index = attempt.index + 1;
            if next_index < max_attempts {
                Some(NextAction::Retry { next_index })
            } else {
                Some(NextAction::FailFatal)
            }
        }
    }
}
