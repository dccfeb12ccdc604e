//! Caller-side execution rules.
//!
//! The engine records strategies and retry settings but never runs tasks.
//! These helpers give an orchestration loop one shared reading of them.

use serde::{Deserialize, Serialize};
use weft_core::{ExecutionStrategy, RollbackStrategy, Task, TaskStatus};

/// How many of the ready tasks a batch may start now.
///
/// `sequential` dispatches one at a time; `parallel` and `dag` dispatch every
/// ready task, `dag` re-evaluating readiness after each completion.
pub fn dispatch<'a>(strategy: ExecutionStrategy, ready: &'a [Task]) -> &'a [Task] {
    match strategy {
        ExecutionStrategy::Sequential => &ready[..ready.len().min(1)],
        ExecutionStrategy::Parallel | ExecutionStrategy::Dag => ready,
    }
}

/// What to do after a task attempt fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryDecision {
    /// Try again after `delay_seconds`.
    Retry {
        /// Seconds to wait before the next attempt.
        delay_seconds: u64,
        /// Attempt number of the retry.
        attempt: u32,
    },
    /// Retries used up; mark the task terminally failed.
    Exhausted,
}

/// Fixed-delay retry settings taken from a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay between attempts.
    pub retry_delay_seconds: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_seconds: 30,
        }
    }
}

impl RetryPolicy {
    /// The policy a task was created with.
    pub fn for_task(task: &Task) -> Self {
        Self {
            max_retries: task.max_retries,
            retry_delay_seconds: task.retry_delay_seconds,
        }
    }

    /// Decide after `attempts` attempts have failed (the first attempt is 1).
    pub fn decide(&self, attempts: u32) -> RetryDecision {
        if attempts <= self.max_retries {
            RetryDecision::Retry {
                delay_seconds: self.retry_delay_seconds,
                attempt: attempts + 1,
            }
        } else {
            RetryDecision::Exhausted
        }
    }
}

/// The completed siblings to undo after a failure, in undo order.
///
/// `reverse_order` undoes the most recently completed task first. `custom`
/// returns them in completion order for the caller to reorder.
pub fn rollback_order(strategy: RollbackStrategy, siblings: &[Task]) -> Vec<Task> {
    let mut done: Vec<Task> = siblings
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .cloned()
        .collect();
    done.sort_by_key(|t| t.completed_at);
    if strategy == RollbackStrategy::ReverseOrder {
        done.reverse();
    }
    done
}
