//! Task lifecycle rules.

use thiserror::Error;

use super::types::TaskStatus;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
    #[error("cannot transition from terminal state {state:?}")]
    FromTerminalState { state: TaskStatus },
}

pub struct TaskTransition;

impl TaskTransition {
    /// `pending → routed → executing → {completed | escalated | failed}`.
    ///
    /// Besides the main path: a task that cannot be routed at all escalates
    /// from `pending`; a failed injection re-routes or escalates from
    /// `routed`; a retry sends an executing task back to `routed`.
    /// `executing` is only reachable from `routed`.
    pub fn validate(from: TaskStatus, to: TaskStatus) -> Result<(), TransitionError> {
        if Self::is_terminal(from) {
            return Err(TransitionError::FromTerminalState { state: from });
        }

        let is_valid = matches!(
            (from, to),
            (TaskStatus::Pending, TaskStatus::Routed)
                | (TaskStatus::Pending, TaskStatus::Escalated)
                | (TaskStatus::Routed, TaskStatus::Executing)
                | (TaskStatus::Routed, TaskStatus::Routed)
                | (TaskStatus::Routed, TaskStatus::Escalated)
                | (TaskStatus::Executing, TaskStatus::Completed)
                | (TaskStatus::Executing, TaskStatus::Escalated)
                | (TaskStatus::Executing, TaskStatus::Failed)
                | (TaskStatus::Executing, TaskStatus::Routed)
        );

        if is_valid {
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition { from, to })
        }
    }

    pub fn next_status(current: TaskStatus) -> Option<TaskStatus> {
        match current {
            TaskStatus::Pending => Some(TaskStatus::Routed),
            TaskStatus::Routed => Some(TaskStatus::Executing),
            TaskStatus::Executing => Some(TaskStatus::Completed),
            TaskStatus::Completed | TaskStatus::Escalated | TaskStatus::Failed => None,
        }
    }

    pub fn is_terminal(status: TaskStatus) -> bool {
        matches!(
            status,
            TaskStatus::Completed | TaskStatus::Escalated | TaskStatus::Failed
        )
    }
}
