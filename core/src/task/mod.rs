pub mod transitions;
pub mod types;

pub use transitions::{TaskTransition, TransitionError};
pub use types::{
    ConfidenceBand, ConfidenceSource, ContextTrace, EscalationReason, EscalationRecord,
    EscalationResponse, FailureKind, ResultStatus, Task, TaskOutcome, TaskResult, TaskStatus,
};
