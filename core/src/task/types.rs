use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::transitions::{TaskTransition, TransitionError};
use crate::profile::{ConfidenceThresholds, ProfileKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Routed,
    Executing,
    Completed,
    Escalated,
    Failed,
}

/// A unit of work submitted by a caller or produced by decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    /// Ids of sibling sub-tasks whose results must exist before this one runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Requested profile name; an exact match outranks every other signal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Task {
    /// New pending task with a generated id.
    pub fn new(description: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), description)
    }

    pub fn with_id(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            expected_output: None,
            parent_id: None,
            status: TaskStatus::Pending,
            dependencies: Vec::new(),
            role_hint: None,
            archetype: None,
            timeout_ms: None,
        }
    }

    pub fn expected_output(mut self, expected: impl Into<String>) -> Self {
        self.expected_output = Some(expected.into());
        self
    }

    pub fn role_hint(mut self, role: impl Into<String>) -> Self {
        self.role_hint = Some(role.into());
        self
    }

    pub fn archetype(mut self, archetype: impl Into<String>) -> Self {
        self.archetype = Some(archetype.into());
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    /// Text used for matching: description followed by the expected output.
    pub fn match_text(&self) -> String {
        match &self.expected_output {
            Some(expected) => format!("{} {}", self.description, expected),
            None => self.description.clone(),
        }
    }

    pub fn transition(&mut self, to: TaskStatus) -> Result<(), TransitionError> {
        TaskTransition::validate(self.status, to)?;
        tracing::trace!(task_id = %self.id, from = ?self.status, to = ?to, "task transition");
        self.status = to;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        TaskTransition::is_terminal(self.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Completed,
    Escalated,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ExecutionError,
    Timeout,
}

/// Where a confidence score falls relative to a profile's thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    /// `confidence >= auto_complete`
    AutoComplete,
    /// `escalate <= confidence < auto_complete`; output attached for review.
    Review,
    /// `confidence < escalate`; output not guaranteed usable.
    Low,
}

impl ConfidenceBand {
    pub fn classify(confidence: f64, thresholds: &ConfidenceThresholds) -> Self {
        if confidence >= thresholds.auto_complete {
            Self::AutoComplete
        } else if confidence >= thresholds.escalate {
            Self::Review
        } else {
            Self::Low
        }
    }

    pub fn result_status(self) -> ResultStatus {
        match self {
            Self::AutoComplete => ResultStatus::Completed,
            Self::Review | Self::Low => ResultStatus::Escalated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceSource {
    SelfReported,
    Heuristic,
    /// Failed executions are not scored.
    NotEvaluated,
}

/// Lifetime of the execution context a result was produced in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTrace {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub wiped_at: Option<DateTime<Utc>>,
}

/// Outcome of one execution attempt. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub rep_used: ProfileKey,
    pub output: String,
    pub confidence: f64,
    pub status: ResultStatus,
    pub execution_time_ms: u64,
    /// Present iff `status` is failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_band: Option<ConfidenceBand>,
    pub confidence_source: ConfidenceSource,
    /// Unset for composite results assembled from sub-tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextTrace>,
    pub attempt: u32,
}

impl TaskResult {
    pub fn session_id(&self) -> Option<&str> {
        self.context.as_ref().map(|c| c.session_id.as_str())
    }

    pub fn is_completed(&self) -> bool {
        self.status == ResultStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == ResultStatus::Failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    LowConfidence,
    ExecutionError,
    NoMatchingProfile,
    Timeout,
}

impl From<FailureKind> for EscalationReason {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::ExecutionError => Self::ExecutionError,
            FailureKind::Timeout => Self::Timeout,
        }
    }
}

/// What the caller should do about an escalation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "profile", rename_all = "snake_case")]
pub enum EscalationResponse {
    RetryWithProfile(ProfileKey),
    SurfaceToHuman,
    Abandon,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub task_id: String,
    pub reason: EscalationReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_result: Option<TaskResult>,
    pub timestamp: DateTime<Utc>,
    pub response: EscalationResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub attempt: u32,
    pub output_usable: bool,
}

/// What `submit` hands back: a result, or the escalation that replaced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed(TaskResult),
    Escalated(EscalationRecord),
}

impl TaskOutcome {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Completed(r) => &r.task_id,
            Self::Escalated(e) => &e.task_id,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn result(&self) -> Option<&TaskResult> {
        match self {
            Self::Completed(r) => Some(r),
            Self::Escalated(e) => e.original_result.as_ref(),
        }
    }

    pub fn escalation(&self) -> Option<&EscalationRecord> {
        match self {
            Self::Escalated(e) => Some(e),
            Self::Completed(_) => None,
        }
    }
}
