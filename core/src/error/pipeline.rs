use thiserror::Error;

use super::codes::ErrorCode;
use super::repository::RepositoryError;

/// Errors raised while building or checking an execution context.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InjectionError {
    #[error("session {0} is already live")]
    SessionInUse(String),

    #[error("session {0} has been wiped")]
    ContextWiped(String),

    #[error("no live context for session {0}")]
    UnknownSession(String),

    #[error("context failed structural validation: {0}")]
    Structural(String),
}

impl InjectionError {
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::InjectionError
    }
}

/// Errors surfaced by the task router before a task reaches a terminal outcome.
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("no matching profile for task '{task_id}' (default '{default_profile}' unavailable)")]
    NoMatchingProfile {
        task_id: String,
        default_profile: String,
    },

    #[error("duplicate task id: {0}")]
    DuplicateTaskId(String),

    #[error("dependency not found: task '{task_id}' depends on '{missing_dep}'")]
    DependencyNotFound { task_id: String, missing_dep: String },

    #[error("circular dependency detected: {0}")]
    CircularDependency(String),

    #[error("invalid decomposition rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },

    #[error("escalation for task '{0}' produced no response")]
    EscalationUnanswered(String),

    #[error("invalid task transition for '{task_id}': {reason}")]
    InvalidTransition { task_id: String, reason: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Injection(#[from] InjectionError),
}

impl RouterError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NoMatchingProfile { .. } => ErrorCode::NoMatchingProfile,
            Self::DuplicateTaskId(_)
            | Self::DependencyNotFound { .. }
            | Self::CircularDependency(_)
            | Self::InvalidTransition { .. }
            | Self::InvalidRule { .. } => ErrorCode::ValidationError,
            Self::EscalationUnanswered(_) => ErrorCode::ExecutionFailure,
            Self::Repository(e) => e.error_code(),
            Self::Injection(e) => e.error_code(),
        }
    }
}
