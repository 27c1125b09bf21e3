use thiserror::Error;

use super::codes::ErrorCode;
use crate::profile::{ProfileKey, Violation};

/// Errors raised by the profile repository.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("profile not found: {name}@{version}")]
    NotFound { name: String, version: String },

    #[error("profile {key} failed validation: {}", format_violations(.violations))]
    Validation {
        key: ProfileKey,
        violations: Vec<Violation>,
    },

    #[error("profile {0} already exists")]
    Conflict(ProfileKey),

    #[error("invalid profile lineage: {0}")]
    InvalidLineage(String),

    #[error("profile store '{store}' unavailable: {source}")]
    Unavailable {
        store: String,
        #[source]
        source: anyhow::Error,
    },
}

impl RepositoryError {
    pub fn not_found(name: &str, version: impl std::fmt::Display) -> Self {
        Self::NotFound {
            name: name.to_string(),
            version: version.to_string(),
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Validation { .. } | Self::InvalidLineage(_) => ErrorCode::ValidationError,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::Unavailable { .. } => ErrorCode::Unavailable,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
