use thiserror::Error;

use super::codes::ErrorCode;
use super::pipeline::RouterError;
use super::repository::RepositoryError;

/// Top-level error for binaries built on the pipeline.
#[derive(Error, Debug)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(String),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("router error: {0}")]
    Router(#[from] RouterError),
    #[error("command failed: {0}")]
    Command(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl CliError {
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Config(_) => Some(ErrorCode::ConfigError),
            Self::Repository(e) => Some(e.error_code()),
            Self::Router(e) => Some(e.error_code()),
            Self::Command(_) | Self::Io(_) | Self::Anyhow(_) => None,
        }
    }
}
