pub mod codes;
#[allow(clippy::module_inception)]
pub mod error;
pub mod pipeline;
pub mod repository;

pub use codes::ErrorCode;
pub use error::CliError;
pub use pipeline::{InjectionError, RouterError};
pub use repository::RepositoryError;
