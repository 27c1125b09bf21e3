//! Role profiles: data model, validation, storage seam and the cached repository.

pub mod listing;
pub mod repository;
pub mod store;
pub mod types;
pub mod validation;
pub mod version;

pub use listing::ProfileListing;
pub use repository::{ProfileLineage, ProfileRepository, ProfileRepositoryBuilder};
pub use store::{InsertOutcome, MemoryProfileStore, ProfileStore};
pub use types::{
    ConfidenceThresholds, ProfileFilter, ProfileKey, ProfileRef, RoleProfile, StorageResult,
    ToolPermissions,
};
pub use validation::{ProfileValidator, ValidationResult, Violation};
pub use version::{ProfileVersion, VersionParseError, VersionSelector};
