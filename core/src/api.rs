//! Stable re-exports for consumers (`cli`, `plugins`, and external crates).
//!
//! Prefer importing from `mare_core::api` instead of reaching into internal modules.

pub use crate::agent::{
    CapabilityRequest, CapabilityResponse, ConfidenceEvaluator, ConfidenceScore,
    ExecutionAgent, ExecutionCapability, WorkerPool,
};
pub use crate::audit::{AuditEntry, AuditLog, PipelineEvent};
pub use crate::config::{
    default_tool_groups, get_mare_data_dir, load_default, load_from_path, AppConfig,
    CapabilityConfig, CommandCapabilityConfig, DecompositionRule, DecompositionStep,
    ExecutorConfig, FsStoreConfig, HttpCapabilityConfig, LoggingConfig, RepositoryConfig,
    RouterConfig, StoreConfig,
};
pub use crate::error::{CliError, ErrorCode, InjectionError, RepositoryError, RouterError};
pub use crate::injector::{ContextInjector, ContextPayload, ExecutionContext, PermissionSet, RawContext};
pub use crate::pipeline::{Pipeline, PipelineBuilder};
pub use crate::profile::{
    ConfidenceThresholds, InsertOutcome, MemoryProfileStore, ProfileFilter, ProfileKey,
    ProfileLineage, ProfileListing, ProfileRef, ProfileRepository, ProfileStore, ProfileValidator,
    ProfileVersion, RoleProfile, StorageResult, ToolPermissions, ValidationResult,
    VersionSelector, Violation,
};
pub use crate::router::{
    EscalationContext, EscalationPolicy, ExecutionPlan, MatchKind, MatchScore, RouterSettings,
    StandardEscalationPolicy, TaskRouter,
};
pub use crate::task::{
    ConfidenceBand, ConfidenceSource, ContextTrace, EscalationReason, EscalationRecord,
    EscalationResponse, FailureKind, ResultStatus, Task, TaskOutcome, TaskResult, TaskStatus,
};
