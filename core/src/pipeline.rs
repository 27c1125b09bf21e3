//! Caller-facing facade over the repository, router and audit log.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::info;

use crate::agent::{ConfidenceEvaluator, ExecutionAgent, ExecutionCapability};
use crate::audit::{AuditLog, PipelineEvent};
use crate::config::AppConfig;
use crate::error::{CliError, RepositoryError, RouterError};
use crate::injector::ContextInjector;
use crate::profile::{
    MemoryProfileStore, ProfileFilter, ProfileListing, ProfileRepository, ProfileStore,
    ProfileValidator, ProfileVersion, RoleProfile, StorageResult, ValidationResult,
    VersionSelector,
};
use crate::router::{EscalationPolicy, RouterSettings, TaskRouter};
use crate::task::{Task, TaskOutcome};

struct PipelineInner {
    cfg: AppConfig,
    repository: ProfileRepository,
    injector: Arc<ContextInjector>,
    router: TaskRouter,
    audit: AuditLog,
}

/// Cheap to clone; clones share one repository, injector and audit log.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("router", &self.inner.router)
            .field("audit", &self.inner.audit)
            .finish()
    }
}

pub struct PipelineBuilder {
    cfg: AppConfig,
    store: Option<Arc<dyn ProfileStore>>,
    capability: Option<Arc<dyn ExecutionCapability>>,
    policy: Option<Arc<dyn EscalationPolicy>>,
    audit: Option<AuditLog>,
}

impl PipelineBuilder {
    /// Defaults to an in-memory store; a capability must be supplied.
    pub fn store(mut self, store: Arc<dyn ProfileStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn capability(mut self, capability: Arc<dyn ExecutionCapability>) -> Self {
        self.capability = Some(capability);
        self
    }

    pub fn policy(mut self, policy: Arc<dyn EscalationPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn build(self) -> Result<Pipeline, CliError> {
        self.cfg.validate().map_err(CliError::Config)?;
        let Some(capability) = self.capability else {
            return Err(CliError::Config(
                "execution capability missing (cannot run tasks)".into(),
            ));
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryProfileStore::new()));

        let repo_cfg = &self.cfg.repository;
        let repository = ProfileRepository::builder(store)
            .validator(ProfileValidator::new(repo_cfg.tool_groups.iter().cloned()))
            .cache_capacity(repo_cfg.cache_capacity)
            .max_lineage_depth(repo_cfg.max_lineage_depth)
            .build();

        let audit = self.audit.unwrap_or_default();
        let injector = Arc::new(ContextInjector::new());
        let evaluator = ConfidenceEvaluator::new(
            self.cfg.executor.heuristic_base,
            self.cfg.executor.error_markers.iter().cloned(),
        );
        let agent = Arc::new(ExecutionAgent::new(
            capability.clone(),
            injector.clone(),
            evaluator,
            audit.clone(),
        ));

        let mut router = TaskRouter::new(
            repository.clone(),
            injector.clone(),
            agent,
            audit.clone(),
            RouterSettings::from_config(&self.cfg),
        )?;
        if let Some(policy) = self.policy {
            router = router.with_policy(policy);
        }

        info!(
            store = repository.store_name(),
            capability = capability.name(),
            max_concurrency = router.pool().capacity(),
            "pipeline ready"
        );
        Ok(Pipeline {
            inner: Arc::new(PipelineInner {
                cfg: self.cfg,
                repository,
                injector,
                router,
                audit,
            }),
        })
    }
}

impl Pipeline {
    pub fn builder(cfg: AppConfig) -> PipelineBuilder {
        PipelineBuilder {
            cfg,
            store: None,
            capability: None,
            policy: None,
            audit: None,
        }
    }

    pub fn cfg(&self) -> &AppConfig {
        &self.inner.cfg
    }

    pub async fn submit(&self, task: Task) -> Result<TaskOutcome, RouterError> {
        self.inner.router.submit(task).await
    }

    /// `None` resolves the latest version.
    pub async fn get_profile(
        &self,
        name: &str,
        version: Option<&ProfileVersion>,
    ) -> Result<Arc<RoleProfile>, RepositoryError> {
        let selector = version
            .cloned()
            .map(VersionSelector::Exact)
            .unwrap_or_default();
        self.inner.repository.get(name, &selector).await
    }

    pub fn list_profiles(&self, filter: ProfileFilter) -> ProfileListing {
        self.inner.repository.list(filter)
    }

    pub async fn store_profile(&self, profile: RoleProfile) -> Result<StorageResult, RepositoryError> {
        let stored = self.inner.repository.store(profile).await?;
        self.inner.audit.emit(PipelineEvent::ProfileStored {
            profile: stored.key.clone(),
            became_latest: stored.became_latest,
            timestamp: Utc::now(),
        });
        Ok(stored)
    }

    pub fn validate_profile(&self, profile: &RoleProfile) -> ValidationResult {
        self.inner.repository.validate(profile)
    }

    pub fn audit(&self) -> &AuditLog {
        &self.inner.audit
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.inner.audit.subscribe()
    }

    /// Contexts injected and not yet wiped.
    pub fn live_contexts(&self) -> usize {
        self.inner.injector.live_contexts()
    }

    pub fn repository(&self) -> &ProfileRepository {
        &self.inner.repository
    }

    pub fn router(&self) -> &TaskRouter {
        &self.inner.router
    }
}
