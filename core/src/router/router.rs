use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use super::decompose::Decomposer;
use super::escalation::{EscalationContext, EscalationPolicy, StandardEscalationPolicy};
use super::graph::TaskGraph;
use super::plan::ExecutionPlan;
use super::scoring::{rank, CompiledProfile, MatchScore, RankedProfile};
use crate::agent::{ExecutionAgent, WorkerPool};
use crate::audit::{AuditLog, PipelineEvent};
use crate::config::{AppConfig, DecompositionRule};
use crate::error::{InjectionError, RouterError};
use crate::injector::{ContextInjector, RawContext};
use crate::profile::{ProfileFilter, ProfileKey, ProfileRepository, RoleProfile, VersionSelector};
use crate::task::{
    ConfidenceBand, ConfidenceSource, EscalationReason, EscalationRecord, EscalationResponse,
    ResultStatus, Task, TaskOutcome, TaskResult, TaskStatus,
};

/// Router knobs, usually taken from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub default_profile: String,
    pub max_attempts: u32,
    pub retry_on_low_confidence: bool,
    pub default_timeout: Duration,
    pub max_concurrency: usize,
    pub decomposition: Vec<DecompositionRule>,
}

impl RouterSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            default_profile: cfg.router.default_profile.clone(),
            max_attempts: cfg.router.max_attempts.max(1),
            retry_on_low_confidence: cfg.router.retry_on_low_confidence,
            default_timeout: Duration::from_millis(cfg.executor.timeout_ms),
            max_concurrency: cfg.executor.max_concurrency,
            decomposition: cfg.router.decomposition.clone(),
        }
    }
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Owns each submitted task from `pending` to a terminal outcome.
pub struct TaskRouter {
    repository: ProfileRepository,
    injector: Arc<ContextInjector>,
    agent: Arc<ExecutionAgent>,
    pool: WorkerPool,
    decomposer: Decomposer,
    policy: Arc<dyn EscalationPolicy>,
    audit: AuditLog,
    settings: RouterSettings,
    compiled: Mutex<HashMap<ProfileKey, Arc<CompiledProfile>>>,
}

impl std::fmt::Debug for TaskRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRouter")
            .field("repository", &self.repository)
            .field("policy", &self.policy.name())
            .field("settings", &self.settings)
            .finish()
    }
}

impl TaskRouter {
    pub fn new(
        repository: ProfileRepository,
        injector: Arc<ContextInjector>,
        agent: Arc<ExecutionAgent>,
        audit: AuditLog,
        settings: RouterSettings,
    ) -> Result<Self, RouterError> {
        let decomposer = Decomposer::new(&settings.decomposition)?;
        Ok(Self {
            repository,
            injector,
            agent,
            pool: WorkerPool::new(settings.max_concurrency),
            decomposer,
            policy: Arc::new(StandardEscalationPolicy),
            audit,
            settings,
            compiled: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_policy(mut self, policy: Arc<dyn EscalationPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    /// Runs a task to a terminal outcome. Only a malformed decomposition is
    /// reported as an error; everything else ends in a result or an escalation.
    #[tracing::instrument(name = "router.submit", skip_all, fields(task_id = %task.id))]
    pub async fn submit(&self, mut task: Task) -> Result<TaskOutcome, RouterError> {
        task.status = TaskStatus::Pending;
        info!(target: "mare.flow", task_id = %task.id, "task submitted");

        let subs = self.decompose(&task)?;
        if subs.len() == 1 && subs[0].id == task.id {
            return self.run_task(task, &HashMap::new()).await;
        }
        self.run_composite(task, subs).await
    }

    /// Sub-tasks in dependency-respecting order; the task itself when atomic.
    pub fn decompose(&self, task: &Task) -> Result<Vec<Task>, RouterError> {
        let subs = self.decomposer.decompose(task);
        let graph = TaskGraph::from_tasks(&subs)?;
        graph.validate()?;
        Ok(subs)
    }

    /// Best-scoring profile, else the default profile.
    pub async fn select_profile(&self, task: &Task) -> Result<Arc<RoleProfile>, RouterError> {
        let candidates = self.candidates(task).await?;
        candidates
            .into_iter()
            .next()
            .map(|c| c.profile)
            .ok_or_else(|| self.no_match(task))
    }

    /// Binds a task to a profile and a freshly injected, validated context.
    pub async fn route_execution(
        &self,
        task: &Task,
        profile: Arc<RoleProfile>,
    ) -> Result<ExecutionPlan, RouterError> {
        self.plan(task, profile, MatchScore::NONE, 1).await
    }

    /// Records the escalation and decides what happens next. A policy
    /// without an answer is reported and the task abandoned.
    pub fn handle_escalation(&self, ctx: EscalationContext<'_>) -> EscalationRecord {
        let (response, detail) = match self.policy.respond(&ctx) {
            Some(response) => (response, ctx.detail.map(str::to_string)),
            None => {
                let err = RouterError::EscalationUnanswered(ctx.task.id.clone());
                error!(task_id = %ctx.task.id, policy = self.policy.name(), error = %err, "escalation unanswered");
                let detail = match ctx.detail {
                    Some(d) => format!("{err}; {d}"),
                    None => err.to_string(),
                };
                (EscalationResponse::Abandon, Some(detail))
            }
        };

        let output_usable = ctx.result.is_some_and(|r| {
            matches!(
                r.confidence_band,
                Some(ConfidenceBand::Review | ConfidenceBand::AutoComplete)
            )
        });

        let record = EscalationRecord {
            task_id: ctx.task.id.clone(),
            reason: ctx.reason,
            original_result: ctx.result.cloned(),
            timestamp: Utc::now(),
            response,
            detail,
            attempt: ctx.attempt,
            output_usable,
        };
        warn!(
            target: "mare.flow",
            task_id = %record.task_id,
            reason = ?record.reason,
            response = ?record.response,
            "task escalated"
        );
        self.audit.record_escalation(&record);
        record
    }

    async fn run_task(
        &self,
        mut task: Task,
        completed: &HashMap<String, TaskResult>,
    ) -> Result<TaskOutcome, RouterError> {
        let candidates = match self.candidates(&task).await {
            Ok(c) => c,
            Err(RouterError::NoMatchingProfile { .. }) => {
                advance(&mut task, TaskStatus::Escalated)?;
                let detail = format!(
                    "no profile matched and default '{}' is unavailable",
                    self.settings.default_profile
                );
                let record = self.handle_escalation(EscalationContext {
                    task: &task,
                    reason: EscalationReason::NoMatchingProfile,
                    result: None,
                    attempt: 0,
                    max_attempts: self.settings.max_attempts,
                    alternates: &[],
                    retry_on_low_confidence: self.settings.retry_on_low_confidence,
                    detail: Some(&detail),
                });
                return Ok(TaskOutcome::Escalated(record));
            }
            Err(e) => {
                // Repository trouble: nothing can be routed, report instead of defaulting.
                advance(&mut task, TaskStatus::Escalated)?;
                let detail = e.to_string();
                let record = self.handle_escalation(EscalationContext {
                    task: &task,
                    reason: EscalationReason::ExecutionError,
                    result: None,
                    attempt: 0,
                    max_attempts: self.settings.max_attempts,
                    alternates: &[],
                    retry_on_low_confidence: self.settings.retry_on_low_confidence,
                    detail: Some(&detail),
                });
                return Ok(TaskOutcome::Escalated(record));
            }
        };

        // ranking sees the task's own text, the agent also sees upstream outputs
        if !task.dependencies.is_empty() {
            task.description = with_dependency_outputs(&task, completed);
        }

        advance(&mut task, TaskStatus::Routed)?;
        let mut tried: Vec<ProfileKey> = Vec::new();
        let mut next = candidates[0].clone();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let current = next.profile.key();
            tried.push(current.clone());
            let alternates: Vec<ProfileKey> = candidates
                .iter()
                .map(|c| c.profile.key())
                .filter(|k| !tried.contains(k))
                .collect();

            let (reason, result, detail) =
                match self.plan(&task, next.profile.clone(), next.score, attempt).await {
                    Err(e) => {
                        warn!(task_id = %task.id, profile = %current, error = %e, "routing failed");
                        (EscalationReason::ExecutionError, None, Some(e.to_string()))
                    }
                    Ok(plan) => {
                        advance(&mut task, TaskStatus::Executing)?;
                        self.audit.emit(PipelineEvent::TaskRouted {
                            task_id: task.id.clone(),
                            profile: current.clone(),
                            session_id: plan.session_id().to_string(),
                            attempt,
                            timestamp: Utc::now(),
                        });
                        let result = self.pool.run(self.agent.execute(plan)).await;
                        self.audit.record_result(&result);

                        match result.status {
                            ResultStatus::Completed => {
                                advance(&mut task, TaskStatus::Completed)?;
                                return Ok(TaskOutcome::Completed(result));
                            }
                            ResultStatus::Failed => {
                                let reason = result
                                    .failure
                                    .map(EscalationReason::from)
                                    .unwrap_or(EscalationReason::ExecutionError);
                                let detail = result.error.clone();
                                (reason, Some(result), detail)
                            }
                            ResultStatus::Escalated => {
                                let detail = Some(format!(
                                    "confidence {:.2} below auto_complete {:.2}",
                                    result.confidence, next.profile.confidence_thresholds.auto_complete
                                ));
                                (EscalationReason::LowConfidence, Some(result), detail)
                            }
                        }
                    }
                };

            let record = self.handle_escalation(EscalationContext {
                task: &task,
                reason,
                result: result.as_ref(),
                attempt,
                max_attempts: self.settings.max_attempts,
                alternates: &alternates,
                retry_on_low_confidence: self.settings.retry_on_low_confidence,
                detail: detail.as_deref(),
            });

            match &record.response {
                EscalationResponse::RetryWithProfile(key) => {
                    match self.retry_target(&candidates, key).await {
                        Some(target) if attempt < self.settings.max_attempts => {
                            info!(task_id = %task.id, from = %current, to = %key, "retrying with alternate profile");
                            advance(&mut task, TaskStatus::Routed)?;
                            next = target;
                        }
                        _ => {
                            return self.finish_escalated(task, record, result.as_ref());
                        }
                    }
                }
                EscalationResponse::SurfaceToHuman | EscalationResponse::Abandon => {
                    return self.finish_escalated(task, record, result.as_ref());
                }
            }
        }
    }

    fn finish_escalated(
        &self,
        mut task: Task,
        record: EscalationRecord,
        result: Option<&TaskResult>,
    ) -> Result<TaskOutcome, RouterError> {
        let terminal = match (&record.response, result) {
            (EscalationResponse::Abandon, Some(r)) if r.is_failed() => TaskStatus::Failed,
            _ => TaskStatus::Escalated,
        };
        advance(&mut task, terminal)?;
        debug!(task_id = %task.id, status = ?task.status, "task finished");
        Ok(TaskOutcome::Escalated(record))
    }

    async fn retry_target(
        &self,
        candidates: &[RankedProfile],
        key: &ProfileKey,
    ) -> Option<RankedProfile> {
        if let Some(found) = candidates.iter().find(|c| c.profile.key() == *key) {
            return Some(found.clone());
        }
        let selector = VersionSelector::Exact(key.version.clone());
        match self.repository.get(&key.name, &selector).await {
            Ok(profile) => Some(RankedProfile {
                profile,
                score: MatchScore::NONE,
            }),
            Err(e) => {
                warn!(profile = %key, error = %e, "retry target unavailable");
                None
            }
        }
    }

    async fn run_composite(&self, mut parent: Task, subs: Vec<Task>) -> Result<TaskOutcome, RouterError> {
        let started = Instant::now();
        let graph = TaskGraph::from_tasks(&subs)?;
        let stages = graph.stages()?;
        info!(
            target: "mare.flow",
            task_id = %parent.id,
            sub_tasks = subs.len(),
            stages = stages.len(),
            "task decomposed"
        );

        let mut completed: HashMap<String, TaskResult> = HashMap::new();
        for stage in &stages {
            let runs = stage
                .iter()
                .filter_map(|id| graph.get(id))
                .map(|sub| self.run_task(sub.clone(), &completed));
            let outcomes = join_all(runs).await;

            let mut escalated = None;
            for outcome in outcomes {
                match outcome? {
                    TaskOutcome::Completed(result) => {
                        completed.insert(result.task_id.clone(), result);
                    }
                    TaskOutcome::Escalated(record) => {
                        escalated.get_or_insert(record);
                    }
                }
            }

            if let Some(record) = escalated {
                // later stages are not scheduled
                advance(&mut parent, TaskStatus::Escalated)?;
                let detail = match &record.detail {
                    Some(d) => format!("sub-task {} escalated: {d}", record.task_id),
                    None => format!("sub-task {} escalated", record.task_id),
                };
                let parent_record = EscalationRecord {
                    task_id: parent.id.clone(),
                    reason: record.reason,
                    original_result: record.original_result,
                    timestamp: Utc::now(),
                    response: record.response,
                    detail: Some(detail),
                    attempt: record.attempt,
                    output_usable: record.output_usable,
                };
                self.audit.record_escalation(&parent_record);
                return Ok(TaskOutcome::Escalated(parent_record));
            }
        }

        let ordered: Vec<&TaskResult> = subs.iter().filter_map(|s| completed.get(&s.id)).collect();
        let Some(last) = ordered.last() else {
            return Err(RouterError::InvalidTransition {
                task_id: parent.id.clone(),
                reason: "decomposition produced no sub-task results".to_string(),
            });
        };

        let confidence = ordered.iter().map(|r| r.confidence).fold(1.0_f64, f64::min);
        let confidence_source = if ordered
            .iter()
            .all(|r| r.confidence_source == ConfidenceSource::SelfReported)
        {
            ConfidenceSource::SelfReported
        } else {
            ConfidenceSource::Heuristic
        };
        let result = TaskResult {
            task_id: parent.id.clone(),
            rep_used: last.rep_used.clone(),
            output: ordered
                .iter()
                .map(|r| r.output.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
            confidence,
            status: ResultStatus::Completed,
            execution_time_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            error: None,
            failure: None,
            confidence_band: Some(ConfidenceBand::AutoComplete),
            confidence_source,
            context: None,
            attempt: ordered.iter().map(|r| r.attempt).max().unwrap_or(1),
        };

        // a composite passes through the same lifecycle as its parts
        advance(&mut parent, TaskStatus::Routed)?;
        advance(&mut parent, TaskStatus::Executing)?;
        advance(&mut parent, TaskStatus::Completed)?;
        self.audit.record_result(&result);
        Ok(TaskOutcome::Completed(result))
    }

    async fn plan(
        &self,
        task: &Task,
        profile: Arc<RoleProfile>,
        score: MatchScore,
        attempt: u32,
    ) -> Result<ExecutionPlan, RouterError> {
        let lineage = self.repository.lineage(profile.clone()).await?;
        let mut context = self.injector.inject(RawContext::new(task.id.clone()), &lineage)?;

        if !self.injector.validate_injection(&context) {
            let err = self
                .injector
                .payload(&context)
                .err()
                .unwrap_or_else(|| InjectionError::Structural("context rejected".to_string()));
            self.agent.wipe(&mut context);
            return Err(err.into());
        }

        let timeout = task
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.settings.default_timeout);

        debug!(
            task_id = %task.id,
            profile = %profile.key(),
            session_id = %context.session_id(),
            timeout_ms = timeout.as_millis() as u64,
            "execution planned"
        );
        Ok(ExecutionPlan {
            task: task.clone(),
            lineage: lineage.keys(),
            profile,
            context,
            score,
            attempt,
            timeout,
        })
    }

    /// Ranked matches followed by the default profile.
    async fn candidates(&self, task: &Task) -> Result<Vec<RankedProfile>, RouterError> {
        let profiles = self.repository.list(ProfileFilter::default()).collect().await?;
        let compiled: Vec<Arc<CompiledProfile>> =
            profiles.into_iter().map(|p| self.compile(p)).collect();
        let mut ranked = rank(task, compiled.iter().map(Arc::as_ref));

        let default = &self.settings.default_profile;
        if !ranked.iter().any(|r| &r.profile.name == default) {
            match self.repository.get_latest(default).await {
                Ok(profile) => ranked.push(RankedProfile {
                    profile,
                    score: MatchScore::NONE,
                }),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        if ranked.is_empty() {
            return Err(self.no_match(task));
        }
        debug!(
            task_id = %task.id,
            best = %ranked[0].profile.key(),
            kind = ?ranked[0].score.kind,
            candidates = ranked.len(),
            "profiles ranked"
        );
        Ok(ranked)
    }

    fn compile(&self, profile: Arc<RoleProfile>) -> Arc<CompiledProfile> {
        let mut cache = self.compiled.lock().unwrap_or_else(|e| e.into_inner());
        cache
            .entry(profile.key())
            .or_insert_with(|| Arc::new(CompiledProfile::new(profile)))
            .clone()
    }

    fn no_match(&self, task: &Task) -> RouterError {
        RouterError::NoMatchingProfile {
            task_id: task.id.clone(),
            default_profile: self.settings.default_profile.clone(),
        }
    }
}

fn advance(task: &mut Task, to: TaskStatus) -> Result<(), RouterError> {
    task.transition(to).map_err(|e| RouterError::InvalidTransition {
        task_id: task.id.clone(),
        reason: e.to_string(),
    })
}

fn with_dependency_outputs(task: &Task, completed: &HashMap<String, TaskResult>) -> String {
    let mut context = String::with_capacity(task.dependencies.len() * 200 + task.description.len() + 64);
    context.push_str("=== Dependency Outputs ===\n\n");
    for dep_id in &task.dependencies {
        if let Some(result) = completed.get(dep_id) {
            let _ = writeln!(context, "# Task: {dep_id}");
            let _ = writeln!(context, "Profile: {}", result.rep_used);
            if !result.output.is_empty() {
                context.push_str("Output:\n");
                context.push_str(&result.output);
                context.push_str("\n\n");
            }
        }
    }
    context.push_str("=== End Dependency Outputs ===\n\n");
    context.push_str(&task.description);
    context
}
