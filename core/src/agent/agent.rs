use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use tracing::{info, warn};

use super::capability::{CapabilityRequest, CapabilityResponse, ExecutionCapability};
use super::confidence::{ConfidenceEvaluator, ConfidenceScore};
use crate::audit::{AuditLog, PipelineEvent};
use crate::injector::{ContextInjector, ExecutionContext};
use crate::profile::{ConfidenceThresholds, ProfileKey};
use crate::router::ExecutionPlan;
use crate::task::{ConfidenceBand, ConfidenceSource, FailureKind, TaskResult};

enum Attempt {
    Responded(CapabilityResponse),
    Failed(FailureKind, String),
}

/// Runs one plan against the capability, scores the result and tears the
/// context down on every exit path.
pub struct ExecutionAgent {
    capability: Arc<dyn ExecutionCapability>,
    injector: Arc<ContextInjector>,
    evaluator: ConfidenceEvaluator,
    audit: AuditLog,
}

impl std::fmt::Debug for ExecutionAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionAgent")
            .field("capability", &self.capability.name())
            .field("evaluator", &self.evaluator)
            .finish()
    }
}

impl ExecutionAgent {
    pub fn new(
        capability: Arc<dyn ExecutionCapability>,
        injector: Arc<ContextInjector>,
        evaluator: ConfidenceEvaluator,
        audit: AuditLog,
    ) -> Self {
        Self {
            capability,
            injector,
            evaluator,
            audit,
        }
    }

    pub fn evaluator(&self) -> &ConfidenceEvaluator {
        &self.evaluator
    }

    /// Invokes the capability exactly once. Capability errors, panics and
    /// timeouts come back as a failed result, never as an error.
    #[tracing::instrument(
        name = "agent.execute",
        skip_all,
        fields(task_id = %plan.task.id, profile = %plan.profile.key(), session_id = %plan.context.session_id(), attempt = plan.attempt)
    )]
    pub async fn execute(&self, plan: ExecutionPlan) -> TaskResult {
        let ExecutionPlan {
            task,
            profile,
            mut context,
            attempt,
            timeout,
            ..
        } = plan;
        // dropping this future drops `context`, which discards its session
        let started = Instant::now();

        let outcome = match self.injector.payload(&context) {
            Err(e) => Attempt::Failed(FailureKind::ExecutionError, e.to_string()),
            Ok(payload) => {
                let request = CapabilityRequest::new(&context, &payload, &task);
                let run = AssertUnwindSafe(self.capability.run(request)).catch_unwind();
                match tokio::time::timeout(timeout, run).await {
                    Err(_) => Attempt::Failed(
                        FailureKind::Timeout,
                        format!("execution exceeded {}ms", timeout.as_millis()),
                    ),
                    Ok(Err(panic)) => Attempt::Failed(
                        FailureKind::ExecutionError,
                        format!("capability panicked: {}", panic_message(panic.as_ref())),
                    ),
                    Ok(Ok(Err(e))) => Attempt::Failed(FailureKind::ExecutionError, format!("{e:#}")),
                    Ok(Ok(Ok(response))) => match response.error_text() {
                        Some(err) => Attempt::Failed(FailureKind::ExecutionError, err.to_string()),
                        None => Attempt::Responded(response),
                    },
                }
            }
        };
        let execution_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        self.wipe(&mut context);

        let rep_used = profile.key();
        let result = match outcome {
            Attempt::Failed(kind, error) => {
                warn!(task_id = %task.id, failure = ?kind, error = %error, "execution failed");
                failed_result(&task.id, rep_used, &context, kind, error, execution_time_ms, attempt)
            }
            Attempt::Responded(response) => {
                let score = self
                    .evaluator
                    .evaluate_confidence(&response, task.expected_output.as_deref());
                scored_result(
                    &task.id,
                    rep_used,
                    &context,
                    response.output,
                    score,
                    &profile.confidence_thresholds,
                    execution_time_ms,
                    attempt,
                )
            }
        };

        info!(
            target: "mare.flow",
            task_id = %result.task_id,
            status = ?result.status,
            confidence = result.confidence,
            elapsed_ms = result.execution_time_ms,
            "execution finished"
        );
        result
    }

    /// Wipes the context and announces it to event subscribers.
    pub(crate) fn wipe(&self, context: &mut ExecutionContext) {
        if self.injector.wipe(context) {
            self.audit.emit(PipelineEvent::ContextWiped {
                session_id: context.session_id().to_string(),
                task_id: context.task_id().to_string(),
                timestamp: Utc::now(),
            });
        }
    }
}

fn failed_result(
    task_id: &str,
    rep_used: ProfileKey,
    context: &ExecutionContext,
    kind: FailureKind,
    error: String,
    execution_time_ms: u64,
    attempt: u32,
) -> TaskResult {
    TaskResult {
        task_id: task_id.to_string(),
        rep_used,
        output: String::new(),
        confidence: 0.0,
        status: crate::task::ResultStatus::Failed,
        execution_time_ms,
        error: Some(error),
        failure: Some(kind),
        confidence_band: None,
        confidence_source: ConfidenceSource::NotEvaluated,
        context: Some(context.trace()),
        attempt,
    }
}

fn scored_result(
    task_id: &str,
    rep_used: ProfileKey,
    context: &ExecutionContext,
    output: String,
    score: ConfidenceScore,
    thresholds: &ConfidenceThresholds,
    execution_time_ms: u64,
    attempt: u32,
) -> TaskResult {
    let band = ConfidenceBand::classify(score.value, thresholds);
    TaskResult {
        task_id: task_id.to_string(),
        rep_used,
        output,
        confidence: score.value,
        status: band.result_status(),
        execution_time_ms,
        error: None,
        failure: None,
        confidence_band: Some(band),
        confidence_source: score.source,
        context: Some(context.trace()),
        attempt,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injector::RawContext;
    use crate::profile::{ProfileLineage, RoleProfile};
    use async_trait::async_trait;
    use std::collections::{BTreeMap, BTreeSet};

    struct Echo;

    #[async_trait]
    impl ExecutionCapability for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        async fn run(&self, request: CapabilityRequest) -> anyhow::Result<CapabilityResponse> {
            Ok(CapabilityResponse::output(request.task_description))
        }
    }

    fn lineage() -> ProfileLineage {
        let mut perms = BTreeMap::new();
        perms.insert("filesystem".to_string(), BTreeSet::from(["read".to_string()]));
        ProfileLineage::single(Arc::new(RoleProfile {
            name: "GENERIC".into(),
            version: "1.0.0".parse().unwrap(),
            archetype: "generic".into(),
            instructions: "Do the work.".into(),
            tone_rules: vec![],
            constraints: vec!["Be precise".into()],
            preferred_backends: vec![],
            tool_permissions: perms,
            confidence_thresholds: ConfidenceThresholds::default(),
            base: None,
            keywords: vec![],
            match_patterns: vec![],
        }))
    }

    #[test]
    fn test_wipe_announces_once() {
        let injector = Arc::new(ContextInjector::new());
        let audit = AuditLog::new();
        let mut events = audit.subscribe();
        let agent = ExecutionAgent::new(
            Arc::new(Echo),
            injector.clone(),
            ConfidenceEvaluator::new(0.7, ["error:"]),
            audit,
        );

        let mut context = injector.inject(RawContext::new("t1"), &lineage()).unwrap();
        agent.wipe(&mut context);
        agent.wipe(&mut context);

        match events.try_recv() {
            Ok(PipelineEvent::ContextWiped { task_id, .. }) => assert_eq!(task_id, "t1"),
            other => panic!("expected ContextWiped, got {other:?}"),
        }
        assert!(events.try_recv().is_err());
        assert_eq!(injector.live_contexts(), 0);
    }
}
