mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{child_of, pipeline_with, profile, standard_profiles, test_config, Reply, ScriptedCapability};
use mare_core::api::{
    ConfidenceBand, ConfidenceSource, EscalationContext, EscalationPolicy, EscalationReason,
    EscalationResponse, FailureKind, Pipeline, PipelineEvent, ProfileKey, ResultStatus, Task,
    TaskOutcome,
};
use pretty_assertions::assert_eq;

fn key(name: &str, version: &str) -> ProfileKey {
    ProfileKey::new(name, version.parse().unwrap())
}

async fn standard(capability: Arc<ScriptedCapability>) -> Pipeline {
    pipeline_with(test_config(), capability, standard_profiles()).await
}

async fn wait_until(mut ready: impl FnMut() -> bool) {
    for _ in 0..200 {
        if ready() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_rest_api_task_routes_to_api_designer() {
    let capability = Arc::new(ScriptedCapability::new(Reply::confident("done", 0.9)));
    let pipeline = standard(capability.clone()).await;

    let task = Task::with_id("t1", "Design a REST API for user management");
    let selected = pipeline.router().select_profile(&task).await.unwrap();
    assert_eq!(selected.name, "API_DESIGNER");

    let outcome = pipeline.submit(task).await.unwrap();
    let result = outcome.result().expect("completed");
    assert_eq!(result.rep_used, key("API_DESIGNER", "1.0.0"));
    assert_eq!(result.status, ResultStatus::Completed);
    assert_eq!(result.confidence_band, Some(ConfidenceBand::AutoComplete));
    assert_eq!(result.confidence_source, ConfidenceSource::SelfReported);
    assert_eq!(capability.profiles_called(), vec!["API_DESIGNER"]);
}

#[tokio::test]
async fn test_unmatched_task_falls_back_to_default() {
    let capability = Arc::new(ScriptedCapability::new(Reply::confident("done", 0.9)));
    let pipeline = standard(capability.clone()).await;

    let outcome = pipeline.submit(Task::with_id("t1", "paint the fence")).await.unwrap();
    assert_eq!(outcome.result().unwrap().rep_used, key("GENERIC", "1.0.0"));
}

#[tokio::test]
async fn test_no_match_without_default_is_abandoned() {
    let capability = Arc::new(ScriptedCapability::new(Reply::confident("done", 0.9)));
    let pipeline = pipeline_with(
        test_config(),
        capability.clone(),
        vec![profile("API_DESIGNER", "1.0.0", "api")],
    )
    .await;

    let outcome = pipeline.submit(Task::with_id("t1", "paint the fence")).await.unwrap();
    let record = outcome.escalation().expect("escalated");
    assert_eq!(record.reason, EscalationReason::NoMatchingProfile);
    assert_eq!(record.response, EscalationResponse::Abandon);
    assert!(record.original_result.is_none());
    assert!(capability.calls().is_empty());
    assert_eq!(pipeline.audit().escalations().len(), 1);
}

#[tokio::test]
async fn test_confidence_bands_decide_outcome() {
    let mut cfg = test_config();
    cfg.router.retry_on_low_confidence = false;

    for (confidence, completed, usable) in [(0.9, true, true), (0.6, false, true), (0.3, false, false)] {
        let capability = Arc::new(ScriptedCapability::new(Reply::confident("answer", confidence)));
        let pipeline = pipeline_with(cfg.clone(), capability, standard_profiles()).await;
        let outcome = pipeline
            .submit(Task::with_id("t", "Design a REST API"))
            .await
            .unwrap();

        assert_eq!(outcome.is_completed(), completed, "confidence {confidence}");
        if let TaskOutcome::Escalated(record) = outcome {
            assert_eq!(record.reason, EscalationReason::LowConfidence);
            assert_eq!(record.response, EscalationResponse::SurfaceToHuman);
            assert_eq!(record.output_usable, usable);
            let original = record.original_result.unwrap();
            assert_eq!(original.status, ResultStatus::Escalated);
            assert_eq!(original.output, "answer");
        }
    }
}

#[tokio::test]
async fn test_low_confidence_retries_alternate() {
    let capability = Arc::new(
        ScriptedCapability::new(Reply::confident("generic answer", 0.95))
            .reply("API_DESIGNER", Reply::confident("weak", 0.2)),
    );
    let pipeline = standard(capability.clone()).await;

    let outcome = pipeline.submit(Task::with_id("t", "Design a REST API")).await.unwrap();
    let result = outcome.result().expect("completed on retry");
    assert_eq!(result.rep_used, key("GENERIC", "1.0.0"));
    assert_eq!(result.attempt, 2);
    assert_eq!(capability.profiles_called(), vec!["API_DESIGNER", "GENERIC"]);
}

#[tokio::test]
async fn test_failed_attempt_retried_and_both_audited() {
    let capability = Arc::new(
        ScriptedCapability::new(Reply::confident("recovered", 0.9))
            .reply("API_DESIGNER", Reply::Fail("backend unreachable".into())),
    );
    let pipeline = standard(capability.clone()).await;

    let outcome = pipeline.submit(Task::with_id("t", "Design a REST API")).await.unwrap();
    assert_eq!(outcome.result().unwrap().rep_used, key("GENERIC", "1.0.0"));

    let results = pipeline.audit().results_for("t");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].status, ResultStatus::Failed);
    assert_eq!(results[0].failure, Some(FailureKind::ExecutionError));
    assert_eq!(results[0].confidence_source, ConfidenceSource::NotEvaluated);
    assert!(results[0].error.as_deref().unwrap().contains("backend unreachable"));
    assert_eq!(results[1].status, ResultStatus::Completed);

    let escalations = pipeline.audit().escalations();
    assert_eq!(escalations.len(), 1);
    assert_eq!(
        escalations[0].response,
        EscalationResponse::RetryWithProfile(key("GENERIC", "1.0.0"))
    );
}

#[tokio::test]
async fn test_timeout_fails_and_wipes_context() {
    let mut cfg = test_config();
    cfg.router.max_attempts = 1;
    let capability = Arc::new(ScriptedCapability::new(Reply::Hang));
    let pipeline = pipeline_with(cfg, capability, standard_profiles()).await;

    let task = Task::with_id("t", "Design a REST API").timeout_ms(50);
    let outcome = pipeline.submit(task).await.unwrap();
    let record = outcome.escalation().expect("escalated");
    assert_eq!(record.reason, EscalationReason::Timeout);
    assert_eq!(record.response, EscalationResponse::SurfaceToHuman);
    assert!(!record.output_usable);

    let result = record.original_result.as_ref().unwrap();
    assert_eq!(result.status, ResultStatus::Failed);
    assert_eq!(result.failure, Some(FailureKind::Timeout));
    assert!(result.output.is_empty());
    assert!(result.context.as_ref().unwrap().wiped_at.is_some());
    assert_eq!(pipeline.live_contexts(), 0);
}

#[tokio::test]
async fn test_panicking_capability_becomes_failed_result() {
    let mut cfg = test_config();
    cfg.router.max_attempts = 1;
    let capability = Arc::new(ScriptedCapability::new(Reply::Panic));
    let pipeline = pipeline_with(cfg, capability, standard_profiles()).await;

    let outcome = pipeline.submit(Task::with_id("t", "Design a REST API")).await.unwrap();
    let record = outcome.escalation().unwrap();
    assert_eq!(record.reason, EscalationReason::ExecutionError);
    let error = record.original_result.as_ref().unwrap().error.clone().unwrap();
    assert!(error.contains("capability panicked"), "{error}");
    assert_eq!(pipeline.live_contexts(), 0);
}

#[tokio::test]
async fn test_cancelled_submit_still_wipes() {
    let capability = Arc::new(ScriptedCapability::new(Reply::Hang));
    let pipeline = standard(capability.clone()).await;

    let submit = pipeline.submit(Task::with_id("t", "Design a REST API"));
    let cancelled = tokio::time::timeout(Duration::from_millis(50), submit).await;
    assert!(cancelled.is_err());
    assert_eq!(capability.calls().len(), 1);
    assert_eq!(pipeline.live_contexts(), 0);
}

#[tokio::test]
async fn test_cancel_while_queued_still_wipes() {
    let mut cfg = test_config();
    cfg.executor.max_concurrency = 1;
    let capability = Arc::new(ScriptedCapability::new(Reply::Hang));
    let pipeline = pipeline_with(cfg, capability.clone(), standard_profiles()).await;

    let running = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.submit(Task::with_id("a", "Design a REST API")).await })
    };
    wait_until(|| capability.calls().len() == 1).await;

    // b is injected, then waits for the only slot until its caller gives up
    let queued = pipeline.submit(Task::with_id("b", "Design a REST API"));
    assert!(tokio::time::timeout(Duration::from_millis(50), queued).await.is_err());
    assert_eq!(capability.calls().len(), 1);
    assert_eq!(pipeline.live_contexts(), 1);

    running.abort();
    let _ = running.await;
    assert_eq!(pipeline.live_contexts(), 0);
}

#[tokio::test]
async fn test_unexecuted_plan_releases_its_context() {
    let capability = Arc::new(ScriptedCapability::new(Reply::confident("ok", 0.9)));
    let pipeline = standard(capability.clone()).await;

    let task = Task::with_id("t", "Design a REST API");
    let profile = pipeline.router().select_profile(&task).await.unwrap();
    let plan = pipeline.router().route_execution(&task, profile).await.unwrap();
    assert_eq!(pipeline.live_contexts(), 1);

    drop(plan);
    assert_eq!(pipeline.live_contexts(), 0);
    assert!(capability.calls().is_empty());
}

#[tokio::test]
async fn test_queued_submissions_run_in_arrival_order() {
    let mut cfg = test_config();
    cfg.executor.max_concurrency = 1;
    let capability = Arc::new(
        ScriptedCapability::new(Reply::confident("ok", 0.9)).with_delay(Duration::from_millis(100)),
    );
    let pipeline = pipeline_with(cfg, capability.clone(), standard_profiles()).await;
    let pool = pipeline.router().pool().clone();

    let mut handles = Vec::new();
    for i in 0..4usize {
        let submitter = pipeline.clone();
        handles.push(tokio::spawn(async move {
            submitter.submit(Task::with_id(format!("t{i}"), "Design a REST API")).await
        }));
        if i == 0 {
            wait_until(|| capability.calls().len() == 1).await;
        } else {
            wait_until(|| pool.queued() == i).await;
        }
    }

    for handle in handles {
        assert!(handle.await.unwrap().unwrap().is_completed());
    }
    let order: Vec<_> = capability.calls().into_iter().map(|c| c.task_id).collect();
    assert_eq!(order, vec!["t0", "t1", "t2", "t3"]);
    assert_eq!(capability.max_in_flight(), 1);
    assert_eq!(pool.in_flight(), 0);
    assert_eq!(pipeline.live_contexts(), 0);
}

#[tokio::test]
async fn test_lineage_constraints_reach_capability() {
    let capability = Arc::new(ScriptedCapability::new(Reply::confident("ok", 0.9)));
    let pipeline = pipeline_with(
        test_config(),
        capability.clone(),
        vec![
            profile("PLATFORM", "1.0.0", "platform"),
            child_of("API_DESIGNER", "1.0.0", "api", "PLATFORM"),
        ],
    )
    .await;

    pipeline.submit(Task::with_id("t", "Design a REST API")).await.unwrap();
    let calls = capability.calls();
    assert_eq!(calls[0].profile, "API_DESIGNER@1.0.0");
    assert_eq!(
        calls[0].constraints,
        vec!["PLATFORM stays in scope", "API_DESIGNER stays in scope"]
    );
    assert!(!calls[0].session_id.is_empty());
}

#[tokio::test]
async fn test_numbered_steps_run_in_dependency_order() {
    let capability = Arc::new(
        ScriptedCapability::new(Reply::confident("generic-out", 0.85))
            .reply("API_DESIGNER", Reply::confident("api-out", 0.9))
            .reply("BACKEND_DEV", Reply::confident("backend-out", 0.95)),
    );
    let pipeline = standard(capability.clone()).await;

    let task = Task::with_id(
        "p",
        "1. design the api schema\n2. implement the backend handlers\n3. write docs",
    );
    let outcome = pipeline.submit(task).await.unwrap();

    assert_eq!(capability.profiles_called(), vec!["API_DESIGNER", "BACKEND_DEV", "GENERIC"]);
    let calls = capability.calls();
    assert_eq!(calls[0].task_id, "p.1");
    assert!(!calls[0].task_description.contains("=== Dependency Outputs ==="));
    assert!(calls[1].task_description.contains("# Task: p.1"));
    assert!(calls[1].task_description.contains("api-out"));
    assert!(calls[1].task_description.ends_with("implement the backend handlers"));

    let result = outcome.result().expect("composite completed");
    assert_eq!(result.task_id, "p");
    assert_eq!(result.output, "api-out\n\nbackend-out\n\ngeneric-out");
    assert_eq!(result.confidence, 0.85);
    assert_eq!(result.rep_used, key("GENERIC", "1.0.0"));
}

#[tokio::test]
async fn test_escalated_dependency_stops_later_stages() {
    let mut cfg = test_config();
    cfg.router.max_attempts = 1;
    let capability = Arc::new(
        ScriptedCapability::new(Reply::confident("ok", 0.9))
            .reply("API_DESIGNER", Reply::Fail("no schema".into())),
    );
    let pipeline = pipeline_with(cfg, capability.clone(), standard_profiles()).await;

    let outcome = pipeline
        .submit(Task::with_id("p", "1. design the api schema\n2. implement the backend handlers"))
        .await
        .unwrap();

    assert_eq!(capability.profiles_called(), vec!["API_DESIGNER"]);
    let record = outcome.escalation().expect("parent escalated");
    assert_eq!(record.task_id, "p");
    assert_eq!(record.reason, EscalationReason::ExecutionError);
    assert!(record.detail.as_deref().unwrap().starts_with("sub-task p.1 escalated"));

    let ids: Vec<_> = pipeline
        .audit()
        .escalations()
        .into_iter()
        .map(|e| e.task_id)
        .collect();
    assert_eq!(ids, vec!["p.1", "p"]);
}

#[tokio::test]
async fn test_events_follow_task_lifecycle() {
    let capability = Arc::new(ScriptedCapability::new(Reply::confident("ok", 0.9)));
    let pipeline = standard(capability).await;
    let mut rx = pipeline.subscribe();

    pipeline.submit(Task::with_id("t", "Design a REST API")).await.unwrap();

    let routed = rx.recv().await.unwrap();
    let PipelineEvent::TaskRouted { session_id, attempt, .. } = routed else {
        panic!("expected TaskRouted, got {routed:?}");
    };
    assert_eq!(attempt, 1);
    match rx.recv().await.unwrap() {
        PipelineEvent::ContextWiped { session_id: wiped, task_id, .. } => {
            assert_eq!(wiped, session_id);
            assert_eq!(task_id, "t");
        }
        other => panic!("expected ContextWiped, got {other:?}"),
    }
    assert!(matches!(rx.recv().await.unwrap(), PipelineEvent::TaskCompleted { .. }));
}

struct SilentPolicy;

impl EscalationPolicy for SilentPolicy {
    fn name(&self) -> &str {
        "silent"
    }

    fn respond(&self, _ctx: &EscalationContext<'_>) -> Option<EscalationResponse> {
        None
    }
}

#[tokio::test]
async fn test_unanswered_escalation_is_abandoned() {
    let capability = Arc::new(ScriptedCapability::new(Reply::confident("meh", 0.6)));
    let pipeline = Pipeline::builder(test_config())
        .capability(capability)
        .policy(Arc::new(SilentPolicy))
        .build()
        .unwrap();
    for p in standard_profiles() {
        pipeline.store_profile(p).await.unwrap();
    }

    let outcome = pipeline.submit(Task::with_id("t", "Design a REST API")).await.unwrap();
    let record = outcome.escalation().unwrap();
    assert_eq!(record.response, EscalationResponse::Abandon);
    assert!(record.detail.as_deref().unwrap().contains("produced no response"));
}

#[tokio::test]
async fn test_profile_surface() {
    let capability = Arc::new(ScriptedCapability::new(Reply::confident("ok", 0.9)));
    let pipeline = standard(capability).await;
    let mut rx = pipeline.subscribe();

    let stored = pipeline
        .store_profile(profile("API_DESIGNER", "1.1.0", "api"))
        .await
        .unwrap();
    assert!(stored.became_latest);
    assert!(matches!(
        rx.recv().await.unwrap(),
        PipelineEvent::ProfileStored { became_latest: true, .. }
    ));

    let latest = pipeline.get_profile("API_DESIGNER", None).await.unwrap();
    assert_eq!(latest.version.to_string(), "1.1.0");
    let pinned = pipeline
        .get_profile("API_DESIGNER", Some(&"1.0.0".parse().unwrap()))
        .await
        .unwrap();
    assert_eq!(pinned.version.to_string(), "1.0.0");

    let conflict = pipeline
        .store_profile(profile("API_DESIGNER", "1.1.0", "api"))
        .await
        .unwrap_err();
    assert!(matches!(conflict, mare_core::api::RepositoryError::Conflict(_)));

    let names: Vec<_> = pipeline
        .list_profiles(Default::default())
        .collect()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.key().to_string())
        .collect();
    assert_eq!(names, vec!["API_DESIGNER@1.1.0", "BACKEND_DEV@1.0.0", "GENERIC@1.0.0"]);
}
