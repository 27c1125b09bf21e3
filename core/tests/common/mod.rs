#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mare_core::api::{
    AppConfig, CapabilityRequest, CapabilityResponse, ConfidenceThresholds, ExecutionCapability,
    Pipeline, ProfileRef, RoleProfile,
};

#[derive(Debug, Clone)]
pub enum Reply {
    Output(String, Option<f64>),
    Fail(String),
    Hang,
    Panic,
}

impl Reply {
    pub fn confident(output: &str, confidence: f64) -> Self {
        Reply::Output(output.to_string(), Some(confidence))
    }
}

/// Answers by profile name and records every request it sees.
pub struct ScriptedCapability {
    replies: Mutex<HashMap<String, Reply>>,
    fallback: Reply,
    delay: Duration,
    calls: Mutex<Vec<CapabilityRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedCapability {
    pub fn new(fallback: Reply) -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            fallback,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn reply(self, profile: &str, reply: Reply) -> Self {
        self.replies.lock().unwrap().insert(profile.to_string(), reply);
        self
    }

    pub fn calls(&self) -> Vec<CapabilityRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn profiles_called(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|c| profile_name(&c.profile).to_string())
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn profile_name(key: &str) -> &str {
    key.split('@').next().unwrap_or(key)
}

#[async_trait]
impl ExecutionCapability for ScriptedCapability {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run(&self, request: CapabilityRequest) -> anyhow::Result<CapabilityResponse> {
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get(profile_name(&request.profile))
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());
        self.calls.lock().unwrap().push(request);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match reply {
            Reply::Output(output, Some(c)) => Ok(CapabilityResponse::output(output).with_confidence(c)),
            Reply::Output(output, None) => Ok(CapabilityResponse::output(output)),
            Reply::Fail(err) => Err(anyhow::anyhow!(err)),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(CapabilityResponse::output("too late"))
            }
            Reply::Panic => panic!("scripted capability blew up"),
        }
    }
}

pub fn profile(name: &str, version: &str, archetype: &str) -> RoleProfile {
    RoleProfile {
        name: name.to_string(),
        version: version.parse().unwrap(),
        archetype: archetype.to_string(),
        instructions: format!("You are {name}."),
        tone_rules: vec!["concise".to_string()],
        constraints: vec![format!("{name} stays in scope")],
        preferred_backends: vec![],
        tool_permissions: [("filesystem".to_string(), BTreeSet::from(["read".to_string()]))]
            .into_iter()
            .collect(),
        confidence_thresholds: ConfidenceThresholds::default(),
        base: None,
        keywords: vec![],
        match_patterns: vec![],
    }
}

pub fn child_of(name: &str, version: &str, archetype: &str, base: &str) -> RoleProfile {
    let mut p = profile(name, version, archetype);
    p.base = Some(ProfileRef {
        name: base.to_string(),
        version: None,
    });
    p
}

pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.executor.max_concurrency = 4;
    cfg.executor.timeout_ms = 2_000;
    cfg
}

pub async fn pipeline_with(
    cfg: AppConfig,
    capability: Arc<ScriptedCapability>,
    profiles: Vec<RoleProfile>,
) -> Pipeline {
    let pipeline = Pipeline::builder(cfg).capability(capability).build().unwrap();
    for p in profiles {
        pipeline.store_profile(p).await.unwrap();
    }
    pipeline
}

pub fn standard_profiles() -> Vec<RoleProfile> {
    vec![
        profile("GENERIC", "1.0.0", "generic"),
        profile("API_DESIGNER", "1.0.0", "api"),
        profile("BACKEND_DEV", "1.0.0", "backend"),
    ]
}
