use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::injector::{ContextPayload, ExecutionContext};
use crate::task::Task;

/// Input handed to the external capability for one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRequest {
    pub session_id: String,
    pub task_id: String,
    pub profile: String,
    pub instructions: String,
    #[serde(default)]
    pub tone_rules: Vec<String>,
    pub constraints: Vec<String>,
    pub tool_permissions: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub preferred_backends: Vec<String>,
    pub task_description: String,
}

impl CapabilityRequest {
    pub fn new(context: &ExecutionContext, payload: &ContextPayload, task: &Task) -> Self {
        Self {
            session_id: context.session_id().to_string(),
            task_id: task.id.clone(),
            profile: payload.profile.to_string(),
            instructions: payload.instructions.clone(),
            tone_rules: payload.tone_rules.clone(),
            constraints: payload.constraints.clone(),
            tool_permissions: payload.permissions.as_map().clone(),
            preferred_backends: payload.preferred_backends.clone(),
            task_description: task.description.clone(),
        }
    }
}

/// What the capability reports back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityResponse {
    #[serde(default)]
    pub output: String,
    /// Self-reported confidence; clamped to `[0, 1]` by the evaluator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CapabilityResponse {
    pub fn output(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Self::default()
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// A reported error, if it carries any text.
    pub fn error_text(&self) -> Option<&str> {
        self.error.as_deref().map(str::trim).filter(|e| !e.is_empty())
    }
}

/// The external substrate that actually performs a task.
///
/// Treated as opaque, slow and fallible. Errors returned here never escape
/// the execution agent; they become failed results.
#[async_trait]
pub trait ExecutionCapability: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, request: CapabilityRequest) -> anyhow::Result<CapabilityResponse>;
}
