use std::sync::Arc;
use std::time::Duration;

use crate::injector::ExecutionContext;
use crate::profile::{ProfileKey, RoleProfile};
use crate::task::Task;

use super::scoring::MatchScore;

/// A task bound to a profile and a freshly injected context. Nothing has
/// run yet; the plan is consumed by exactly one execution.
#[derive(Debug)]
pub struct ExecutionPlan {
    pub task: Task,
    pub profile: Arc<RoleProfile>,
    /// Composition chain the context was built from, root base first.
    pub lineage: Vec<ProfileKey>,
    pub context: ExecutionContext,
    pub score: MatchScore,
    pub attempt: u32,
    pub timeout: Duration,
}

impl ExecutionPlan {
    pub fn profile_key(&self) -> ProfileKey {
        self.profile.key()
    }

    pub fn session_id(&self) -> &str {
        self.context.session_id()
    }
}
