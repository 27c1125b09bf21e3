use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use super::permissions::PermissionSet;
use crate::profile::{ConfidenceThresholds, ProfileKey};
use crate::task::ContextTrace;

/// Fresh, not yet injected context for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawContext {
    pub session_id: String,
    pub task_id: String,
}

impl RawContext {
    /// New context for `task_id` with a random session id.
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.into(),
        }
    }

    pub fn with_session_id(task_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            task_id: task_id.into(),
        }
    }
}

/// Profile-derived state held in the injector's arena for one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextPayload {
    pub profile: ProfileKey,
    /// Composition chain, root base first.
    pub lineage: Vec<ProfileKey>,
    pub instructions: String,
    pub tone_rules: Vec<String>,
    pub constraints: Vec<String>,
    pub permissions: PermissionSet,
    pub confidence_thresholds: ConfidenceThresholds,
    pub preferred_backends: Vec<String>,
}

pub(crate) type SessionArena = Mutex<HashMap<String, Arc<ContextPayload>>>;

/// Handle to one injected session.
///
/// Single use and not `Clone`: the agent owns it for the length of one
/// execution. The profile-derived state lives in the injector's arena and
/// is gone once the context is wiped. A handle dropped before its wipe
/// (an unexecuted plan, a cancelled caller) discards its arena entry.
#[derive(Debug)]
pub struct ExecutionContext {
    session_id: String,
    task_id: String,
    profile: ProfileKey,
    created_at: DateTime<Utc>,
    wiped_at: Option<DateTime<Utc>>,
    arena: Weak<SessionArena>,
}

impl ExecutionContext {
    pub(crate) fn new(raw: RawContext, profile: ProfileKey, arena: Weak<SessionArena>) -> Self {
        Self {
            session_id: raw.session_id,
            task_id: raw.task_id,
            profile,
            created_at: Utc::now(),
            wiped_at: None,
            arena,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn profile(&self) -> &ProfileKey {
        &self.profile
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn wiped_at(&self) -> Option<DateTime<Utc>> {
        self.wiped_at
    }

    pub fn is_wiped(&self) -> bool {
        self.wiped_at.is_some()
    }

    pub(crate) fn mark_wiped(&mut self) -> bool {
        if self.wiped_at.is_some() {
            return false;
        }
        self.wiped_at = Some(Utc::now());
        true
    }

    pub fn trace(&self) -> ContextTrace {
        ContextTrace {
            session_id: self.session_id.clone(),
            created_at: self.created_at,
            wiped_at: self.wiped_at,
        }
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        // a wiped handle no longer owns its session id, which may be live again
        if self.wiped_at.is_some() {
            return;
        }
        let Some(arena) = self.arena.upgrade() else {
            return;
        };
        let removed = arena
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.session_id)
            .is_some();
        if removed {
            warn!(
                session_id = %self.session_id,
                task_id = %self.task_id,
                "context dropped before wipe, discarded"
            );
        }
    }
}
