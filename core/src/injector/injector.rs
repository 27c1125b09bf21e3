use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::context::{ContextPayload, ExecutionContext, RawContext, SessionArena};
use super::permissions::PermissionSet;
use crate::error::InjectionError;
use crate::profile::ProfileLineage;

/// Builds isolated execution contexts and tears them down.
///
/// Every live session has exactly one arena entry holding its
/// profile-derived state. Wiping destroys the entry; nothing is mutated in
/// place, so no state of one role embodiment is reachable from the next.
#[derive(Debug, Default)]
pub struct ContextInjector {
    arena: Arc<SessionArena>,
}

impl ContextInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a resolved profile lineage to a fresh context.
    ///
    /// Constraints are the lineage's lists concatenated root first, with
    /// blanks and repeats dropped. Permission groups of a later profile
    /// replace the same group of its base.
    #[tracing::instrument(
        level = "debug",
        skip(self, raw, lineage),
        fields(session_id = %raw.session_id, task_id = %raw.task_id, profile = %lineage.profile().key())
    )]
    pub fn inject(
        &self,
        raw: RawContext,
        lineage: &ProfileLineage,
    ) -> Result<ExecutionContext, InjectionError> {
        let profile = lineage.profile();

        let mut constraints: Vec<String> = Vec::new();
        for layer in lineage.chain() {
            for c in &layer.constraints {
                let c = c.trim();
                if !c.is_empty() && !constraints.iter().any(|existing| existing == c) {
                    constraints.push(c.to_string());
                }
            }
        }

        let permissions = PermissionSet::merged(lineage.chain().iter().map(|p| &p.tool_permissions));

        let payload = ContextPayload {
            profile: profile.key(),
            lineage: lineage.keys(),
            instructions: profile.instructions.clone(),
            tone_rules: profile.tone_rules.clone(),
            constraints,
            permissions,
            confidence_thresholds: profile.confidence_thresholds,
            preferred_backends: profile.preferred_backends.clone(),
        };

        {
            let mut arena = self.lock_arena();
            if arena.contains_key(&raw.session_id) {
                return Err(InjectionError::SessionInUse(raw.session_id));
            }
            arena.insert(raw.session_id.clone(), Arc::new(payload));
        }

        debug!(session_id = %raw.session_id, "context injected");
        Ok(ExecutionContext::new(raw, profile.key(), Arc::downgrade(&self.arena)))
    }

    /// The profile-derived state of a live context, after structural checks.
    pub fn payload(&self, context: &ExecutionContext) -> Result<Arc<ContextPayload>, InjectionError> {
        if context.is_wiped() {
            return Err(InjectionError::ContextWiped(context.session_id().to_string()));
        }
        let payload = self
            .lock_arena()
            .get(context.session_id())
            .cloned()
            .ok_or_else(|| InjectionError::UnknownSession(context.session_id().to_string()))?;

        let structural = |reason: &str| Err(InjectionError::Structural(reason.to_string()));
        if &payload.profile != context.profile() {
            return structural("profile reference does not match the session");
        }
        if payload.lineage.last() != Some(&payload.profile) {
            return structural("lineage does not end at the injected profile");
        }
        if payload.instructions.trim().is_empty() {
            return structural("instructions are empty");
        }
        if payload.constraints.is_empty() {
            return structural("constraint list is empty");
        }
        if payload.permissions.is_empty() {
            return structural("permission set is empty");
        }
        if !payload.confidence_thresholds.is_ordered() {
            return structural("confidence thresholds are out of order");
        }
        Ok(payload)
    }

    /// Pre-execution gate.
    pub fn validate_injection(&self, context: &ExecutionContext) -> bool {
        match self.payload(context) {
            Ok(_) => true,
            Err(e) => {
                warn!(session_id = %context.session_id(), error = %e, "injection rejected");
                false
            }
        }
    }

    /// Destroys the session's state and stamps the wipe time. A second call
    /// is a no-op; returns whether this call did the wipe.
    pub fn wipe(&self, context: &mut ExecutionContext) -> bool {
        let removed = self.discard(context.session_id());
        let stamped = context.mark_wiped();
        if stamped {
            info!(
                target: "mare.flow",
                session_id = %context.session_id(),
                task_id = %context.task_id(),
                "context wiped"
            );
        }
        removed || stamped
    }

    fn discard(&self, session_id: &str) -> bool {
        self.lock_arena().remove(session_id).is_some()
    }

    pub fn live_contexts(&self) -> usize {
        self.lock_arena().len()
    }

    fn lock_arena(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<ContextPayload>>> {
        self.arena.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{ConfidenceThresholds, ProfileRef, RoleProfile};
    use pretty_assertions::assert_eq;
    use std::collections::{BTreeMap, BTreeSet};

    fn profile(name: &str, constraints: &[&str], perms: &[(&str, &[&str])]) -> Arc<RoleProfile> {
        let tool_permissions: BTreeMap<String, BTreeSet<String>> = perms
            .iter()
            .map(|(g, t)| (g.to_string(), t.iter().map(|s| s.to_string()).collect()))
            .collect();
        Arc::new(RoleProfile {
            name: name.into(),
            version: "1.0.0".parse().unwrap(),
            archetype: "generic".into(),
            instructions: format!("Act as {name}."),
            tone_rules: vec![],
            constraints: constraints.iter().map(|s| s.to_string()).collect(),
            preferred_backends: vec![],
            tool_permissions,
            confidence_thresholds: ConfidenceThresholds::default(),
            base: None,
            keywords: vec![],
            match_patterns: vec![],
        })
    }

    fn composed() -> ProfileLineage {
        let base = profile(
            "GENERIC",
            &["Be precise", "Cite sources"],
            &[("filesystem", &["read", "write"]), ("git", &["status"])],
        );
        let mut child = (*profile(
            "API_DESIGNER",
            &["Use REST conventions", "Be precise"],
            &[("filesystem", &["read"])],
        ))
        .clone();
        child.base = Some(ProfileRef {
            name: "GENERIC".into(),
            version: None,
        });
        ProfileLineage::from_chain(vec![base, Arc::new(child)]).unwrap()
    }

    #[test]
    fn test_inject_merges_lineage() {
        let injector = ContextInjector::new();
        let ctx = injector.inject(RawContext::new("t1"), &composed()).unwrap();
        let payload = injector.payload(&ctx).unwrap();

        assert_eq!(
            payload.constraints,
            vec!["Be precise", "Cite sources", "Use REST conventions"]
        );
        assert!(payload.permissions.allows("filesystem", "read"));
        assert!(!payload.permissions.allows("filesystem", "write"));
        assert!(payload.permissions.allows("git", "status"));
        assert_eq!(payload.profile.name, "API_DESIGNER");
        assert!(injector.validate_injection(&ctx));
    }

    #[test]
    fn test_inject_is_deterministic() {
        let injector = ContextInjector::new();
        let lineage = composed();
        let a = injector.inject(RawContext::new("t1"), &lineage).unwrap();
        let b = injector.inject(RawContext::new("t1"), &lineage).unwrap();
        assert_ne!(a.session_id(), b.session_id());
        assert_eq!(*injector.payload(&a).unwrap(), *injector.payload(&b).unwrap());
    }

    #[test]
    fn test_wipe_is_idempotent_and_final() {
        let injector = ContextInjector::new();
        let mut ctx = injector.inject(RawContext::new("t1"), &composed()).unwrap();
        assert_eq!(injector.live_contexts(), 1);

        assert!(injector.wipe(&mut ctx));
        let wiped_at = ctx.wiped_at();
        assert!(wiped_at.is_some());
        assert!(!injector.wipe(&mut ctx));
        assert_eq!(ctx.wiped_at(), wiped_at);

        assert_eq!(injector.live_contexts(), 0);
        assert!(!injector.validate_injection(&ctx));
        assert!(matches!(
            injector.payload(&ctx),
            Err(InjectionError::ContextWiped(_))
        ));
    }

    #[test]
    fn test_session_id_reuse_while_live() {
        let injector = ContextInjector::new();
        let lineage = composed();
        let mut ctx = injector
            .inject(RawContext::with_session_id("t1", "s-1"), &lineage)
            .unwrap();
        let err = injector
            .inject(RawContext::with_session_id("t2", "s-1"), &lineage)
            .unwrap_err();
        assert_eq!(err, InjectionError::SessionInUse("s-1".into()));
        injector.wipe(&mut ctx);
    }

    #[test]
    fn test_dropped_handle_discards_unwiped_session() {
        let injector = ContextInjector::new();
        let lineage = composed();
        let ctx = injector
            .inject(RawContext::with_session_id("t1", "s-1"), &lineage)
            .unwrap();
        assert_eq!(injector.live_contexts(), 1);
        drop(ctx);
        assert_eq!(injector.live_contexts(), 0);

        // an old, wiped handle must not tear down the session's next use
        let mut first = injector
            .inject(RawContext::with_session_id("t1", "s-2"), &lineage)
            .unwrap();
        injector.wipe(&mut first);
        let second = injector
            .inject(RawContext::with_session_id("t2", "s-2"), &lineage)
            .unwrap();
        drop(first);
        assert_eq!(injector.live_contexts(), 1);
        assert!(injector.validate_injection(&second));
    }

    #[test]
    fn test_structural_gate_rejects_empty_contract() {
        let injector = ContextInjector::new();
        let bare = ProfileLineage::single(profile("BARE", &[], &[("web", &["fetch"])]));
        let ctx = injector.inject(RawContext::new("t1"), &bare).unwrap();
        assert!(matches!(
            injector.payload(&ctx),
            Err(InjectionError::Structural(_))
        ));
        assert!(!injector.validate_injection(&ctx));
    }
}
