use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::types::{ProfileKey, RoleProfile};
use super::version::ProfileVersion;

/// Result of a create-exclusive insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A profile with the same `name@version` was already present; nothing was written.
    Exists,
}

/// Persistence seam for role profiles.
///
/// Profiles are keyed by `name@version` and each name has a separate latest
/// index. Implementations only need point lookups; caching, validation and
/// write serialization live in [`super::ProfileRepository`].
#[async_trait]
pub trait ProfileStore: Send + Sync {
    fn name(&self) -> &str;

    async fn load(&self, key: &ProfileKey) -> anyhow::Result<Option<RoleProfile>>;

    async fn latest(&self, name: &str) -> anyhow::Result<Option<ProfileVersion>>;

    /// Writes the profile only if its key is not already present.
    async fn insert(&self, profile: &RoleProfile) -> anyhow::Result<InsertOutcome>;

    /// Sets the latest index of `name` to `next` only if it currently equals
    /// `expected`. Returns whether the swap happened.
    async fn swap_latest(
        &self,
        name: &str,
        expected: Option<&ProfileVersion>,
        next: &ProfileVersion,
    ) -> anyhow::Result<bool>;

    /// Every stored profile name, in any order.
    async fn names(&self) -> anyhow::Result<Vec<String>>;

    /// Every stored version of `name`, in any order.
    async fn versions(&self, name: &str) -> anyhow::Result<Vec<ProfileVersion>>;
}

#[derive(Default)]
struct MemoryState {
    profiles: HashMap<String, BTreeMap<ProfileVersion, RoleProfile>>,
    latest: HashMap<String, ProfileVersion>,
}

/// In-process store, used for tests and ephemeral pipelines.
#[derive(Clone, Default)]
pub struct MemoryProfileStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self, key: &ProfileKey) -> anyhow::Result<Option<RoleProfile>> {
        Ok(self
            .read()
            .profiles
            .get(&key.name)
            .and_then(|versions| versions.get(&key.version))
            .cloned())
    }

    async fn latest(&self, name: &str) -> anyhow::Result<Option<ProfileVersion>> {
        Ok(self.read().latest.get(name).cloned())
    }

    async fn insert(&self, profile: &RoleProfile) -> anyhow::Result<InsertOutcome> {
        let mut state = self.write();
        let versions = state.profiles.entry(profile.name.clone()).or_default();
        if versions.contains_key(&profile.version) {
            return Ok(InsertOutcome::Exists);
        }
        versions.insert(profile.version.clone(), profile.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn swap_latest(
        &self,
        name: &str,
        expected: Option<&ProfileVersion>,
        next: &ProfileVersion,
    ) -> anyhow::Result<bool> {
        let mut state = self.write();
        if state.latest.get(name) != expected {
            return Ok(false);
        }
        state.latest.insert(name.to_string(), next.clone());
        Ok(true)
    }

    async fn names(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.read().profiles.keys().cloned().collect())
    }

    async fn versions(&self, name: &str) -> anyhow::Result<Vec<ProfileVersion>> {
        Ok(self
            .read()
            .profiles
            .get(name)
            .map(|v| v.keys().cloned().collect())
            .unwrap_or_default())
    }
}
