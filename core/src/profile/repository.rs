use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tracing::{debug, info, warn};

use super::listing::ProfileListing;
use super::store::{InsertOutcome, ProfileStore};
use super::types::{ProfileFilter, ProfileKey, RoleProfile, StorageResult};
use super::validation::{ProfileValidator, ValidationResult};
use super::version::{ProfileVersion, VersionSelector};
use crate::error::RepositoryError;

const DEFAULT_CACHE_CAPACITY: usize = 256;
const DEFAULT_MAX_LINEAGE_DEPTH: usize = 8;
// Bounded so a misbehaving external writer cannot spin a store call forever.
const MAX_SWAP_ATTEMPTS: usize = 8;

type CacheKey = (String, VersionSelector);

#[derive(Clone)]
enum CacheEntry {
    Found(Arc<RoleProfile>),
    Missing,
}

/// LRU entries plus a per-name generation. A read only fills the cache when
/// the generation it observed before hitting the store is still current, so
/// a read racing a write can never re-insert stale data.
struct CacheState {
    entries: LruCache<CacheKey, CacheEntry>,
    generations: HashMap<String, u64>,
}

impl CacheState {
    fn generation(&self, name: &str) -> u64 {
        self.generations.get(name).copied().unwrap_or(0)
    }

    fn invalidate(&mut self, name: &str, version: &ProfileVersion) {
        *self.generations.entry(name.to_string()).or_insert(0) += 1;
        self.entries
            .pop(&(name.to_string(), VersionSelector::Latest));
        self.entries
            .pop(&(name.to_string(), VersionSelector::Exact(version.clone())));
    }
}

/// Resolved composition chain of a profile, root base first, the profile itself last.
#[derive(Debug, Clone)]
pub struct ProfileLineage {
    profiles: Vec<Arc<RoleProfile>>,
}

impl ProfileLineage {
    pub fn single(profile: Arc<RoleProfile>) -> Self {
        Self {
            profiles: vec![profile],
        }
    }

    /// Chain given root first. `None` when empty.
    pub fn from_chain(profiles: Vec<Arc<RoleProfile>>) -> Option<Self> {
        (!profiles.is_empty()).then_some(Self { profiles })
    }

    pub fn profile(&self) -> &RoleProfile {
        // never empty: built from at least the profile itself
        &self.profiles[self.profiles.len() - 1]
    }

    pub fn chain(&self) -> &[Arc<RoleProfile>] {
        &self.profiles
    }

    pub fn keys(&self) -> Vec<ProfileKey> {
        self.profiles.iter().map(|p| p.key()).collect()
    }
}

struct RepositoryInner {
    store: Arc<dyn ProfileStore>,
    validator: ProfileValidator,
    cache: Mutex<CacheState>,
    write_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    max_lineage_depth: usize,
}

/// Validated, cached access to role profiles.
///
/// Reads are served from an LRU keyed by `(name, selector)` with negative
/// entries. Writes are serialized per name and advance the latest pointer by
/// compare-and-swap against the store.
#[derive(Clone)]
pub struct ProfileRepository {
    inner: Arc<RepositoryInner>,
}

impl std::fmt::Debug for ProfileRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileRepository")
            .field("store", &self.inner.store.name())
            .field("max_lineage_depth", &self.inner.max_lineage_depth)
            .finish()
    }
}

pub struct ProfileRepositoryBuilder {
    store: Arc<dyn ProfileStore>,
    validator: ProfileValidator,
    cache_capacity: usize,
    max_lineage_depth: usize,
}

impl ProfileRepositoryBuilder {
    pub fn validator(mut self, validator: ProfileValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn max_lineage_depth(mut self, depth: usize) -> Self {
        self.max_lineage_depth = depth;
        self
    }

    pub fn build(self) -> ProfileRepository {
        let capacity = NonZeroUsize::new(self.cache_capacity).unwrap_or(NonZeroUsize::MIN);
        ProfileRepository {
            inner: Arc::new(RepositoryInner {
                store: self.store,
                validator: self.validator,
                cache: Mutex::new(CacheState {
                    entries: LruCache::new(capacity),
                    generations: HashMap::new(),
                }),
                write_locks: Mutex::new(HashMap::new()),
                max_lineage_depth: self.max_lineage_depth.max(1),
            }),
        }
    }
}

impl ProfileRepository {
    pub fn builder(store: Arc<dyn ProfileStore>) -> ProfileRepositoryBuilder {
        ProfileRepositoryBuilder {
            store,
            validator: ProfileValidator::new(crate::config::default_tool_groups()),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            max_lineage_depth: DEFAULT_MAX_LINEAGE_DEPTH,
        }
    }

    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self::builder(store).build()
    }

    pub fn store_name(&self) -> &str {
        self.inner.store.name()
    }

    pub fn validator(&self) -> &ProfileValidator {
        &self.inner.validator
    }

    /// Looks up a profile, resolving [`VersionSelector::Latest`] to the
    /// name's latest index entry.
    #[tracing::instrument(level = "debug", skip(self), fields(store = self.store_name()))]
    pub async fn get(
        &self,
        name: &str,
        selector: &VersionSelector,
    ) -> Result<Arc<RoleProfile>, RepositoryError> {
        let cache_key = (name.to_string(), selector.clone());
        let generation = {
            let mut cache = self.lock_cache();
            match cache.entries.get(&cache_key) {
                Some(CacheEntry::Found(p)) => return Ok(p.clone()),
                Some(CacheEntry::Missing) => {
                    return Err(RepositoryError::not_found(name, selector))
                }
                None => cache.generation(name),
            }
        };

        let loaded = match selector {
            VersionSelector::Exact(version) => {
                self.load(&ProfileKey::new(name, version.clone())).await?
            }
            VersionSelector::Latest => match self.resolve_latest(name).await? {
                Some(version) => self.load(&ProfileKey::new(name, version)).await?,
                None => None,
            },
        };

        let entry = match &loaded {
            Some(p) => CacheEntry::Found(Arc::new(p.clone())),
            None => CacheEntry::Missing,
        };
        {
            let mut cache = self.lock_cache();
            if cache.generation(name) == generation {
                cache.entries.put(cache_key, entry.clone());
            }
        }

        match entry {
            CacheEntry::Found(p) => Ok(p),
            CacheEntry::Missing => Err(RepositoryError::not_found(name, selector)),
        }
    }

    pub async fn get_latest(&self, name: &str) -> Result<Arc<RoleProfile>, RepositoryError> {
        self.get(name, &VersionSelector::Latest).await
    }

    pub fn validate(&self, profile: &RoleProfile) -> ValidationResult {
        self.inner.validator.validate(profile)
    }

    /// Validated write path. Fails with `Validation` or `Conflict`; the latest
    /// pointer only moves if the new version is strictly greater.
    #[tracing::instrument(level = "debug", skip(self, profile), fields(profile = %profile.key()))]
    pub async fn store(&self, profile: RoleProfile) -> Result<StorageResult, RepositoryError> {
        let key = profile.key();
        let result = self.validate(&profile);
        if !result.is_valid() {
            return Err(RepositoryError::Validation {
                key,
                violations: result.violations,
            });
        }

        let lock = self.write_lock(&profile.name);
        let _guard = lock.lock().await;

        if let Some(base) = &profile.base {
            // The base must already exist; cycles through `latest` refs are
            // caught again at resolution time.
            let base_profile = self.get(&base.name, &base.selector()).await.map_err(|e| {
                if e.is_not_found() {
                    RepositoryError::InvalidLineage(format!(
                        "{key} references missing base {}@{}",
                        base.name,
                        base.selector()
                    ))
                } else {
                    e
                }
            })?;
            self.lineage_from(Arc::new(profile.clone()), Some(base_profile))
                .await?;
        }

        let outcome = self
            .inner
            .store
            .insert(&profile)
            .await
            .map_err(|e| self.unavailable(e))?;
        if outcome == InsertOutcome::Exists {
            return Err(RepositoryError::Conflict(key));
        }

        let mut previous = None;
        let mut became_latest = false;
        for _ in 0..MAX_SWAP_ATTEMPTS {
            let pointer = self
                .inner
                .store
                .latest(&profile.name)
                .await
                .map_err(|e| self.unavailable(e))?;
            // Without an index entry, compare against the other stored versions.
            let current = match &pointer {
                Some(v) => Some(v.clone()),
                None => self
                    .versions(&profile.name)
                    .await?
                    .into_iter()
                    .filter(|v| *v != profile.version)
                    .max(),
            };
            if current.as_ref().is_some_and(|c| *c >= profile.version) {
                previous = current;
                break;
            }
            let swapped = self
                .inner
                .store
                .swap_latest(&profile.name, pointer.as_ref(), &profile.version)
                .await
                .map_err(|e| self.unavailable(e))?;
            previous = current;
            if swapped {
                became_latest = true;
                break;
            }
            debug!(profile = %key, "latest pointer moved concurrently, retrying swap");
        }

        self.lock_cache().invalidate(&profile.name, &profile.version);

        info!(
            target: "mare.flow",
            profile = %key,
            became_latest,
            "profile stored"
        );
        Ok(StorageResult {
            key,
            became_latest,
            previous_latest: previous,
        })
    }

    /// Lazy, restartable listing of matching profiles.
    pub fn list(&self, filter: ProfileFilter) -> ProfileListing {
        ProfileListing::new(self.clone(), filter)
    }

    /// Resolves the composition chain of `profile`, root base first.
    pub async fn lineage(
        &self,
        profile: Arc<RoleProfile>,
    ) -> Result<ProfileLineage, RepositoryError> {
        self.lineage_from(profile, None).await
    }

    async fn lineage_from(
        &self,
        profile: Arc<RoleProfile>,
        first_base: Option<Arc<RoleProfile>>,
    ) -> Result<ProfileLineage, RepositoryError> {
        let mut chain = vec![profile.clone()];
        // A name may appear at most once in a lineage.
        let mut seen: HashSet<String> = HashSet::from([profile.name.clone()]);
        let mut prefetched = first_base;
        let mut current = profile;

        while let Some(base_ref) = current.base.clone() {
            if chain.len() > self.inner.max_lineage_depth {
                return Err(RepositoryError::InvalidLineage(format!(
                    "lineage of {} exceeds depth {}",
                    chain[0].key(),
                    self.inner.max_lineage_depth
                )));
            }
            if !seen.insert(base_ref.name.clone()) {
                return Err(RepositoryError::InvalidLineage(format!(
                    "cycle through '{}' in lineage of {}",
                    base_ref.name,
                    chain[0].key()
                )));
            }
            let base = match prefetched.take() {
                Some(p) => p,
                None => self
                    .get(&base_ref.name, &base_ref.selector())
                    .await
                    .map_err(|e| {
                        if e.is_not_found() {
                            RepositoryError::InvalidLineage(format!(
                                "base {}@{} of {} not found",
                                base_ref.name,
                                base_ref.selector(),
                                current.key()
                            ))
                        } else {
                            e
                        }
                    })?,
            };
            chain.push(base.clone());
            current = base;
        }

        chain.reverse();
        Ok(ProfileLineage { profiles: chain })
    }

    pub(crate) async fn names(&self) -> Result<Vec<String>, RepositoryError> {
        self.inner
            .store
            .names()
            .await
            .map_err(|e| self.unavailable(e))
    }

    pub(crate) async fn versions(&self, name: &str) -> Result<Vec<ProfileVersion>, RepositoryError> {
        self.inner
            .store
            .versions(name)
            .await
            .map_err(|e| self.unavailable(e))
    }

    async fn load(&self, key: &ProfileKey) -> Result<Option<RoleProfile>, RepositoryError> {
        self.inner
            .store
            .load(key)
            .await
            .map_err(|e| self.unavailable(e))
    }

    // Falls back to the highest stored version when the index entry is absent,
    // e.g. after an interrupted write.
    async fn resolve_latest(&self, name: &str) -> Result<Option<ProfileVersion>, RepositoryError> {
        let pointer = self
            .inner
            .store
            .latest(name)
            .await
            .map_err(|e| self.unavailable(e))?;
        if pointer.is_some() {
            return Ok(pointer);
        }
        let versions = self.versions(name).await?;
        if let Some(max) = versions.iter().max() {
            warn!(profile = name, version = %max, "latest index missing, using highest stored version");
        }
        Ok(versions.into_iter().max())
    }

    fn unavailable(&self, source: anyhow::Error) -> RepositoryError {
        RepositoryError::Unavailable {
            store: self.store_name().to_string(),
            source,
        }
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.inner.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .inner
            .write_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        locks.entry(name.to_string()).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{ConfidenceThresholds, MemoryProfileStore, ProfileRef};
    use async_trait::async_trait;
    use futures::TryStreamExt;
    use pretty_assertions::assert_eq;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn profile(name: &str, version: &str) -> RoleProfile {
        let mut perms = BTreeMap::new();
        perms.insert("filesystem".to_string(), BTreeSet::from(["read".to_string()]));
        RoleProfile {
            name: name.into(),
            version: version.parse().unwrap(),
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
        }
    }

    fn repo() -> ProfileRepository {
        ProfileRepository::new(Arc::new(MemoryProfileStore::new()))
    }

    fn exact(v: &str) -> VersionSelector {
        VersionSelector::Exact(v.parse().unwrap())
    }

    #[tokio::test]
    async fn test_store_then_get_returns_equal_profile() {
        let repo = repo();
        let p = profile("API_DESIGNER", "1.2.0");
        repo.store(p.clone()).await.unwrap();
        let got = repo.get("API_DESIGNER", &exact("1.2.0")).await.unwrap();
        assert_eq!(*got, p);
    }

    #[tokio::test]
    async fn test_latest_is_highest_regardless_of_store_order() {
        let repo = repo();
        let r2 = repo.store(profile("A", "2.0.0")).await.unwrap();
        assert!(r2.became_latest);
        let r1 = repo.store(profile("A", "1.0.0")).await.unwrap();
        assert!(!r1.became_latest);
        assert_eq!(r1.previous_latest, Some("2.0.0".parse().unwrap()));

        let latest = repo.get_latest("A").await.unwrap();
        assert_eq!(latest.version.to_string(), "2.0.0");
    }

    #[tokio::test]
    async fn test_conflict_leaves_latest_unchanged() {
        let repo = repo();
        repo.store(profile("A", "1.0.0")).await.unwrap();
        let mut changed = profile("A", "1.0.0");
        changed.instructions = "Other".into();
        let err = repo.store(changed).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        assert_eq!(repo.get_latest("A").await.unwrap().instructions, "Do the work.");
    }

    #[tokio::test]
    async fn test_validation_error_on_store() {
        let repo = repo();
        let mut p = profile("A", "1.0.0");
        p.confidence_thresholds = ConfidenceThresholds::new(0.3, 0.6);
        let err = repo.store(p).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Validation { .. }));
        assert!(repo.get_latest("A").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_write_invalidates_negative_cache() {
        let repo = repo();
        assert!(repo.get_latest("B").await.unwrap_err().is_not_found());
        assert!(repo.get("B", &exact("1.0.0")).await.unwrap_err().is_not_found());

        repo.store(profile("B", "1.0.0")).await.unwrap();
        assert_eq!(repo.get_latest("B").await.unwrap().name, "B");
        assert_eq!(repo.get("B", &exact("1.0.0")).await.unwrap().name, "B");

        repo.store(profile("B", "1.1.0")).await.unwrap();
        assert_eq!(repo.get_latest("B").await.unwrap().version.to_string(), "1.1.0");
    }

    struct CountingStore {
        inner: MemoryProfileStore,
        loads: AtomicUsize,
    }

    #[async_trait]
    impl ProfileStore for CountingStore {
        fn name(&self) -> &str {
            "counting"
        }
        async fn load(&self, key: &ProfileKey) -> anyhow::Result<Option<RoleProfile>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load(key).await
        }
        async fn latest(&self, name: &str) -> anyhow::Result<Option<ProfileVersion>> {
            self.inner.latest(name).await
        }
        async fn insert(&self, profile: &RoleProfile) -> anyhow::Result<InsertOutcome> {
            self.inner.insert(profile).await
        }
        async fn swap_latest(
            &self,
            name: &str,
            expected: Option<&ProfileVersion>,
            next: &ProfileVersion,
        ) -> anyhow::Result<bool> {
            self.inner.swap_latest(name, expected, next).await
        }
        async fn names(&self) -> anyhow::Result<Vec<String>> {
            self.inner.names().await
        }
        async fn versions(&self, name: &str) -> anyhow::Result<Vec<ProfileVersion>> {
            self.inner.versions(name).await
        }
    }

    #[tokio::test]
    async fn test_reads_are_cached() {
        let store = Arc::new(CountingStore {
            inner: MemoryProfileStore::new(),
            loads: AtomicUsize::new(0),
        });
        let repo = ProfileRepository::new(store.clone());
        repo.store(profile("C", "1.0.0")).await.unwrap();

        for _ in 0..3 {
            repo.get("C", &exact("1.0.0")).await.unwrap();
        }
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);
    }

    struct DownStore;

    #[async_trait]
    impl ProfileStore for DownStore {
        fn name(&self) -> &str {
            "down"
        }
        async fn load(&self, _key: &ProfileKey) -> anyhow::Result<Option<RoleProfile>> {
            anyhow::bail!("connection refused")
        }
        async fn latest(&self, _name: &str) -> anyhow::Result<Option<ProfileVersion>> {
            anyhow::bail!("connection refused")
        }
        async fn insert(&self, _profile: &RoleProfile) -> anyhow::Result<InsertOutcome> {
            anyhow::bail!("connection refused")
        }
        async fn swap_latest(
            &self,
            _name: &str,
            _expected: Option<&ProfileVersion>,
            _next: &ProfileVersion,
        ) -> anyhow::Result<bool> {
            anyhow::bail!("connection refused")
        }
        async fn names(&self) -> anyhow::Result<Vec<String>> {
            anyhow::bail!("connection refused")
        }
        async fn versions(&self, _name: &str) -> anyhow::Result<Vec<ProfileVersion>> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn test_unavailable_store_is_reported() {
        let repo = ProfileRepository::new(Arc::new(DownStore));
        let err = repo.get_latest("A").await.unwrap_err();
        assert!(matches!(err, RepositoryError::Unavailable { .. }));
        // not cached as missing
        assert!(matches!(
            repo.get_latest("A").await.unwrap_err(),
            RepositoryError::Unavailable { .. }
        ));
    }

    #[tokio::test]
    async fn test_concurrent_stores_keep_latest_monotonic() {
        let repo = repo();
        let mut handles = Vec::new();
        for minor in 0..10u64 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.store(profile("D", &format!("1.{minor}.0"))).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(repo.get_latest("D").await.unwrap().version.to_string(), "1.9.0");
    }

    #[tokio::test]
    async fn test_lineage_and_missing_base() {
        let repo = repo();
        repo.store(profile("GENERIC", "1.0.0")).await.unwrap();

        let mut child = profile("API_DESIGNER", "1.0.0");
        child.constraints.clear();
        child.base = Some(ProfileRef {
            name: "GENERIC".into(),
            version: None,
        });
        repo.store(child.clone()).await.unwrap();

        let lineage = repo.lineage(Arc::new(child)).await.unwrap();
        let names: Vec<_> = lineage.chain().iter().map(|p| p.name.clone()).collect();
        assert_eq!(names, vec!["GENERIC", "API_DESIGNER"]);
        assert_eq!(lineage.profile().name, "API_DESIGNER");

        let mut orphan = profile("ORPHAN", "1.0.0");
        orphan.base = Some(ProfileRef {
            name: "NOPE".into(),
            version: None,
        });
        assert!(matches!(
            repo.store(orphan).await.unwrap_err(),
            RepositoryError::InvalidLineage(_)
        ));
    }

    #[tokio::test]
    async fn test_name_repeated_in_lineage_is_rejected() {
        let repo = repo();
        repo.store(profile("A", "1.0.0")).await.unwrap();

        let mut b = profile("B", "1.0.0");
        b.base = Some(ProfileRef { name: "A".into(), version: None });
        repo.store(b).await.unwrap();

        // A@2 -> B -> A@latest would close a cycle once A@2 becomes latest.
        let mut a2 = profile("A", "2.0.0");
        a2.base = Some(ProfileRef { name: "B".into(), version: None });
        assert!(matches!(
            repo.store(a2).await.unwrap_err(),
            RepositoryError::InvalidLineage(_)
        ));
        assert_eq!(repo.get_latest("A").await.unwrap().version.to_string(), "1.0.0");
    }

    #[tokio::test]
    async fn test_list_is_restartable_and_filtered() {
        let repo = repo();
        let mut api = profile("API_DESIGNER", "1.0.0");
        api.archetype = "api".into();
        repo.store(api).await.unwrap();
        repo.store(profile("GENERIC", "1.0.0")).await.unwrap();
        repo.store(profile("GENERIC", "1.1.0")).await.unwrap();

        let listing = repo.list(ProfileFilter::default());
        let first: Vec<_> = listing.stream().try_collect().await.unwrap();
        let second: Vec<_> = listing.stream().try_collect().await.unwrap();
        let keys = |v: &Vec<Arc<RoleProfile>>| v.iter().map(|p| p.key().to_string()).collect::<Vec<_>>();
        assert_eq!(keys(&first), vec!["API_DESIGNER@1.0.0", "GENERIC@1.1.0"]);
        assert_eq!(keys(&first), keys(&second));

        let api_only = repo
            .list(ProfileFilter::default().archetype("API"))
            .collect()
            .await
            .unwrap();
        assert_eq!(api_only.len(), 1);

        let all_generic = repo
            .list(ProfileFilter::default().name_prefix("GEN").all_versions(true))
            .collect()
            .await
            .unwrap();
        assert_eq!(keys(&all_generic), vec!["GENERIC@1.0.0", "GENERIC@1.1.0"]);
    }
}
