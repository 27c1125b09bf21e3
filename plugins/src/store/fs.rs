use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use mare_core::api::{FsStoreConfig, InsertOutcome, ProfileKey, ProfileStore, ProfileVersion, RoleProfile};
use tokio::sync::Mutex;

const LATEST_FILE: &str = "LATEST";
const PROFILE_EXT: &str = "json";

/// One directory per profile name:
///
/// ```text
/// <root>/<name>/<version>.json
/// <root>/<name>/LATEST
/// ```
///
/// Version files are never rewritten. `LATEST` is replaced atomically.
pub struct FsProfileStore {
    root: PathBuf,
    latest_lock: Mutex<()>,
}

impl FsProfileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            latest_lock: Mutex::new(()),
        }
    }

    pub fn from_config(cfg: &FsStoreConfig) -> Self {
        let root = shellexpand::tilde(&cfg.root).into_owned();
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn name_dir(&self, name: &str) -> Option<PathBuf> {
        is_path_safe(name).then(|| self.root.join(name))
    }

    fn profile_path(&self, key: &ProfileKey) -> Option<PathBuf> {
        self.name_dir(&key.name)
            .map(|dir| dir.join(format!("{}.{PROFILE_EXT}", key.version)))
    }
}

// Names are validated before they are stored, but lookups take arbitrary input.
fn is_path_safe(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn tmp_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!(".{stem}.{}.tmp", uuid::Uuid::new_v4()))
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
    }
}

#[async_trait]
impl ProfileStore for FsProfileStore {
    fn name(&self) -> &str {
        "fs"
    }

    async fn load(&self, key: &ProfileKey) -> Result<Option<RoleProfile>> {
        let Some(path) = self.profile_path(key) else {
            return Ok(None);
        };
        let Some(raw) = read_optional(&path).await? else {
            return Ok(None);
        };
        let profile: RoleProfile = serde_json::from_str(&raw)
            .with_context(|| format!("decode profile {}", path.display()))?;
        if profile.key() != *key {
            anyhow::bail!(
                "profile file {} holds {} instead of {}",
                path.display(),
                profile.key(),
                key
            );
        }
        Ok(Some(profile))
    }

    async fn latest(&self, name: &str) -> Result<Option<ProfileVersion>> {
        let Some(dir) = self.name_dir(name) else {
            return Ok(None);
        };
        let path = dir.join(LATEST_FILE);
        match read_optional(&path).await? {
            None => Ok(None),
            Some(raw) => {
                let version = raw
                    .trim()
                    .parse::<ProfileVersion>()
                    .with_context(|| format!("corrupt latest index {}", path.display()))?;
                Ok(Some(version))
            }
        }
    }

    async fn insert(&self, profile: &RoleProfile) -> Result<InsertOutcome> {
        let key = profile.key();
        let (Some(dir), Some(path)) = (self.name_dir(&key.name), self.profile_path(&key)) else {
            anyhow::bail!("profile name '{}' is not a safe file name", key.name);
        };
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create {}", dir.display()))?;

        let body = serde_json::to_vec_pretty(profile)?;
        let tmp = tmp_path(&dir, &key.version.to_string());
        tokio::fs::write(&tmp, &body)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;

        // A hard link fails if the target exists, which makes the publish exclusive.
        let linked = tokio::fs::hard_link(&tmp, &path).await;
        let _ = tokio::fs::remove_file(&tmp).await;
        match linked {
            Ok(()) => {
                tracing::debug!(profile = %key, path = %path.display(), "profile written");
                Ok(InsertOutcome::Inserted)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(InsertOutcome::Exists),
            Err(e) => Err(e).with_context(|| format!("publish {}", path.display())),
        }
    }

    async fn swap_latest(
        &self,
        name: &str,
        expected: Option<&ProfileVersion>,
        next: &ProfileVersion,
    ) -> Result<bool> {
        let Some(dir) = self.name_dir(name) else {
            anyhow::bail!("profile name '{name}' is not a safe file name");
        };
        let _guard = self.latest_lock.lock().await;

        let current = self.latest(name).await?;
        if current.as_ref() != expected {
            return Ok(false);
        }

        tokio::fs::create_dir_all(&dir).await?;
        let tmp = tmp_path(&dir, LATEST_FILE);
        tokio::fs::write(&tmp, format!("{next}\n"))
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        if let Err(e) = tokio::fs::rename(&tmp, dir.join(LATEST_FILE)).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e).context("replace latest index");
        }
        Ok(true)
    }

    async fn names(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("list {}", self.root.display())),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if is_path_safe(name) {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    async fn versions(&self, name: &str) -> Result<Vec<ProfileVersion>> {
        let Some(dir) = self.name_dir(name) else {
            return Ok(Vec::new());
        };
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("list {}", dir.display())),
        };

        let mut versions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.starts_with('.') {
                continue;
            }
            let Some(stem) = file_name.strip_suffix(".json") else {
                continue;
            };
            match stem.parse::<ProfileVersion>() {
                Ok(v) => versions.push(v),
                Err(e) => {
                    tracing::warn!(file = %entry.path().display(), error = %e, "ignoring unversioned profile file");
                }
            }
        }
        Ok(versions)
    }
}
