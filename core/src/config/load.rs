use std::path::{Path, PathBuf};

use super::types::{AppConfig, CapabilityConfig, HttpCapabilityConfig, StoreConfig};

/// Default mare data directory: `~/.mare`
pub fn get_mare_data_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(PathBuf::from(home).join(".mare"))
}

/// `~/.mare/config.toml`, then `./config.toml`, then defaults; environment
/// overrides are applied last.
pub fn load_default() -> anyhow::Result<AppConfig> {
    let mare_config = get_mare_data_dir()?.join("config.toml");
    let local_config = Path::new("config.toml");

    let mut cfg = if mare_config.exists() {
        load_from_path(&mare_config)?
    } else if local_config.exists() {
        load_from_path(local_config)?
    } else {
        AppConfig::default()
    };

    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
    Ok(cfg)
}

pub fn load_from_path(path: &Path) -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let cfg = toml::from_str::<AppConfig>(&s)
        .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
    Ok(cfg)
}

/// Applies `MARE_*` overrides. Blank or unparsable values are ignored.
pub fn apply_env_overrides<F>(cfg: &mut AppConfig, var: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| var(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(v) = get("MARE_DEFAULT_PROFILE") {
        cfg.router.default_profile = v;
    }
    if let Some(v) = get("MARE_MAX_CONCURRENCY").and_then(|v| v.parse().ok()) {
        cfg.executor.max_concurrency = v;
    }
    if let Some(v) = get("MARE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        cfg.executor.timeout_ms = v;
    }
    if let Some(v) = get("MARE_PROFILES_DIR") {
        match &mut cfg.repository.store {
            StoreConfig::Fs(fs) => fs.root = v,
            StoreConfig::Memory => {
                cfg.repository.store = StoreConfig::Fs(super::types::FsStoreConfig { root: v });
            }
        }
    }
    if let Some(url) = get("MARE_CAPABILITY_URL") {
        match &mut cfg.capability {
            CapabilityConfig::Http(http) => http.url = url,
            CapabilityConfig::Command(_) => {
                cfg.capability = CapabilityConfig::Http(HttpCapabilityConfig {
                    url,
                    api_key: String::new(),
                    timeout_ms: cfg.executor.timeout_ms,
                });
            }
        }
    }
    if let Some(key) = get("MARE_CAPABILITY_API_KEY") {
        if let CapabilityConfig::Http(http) = &mut cfg.capability {
            http.api_key = key;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("MARE_DEFAULT_PROFILE", "FALLBACK"),
            ("MARE_MAX_CONCURRENCY", "3"),
            ("MARE_TIMEOUT_MS", "not-a-number"),
            ("MARE_CAPABILITY_URL", "http://localhost:1/run"),
            ("MARE_CAPABILITY_API_KEY", "sk-test"),
        ]
        .into_iter()
        .collect();

        let mut cfg = AppConfig::default();
        apply_env_overrides(&mut cfg, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.router.default_profile, "FALLBACK");
        assert_eq!(cfg.executor.max_concurrency, 3);
        assert_eq!(cfg.executor.timeout_ms, 120_000);
        match cfg.capability {
            CapabilityConfig::Http(http) => {
                assert_eq!(http.url, "http://localhost:1/run");
                assert_eq!(http.api_key, "sk-test");
            }
            other => panic!("expected http capability, got {other:?}"),
        }
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[router]\nmax_attempts = 4\n").unwrap();
        let cfg = load_from_path(&path).unwrap();
        assert_eq!(cfg.router.max_attempts, 4);

        std::fs::write(&path, "[router\n").unwrap();
        assert!(load_from_path(&path).is_err());
    }
}
