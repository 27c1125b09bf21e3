use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use mare_core::api::{
    AppConfig, CapabilityConfig, ExecutionCapability, MemoryProfileStore, Pipeline, ProfileStore,
    StoreConfig,
};

use crate::capability::{CommandCapability, HttpCapability};
use crate::rep::import_dir;
use crate::store::FsProfileStore;

pub fn build_store(cfg: &AppConfig) -> Arc<dyn ProfileStore> {
    match &cfg.repository.store {
        StoreConfig::Memory => Arc::new(MemoryProfileStore::new()),
        StoreConfig::Fs(fs_cfg) => Arc::new(FsProfileStore::from_config(fs_cfg)),
    }
}

pub fn build_capability(cfg: &AppConfig) -> Result<Arc<dyn ExecutionCapability>> {
    match &cfg.capability {
        CapabilityConfig::Command(cmd_cfg) => Ok(Arc::new(CommandCapability::from_config(cmd_cfg))),
        CapabilityConfig::Http(http_cfg) => Ok(Arc::new(HttpCapability::from_config(http_cfg)?)),
    }
}

/// Builds the configured store and capability, then imports `seed_dir`
/// definitions when one is set.
pub async fn build_pipeline(cfg: AppConfig) -> Result<Pipeline> {
    let store = build_store(&cfg);
    let capability = build_capability(&cfg)?;
    let seed_dir = cfg
        .repository
        .seed_dir
        .as_deref()
        .map(|d| shellexpand::tilde(d).into_owned());

    let pipeline = Pipeline::builder(cfg)
        .store(store)
        .capability(capability)
        .build()?;

    if let Some(dir) = seed_dir {
        let report = import_dir(&pipeline, Path::new(&dir)).await?;
        for failure in &report.failures {
            tracing::warn!(path = %failure.path.display(), error = %failure.error, "seed profile rejected");
        }
    }
    Ok(pipeline)
}
