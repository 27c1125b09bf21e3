//! Import of `*_rep.json` role definitions.
//!
//! Definition files are looser than stored profiles: only `name` and
//! `archetype` are required, and everything else gets a default.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mare_core::api::{
    ConfidenceThresholds, Pipeline, ProfileRef, ProfileVersion, RepositoryError, RoleProfile,
    StorageResult, ToolPermissions,
};
use serde::Deserialize;
use serde_json::Value;

pub const REP_FILE_PATTERN: &str = "*_rep.json";
const DEFAULT_VERSION: &str = "1.0.0";

#[derive(Debug, Deserialize)]
struct RepDefinition {
    name: String,
    archetype: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default)]
    tone_rules: Vec<String>,
    #[serde(default)]
    constraints: Vec<String>,
    #[serde(default)]
    preferred_backends: Vec<String>,
    #[serde(default)]
    tool_permissions: Option<ToolPermissions>,
    #[serde(default)]
    confidence_thresholds: Option<ConfidenceThresholds>,
    #[serde(default)]
    domain_expertise: Value,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    match_patterns: Vec<String>,
    #[serde(default)]
    base: Option<ProfileRef>,
}

/// Parses one definition into a profile. The result is not validated.
pub fn parse_rep(raw: &str) -> Result<RoleProfile> {
    let def: RepDefinition = serde_json::from_str(raw).context("decode rep definition")?;

    let version: ProfileVersion = def
        .version
        .as_deref()
        .unwrap_or(DEFAULT_VERSION)
        .parse()
        .context("rep version")?;

    let archetype = def.archetype.trim().to_string();
    let instructions = def
        .instructions
        .filter(|i| !i.trim().is_empty())
        .unwrap_or_else(|| derived_instructions(&def.name, &archetype, def.description.as_deref()));

    let mut keywords = Vec::new();
    let mut seen = HashSet::new();
    let mut expertise = Vec::new();
    collect_strings(&def.domain_expertise, &mut expertise);
    for k in def.keywords.into_iter().chain(expertise) {
        let k = k.trim().to_string();
        if !k.is_empty() && seen.insert(k.to_lowercase()) {
            keywords.push(k);
        }
    }

    // Standalone definitions get a conservative contract; derived ones inherit.
    let standalone = def.base.is_none();
    let constraints = if def.constraints.is_empty() && standalone {
        vec![format!("Stay within the responsibilities of a {archetype}.")]
    } else {
        def.constraints
    };
    let tool_permissions = match def.tool_permissions {
        Some(p) => p,
        None if standalone => read_only_permissions(),
        None => ToolPermissions::new(),
    };

    Ok(RoleProfile {
        name: def.name.trim().to_string(),
        version,
        archetype,
        instructions,
        tone_rules: def.tone_rules,
        constraints,
        preferred_backends: def.preferred_backends,
        tool_permissions,
        confidence_thresholds: def.confidence_thresholds.unwrap_or_default(),
        base: def.base,
        keywords,
        match_patterns: def.match_patterns,
    })
}

pub async fn load_rep_file(path: &Path) -> Result<RoleProfile> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    parse_rep(&raw).with_context(|| format!("parse {}", path.display()))
}

/// `*_rep.json` files directly under `dir`, sorted by path.
pub fn find_rep_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = dir.join(REP_FILE_PATTERN);
    let pattern = pattern.to_string_lossy();
    let mut files = Vec::new();
    for entry in glob::glob(&pattern).with_context(|| format!("bad import path {}", dir.display()))? {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "skipping unreadable rep path"),
        }
    }
    files.sort();
    Ok(files)
}

#[derive(Debug)]
pub struct ImportFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub imported: Vec<StorageResult>,
    /// Already stored with the same `name@version`; left untouched.
    pub skipped: Vec<PathBuf>,
    pub failures: Vec<ImportFailure>,
}

impl ImportReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Imports every definition in `dir`. A bad file is recorded and the
/// import moves on. Files whose base is defined later in the same
/// directory are retried until no further progress is made.
pub async fn import_dir(pipeline: &Pipeline, dir: &Path) -> Result<ImportReport> {
    let mut report = ImportReport::default();
    let mut pending = Vec::new();
    for path in find_rep_files(dir)? {
        match load_rep_file(&path).await {
            Ok(profile) => pending.push((path, profile)),
            Err(e) => report.failures.push(ImportFailure {
                path,
                error: format!("{e:#}"),
            }),
        }
    }

    loop {
        let before = pending.len();
        let mut waiting = Vec::new();
        for (path, profile) in pending {
            match pipeline.store_profile(profile.clone()).await {
                Ok(stored) => report.imported.push(stored),
                Err(RepositoryError::Conflict(_)) => report.skipped.push(path),
                Err(e @ RepositoryError::InvalidLineage(_)) => waiting.push((path, profile, e)),
                Err(e) => report.failures.push(ImportFailure {
                    path,
                    error: e.to_string(),
                }),
            }
        }
        if waiting.is_empty() || waiting.len() == before {
            report
                .failures
                .extend(waiting.into_iter().map(|(path, _, e)| ImportFailure {
                    path,
                    error: e.to_string(),
                }));
            break;
        }
        pending = waiting.into_iter().map(|(path, profile, _)| (path, profile)).collect();
    }

    tracing::info!(
        dir = %dir.display(),
        imported = report.imported.len(),
        skipped = report.skipped.len(),
        failed = report.failures.len(),
        "rep import finished"
    );
    Ok(report)
}

fn derived_instructions(name: &str, archetype: &str, description: Option<&str>) -> String {
    match description.map(str::trim).filter(|d| !d.is_empty()) {
        Some(d) => format!("You are {name}, acting as a {archetype}. {d}"),
        None => format!("You are {name}, acting as a {archetype}. Work only within that role."),
    }
}

fn read_only_permissions() -> ToolPermissions {
    [("filesystem".to_string(), BTreeSet::from(["read".to_string()]))]
        .into_iter()
        .collect()
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}
