use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::version::{ProfileVersion, VersionSelector};

/// Tool-group name → allowed tool names.
pub type ToolPermissions = BTreeMap<String, BTreeSet<String>>;

/// Confidence bar a result must clear to auto-complete, and the floor below
/// which it is considered low confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceThresholds {
    #[serde(default = "default_auto_complete")]
    pub auto_complete: f64,
    #[serde(default = "default_escalate")]
    pub escalate: f64,
}

fn default_auto_complete() -> f64 {
    0.8
}

fn default_escalate() -> f64 {
    0.5
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            auto_complete: default_auto_complete(),
            escalate: default_escalate(),
        }
    }
}

impl ConfidenceThresholds {
    pub fn new(auto_complete: f64, escalate: f64) -> Self {
        Self {
            auto_complete,
            escalate,
        }
    }

    pub fn is_ordered(&self) -> bool {
        in_unit_range(self.auto_complete)
            && in_unit_range(self.escalate)
            && self.auto_complete >= self.escalate
    }
}

pub(crate) fn in_unit_range(v: f64) -> bool {
    (0.0..=1.0).contains(&v)
}

/// Reference from a profile to the base profile it composes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileRef {
    pub name: String,
    /// Unset means "latest at the time the lineage is resolved".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<ProfileVersion>,
}

impl ProfileRef {
    pub fn selector(&self) -> VersionSelector {
        match &self.version {
            Some(v) => VersionSelector::Exact(v.clone()),
            None => VersionSelector::Latest,
        }
    }
}

/// Immutable, versioned behavioral contract for one role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleProfile {
    pub name: String,
    pub version: ProfileVersion,
    pub archetype: String,
    pub instructions: String,
    #[serde(default)]
    pub tone_rules: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub preferred_backends: Vec<String>,
    #[serde(default)]
    pub tool_permissions: ToolPermissions,
    #[serde(default)]
    pub confidence_thresholds: ConfidenceThresholds,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<ProfileRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_patterns: Vec<String>,
}

impl RoleProfile {
    pub fn key(&self) -> ProfileKey {
        ProfileKey::new(self.name.clone(), self.version.clone())
    }
}

/// Unique `name@version` identity of a stored profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProfileKey {
    pub name: String,
    pub version: ProfileVersion,
}

impl ProfileKey {
    pub fn new(name: impl Into<String>, version: ProfileVersion) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for ProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Outcome of a successful repository write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageResult {
    pub key: ProfileKey,
    /// Whether the write advanced the name's latest pointer.
    pub became_latest: bool,
    pub previous_latest: Option<ProfileVersion>,
}

/// Optional filters for listing profiles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileFilter {
    /// Case-insensitive exact archetype match.
    pub archetype: Option<String>,
    pub name_prefix: Option<String>,
    /// List every stored version instead of only the latest of each name.
    pub all_versions: bool,
}

impl ProfileFilter {
    pub fn archetype(mut self, archetype: impl Into<String>) -> Self {
        self.archetype = Some(archetype.into());
        self
    }

    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    pub fn all_versions(mut self, all: bool) -> Self {
        self.all_versions = all;
        self
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.name_prefix
            .as_deref()
            .map(|p| name.starts_with(p))
            .unwrap_or(true)
    }

    pub fn matches(&self, profile: &RoleProfile) -> bool {
        self.matches_name(&profile.name)
            && self
                .archetype
                .as_deref()
                .map(|a| profile.archetype.eq_ignore_ascii_case(a))
                .unwrap_or(true)
    }
}
