use std::collections::BTreeSet;
use std::fmt;

use regex::Regex;
use serde::Serialize;

use super::types::{in_unit_range, RoleProfile};

/// One reason a profile was rejected.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    MissingField { field: &'static str },
    InvalidName { name: String },
    ThresholdOutOfRange { field: &'static str, value: f64 },
    ThresholdOrder { auto_complete: f64, escalate: f64 },
    UnknownToolGroup { group: String },
    EmptyToolName { group: String },
    InvalidPattern { pattern: String, reason: String },
    SelfReference,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField { field } => write!(f, "missing required field '{field}'"),
            Self::InvalidName { name } => write!(
                f,
                "invalid name '{name}' (allowed: letters, digits, '_', '-', '.')"
            ),
            Self::ThresholdOutOfRange { field, value } => {
                write!(f, "{field}={value} is outside [0, 1]")
            }
            Self::ThresholdOrder {
                auto_complete,
                escalate,
            } => write!(
                f,
                "auto_complete ({auto_complete}) must be >= escalate ({escalate})"
            ),
            Self::UnknownToolGroup { group } => write!(f, "unknown tool-permission group '{group}'"),
            Self::EmptyToolName { group } => write!(f, "empty tool name in group '{group}'"),
            Self::InvalidPattern { pattern, reason } => {
                write!(f, "invalid match pattern '{pattern}': {reason}")
            }
            Self::SelfReference => f.write_str("profile lists itself as its base"),
        }
    }
}

/// Violations found for a profile; empty means valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationResult {
    pub violations: Vec<Violation>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Schema checks applied on the repository's write path.
#[derive(Debug, Clone)]
pub struct ProfileValidator {
    known_groups: BTreeSet<String>,
}

impl ProfileValidator {
    pub fn new<I, S>(known_groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known_groups: known_groups.into_iter().map(Into::into).collect(),
        }
    }

    pub fn known_groups(&self) -> &BTreeSet<String> {
        &self.known_groups
    }

    pub fn validate(&self, profile: &RoleProfile) -> ValidationResult {
        let mut violations = Vec::new();

        if profile.name.trim().is_empty() {
            violations.push(Violation::MissingField { field: "name" });
        } else if !is_valid_name(&profile.name) {
            violations.push(Violation::InvalidName {
                name: profile.name.clone(),
            });
        }
        if profile.archetype.trim().is_empty() {
            violations.push(Violation::MissingField { field: "archetype" });
        }
        if profile.instructions.trim().is_empty() {
            violations.push(Violation::MissingField {
                field: "instructions",
            });
        }

        // A composed profile may inherit constraints and permissions from its base.
        if profile.base.is_none() {
            if profile.constraints.iter().all(|c| c.trim().is_empty()) {
                violations.push(Violation::MissingField {
                    field: "constraints",
                });
            }
            if profile.tool_permissions.values().all(|tools| tools.is_empty()) {
                violations.push(Violation::MissingField {
                    field: "tool_permissions",
                });
            }
        }

        let thresholds = &profile.confidence_thresholds;
        let mut in_range = true;
        for (field, value) in [
            ("auto_complete", thresholds.auto_complete),
            ("escalate", thresholds.escalate),
        ] {
            if !in_unit_range(value) {
                in_range = false;
                violations.push(Violation::ThresholdOutOfRange { field, value });
            }
        }
        if in_range && thresholds.auto_complete < thresholds.escalate {
            violations.push(Violation::ThresholdOrder {
                auto_complete: thresholds.auto_complete,
                escalate: thresholds.escalate,
            });
        }

        for (group, tools) in &profile.tool_permissions {
            if !self.known_groups.contains(group) {
                violations.push(Violation::UnknownToolGroup {
                    group: group.clone(),
                });
            }
            if tools.iter().any(|t| t.trim().is_empty()) {
                violations.push(Violation::EmptyToolName {
                    group: group.clone(),
                });
            }
        }

        for pattern in &profile.match_patterns {
            if let Err(e) = Regex::new(pattern) {
                violations.push(Violation::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                });
            }
        }

        if let Some(base) = &profile.base {
            let same_version = base
                .version
                .as_ref()
                .map(|v| v == &profile.version)
                .unwrap_or(true);
            if base.name == profile.name && same_version {
                violations.push(Violation::SelfReference);
            }
        }

        ValidationResult { violations }
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
