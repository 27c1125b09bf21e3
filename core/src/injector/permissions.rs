use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::profile::ToolPermissions;

pub const WILDCARD: &str = "*";

/// Concrete allow-set resolved from a profile's tool permissions.
///
/// Deny by default: a tool is allowed only when its group lists it, or lists
/// `*`. A wildcard never reaches across groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    groups: BTreeMap<String, BTreeSet<String>>,
}

impl PermissionSet {
    /// Builds the set, dropping blank tool names and groups left empty.
    pub fn from_permissions(permissions: &ToolPermissions) -> Self {
        let groups = permissions
            .iter()
            .filter_map(|(group, tools)| {
                let tools: BTreeSet<String> = tools
                    .iter()
                    .map(|t| t.trim())
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect();
                (!tools.is_empty()).then(|| (group.clone(), tools))
            })
            .collect();
        Self { groups }
    }

    /// Merges a lineage's permission maps in order; a later map's group
    /// replaces the earlier one wholesale.
    pub fn merged<'a, I>(layers: I) -> Self
    where
        I: IntoIterator<Item = &'a ToolPermissions>,
    {
        let mut merged = ToolPermissions::new();
        for layer in layers {
            for (group, tools) in layer {
                merged.insert(group.clone(), tools.clone());
            }
        }
        Self::from_permissions(&merged)
    }

    pub fn allows(&self, group: &str, tool: &str) -> bool {
        self.groups
            .get(group)
            .map(|tools| tools.contains(WILDCARD) || tools.contains(tool))
            .unwrap_or(false)
    }

    /// Checks a `group.tool` identifier. Unqualified names are denied.
    pub fn allows_qualified(&self, qualified: &str) -> bool {
        match qualified.split_once('.') {
            Some((group, tool)) if !tool.is_empty() => self.allows(group, tool),
            _ => false,
        }
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.groups.iter().map(|(g, t)| (g.as_str(), t))
    }

    pub fn as_map(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
