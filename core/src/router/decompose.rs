use regex::Regex;
use tracing::debug;

use crate::config::{DecompositionRule, DecompositionStep};
use crate::error::RouterError;
use crate::task::{Task, TaskStatus};

struct CompiledRule {
    name: String,
    pattern: Regex,
    steps: Vec<DecompositionStep>,
}

/// Splits tasks into ordered sub-tasks.
///
/// Configured template rules are tried first, in order, then the built-in
/// numbered-steps rule. A task no rule matches is atomic. Sub-tasks are
/// never decomposed again.
pub struct Decomposer {
    rules: Vec<CompiledRule>,
    numbered_line: Regex,
}

impl std::fmt::Debug for Decomposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.rules.iter().map(|r| r.name.as_str()).collect();
        f.debug_struct("Decomposer").field("rules", &names).finish()
    }
}

impl Decomposer {
    pub fn new(rules: &[DecompositionRule]) -> Result<Self, RouterError> {
        let compiled = rules
            .iter()
            .map(|rule| {
                let invalid = |reason: String| RouterError::InvalidRule {
                    rule: rule.name.clone(),
                    reason,
                };
                if rule.steps.is_empty() {
                    return Err(invalid("no steps".to_string()));
                }
                for (i, step) in rule.steps.iter().enumerate() {
                    let n = i + 1;
                    for dep in step.depends_on.iter().flatten() {
                        if *dep == 0 || *dep >= n {
                            return Err(invalid(format!(
                                "step {n} may only depend on earlier steps (got {dep})"
                            )));
                        }
                    }
                }
                let pattern = Regex::new(&rule.pattern).map_err(|e| invalid(e.to_string()))?;
                Ok(CompiledRule {
                    name: rule.name.clone(),
                    pattern,
                    steps: rule.steps.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let numbered_line = Regex::new(r"^\s*(\d{1,3})[.)]\s+(\S.*)$").map_err(|e| {
            RouterError::InvalidRule {
                rule: "numbered-steps".to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            rules: compiled,
            numbered_line,
        })
    }

    pub fn decompose(&self, task: &Task) -> Vec<Task> {
        if task.parent_id.is_some() {
            return vec![task.clone()];
        }

        for rule in &self.rules {
            if rule.pattern.is_match(&task.description) {
                debug!(task_id = %task.id, rule = %rule.name, "decomposition rule matched");
                return self.from_template(task, &rule.steps);
            }
        }

        let steps: Vec<String> = task
            .description
            .lines()
            .filter_map(|line| self.numbered_line.captures(line))
            .filter_map(|caps| caps.get(2).map(|m| m.as_str().trim().to_string()))
            .collect();
        if steps.len() >= 2 {
            debug!(task_id = %task.id, steps = steps.len(), "numbered steps decomposed");
            return steps
                .into_iter()
                .enumerate()
                .map(|(i, description)| {
                    let mut sub = sub_task(task, i + 1, description);
                    if i > 0 {
                        sub.dependencies.push(sub_id(task, i));
                    }
                    sub
                })
                .collect();
        }

        vec![task.clone()]
    }

    fn from_template(&self, task: &Task, steps: &[DecompositionStep]) -> Vec<Task> {
        steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                let n = i + 1;
                let mut sub = sub_task(task, n, step.description.replace("{task}", &task.description));
                if let Some(archetype) = &step.archetype {
                    sub.archetype = Some(archetype.clone());
                }
                if let Some(role) = &step.role {
                    sub.role_hint = Some(role.clone());
                }
                sub.dependencies = match &step.depends_on {
                    Some(deps) => deps.iter().map(|d| sub_id(task, *d)).collect(),
                    None if n > 1 => vec![sub_id(task, n - 1)],
                    None => Vec::new(),
                };
                sub
            })
            .collect()
    }
}

fn sub_id(parent: &Task, n: usize) -> String {
    format!("{}.{n}", parent.id)
}

fn sub_task(parent: &Task, n: usize, description: String) -> Task {
    Task {
        id: sub_id(parent, n),
        description,
        expected_output: None,
        parent_id: Some(parent.id.clone()),
        status: TaskStatus::Pending,
        dependencies: Vec::new(),
        role_hint: parent.role_hint.clone(),
        archetype: parent.archetype.clone(),
        timeout_ms: parent.timeout_ms,
    }
}
