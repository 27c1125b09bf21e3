use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub repository: RepositoryConfig,

    #[serde(default)]
    pub router: RouterConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub capability: CapabilityConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        let mut problems = Vec::new();
        if self.executor.max_concurrency == 0 {
            problems.push("executor.max_concurrency must be > 0".to_string());
        }
        if self.executor.timeout_ms == 0 {
            problems.push("executor.timeout_ms must be > 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.executor.heuristic_base) {
            problems.push("executor.heuristic_base must be within [0, 1]".to_string());
        }
        if self.router.max_attempts == 0 {
            problems.push("router.max_attempts must be > 0".to_string());
        }
        if self.router.default_profile.trim().is_empty() {
            problems.push("router.default_profile must not be empty".to_string());
        }
        if self.repository.cache_capacity == 0 {
            problems.push("repository.cache_capacity must be > 0".to_string());
        }
        for rule in &self.router.decomposition {
            if let Err(e) = regex::Regex::new(&rule.pattern) {
                problems.push(format!("router.decomposition '{}': {e}", rule.name));
            }
            if rule.steps.is_empty() {
                problems.push(format!("router.decomposition '{}' has no steps", rule.name));
            }
        }
        if self.logging.enabled && !self.logging.console && !self.logging.file {
            problems.push("logging.enabled requires console or file output".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default = "default_logging_file")]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "mare_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_file() -> bool {
    false
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: default_logging_file(),
            level: default_logging_level(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Tool-permission groups a profile may reference.
    #[serde(default = "default_tool_groups")]
    pub tool_groups: Vec<String>,

    #[serde(default = "default_max_lineage_depth")]
    pub max_lineage_depth: usize,

    /// Directory of `*_rep.json` definitions imported at startup.
    #[serde(default)]
    pub seed_dir: Option<String>,

    #[serde(default)]
    pub store: StoreConfig,
}

fn default_cache_capacity() -> usize {
    256
}

pub fn default_tool_groups() -> Vec<String> {
    ["filesystem", "shell", "git", "web", "code", "mcp"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_max_lineage_depth() -> usize {
    8
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            tool_groups: default_tool_groups(),
            max_lineage_depth: default_max_lineage_depth(),
            seed_dir: None,
            store: StoreConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider")]
pub enum StoreConfig {
    #[serde(rename = "memory")]
    Memory,
    #[serde(rename = "fs")]
    Fs(FsStoreConfig),
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Fs(FsStoreConfig::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsStoreConfig {
    /// `~` is expanded when the store is built.
    #[serde(default = "default_fs_root")]
    pub root: String,
}

fn default_fs_root() -> String {
    "~/.mare/profiles".to_string()
}

impl Default for FsStoreConfig {
    fn default() -> Self {
        Self {
            root: default_fs_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Profile used when nothing matches.
    #[serde(default = "default_default_profile")]
    pub default_profile: String,

    /// Total attempts per task, re-routes included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_on_low_confidence")]
    pub retry_on_low_confidence: bool,

    #[serde(default = "default_decomposition")]
    pub decomposition: Vec<DecompositionRule>,
}

fn default_default_profile() -> String {
    "GENERIC".to_string()
}

fn default_max_attempts() -> u32 {
    2
}

fn default_retry_on_low_confidence() -> bool {
    true
}

fn default_decomposition() -> Vec<DecompositionRule> {
    vec![DecompositionRule::project_bootstrap()]
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_profile: default_default_profile(),
            max_attempts: default_max_attempts(),
            retry_on_low_confidence: default_retry_on_low_confidence(),
            decomposition: default_decomposition(),
        }
    }
}

/// Template that splits a matching task into fixed steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompositionRule {
    pub name: String,
    /// Regex over the task description.
    pub pattern: String,
    pub steps: Vec<DecompositionStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompositionStep {
    /// `{task}` is replaced with the parent description.
    pub description: String,
    #[serde(default)]
    pub archetype: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    /// 1-based indices of earlier steps. Unset means the previous step;
    /// an empty list means no dependencies.
    #[serde(default)]
    pub depends_on: Option<Vec<usize>>,
}

impl DecompositionStep {
    fn new(description: &str, archetype: &str, depends_on: Option<Vec<usize>>) -> Self {
        Self {
            description: description.to_string(),
            archetype: Some(archetype.to_string()),
            role: None,
            depends_on,
        }
    }
}

impl DecompositionRule {
    /// Architecture, implementation, protocol validation, test scenarios,
    /// deployment.
    pub fn project_bootstrap() -> Self {
        Self {
            name: "project-bootstrap".to_string(),
            pattern: r"(?i)^\s*bootstrap\b".to_string(),
            steps: vec![
                DecompositionStep::new(
                    "Design the system architecture with component specifications for: {task}",
                    "architect",
                    Some(vec![]),
                ),
                DecompositionStep::new(
                    "Implement and build the core components for: {task}",
                    "backend",
                    None,
                ),
                DecompositionStep::new(
                    "Validate protocol compliance of the implementation for: {task}",
                    "protocol",
                    None,
                ),
                DecompositionStep::new(
                    "Create test scenarios and validation checks for: {task}",
                    "test",
                    Some(vec![2]),
                ),
                DecompositionStep::new(
                    "Deploy and set up the system for: {task}",
                    "devops",
                    Some(vec![3, 4]),
                ),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Worker pool size.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Heuristic score of a clean, non-empty output before keyword coverage.
    #[serde(default = "default_heuristic_base")]
    pub heuristic_base: f64,

    /// Case-insensitive phrases that mark an output as a failure report.
    #[serde(default = "default_error_markers")]
    pub error_markers: Vec<String>,
}

fn default_max_concurrency() -> usize {
    num_cpus::get().max(1)
}

fn default_timeout_ms() -> u64 {
    120_000
}

fn default_heuristic_base() -> f64 {
    0.7
}

fn default_error_markers() -> Vec<String> {
    [
        "error:",
        "traceback",
        "exception",
        "failed to",
        "i cannot",
        "i can't",
        "unable to",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            timeout_ms: default_timeout_ms(),
            heuristic_base: default_heuristic_base(),
            error_markers: default_error_markers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider")]
pub enum CapabilityConfig {
    #[serde(rename = "command")]
    Command(CommandCapabilityConfig),
    #[serde(rename = "http")]
    Http(HttpCapabilityConfig),
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self::Command(CommandCapabilityConfig::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandCapabilityConfig {
    #[serde(default = "default_command_program")]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_command_program() -> String {
    "mare-agent".to_string()
}

impl Default for CommandCapabilityConfig {
    fn default() -> Self {
        Self {
            program: default_command_program(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpCapabilityConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_http_timeout_ms() -> u64 {
    120_000
}
