use std::collections::BTreeMap;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use mare_core::api::{CapabilityRequest, CapabilityResponse, CommandCapabilityConfig, ExecutionCapability};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{response_from_json, tail};

const STDERR_TAIL_LINES: usize = 20;

/// Runs one process per execution. The JSON request goes to stdin and the
/// reply is read from stdout.
pub struct CommandCapability {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
}

impl CommandCapability {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn from_config(cfg: &CommandCapabilityConfig) -> Self {
        Self {
            program: shellexpand::tilde(&cfg.program).into_owned(),
            args: cfg.args.clone(),
            env: cfg.env.clone(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl ExecutionCapability for CommandCapability {
    fn name(&self) -> &str {
        "command"
    }

    async fn run(&self, request: CapabilityRequest) -> Result<CapabilityResponse> {
        let payload = serde_json::to_vec(&request)?;

        // Dropping the child (timeout, cancellation) kills the process.
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(&self.env)
            .env("MARE_SESSION_ID", &request.session_id)
            .env("MARE_TASK_ID", &request.task_id)
            .env("MARE_PROFILE", &request.profile)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawn {}", self.program))?;

        tracing::debug!(
            program = %self.program,
            task_id = %request.task_id,
            session_id = %request.session_id,
            bytes = payload.len(),
            "capability process started"
        );

        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                match stdin.write_all(&payload).await {
                    // the program may exit without reading its input
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                    other => other,
                }
            } else {
                Ok(())
            }
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.with_context(|| format!("wait for {}", self.program))?;
        fed.with_context(|| format!("write request to {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                tail(&stderr, STDERR_TAIL_LINES)
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        let structured = serde_json::from_str::<serde_json::Value>(trimmed)
            .ok()
            .and_then(|v| response_from_json(&v));
        Ok(structured.unwrap_or_else(|| CapabilityResponse::output(trimmed)))
    }
}
