use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use super::{IngestOutcome, IngestionInvoker};
use crate::config::IngestConfig;

/// Runs the ingester as a child process
#[derive(Debug, Clone)]
pub struct CommandInvoker {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl CommandInvoker {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
            timeout: None,
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        let mut invoker = Self::new(config.program.clone(), config.args.clone());
        if let Some(dir) = &config.working_dir {
            invoker = invoker.with_working_dir(dir.clone());
        }
        if config.timeout_secs > 0 {
            invoker = invoker.with_timeout(Duration::from_secs(config.timeout_secs));
        }
        invoker
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    /// Kill the child if it runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait::async_trait]
impl IngestionInvoker for CommandInvoker {
    fn describe(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }

    async fn invoke(&self) -> IngestOutcome {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return IngestOutcome::ProcessError(format!(
                    "Failed to launch {}: {}",
                    self.describe(),
                    e
                ))
            }
        };

        // Dropping the wait future on timeout drops the child, which kills it.
        let waited = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    return IngestOutcome::ProcessError(format!(
                        "{} timed out after {}s",
                        self.describe(),
                        limit.as_secs_f64()
                    ))
                }
            },
            None => child.wait_with_output().await,
        };

        let output = match waited {
            Ok(output) => output,
            Err(e) => {
                return IngestOutcome::ProcessError(format!(
                    "Failed to wait for {}: {}",
                    self.describe(),
                    e
                ))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            IngestOutcome::ProcessError(format!(
                "{} exited with {}: {}",
                self.describe(),
                output.status,
                stderr
            ))
        } else if !stderr.is_empty() {
            IngestOutcome::StreamError(stderr)
        } else {
            IngestOutcome::Success(stdout)
        }
    }
}
