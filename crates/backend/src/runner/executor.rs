//! Execution of a single pipeline step.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::{io::AsyncReadExt, process::Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::runner::FlowStep;

/// Paths a step may refer to through `{file}` and `{temp}`.
#[derive(Debug, Clone)]
pub struct StepContext<'a> {
  pub file: &'a str,
  pub temp: &'a str,
}

impl StepContext<'_> {
  pub fn expand(&self, arg: &str) -> String {
    arg.replace("{file}", self.file).replace("{temp}", self.temp)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
  /// The step ran to completion with this exit code.
  Exited { code: i32, stderr: String },
  /// The abort token fired while the step was running.
  Aborted,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
  #[error("Failed to start {command}: {source}")]
  Spawn {
    command: String,
    #[source]
    source: std::io::Error,
  },
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
}

/// Runs one step. Implementations must return promptly once `abort` fires.
#[async_trait]
pub trait StepExecutor: Send + Sync {
  async fn execute(
    &self,
    step: &FlowStep,
    ctx: &StepContext<'_>,
    abort: CancellationToken,
  ) -> Result<StepStatus, ExecutorError>;
}

/// Runs each step as an external command.
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor;

#[async_trait]
impl StepExecutor for CommandExecutor {
  async fn execute(
    &self,
    step: &FlowStep,
    ctx: &StepContext<'_>,
    abort: CancellationToken,
  ) -> Result<StepStatus, ExecutorError> {
    let args: Vec<String> = step.args.iter().map(|arg| ctx.expand(arg)).collect();
    debug!(step = %step.name, command = %step.command, ?args, "Starting step");

    let mut child = Command::new(&step.command)
      .args(&args)
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()
      .map_err(|source| ExecutorError::Spawn {
        command: step.command.clone(),
        source,
      })?;

    // drain stderr concurrently so a chatty step cannot fill the pipe
    let stderr = child.stderr.take();
    let collect = tokio::spawn(async move {
      let mut buf = String::new();
      if let Some(mut stderr) = stderr
        && let Err(e) = stderr.read_to_string(&mut buf).await
      {
        debug!(error = %e, "Failed to read step stderr");
      }
      buf
    });

    tokio::select! {
      status = child.wait() => {
        let status = status?;
        let stderr = collect.await.unwrap_or_default();
        Ok(StepStatus::Exited {
          code: status.code().unwrap_or(-1),
          stderr,
        })
      }

      _ = abort.cancelled() => {
        warn!(step = %step.name, "Abort requested, killing step");
        child.kill().await?;
        collect.abort();
        Ok(StepStatus::Aborted)
      }
    }
  }
}
