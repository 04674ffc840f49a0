//! Runner process: processes exactly one file, then exits.
//!
//! The runner connects to the per-runner socket its node created, introduces
//! itself with a greeting line and asks for its parameters. It then runs the
//! pipeline steps in order, reporting progress through the proxies, and ends
//! with `Complete`. An `Abort` from the node is honored between steps and
//! while a step is running.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Instant,
};

use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod executor;

pub use executor::{CommandExecutor, StepContext, StepExecutor, StepStatus};

use crate::{
  domain::{
    config::RpcConfig,
    runner::{LogLevel, RunOutcome, RunnerParameters},
    work_item::{ExecutedNode, WorkItem},
  },
  ipc::{ChannelConfig, HandlerRegistry, IpcError, RpcChannel, proxy::Proxies},
};

/// Prefix of the first line a runner writes after connecting.
pub const GREETING_PREFIX: &str = "fleetflow-runner:";

pub fn greeting(runner_uid: Uuid) -> String {
  format!("{GREETING_PREFIX}{runner_uid}")
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
  #[error("Failed to connect to {path:?}: {source}")]
  Connect {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("IPC error: {0}")]
  Ipc(#[from] IpcError),
  #[error("Received parameters for runner {actual}, expected {expected}")]
  WrongRunner { expected: Uuid, actual: Uuid },
}

/// Connect to the node at `socket` and process the assigned file.
pub async fn run(
  socket: &Path,
  runner_uid: Uuid,
  rpc: &RpcConfig,
  executor: Arc<dyn StepExecutor>,
) -> Result<RunOutcome, RunnerError> {
  let stream = UnixStream::connect(socket).await.map_err(|source| RunnerError::Connect {
    path: socket.to_path_buf(),
    source,
  })?;

  let config = ChannelConfig::from_rpc("node", rpc);
  let channel = RpcChannel::connect(stream, &greeting(runner_uid), Arc::new(HandlerRegistry::new()), config).await?;
  info!(runner = %runner_uid, socket = %socket.display(), "Connected to node");

  let result = run_on(&channel, runner_uid, executor.as_ref()).await;
  channel.close().await;
  result
}

/// Process the assigned file over an established channel.
pub async fn run_on(
  channel: &RpcChannel,
  runner_uid: Uuid,
  executor: &dyn StepExecutor,
) -> Result<RunOutcome, RunnerError> {
  let proxies = Proxies::new(channel);
  let params = proxies.basic.get_runner_parameters().await?;
  if params.uid != runner_uid {
    return Err(RunnerError::WrongRunner {
      expected: runner_uid,
      actual: params.uid,
    });
  }

  info!(
    runner = %params.uid,
    file = %params.file.name,
    steps = params.flow.len(),
    "Processing file"
  );

  if !params.temp_path.is_empty()
    && let Err(e) = tokio::fs::create_dir_all(&params.temp_path).await
  {
    warn!(path = %params.temp_path, error = %e, "Failed to create temp dir");
  }

  let abort = channel.abort_token();
  let mut file = params.file.clone();
  let outcome = execute_flow(&proxies, &params, &mut file, executor, &abort).await;

  if let RunOutcome::Processed { final_size } = &outcome {
    file.final_size = *final_size;
  }
  if let Err(e) = proxies.library_file.update_library_file(&file).await {
    warn!(runner = %params.uid, error = %e, "Failed to update library file");
  }

  proxies.runner_info.complete(&outcome).await?;
  info!(runner = %params.uid, outcome = ?outcome, "Run complete");
  Ok(outcome)
}

async fn execute_flow(
  proxies: &Proxies,
  params: &RunnerParameters,
  file: &mut WorkItem,
  executor: &dyn StepExecutor,
  abort: &CancellationToken,
) -> RunOutcome {
  let working_path = file.name.clone();
  let ctx = StepContext {
    file: &working_path,
    temp: &params.temp_path,
  };

  for step in &params.flow {
    if abort.is_cancelled() {
      return RunOutcome::Cancelled;
    }

    if let Err(e) = proxies.runner_info.start_step(&step.name, step.counts_towards_total).await {
      return fail(proxies, format!("Step {} refused: {}", step.name, reason(&e))).await;
    }

    let started = Instant::now();
    let status = match executor.execute(step, &ctx, abort.clone()).await {
      Ok(status) => status,
      Err(e) => return fail(proxies, format!("Step {} failed: {e}", step.name)).await,
    };

    match status {
      StepStatus::Aborted => return RunOutcome::Cancelled,
      StepStatus::Exited { code, stderr } => {
        file.executed_nodes.push(ExecutedNode {
          name: step.name.clone(),
          output: code,
          elapsed_ms: started.elapsed().as_millis() as u64,
        });
        if code != 0 {
          let detail = stderr.lines().last().unwrap_or_default().trim();
          let message = if detail.is_empty() {
            format!("Step {} exited with code {code}", step.name)
          } else {
            format!("Step {} exited with code {code}: {detail}", step.name)
          };
          return fail(proxies, message).await;
        }
        debug!(step = %step.name, elapsed_ms = started.elapsed().as_millis() as u64, "Step finished");
      }
    }
  }

  let final_size = match tokio::fs::metadata(&working_path).await {
    Ok(metadata) => Some(metadata.len()),
    Err(e) => {
      debug!(file = %working_path, error = %e, "Output size unavailable");
      None
    }
  };
  RunOutcome::Processed { final_size }
}

/// Log the failure on the node and turn it into an outcome.
async fn fail(proxies: &Proxies, reason: String) -> RunOutcome {
  warn!("{}", reason);
  if let Err(e) = proxies.basic.log(LogLevel::Error, &reason).await {
    debug!(error = %e, "Failed to forward log line");
  }
  RunOutcome::failed(reason)
}

/// Remote errors carry the node's message verbatim.
fn reason(err: &IpcError) -> String {
  match err {
    IpcError::Remote(msg) => msg.clone(),
    other => other.to_string(),
  }
}
