//! Per-runner session state held by the node.
//!
//! A session exists from the moment the supervisor accepts a `StartRunner`
//! until the runner's outcome has been reported upstream. The node-side
//! handlers mutate it; the supervisor watches it.

use std::sync::{Arc, OnceLock};

use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
  domain::{
    runner::{AdditionalInfo, RunOutcome, RunnerFinished, RunnerInfo, RunnerParameters, RunnerState},
    work_item::{FileStatus, WorkItem},
  },
  ipc::{HandlerError, RpcChannel},
};

/// Outcome reported when a runner goes away without calling `Complete`.
pub const RUNNER_LOST: &str = "runner lost";

#[derive(Debug)]
pub struct RunnerSession {
  parameters: RunnerParameters,
  /// Node's copy of the file, updated by `UpdateLibraryFile`
  file: RwLock<WorkItem>,
  info: RwLock<RunnerInfo>,
  outcome: RwLock<Option<RunOutcome>>,
  /// Channel to the runner process, set once it has connected
  channel: OnceLock<RpcChannel>,
  pid: OnceLock<u32>,
  /// Cancelled when the node decides to abort this runner
  abort: CancellationToken,
}

impl RunnerSession {
  pub fn new(parameters: RunnerParameters) -> Arc<Self> {
    let info = RunnerInfo::new(&parameters);
    let mut file = parameters.file.clone();
    file.status = FileStatus::Processing;
    file.processing_started = Some(Utc::now());

    Arc::new(Self {
      file: RwLock::new(file),
      info: RwLock::new(info),
      outcome: RwLock::new(None),
      channel: OnceLock::new(),
      pid: OnceLock::new(),
      abort: CancellationToken::new(),
      parameters,
    })
  }

  pub fn uid(&self) -> Uuid {
    self.parameters.uid
  }

  pub fn file_uid(&self) -> Uuid {
    self.parameters.file.uid
  }

  pub fn parameters(&self) -> &RunnerParameters {
    &self.parameters
  }

  pub fn max_steps(&self) -> u32 {
    self.parameters.max_steps
  }

  pub async fn file(&self) -> WorkItem {
    self.file.read().await.clone()
  }

  /// Replace the node's copy of the file. The uid must not change.
  pub async fn update_file(&self, item: WorkItem) -> Result<(), HandlerError> {
    if item.uid != self.file_uid() {
      return Err(HandlerError::validation(format!(
        "File {} does not belong to runner {}",
        item.uid,
        self.uid()
      )));
    }
    *self.file.write().await = item;
    Ok(())
  }

  pub async fn info(&self) -> RunnerInfo {
    self.info.read().await.clone()
  }

  pub async fn state(&self) -> RunnerState {
    self.info.read().await.state
  }

  /// Move a starting session to Running. Later states are left alone.
  pub async fn mark_running(&self) {
    let mut info = self.info.write().await;
    if info.state == RunnerState::Starting {
      info.state = RunnerState::Running;
      debug!(runner = %self.uid(), "Runner running");
    }
  }

  // ==========================================================================
  // Progress
  // ==========================================================================

  /// Begin a new step and return the updated snapshot.
  ///
  /// Fails without changing anything once `max_steps` steps have run.
  /// Every additional info entry loses one step of its lifetime.
  pub async fn start_step(&self, name: String, counts_towards_total: bool) -> Result<RunnerInfo, HandlerError> {
    let mut info = self.info.write().await;
    let max_steps = self.max_steps();
    if info.executed_steps >= max_steps {
      return Err(HandlerError::policy(format!(
        "Exceeded maximum number of steps ({max_steps})"
      )));
    }

    info.executed_steps += 1;
    if counts_towards_total {
      info.executed_steps_counted_towards_total += 1;
      info.current_step = info.executed_steps_counted_towards_total;
    }
    info.current_step_name = Some(name);
    info.current_step_percent = 0.0;
    if info.state == RunnerState::Starting {
      info.state = RunnerState::Running;
    }

    info.additional_info.retain(|_, entry| {
      entry.steps = entry.steps.saturating_sub(1);
      entry.steps > 0
    });

    Ok(info.clone())
  }

  pub async fn set_percent(&self, percent: f32) -> RunnerInfo {
    let mut info = self.info.write().await;
    info.current_step_percent = if percent.is_finite() { percent.clamp(0.0, 100.0) } else { 0.0 };
    info.clone()
  }

  /// Set a display hint living for `steps` further steps. Zero steps or an
  /// empty value removes the hint.
  pub async fn set_additional_info(&self, key: String, value: String, steps: u32) -> RunnerInfo {
    let mut info = self.info.write().await;
    if steps == 0 || value.is_empty() {
      info.additional_info.remove(&key);
    } else {
      info.additional_info.insert(key, AdditionalInfo { value, steps });
    }
    info.clone()
  }

  // ==========================================================================
  // Outcome
  // ==========================================================================

  /// Record the final outcome. Only the first outcome counts; later ones
  /// return `None`.
  pub async fn complete(&self, outcome: RunOutcome) -> Option<RunnerFinished> {
    {
      let mut slot = self.outcome.write().await;
      if slot.is_some() {
        debug!(runner = %self.uid(), "Outcome already recorded, ignoring");
        return None;
      }
      *slot = Some(outcome.clone());
    }

    self.info.write().await.state = outcome.final_state();

    let mut file = self.file.write().await;
    file.processing_ended = Some(Utc::now());
    match &outcome {
      RunOutcome::Processed { final_size } => {
        file.status = FileStatus::Processed;
        if let Some(size) = final_size {
          file.final_size = Some(*size);
        }
      }
      RunOutcome::Failed { reason } => {
        file.status = FileStatus::ProcessingFailed;
        file.fail_reason = Some(reason.clone());
      }
      RunOutcome::Cancelled => file.status = FileStatus::Cancelled,
    }

    info!(runner = %self.uid(), file = %file.name, outcome = ?outcome, "Runner completed");
    Some(RunnerFinished {
      uid: self.uid(),
      file_uid: self.file_uid(),
      outcome,
    })
  }

  /// Outcome for a runner that went away without reporting one.
  pub async fn lost(&self) -> Option<RunnerFinished> {
    let outcome = if self.is_aborting() {
      RunOutcome::Cancelled
    } else {
      RunOutcome::failed(RUNNER_LOST)
    };
    self.complete(outcome).await
  }

  pub async fn outcome(&self) -> Option<RunOutcome> {
    self.outcome.read().await.clone()
  }

  // ==========================================================================
  // Abort
  // ==========================================================================

  /// Flag the session as aborting. Returns false if it already was.
  pub async fn begin_abort(&self) -> bool {
    if self.abort.is_cancelled() {
      return false;
    }
    self.abort.cancel();
    let mut info = self.info.write().await;
    if !info.state.is_terminal() {
      info.state = RunnerState::Aborting;
    }
    true
  }

  pub fn is_aborting(&self) -> bool {
    self.abort.is_cancelled()
  }

  pub fn abort_token(&self) -> CancellationToken {
    self.abort.clone()
  }

  // ==========================================================================
  // Process
  // ==========================================================================

  pub fn attach_channel(&self, channel: RpcChannel) {
    if self.channel.set(channel).is_err() {
      debug!(runner = %self.uid(), "Channel already attached");
    }
  }

  pub fn channel(&self) -> Option<&RpcChannel> {
    self.channel.get()
  }

  pub fn set_pid(&self, pid: u32) {
    let _ = self.pid.set(pid);
  }

  pub fn pid(&self) -> Option<u32> {
    self.pid.get().copied()
  }
}
