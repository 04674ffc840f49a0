//! Types exchanged between a runner, its node and the server.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{library::ObjectReference, work_item::WorkItem};

// ============================================================================
// Assignment
// ============================================================================

/// A processing node as known by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProcessingNode {
  pub uid: Uuid,
  pub name: String,
  #[serde(default)]
  pub address: String,
  #[serde(default)]
  pub enabled: bool,
  #[serde(default)]
  pub max_runners: usize,
  #[serde(default)]
  pub temp_path: String,
  /// Libraries this node may process. Empty means all.
  #[serde(default)]
  pub libraries: Vec<ObjectReference>,
}

fn default_true() -> bool {
  true
}

/// One step of the user defined pipeline.
///
/// `args` may contain `{file}` and `{temp}` placeholders which the runner
/// replaces with the working file path and its temporary directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FlowStep {
  pub name: String,
  pub command: String,
  #[serde(default)]
  pub args: Vec<String>,
  /// Whether the step advances the visible step counter.
  #[serde(default = "default_true")]
  pub counts_towards_total: bool,
}

/// Everything a runner needs to process its file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RunnerParameters {
  /// Identity of this runner (one per in-flight file).
  pub uid: Uuid,
  pub node: ObjectReference,
  pub file: WorkItem,
  #[serde(default)]
  pub flow: Vec<FlowStep>,
  /// Ceiling on executed steps before the run is stopped.
  pub max_steps: u32,
  #[serde(default)]
  pub temp_path: String,
}

// ============================================================================
// Progress
// ============================================================================

/// Lifecycle of a runner session.
///
/// `Starting → Running → (Aborting) → Finished | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RunnerState {
  #[default]
  Starting,
  Running,
  Aborting,
  Finished,
  Failed,
}

impl RunnerState {
  pub fn is_terminal(self) -> bool {
    matches!(self, RunnerState::Finished | RunnerState::Failed)
  }
}

/// A display hint shown next to the runner's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AdditionalInfo {
  pub value: String,
  /// Remaining steps before the hint is dropped.
  pub steps: u32,
}

/// Consolidated progress snapshot, pushed upstream on every change.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RunnerInfo {
  pub uid: Uuid,
  pub file_uid: Uuid,
  pub file_name: String,
  pub node_uid: Uuid,
  pub state: RunnerState,
  pub current_step: u32,
  pub current_step_name: Option<String>,
  pub current_step_percent: f32,
  pub total_steps: u32,
  pub executed_steps: u32,
  pub executed_steps_counted_towards_total: u32,
  pub started_at: DateTime<Utc>,
  #[serde(default)]
  pub additional_info: BTreeMap<String, AdditionalInfo>,
}

impl RunnerInfo {
  pub fn new(parameters: &RunnerParameters) -> Self {
    Self {
      uid: parameters.uid,
      file_uid: parameters.file.uid,
      file_name: parameters.file.name.clone(),
      node_uid: parameters.node.uid,
      state: RunnerState::Starting,
      current_step: 0,
      current_step_name: None,
      current_step_percent: 0.0,
      total_steps: parameters.flow.iter().filter(|s| s.counts_towards_total).count() as u32,
      executed_steps: 0,
      executed_steps_counted_towards_total: 0,
      started_at: Utc::now(),
      additional_info: BTreeMap::new(),
    }
  }
}

// ============================================================================
// Outcome
// ============================================================================

/// Final result a runner reports for its file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunOutcome {
  Processed {
    #[serde(rename = "FinalSize")]
    final_size: Option<u64>,
  },
  Failed {
    #[serde(rename = "Reason")]
    reason: String,
  },
  /// The run was aborted on request. Not a failure.
  Cancelled,
}

impl RunOutcome {
  pub fn failed(reason: impl Into<String>) -> Self {
    Self::Failed { reason: reason.into() }
  }

  /// Session state a run ends in.
  pub fn final_state(&self) -> RunnerState {
    match self {
      RunOutcome::Failed { .. } => RunnerState::Failed,
      RunOutcome::Processed { .. } | RunOutcome::Cancelled => RunnerState::Finished,
    }
  }
}

/// Runner lifecycle event relayed to the server when a session ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RunnerFinished {
  pub uid: Uuid,
  pub file_uid: Uuid,
  pub outcome: RunOutcome,
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationSeverity {
  Info,
  Warning,
  Error,
  Critical,
}

/// Level of a runner log line forwarded to the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
  Debug,
  Info,
  Warning,
  Error,
}
