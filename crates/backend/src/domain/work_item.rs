//! Work items: discovered files pending or undergoing processing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::library::ObjectReference;

/// Processing status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FileStatus {
  #[default]
  Unprocessed,
  Processing,
  Processed,
  ProcessingFailed,
  Disabled,
  /// The last run was aborted. The file may be picked up again after a reset.
  Cancelled,
}

impl FileStatus {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      FileStatus::Processed | FileStatus::ProcessingFailed | FileStatus::Disabled
    )
  }
}

/// One executed pipeline step, recorded while a runner works on the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecutedNode {
  pub name: String,
  /// Exit output of the step (0 = success).
  pub output: i32,
  /// Wall time in milliseconds.
  pub elapsed_ms: u64,
}

/// A file known to the server.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkItem {
  pub uid: Uuid,
  /// Full path of the file.
  pub name: String,
  /// Owning library. Files without one still sort, under a default policy.
  pub library: Option<ObjectReference>,
  /// Manual queue position. Zero means unset.
  #[serde(default)]
  pub order: i32,
  #[serde(default)]
  pub original_size: u64,
  pub final_size: Option<u64>,
  pub created: DateTime<Utc>,
  pub modified: DateTime<Utc>,
  #[serde(default)]
  pub reprocess: bool,
  #[serde(default)]
  pub status: FileStatus,
  pub fail_reason: Option<String>,
  pub processing_started: Option<DateTime<Utc>>,
  pub processing_ended: Option<DateTime<Utc>>,
  #[serde(default)]
  pub executed_nodes: Vec<ExecutedNode>,
}

impl WorkItem {
  pub fn new(name: impl Into<String>, library: Option<ObjectReference>) -> Self {
    let now = Utc::now();
    Self {
      uid: Uuid::new_v4(),
      name: name.into(),
      library,
      order: 0,
      original_size: 0,
      final_size: None,
      created: now,
      modified: now,
      reprocess: false,
      status: FileStatus::Unprocessed,
      fail_reason: None,
      processing_started: None,
      processing_ended: None,
      executed_nodes: Vec::new(),
    }
  }

  pub fn library_uid(&self) -> Option<Uuid> {
    self.library.as_ref().map(|l| l.uid)
  }

  /// Whether the server may hand this item to a node.
  pub fn is_queued(&self) -> bool {
    self.status == FileStatus::Unprocessed || self.reprocess
  }

  /// Return the item to the queue, dropping the previous run's history.
  pub fn reset(&mut self) {
    self.status = FileStatus::Unprocessed;
    self.fail_reason = None;
    self.final_size = None;
    self.processing_started = None;
    self.processing_ended = None;
    self.executed_nodes.clear();
  }
}
