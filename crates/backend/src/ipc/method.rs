//! Method names carried in the `Method` field of a request.
//!
//! Each end of a channel registers handlers and issues calls by these names.

use serde::{Deserialize, Serialize};

/// Every method name used on runner and node channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
  // Control (intercepted by the channel)
  Abort,
  // Basic
  GetRunnerParameters,
  GetNode,
  SendEmail,
  RecordNotification,
  Log,
  // Cache
  GetJson,
  StoreJson,
  // Library file
  UpdateLibraryFile,
  ExistsOnServer,
  LibraryIgnorePath,
  UploadThumbnail,
  // Runner info
  StartStep,
  UpdatePartPercentage,
  SetAdditionalInfo,
  Complete,
  // Statistics
  RecordRunningTotal,
  RecordAverage,
  // Node → server
  RegisterNode,
  RunnerUpdate,
  RunnerFinished,
  // Server → node
  StartRunner,
  AbortRunner,
  RunnerStatus,
}

impl Method {
  pub fn as_str(self) -> &'static str {
    match self {
      Method::Abort => "Abort",
      Method::GetRunnerParameters => "GetRunnerParameters",
      Method::GetNode => "GetNode",
      Method::SendEmail => "SendEmail",
      Method::RecordNotification => "RecordNotification",
      Method::Log => "Log",
      Method::GetJson => "GetJson",
      Method::StoreJson => "StoreJson",
      Method::UpdateLibraryFile => "UpdateLibraryFile",
      Method::ExistsOnServer => "ExistsOnServer",
      Method::LibraryIgnorePath => "LibraryIgnorePath",
      Method::UploadThumbnail => "UploadThumbnail",
      Method::StartStep => "StartStep",
      Method::UpdatePartPercentage => "UpdatePartPercentage",
      Method::SetAdditionalInfo => "SetAdditionalInfo",
      Method::Complete => "Complete",
      Method::RecordRunningTotal => "RecordRunningTotal",
      Method::RecordAverage => "RecordAverage",
      Method::RegisterNode => "RegisterNode",
      Method::RunnerUpdate => "RunnerUpdate",
      Method::RunnerFinished => "RunnerFinished",
      Method::StartRunner => "StartRunner",
      Method::AbortRunner => "AbortRunner",
      Method::RunnerStatus => "RunnerStatus",
    }
  }
}

impl AsRef<str> for Method {
  fn as_ref(&self) -> &str {
    self.as_str()
  }
}

impl std::fmt::Display for Method {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}
