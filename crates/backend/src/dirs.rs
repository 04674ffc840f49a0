use std::path::PathBuf;

/// Get the default directory for runner sockets
pub fn default_socket_dir() -> PathBuf {
  // Try XDG_RUNTIME_DIR first, fallback to /tmp
  if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
    PathBuf::from(runtime_dir).join("fleetflow")
  } else {
    PathBuf::from(format!("/tmp/fleetflow-{}", current_uid()))
  }
}

#[cfg(unix)]
fn current_uid() -> u32 {
  unsafe { libc::getuid() }
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
  0
}

/// Socket path a runner connects back to.
pub fn runner_socket_path(socket_dir: &std::path::Path, runner_uid: &uuid::Uuid) -> PathBuf {
  socket_dir.join(format!("runner-{}.sock", runner_uid))
}

/// Get the default base path for FleetFlow data (logs, temp files)
///
/// Respects the following environment variables (in order of precedence):
/// 1. DATA_DIR - explicit data directory override
/// 2. XDG_DATA_HOME - standard XDG data home directory
/// 3. dirs::data_local_dir() - platform default
pub fn default_data_dir() -> PathBuf {
  // Check explicit override first
  if let Ok(dir) = std::env::var("DATA_DIR") {
    return PathBuf::from(dir);
  }

  // Check XDG_DATA_HOME
  if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
    return PathBuf::from(xdg_data).join("fleetflow");
  }

  // Fall back to platform default
  dirs::data_local_dir()
    .unwrap_or_else(|| PathBuf::from("."))
    .join("fleetflow")
}

/// Default directory for runner working files
pub fn default_temp_dir() -> PathBuf {
  std::env::temp_dir().join("fleetflow")
}
