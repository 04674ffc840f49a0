//! Configuration system for FleetFlow nodes and runners.
//!
//! Config priority: explicit path > user (~/.config/fleetflow/config.toml) > defaults

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Failed to read config {path:?}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Invalid config {path:?}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
}

// ============================================================================
// Node Configuration
// ============================================================================

/// Processing node settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
  /// Display name reported to the server (default: hostname)
  pub name: String,

  /// Address of the central server's node endpoint
  pub server_address: String,

  /// Directory holding the per-runner sockets
  /// If not set, uses the runtime dir (see `dirs::default_socket_dir`)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub socket_dir: Option<PathBuf>,

  /// Directory for runner working files
  #[serde(skip_serializing_if = "Option::is_none")]
  pub temp_dir: Option<PathBuf>,

  /// Maximum concurrently running runners on this node (default: 2)
  pub max_runners: usize,

  /// Ceiling on executed steps per file (default: 50, at least 1)
  pub max_steps: u32,

  /// Seconds a runner gets to exit after Abort before it is killed (default: 10)
  pub abort_grace_secs: u64,

  /// Seconds to wait for a spawned runner to connect (default: 30)
  pub connect_timeout_secs: u64,
}

impl Default for NodeConfig {
  fn default() -> Self {
    Self {
      name: default_node_name(),
      server_address: "127.0.0.1:5151".to_string(),
      socket_dir: None,
      temp_dir: None,
      max_runners: 2,
      max_steps: 50,
      abort_grace_secs: 10,
      connect_timeout_secs: 30,
    }
  }
}

fn default_node_name() -> String {
  std::env::var("HOSTNAME").unwrap_or_else(|_| "fleetflow-node".to_string())
}

impl NodeConfig {
  pub fn abort_grace(&self) -> Duration {
    Duration::from_secs(self.abort_grace_secs)
  }

  pub fn connect_timeout(&self) -> Duration {
    Duration::from_secs(self.connect_timeout_secs)
  }
}

// ============================================================================
// RPC Configuration
// ============================================================================

/// Settings shared by every RPC channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
  /// Seconds a request waits for its response (0 = wait forever)
  /// Default: 300
  pub call_timeout_secs: u64,

  /// Maximum size of a single frame in bytes
  /// Thumbnails travel base64 encoded, so keep this generous.
  /// Default: 16 MiB
  pub max_frame_bytes: usize,
}

impl Default for RpcConfig {
  fn default() -> Self {
    Self {
      call_timeout_secs: 300,
      max_frame_bytes: 16 * 1024 * 1024,
    }
  }
}

impl RpcConfig {
  pub fn call_timeout(&self) -> Option<Duration> {
    (self.call_timeout_secs > 0).then(|| Duration::from_secs(self.call_timeout_secs))
  }
}

// ============================================================================
// Queue Configuration
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  /// Use library priority/processing order when ranking files (default: false)
  pub advanced: bool,
}

// ============================================================================
// Log Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Log level: "off", "error", "warn", "info", "debug", "trace"
  /// Default: "info"
  pub level: String,

  /// Log file rotation: "daily", "hourly", "never"
  /// Default: "daily"
  pub rotation: String,

  /// Log directory (default: data dir)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      rotation: "daily".to_string(),
      dir: None,
    }
  }
}

// ============================================================================
// Root
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub node: NodeConfig,
  pub rpc: RpcConfig,
  pub queue: QueueConfig,
  pub log: LogConfig,
}

impl Config {
  /// Load from an explicit path. Unlike [`Config::load_global`], errors are reported.
  pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Load the user config, falling back to defaults.
  pub fn load_global() -> Self {
    if let Some(user_config_path) = Self::user_config_path()
      && user_config_path.exists()
    {
      match Self::load_from(&user_config_path) {
        Ok(config) => return config,
        Err(e) => tracing::warn!("Ignoring user config: {}", e),
      }
    }

    Self::default()
  }

  /// Load `path` if given, otherwise the user config.
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    match path {
      Some(path) => Self::load_from(path),
      None => Ok(Self::load_global()),
    }
  }

  pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CONFIG_DIR") {
      return Some(PathBuf::from(path).join("config.toml"));
    }

    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
      return Some(PathBuf::from(path).join("fleetflow").join("config.toml"));
    }

    dirs::config_dir().map(|p: PathBuf| p.join("fleetflow").join("config.toml"))
  }

  /// Commented default config file.
  pub fn generate_template() -> String {
    let defaults = Self::default();
    format!(
      r#"# FleetFlow Configuration
# Place in ~/.config/fleetflow/config.toml or pass --config

# ============================================================================
# Processing Node
# ============================================================================

[node]
# Name reported to the server
# name = "{name}"

# Central server node endpoint
server_address = "{server_address}"

# Concurrent runners on this node
max_runners = {max_runners}

# Executed steps allowed per file before the run is failed
max_steps = {max_steps}

# Seconds a runner has to exit after an abort before it is killed
abort_grace_secs = {abort_grace_secs}

# Seconds to wait for a spawned runner to connect back
connect_timeout_secs = {connect_timeout_secs}

# socket_dir = "/run/user/1000/fleetflow"
# temp_dir = "/tmp/fleetflow"

# ============================================================================
# RPC
# ============================================================================

[rpc]
# Seconds a request waits for its response (0 = wait forever)
call_timeout_secs = {call_timeout_secs}

# Largest accepted frame in bytes
max_frame_bytes = {max_frame_bytes}

# ============================================================================
# Queue
# ============================================================================

[queue]
# Rank files by library priority and processing order
advanced = {advanced}

# ============================================================================
# Logging
# ============================================================================

[log]
# off, error, warn, info, debug, trace (RUST_LOG overrides)
level = "{level}"

# daily, hourly, never
rotation = "{rotation}"
"#,
      name = defaults.node.name,
      server_address = defaults.node.server_address,
      max_runners = defaults.node.max_runners,
      max_steps = defaults.node.max_steps,
      abort_grace_secs = defaults.node.abort_grace_secs,
      connect_timeout_secs = defaults.node.connect_timeout_secs,
      call_timeout_secs = defaults.rpc.call_timeout_secs,
      max_frame_bytes = defaults.rpc.max_frame_bytes,
      advanced = defaults.queue.advanced,
      level = defaults.log.level,
      rotation = defaults.log.rotation,
    )
  }
}
