//! Processing node lifecycle.
//!
//! ```text
//! Node
//!   ├── upstream RpcChannel (TCP to the server)
//!   │     serves StartRunner / AbortRunner / RunnerStatus
//!   └── RunnerSupervisor
//!         └── RunnerSession (per file) ── runner process over a Unix socket
//! ```
//!
//! # Lifecycle
//!
//! 1. Connect to the server and open the upstream channel
//! 2. Register with `RegisterNode`
//! 3. Serve the server's requests until cancelled or disconnected
//! 4. Abort every runner, wait for them to report, close the channel

use std::{
  path::PathBuf,
  sync::{Arc, OnceLock},
  time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::{net::TcpStream, signal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod session;
pub mod supervisor;

#[cfg(test)]
mod __tests__;

pub use session::RunnerSession;
pub use supervisor::{Launcher, ProcessLauncher, RunnerProcess, RunnerSupervisor, SupervisorConfig, SupervisorError};

use crate::{
  domain::{
    config::Config,
    runner::{ProcessingNode, RunnerInfo, RunnerParameters},
  },
  ipc::{self, ChannelConfig, HandlerError, HandlerRegistry, IpcError, Method, RpcChannel},
};

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
  #[error("Failed to connect to server at {address}: {source}")]
  Connect {
    address: String,
    #[source]
    source: std::io::Error,
  },
  #[error("Timed out connecting to server at {0}")]
  ConnectTimeout(String),
  #[error("Registration failed: {0}")]
  Registration(#[source] IpcError),
  #[error("Lost connection to server")]
  Disconnected,
}

/// Hello sent to the server after connecting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeRegistration {
  pub name: String,
  pub max_runners: usize,
  pub version: String,
}

pub struct Node {
  config: Config,
  launcher: Arc<dyn Launcher>,
}

impl Node {
  pub fn new(config: Config, launcher: Arc<dyn Launcher>) -> Self {
    Self { config, launcher }
  }

  /// Run until ctrl-c.
  pub async fn run_until_signal(self) -> Result<(), NodeError> {
    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    ipc::detach("ctrl-c listener", async move {
      signal::ctrl_c().await?;
      info!("Received ctrl-c, shutting down...");
      cancel_for_signal.cancel();
      Ok::<_, std::io::Error>(())
    });
    self.run(cancel).await
  }

  /// Run until `cancel` fires or the server goes away.
  pub async fn run(self, cancel: CancellationToken) -> Result<(), NodeError> {
    let address = self.config.node.server_address.clone();
    info!(node = %self.config.node.name, server = %address, "Starting processing node");

    let stream = tokio::time::timeout(self.config.node.connect_timeout(), TcpStream::connect(&address))
      .await
      .map_err(|_| NodeError::ConnectTimeout(address.clone()))?
      .map_err(|source| NodeError::Connect {
        address: address.clone(),
        source,
      })?;
    if let Err(e) = stream.set_nodelay(true) {
      debug!(error = %e, "Failed to set TCP_NODELAY");
    }

    let slot = Arc::new(OnceLock::new());
    let upstream = RpcChannel::new(
      stream,
      Arc::new(server_requests(Arc::clone(&slot))),
      ChannelConfig::from_rpc("upstream", &self.config.rpc),
    );

    let supervisor = RunnerSupervisor::new(
      SupervisorConfig::from_config(&self.config),
      Arc::clone(&self.launcher),
      upstream.clone(),
      cancel.child_token(),
    );
    if slot.set(Arc::clone(&supervisor)).is_err() {
      debug!("Supervisor already installed");
    }

    let registration = NodeRegistration {
      name: self.config.node.name.clone(),
      max_runners: self.config.node.max_runners,
      version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let node: ProcessingNode = upstream
      .call(Method::RegisterNode, (&registration,))
      .await
      .map_err(NodeError::Registration)?;
    info!(node = %node.name, uid = %node.uid, enabled = node.enabled, "Registered with server");

    let result = tokio::select! {
      _ = cancel.cancelled() => {
        info!("Node shutting down (cancelled)");
        Ok(())
      }
      _ = upstream.closed() => {
        warn!("Server connection lost");
        Err(NodeError::Disconnected)
      }
    };

    cancel.cancel();
    let grace = self.config.node.abort_grace() + Duration::from_secs(2);
    supervisor.shutdown_all(grace).await;
    upstream.close().await;

    info!("Node shutdown complete");
    result
  }
}

/// Requests the server sends to the node.
///
/// The supervisor needs the upstream channel and the channel needs these
/// handlers, so the supervisor is installed into `slot` right after the
/// channel is created.
pub fn server_requests(slot: Arc<OnceLock<Arc<RunnerSupervisor>>>) -> HandlerRegistry {
  fn supervisor(slot: &OnceLock<Arc<RunnerSupervisor>>) -> Result<Arc<RunnerSupervisor>, HandlerError> {
    slot
      .get()
      .cloned()
      .ok_or_else(|| HandlerError::policy("Node is still starting"))
  }

  let mut registry = HandlerRegistry::new();

  let start = Arc::clone(&slot);
  registry.register(Method::StartRunner, move |(params,): (RunnerParameters,)| {
    let slot = Arc::clone(&start);
    async move {
      let supervisor = supervisor(&slot)?;
      supervisor.start(params).await.map_err(|e| match e {
        SupervisorError::AlreadyRunning(_) | SupervisorError::AtCapacity(_) | SupervisorError::ShuttingDown => {
          HandlerError::policy(e.to_string())
        }
        other => HandlerError::Internal(other.to_string()),
      })
    }
  });

  let abort = Arc::clone(&slot);
  registry.register(Method::AbortRunner, move |(uid,): (Uuid,)| {
    let slot = Arc::clone(&abort);
    async move { Ok::<_, HandlerError>(supervisor(&slot)?.abort(uid).await) }
  });

  registry.register(Method::RunnerStatus, move |(): ()| {
    let slot = Arc::clone(&slot);
    async move {
      let infos: Vec<RunnerInfo> = supervisor(&slot)?.status().await;
      Ok::<_, HandlerError>(infos)
    }
  });

  registry
}

/// Directory for node and runner log files.
pub fn log_dir(config: &Config) -> PathBuf {
  config
    .log
    .dir
    .clone()
    .unwrap_or_else(|| crate::dirs::default_data_dir().join("logs"))
}
