//! RunnerSupervisor - one runner process per in-flight file
//!
//! The supervisor owns every runner session on this node. For each
//! `StartRunner` it binds a private Unix socket, launches a runner process
//! pointed at it, accepts the runner's connection and serves its calls with
//! the node-side handlers. It then waits for the process to exit.
//!
//! # Invariants
//!
//! - At most one session per file, enforced through `DashMap`'s entry API
//! - At most `max_runners` sessions, enforced with a semaphore permit that
//!   lives as long as the session
//! - Every session ends with exactly one `RunnerFinished` upstream. A runner
//!   that never calls `Complete` is reported as lost
//!
//! # Abort
//!
//! Aborting a session sends `Abort` to the runner and gives it
//! `abort_grace` to exit on its own before the process is killed.

use std::{
  path::{Path, PathBuf},
  process::Stdio,
  sync::Arc,
  time::Duration,
};

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use tokio::{
  net::UnixListener,
  process::{Child, Command},
  sync::{OwnedSemaphorePermit, Semaphore},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::session::RunnerSession;
use crate::{
  dirs,
  domain::{
    config::{Config, RpcConfig},
    runner::{RunnerInfo, RunnerParameters},
  },
  ipc::{
    ChannelConfig, IpcError, Method, RpcChannel,
    handlers::{self, HandlerContext},
  },
  runner,
};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
  #[error("File {0} is already being processed")]
  AlreadyRunning(Uuid),
  #[error("All {0} runner slots are busy")]
  AtCapacity(usize),
  #[error("Node is shutting down")]
  ShuttingDown,
  #[error("Failed to prepare runner socket {path:?}: {source}")]
  Socket {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Failed to launch runner: {0}")]
  Launch(#[source] std::io::Error),
  #[error("Runner did not connect within {0}s")]
  ConnectTimeout(u64),
  #[error("Unexpected greeting {0:?}")]
  Handshake(String),
  #[error("IPC error: {0}")]
  Ipc(#[from] IpcError),
}

// ============================================================================
// Runner processes
// ============================================================================

/// A launched runner, as far as the supervisor needs to know.
#[async_trait]
pub trait RunnerProcess: Send {
  fn id(&self) -> Option<u32>;

  /// Wait for exit. Returns the exit code when there is one.
  async fn wait(&mut self) -> std::io::Result<Option<i32>>;

  async fn kill(&mut self) -> std::io::Result<()>;
}

/// Starts runner processes.
#[async_trait]
pub trait Launcher: Send + Sync {
  async fn launch(&self, socket: &Path, runner_uid: Uuid) -> std::io::Result<Box<dyn RunnerProcess>>;
}

#[async_trait]
impl RunnerProcess for Child {
  fn id(&self) -> Option<u32> {
    Child::id(self)
  }

  async fn wait(&mut self) -> std::io::Result<Option<i32>> {
    Ok(Child::wait(self).await?.code())
  }

  async fn kill(&mut self) -> std::io::Result<()> {
    Child::kill(self).await
  }
}

/// Launches `<program> runner --socket <path> --uid <uid>`.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
  program: PathBuf,
  config: Option<PathBuf>,
}

impl ProcessLauncher {
  pub fn new(program: PathBuf) -> Self {
    Self { program, config: None }
  }

  /// Re-launch the current executable.
  pub fn current_exe() -> std::io::Result<Self> {
    Ok(Self::new(std::env::current_exe()?))
  }

  /// Pass `--config <path>` to every runner.
  pub fn with_config(mut self, path: Option<PathBuf>) -> Self {
    self.config = path;
    self
  }
}

#[async_trait]
impl Launcher for ProcessLauncher {
  async fn launch(&self, socket: &Path, runner_uid: Uuid) -> std::io::Result<Box<dyn RunnerProcess>> {
    let mut command = Command::new(&self.program);
    if let Some(config) = &self.config {
      command.arg("--config").arg(config);
    }
    let child = command
      .arg("runner")
      .arg("--socket")
      .arg(socket)
      .arg("--uid")
      .arg(runner_uid.to_string())
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .kill_on_drop(true)
      .spawn()?;
    Ok(Box::new(child))
  }
}

// ============================================================================
// Supervisor
// ============================================================================

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
  pub socket_dir: PathBuf,
  /// Parent of per-runner temp dirs when the server does not assign one
  pub temp_dir: PathBuf,
  pub max_runners: usize,
  /// Step ceiling when the server does not set one
  pub max_steps: u32,
  pub connect_timeout: Duration,
  pub abort_grace: Duration,
  pub rpc: RpcConfig,
}

impl SupervisorConfig {
  pub fn from_config(config: &Config) -> Self {
    Self {
      socket_dir: config.node.socket_dir.clone().unwrap_or_else(dirs::default_socket_dir),
      temp_dir: config.node.temp_dir.clone().unwrap_or_else(dirs::default_temp_dir),
      max_runners: config.node.max_runners.max(1),
      max_steps: config.node.max_steps.max(1),
      connect_timeout: config.node.connect_timeout(),
      abort_grace: config.node.abort_grace(),
      rpc: config.rpc.clone(),
    }
  }
}

pub struct RunnerSupervisor {
  /// Live sessions keyed by file uid
  sessions: DashMap<Uuid, Arc<RunnerSession>>,
  slots: Arc<Semaphore>,
  config: SupervisorConfig,
  launcher: Arc<dyn Launcher>,
  upstream: RpcChannel,
  cancel: CancellationToken,
}

impl RunnerSupervisor {
  pub fn new(
    config: SupervisorConfig,
    launcher: Arc<dyn Launcher>,
    upstream: RpcChannel,
    cancel: CancellationToken,
  ) -> Arc<Self> {
    Arc::new(Self {
      sessions: DashMap::new(),
      slots: Arc::new(Semaphore::new(config.max_runners)),
      config,
      launcher,
      upstream,
      cancel,
    })
  }

  /// Start a runner for `params.file`.
  ///
  /// Returns once the runner process has been launched. Connection, serving
  /// and reporting continue in the background.
  pub async fn start(self: &Arc<Self>, mut params: RunnerParameters) -> Result<RunnerInfo, SupervisorError> {
    if self.cancel.is_cancelled() {
      return Err(SupervisorError::ShuttingDown);
    }

    if params.max_steps == 0 {
      params.max_steps = self.config.max_steps;
    }
    let owned_temp = params.temp_path.is_empty().then(|| self.config.temp_dir.join(params.uid.to_string()));
    if let Some(temp) = &owned_temp {
      params.temp_path = temp.display().to_string();
    }

    let permit = Arc::clone(&self.slots)
      .try_acquire_owned()
      .map_err(|_| SupervisorError::AtCapacity(self.config.max_runners))?;

    let file_uid = params.file.uid;
    let session = RunnerSession::new(params);
    match self.sessions.entry(file_uid) {
      Entry::Occupied(_) => return Err(SupervisorError::AlreadyRunning(file_uid)),
      Entry::Vacant(vacant) => {
        vacant.insert(Arc::clone(&session));
      }
    }

    let socket = dirs::runner_socket_path(&self.config.socket_dir, &session.uid());
    let launched = self.launch(&session, &socket).await;
    let (listener, process) = match launched {
      Ok(launched) => launched,
      Err(e) => {
        self.sessions.remove(&file_uid);
        remove_socket(&socket).await;
        return Err(e);
      }
    };

    info!(
      runner = %session.uid(),
      file = %session.parameters().file.name,
      pid = ?session.pid(),
      "Runner launched"
    );

    let info = session.info().await;
    let supervisor = Arc::clone(self);
    tokio::spawn(async move {
      supervisor.supervise(session, listener, process, socket, permit).await;
      if let Some(temp) = owned_temp
        && let Err(e) = tokio::fs::remove_dir_all(&temp).await
        && e.kind() != std::io::ErrorKind::NotFound
      {
        debug!(path = %temp.display(), error = %e, "Failed to remove runner temp dir");
      }
    });
    Ok(info)
  }

  async fn launch(
    &self,
    session: &RunnerSession,
    socket: &Path,
  ) -> Result<(UnixListener, Box<dyn RunnerProcess>), SupervisorError> {
    let socket_error = |source| SupervisorError::Socket {
      path: socket.to_path_buf(),
      source,
    };

    if let Some(parent) = socket.parent() {
      tokio::fs::create_dir_all(parent).await.map_err(socket_error)?;
    }
    // stale socket from a crashed runner with the same uid
    if tokio::fs::try_exists(socket).await.unwrap_or(false) {
      tokio::fs::remove_file(socket).await.map_err(socket_error)?;
    }
    let listener = UnixListener::bind(socket).map_err(socket_error)?;

    let process = self
      .launcher
      .launch(socket, session.uid())
      .await
      .map_err(SupervisorError::Launch)?;
    if let Some(pid) = process.id() {
      session.set_pid(pid);
    }
    Ok((listener, process))
  }

  /// Drive one session from connection to report, then release it.
  async fn supervise(
    self: Arc<Self>,
    session: Arc<RunnerSession>,
    listener: UnixListener,
    mut process: Box<dyn RunnerProcess>,
    socket: PathBuf,
    _permit: OwnedSemaphorePermit,
  ) {
    let channel = self.drive(&session, listener, process.as_mut()).await;
    if let Some(channel) = &channel {
      channel.close().await;
    }

    if let Some(finished) = session.lost().await {
      warn!(runner = %finished.uid, outcome = ?finished.outcome, "Runner ended without reporting");
      let info = session.info().await;
      if let Err(e) = self.upstream.notify(Method::RunnerUpdate, (&info,)).await {
        debug!(runner = %info.uid, error = %e, "Failed to push final update");
      }
      if let Err(e) = self.upstream.call::<(), _>(Method::RunnerFinished, (&finished,)).await {
        error!(runner = %finished.uid, error = %e, "Failed to report finished runner");
      }
    }

    self.sessions.remove(&session.file_uid());
    remove_socket(&socket).await;
    debug!(runner = %session.uid(), "Session released");
  }

  async fn drive(
    &self,
    session: &Arc<RunnerSession>,
    listener: UnixListener,
    process: &mut dyn RunnerProcess,
  ) -> Option<RpcChannel> {
    let abort = session.abort_token();

    let connected = tokio::select! {
      accepted = self.accept(session, &listener) => Some(accepted),
      status = process.wait() => {
        warn!(runner = %session.uid(), status = ?status, "Runner exited before connecting");
        return None;
      }
      _ = abort.cancelled() => None,
      _ = self.cancel.cancelled() => None,
    };
    drop(listener);

    let channel = match connected {
      Some(Ok(channel)) => channel,
      Some(Err(e)) => {
        warn!(runner = %session.uid(), error = %e, "Runner failed to connect");
        kill(session, process).await;
        return None;
      }
      None => {
        session.begin_abort().await;
        kill(session, process).await;
        return None;
      }
    };
    session.attach_channel(channel.clone());

    tokio::select! {
      status = process.wait() => {
        match status {
          Ok(code) => debug!(runner = %session.uid(), ?code, "Runner exited"),
          Err(e) => warn!(runner = %session.uid(), error = %e, "Failed to wait for runner"),
        }
        return Some(channel);
      }
      _ = channel.closed() => {
        debug!(runner = %session.uid(), "Runner channel closed");
      }
      _ = abort.cancelled() => {
        self.send_abort(session, &channel).await;
      }
      _ = self.cancel.cancelled() => {
        session.begin_abort().await;
        self.send_abort(session, &channel).await;
      }
    }

    match tokio::time::timeout(self.config.abort_grace, process.wait()).await {
      Ok(status) => debug!(runner = %session.uid(), status = ?status, "Runner exited"),
      Err(_) => {
        warn!(
          runner = %session.uid(),
          grace_secs = self.config.abort_grace.as_secs(),
          "Runner did not exit in time"
        );
        kill(session, process).await;
      }
    }
    Some(channel)
  }

  async fn accept(&self, session: &Arc<RunnerSession>, listener: &UnixListener) -> Result<RpcChannel, SupervisorError> {
    let limit = self.config.connect_timeout;
    let (stream, _) = tokio::time::timeout(limit, listener.accept())
      .await
      .map_err(|_| SupervisorError::ConnectTimeout(limit.as_secs()))?
      .map_err(IpcError::from)?;

    let registry = handlers::registry(HandlerContext::new(Arc::clone(session), self.upstream.clone()));
    let config = ChannelConfig::from_rpc(format!("runner-{}", session.uid()), &self.config.rpc);
    let (channel, greeting) = RpcChannel::accept(stream, Arc::new(registry), config).await?;

    if greeting != runner::greeting(session.uid()) {
      channel.close().await;
      return Err(SupervisorError::Handshake(greeting));
    }
    debug!(runner = %session.uid(), "Runner connected");
    Ok(channel)
  }

  async fn send_abort(&self, session: &RunnerSession, channel: &RpcChannel) {
    info!(runner = %session.uid(), "Aborting runner");
    if let Err(e) = channel.send_abort().await {
      debug!(runner = %session.uid(), error = %e, "Failed to send abort");
    }
  }

  // ==========================================================================
  // Queries and control
  // ==========================================================================

  /// Abort the runner with uid `runner_uid`. Returns false if it is unknown
  /// or already aborting.
  pub async fn abort(&self, runner_uid: Uuid) -> bool {
    let Some(session) = self.find(runner_uid) else {
      debug!(runner = %runner_uid, "Abort for unknown runner");
      return false;
    };
    session.begin_abort().await
  }

  pub fn find(&self, runner_uid: Uuid) -> Option<Arc<RunnerSession>> {
    self
      .sessions
      .iter()
      .find(|entry| entry.value().uid() == runner_uid)
      .map(|entry| Arc::clone(entry.value()))
  }

  pub fn is_processing(&self, file_uid: &Uuid) -> bool {
    self.sessions.contains_key(file_uid)
  }

  /// Files currently being processed.
  pub fn in_flight(&self) -> Vec<Uuid> {
    self.sessions.iter().map(|entry| *entry.key()).collect()
  }

  pub fn active(&self) -> usize {
    self.sessions.len()
  }

  pub async fn status(&self) -> Vec<RunnerInfo> {
    let sessions: Vec<Arc<RunnerSession>> = self.sessions.iter().map(|e| Arc::clone(e.value())).collect();
    let mut infos = Vec::with_capacity(sessions.len());
    for session in sessions {
      infos.push(session.info().await);
    }
    infos
  }

  /// Abort every session and wait until all of them have been released.
  pub async fn shutdown_all(&self, timeout: Duration) {
    let sessions: Vec<Arc<RunnerSession>> = self.sessions.iter().map(|e| Arc::clone(e.value())).collect();
    if sessions.is_empty() {
      return;
    }

    info!(count = sessions.len(), "Aborting all runners");
    futures::future::join_all(sessions.iter().map(|s| s.begin_abort())).await;

    let deadline = tokio::time::Instant::now() + timeout;
    while !self.sessions.is_empty() && tokio::time::Instant::now() < deadline {
      tokio::time::sleep(Duration::from_millis(50)).await;
    }
    if !self.sessions.is_empty() {
      warn!(remaining = self.sessions.len(), "Runners still active at shutdown");
    }
  }
}

async fn kill(session: &RunnerSession, process: &mut dyn RunnerProcess) {
  if let Err(e) = process.kill().await {
    debug!(runner = %session.uid(), error = %e, "Failed to kill runner");
  }
}

async fn remove_socket(socket: &Path) {
  if let Err(e) = tokio::fs::remove_file(socket).await
    && e.kind() != std::io::ErrorKind::NotFound
  {
    debug!(socket = %socket.display(), error = %e, "Failed to remove runner socket");
  }
}
