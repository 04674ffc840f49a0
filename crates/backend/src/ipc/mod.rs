//! IPC module - correlated RPC between runner, node and server
//!
//! Every hop (runner ↔ node over a per-runner Unix socket, node ↔ server over
//! TCP) uses the same [`RpcChannel`]: line-delimited JSON frames, requests
//! correlated by id, notifications without one, and an intercepted `Abort`.
//!
//! - [`protocol`]: wire envelopes
//! - [`method`]: method names
//! - [`registry`]: inbound method table
//! - [`proxy`]: typed callers used inside the runner
//! - [`handlers`]: node-side services answering the proxies
use std::future::Future;

use tokio::task::JoinHandle;
use tracing::warn;

pub mod channel;
pub mod handlers;
pub mod method;
pub mod protocol;
pub mod proxy;
pub mod registry;

#[cfg(test)]
pub(crate) mod __tests__;

pub use channel::{ChannelConfig, RpcChannel};
pub use method::Method;
pub use protocol::{Frame, Request, Response};
pub use registry::{HandlerError, HandlerRegistry};

#[derive(Debug, Clone, thiserror::Error)]
pub enum IpcError {
  #[error("Ser/de error: {0}")]
  Serde(String),
  /// The peer answered with a populated `Error` field.
  #[error("Remote error: {0}")]
  Remote(String),
  #[error("IO error: {0}")]
  Io(String),
  #[error("Connection error: {0}")]
  Connection(String),
  #[error("Codec error: {0}")]
  Codec(String),
  #[error("{method} timed out after {secs}s")]
  Timeout { method: String, secs: u64 },
  #[error("Handshake failed: {0}")]
  Handshake(String),
}

impl IpcError {
  pub fn closed() -> Self {
    IpcError::Connection("connection closed".into())
  }

  /// Transport level failures end the unit of work that owns the channel.
  pub fn is_transport(&self) -> bool {
    matches!(
      self,
      IpcError::Connection(_) | IpcError::Io(_) | IpcError::Codec(_) | IpcError::Handshake(_)
    )
  }
}

impl From<serde_json::Error> for IpcError {
  fn from(err: serde_json::Error) -> Self {
    IpcError::Serde(err.to_string())
  }
}

impl From<std::io::Error> for IpcError {
  fn from(err: std::io::Error) -> Self {
    IpcError::Io(err.to_string())
  }
}

impl From<tokio_util::codec::LinesCodecError> for IpcError {
  fn from(err: tokio_util::codec::LinesCodecError) -> Self {
    match err {
      tokio_util::codec::LinesCodecError::Io(e) => IpcError::Io(e.to_string()),
      other => IpcError::Codec(other.to_string()),
    }
  }
}

/// Run `fut` in the background, logging its failure instead of dropping it.
pub fn detach<F, E>(what: &'static str, fut: F) -> JoinHandle<()>
where
  F: Future<Output = Result<(), E>> + Send + 'static,
  E: std::fmt::Display,
{
  tokio::spawn(async move {
    if let Err(e) = fut.await {
      warn!(task = what, error = %e, "Detached task failed");
    }
  })
}
