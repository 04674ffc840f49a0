//! Node-side services answering the runner's proxies.
//!
//! Handlers get their dependencies injected: the runner's session and the
//! node's upstream channel to the server. Calls the node can answer itself
//! are answered from the session; everything else is relayed upstream.

mod basic;
mod cache;
mod library_file;
mod runner_info;
mod statistics;

use std::sync::Arc;

pub use basic::BasicHandler;
pub use cache::CacheHandler;
pub use library_file::LibraryFileHandler;
pub use runner_info::RunnerInfoHandler;
pub use statistics::StatisticsHandler;
use tracing::warn;

use super::{HandlerRegistry, Method, RpcChannel};
use crate::{domain::runner::RunnerInfo, node::session::RunnerSession};

/// Dependencies shared by every handler of one runner.
#[derive(Debug, Clone)]
pub struct HandlerContext {
  pub session: Arc<RunnerSession>,
  pub upstream: RpcChannel,
}

impl HandlerContext {
  pub fn new(session: Arc<RunnerSession>, upstream: RpcChannel) -> Self {
    Self { session, upstream }
  }

  /// Push a progress snapshot to the server.
  ///
  /// A failed push is logged only; progress is advisory and the next change
  /// sends a full snapshot again.
  pub(crate) async fn push_update(&self, info: &RunnerInfo) {
    if let Err(e) = self.upstream.notify(Method::RunnerUpdate, (info,)).await {
      warn!(runner = %info.uid, error = %e, "Failed to push runner update");
    }
  }
}

/// Registry serving every runner-facing method for one session.
pub fn registry(ctx: HandlerContext) -> HandlerRegistry {
  let mut registry = HandlerRegistry::new();
  Arc::new(BasicHandler::new(ctx.clone())).register(&mut registry);
  Arc::new(CacheHandler::new(ctx.clone())).register(&mut registry);
  Arc::new(LibraryFileHandler::new(ctx.clone())).register(&mut registry);
  Arc::new(RunnerInfoHandler::new(ctx.clone())).register(&mut registry);
  Arc::new(StatisticsHandler::new(ctx)).register(&mut registry);
  registry
}
