//! Runner-side typed callers.
//!
//! Each proxy wraps the runner's channel to its node and turns one method
//! domain into plain async functions. Proxies are cheap to clone.

mod basic;
mod cache;
mod library_file;
mod runner_info;
mod statistics;

pub use basic::BasicProxy;
pub use cache::CacheProxy;
pub use library_file::LibraryFileProxy;
pub use runner_info::RunnerInfoProxy;
pub use statistics::StatisticsProxy;

use super::RpcChannel;

/// All proxies over one channel.
#[derive(Debug, Clone)]
pub struct Proxies {
  pub basic: BasicProxy,
  pub cache: CacheProxy,
  pub library_file: LibraryFileProxy,
  pub runner_info: RunnerInfoProxy,
  pub statistics: StatisticsProxy,
}

impl Proxies {
  pub fn new(channel: &RpcChannel) -> Self {
    Self {
      basic: BasicProxy::new(channel.clone()),
      cache: CacheProxy::new(channel.clone()),
      library_file: LibraryFileProxy::new(channel.clone()),
      runner_info: RunnerInfoProxy::new(channel.clone()),
      statistics: StatisticsProxy::new(channel.clone()),
    }
  }
}
