use crate::ipc::{IpcError, Method, RpcChannel};

#[derive(Debug, Clone)]
pub struct StatisticsProxy {
  channel: RpcChannel,
}

impl StatisticsProxy {
  pub fn new(channel: RpcChannel) -> Self {
    Self { channel }
  }

  /// Count one occurrence of `value` under `name` (e.g. a codec name).
  pub async fn record_running_total(&self, name: &str, value: &str) -> Result<(), IpcError> {
    self.channel.notify(Method::RecordRunningTotal, (name, value)).await
  }

  /// Add `value` to the average tracked under `name`.
  pub async fn record_average(&self, name: &str, value: i64) -> Result<(), IpcError> {
    self.channel.notify(Method::RecordAverage, (name, value)).await
  }
}
