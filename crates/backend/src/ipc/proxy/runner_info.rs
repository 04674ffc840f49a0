use crate::{
  domain::runner::{RunOutcome, RunnerInfo},
  ipc::{IpcError, Method, RpcChannel},
};

/// Progress reporting for the current run.
#[derive(Debug, Clone)]
pub struct RunnerInfoProxy {
  channel: RpcChannel,
}

impl RunnerInfoProxy {
  pub fn new(channel: RpcChannel) -> Self {
    Self { channel }
  }

  /// Announce the next step. Fails once the node's step ceiling is reached.
  pub async fn start_step(&self, name: &str, counts_towards_total: bool) -> Result<RunnerInfo, IpcError> {
    self.channel.call(Method::StartStep, (name, counts_towards_total)).await
  }

  pub async fn update_part_percentage(&self, percent: f32) -> Result<(), IpcError> {
    self.channel.notify(Method::UpdatePartPercentage, (percent,)).await
  }

  /// Show `value` under `key` for the next `steps` steps.
  pub async fn set_additional_info(&self, key: &str, value: &str, steps: u32) -> Result<(), IpcError> {
    self
      .channel
      .notify(Method::SetAdditionalInfo, (key, value, steps))
      .await
  }

  pub async fn complete(&self, outcome: &RunOutcome) -> Result<(), IpcError> {
    self.channel.call(Method::Complete, (outcome,)).await
  }
}
