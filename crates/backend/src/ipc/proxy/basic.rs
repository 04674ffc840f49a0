use crate::{
  domain::runner::{LogLevel, NotificationSeverity, ProcessingNode, RunnerParameters},
  ipc::{IpcError, Method, RpcChannel},
};

#[derive(Debug, Clone)]
pub struct BasicProxy {
  channel: RpcChannel,
}

impl BasicProxy {
  pub fn new(channel: RpcChannel) -> Self {
    Self { channel }
  }

  /// First call a runner makes after connecting.
  pub async fn get_runner_parameters(&self) -> Result<RunnerParameters, IpcError> {
    self.channel.call(Method::GetRunnerParameters, ()).await
  }

  pub async fn get_node(&self) -> Result<ProcessingNode, IpcError> {
    self.channel.call(Method::GetNode, ()).await
  }

  /// Returns whether the server accepted the email for delivery.
  pub async fn send_email(&self, to: &[String], subject: &str, body: &str) -> Result<bool, IpcError> {
    self.channel.call(Method::SendEmail, (to, subject, body)).await
  }

  pub async fn record_notification(
    &self,
    severity: NotificationSeverity,
    title: &str,
    message: &str,
  ) -> Result<(), IpcError> {
    self
      .channel
      .call(Method::RecordNotification, (severity, title, message))
      .await
  }

  /// Forward a log line to the node's log. Fire-and-forget.
  pub async fn log(&self, level: LogLevel, message: &str) -> Result<(), IpcError> {
    self.channel.notify(Method::Log, (level, message)).await
  }
}
