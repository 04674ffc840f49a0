use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::HandlerContext;
use crate::{
  domain::runner::{LogLevel, NotificationSeverity, ProcessingNode, RunnerParameters},
  ipc::{HandlerError, HandlerRegistry, Method},
};

pub struct BasicHandler {
  ctx: HandlerContext,
}

impl BasicHandler {
  pub fn new(ctx: HandlerContext) -> Self {
    Self { ctx }
  }

  pub fn register(self: Arc<Self>, registry: &mut HandlerRegistry) {
    let this = Arc::clone(&self);
    registry.register(Method::GetRunnerParameters, move |(): ()| {
      let this = Arc::clone(&this);
      async move { Ok(this.get_runner_parameters().await) }
    });

    let this = Arc::clone(&self);
    registry.register(Method::GetNode, move |(): ()| {
      let this = Arc::clone(&this);
      async move { this.get_node().await }
    });

    let this = Arc::clone(&self);
    registry.register(
      Method::SendEmail,
      move |(to, subject, body): (Vec<String>, String, String)| {
        let this = Arc::clone(&this);
        async move { this.send_email(to, subject, body).await }
      },
    );

    let this = Arc::clone(&self);
    registry.register(
      Method::RecordNotification,
      move |(severity, title, message): (NotificationSeverity, String, String)| {
        let this = Arc::clone(&this);
        async move { this.record_notification(severity, title, message).await }
      },
    );

    let this = self;
    registry.register(Method::Log, move |(level, message): (LogLevel, String)| {
      this.log(level, &message);
      std::future::ready(Ok::<_, HandlerError>(()))
    });
  }

  /// Answered locally. The runner is considered running from here on.
  pub async fn get_runner_parameters(&self) -> RunnerParameters {
    self.ctx.session.mark_running().await;
    self.ctx.session.parameters().clone()
  }

  pub async fn get_node(&self) -> Result<ProcessingNode, HandlerError> {
    Ok(self.ctx.upstream.call(Method::GetNode, ()).await?)
  }

  pub async fn send_email(&self, to: Vec<String>, subject: String, body: String) -> Result<bool, HandlerError> {
    if to.is_empty() {
      return Err(HandlerError::validation("No recipients"));
    }
    Ok(self.ctx.upstream.call(Method::SendEmail, (to, subject, body)).await?)
  }

  pub async fn record_notification(
    &self,
    severity: NotificationSeverity,
    title: String,
    message: String,
  ) -> Result<(), HandlerError> {
    Ok(
      self
        .ctx
        .upstream
        .notify(Method::RecordNotification, (severity, title, message))
        .await?,
    )
  }

  pub fn log(&self, level: LogLevel, message: &str) {
    let runner = self.ctx.session.uid();
    match level {
      LogLevel::Debug => debug!(runner = %runner, "{}", message),
      LogLevel::Info => info!(runner = %runner, "{}", message),
      LogLevel::Warning => warn!(runner = %runner, "{}", message),
      LogLevel::Error => error!(runner = %runner, "{}", message),
    }
  }
}
