use std::sync::Arc;

use super::HandlerContext;
use crate::ipc::{HandlerError, HandlerRegistry, Method};

/// Relays statistics to the server. Both methods are notifications.
pub struct StatisticsHandler {
  ctx: HandlerContext,
}

impl StatisticsHandler {
  pub fn new(ctx: HandlerContext) -> Self {
    Self { ctx }
  }

  pub fn register(self: Arc<Self>, registry: &mut HandlerRegistry) {
    let this = Arc::clone(&self);
    registry.register(
      Method::RecordRunningTotal,
      move |(name, value): (String, String)| {
        let this = Arc::clone(&this);
        async move { this.record_running_total(name, value).await }
      },
    );

    let this = self;
    registry.register(Method::RecordAverage, move |(name, value): (String, i64)| {
      let this = Arc::clone(&this);
      async move { this.record_average(name, value).await }
    });
  }

  pub async fn record_running_total(&self, name: String, value: String) -> Result<(), HandlerError> {
    Ok(self.ctx.upstream.notify(Method::RecordRunningTotal, (name, value)).await?)
  }

  pub async fn record_average(&self, name: String, value: i64) -> Result<(), HandlerError> {
    Ok(self.ctx.upstream.notify(Method::RecordAverage, (name, value)).await?)
  }
}
