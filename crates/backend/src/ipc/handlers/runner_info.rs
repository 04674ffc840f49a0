use std::sync::Arc;

use tracing::debug;

use super::HandlerContext;
use crate::{
  domain::runner::{RunOutcome, RunnerInfo},
  ipc::{HandlerError, HandlerRegistry, Method},
};

/// Progress and completion of the run.
///
/// State lives in the session; every change is pushed upstream as a
/// `RunnerUpdate` snapshot.
pub struct RunnerInfoHandler {
  ctx: HandlerContext,
}

impl RunnerInfoHandler {
  pub fn new(ctx: HandlerContext) -> Self {
    Self { ctx }
  }

  pub fn register(self: Arc<Self>, registry: &mut HandlerRegistry) {
    let this = Arc::clone(&self);
    registry.register(
      Method::StartStep,
      move |(name, counts_towards_total): (String, bool)| {
        let this = Arc::clone(&this);
        async move { this.start_step(name, counts_towards_total).await }
      },
    );

    let this = Arc::clone(&self);
    registry.register(Method::UpdatePartPercentage, move |(percent,): (f32,)| {
      let this = Arc::clone(&this);
      async move {
        this.update_part_percentage(percent).await;
        Ok::<_, HandlerError>(())
      }
    });

    let this = Arc::clone(&self);
    registry.register(
      Method::SetAdditionalInfo,
      move |(key, value, steps): (String, String, u32)| {
        let this = Arc::clone(&this);
        async move {
          this.set_additional_info(key, value, steps).await;
          Ok::<_, HandlerError>(())
        }
      },
    );

    let this = self;
    registry.register(Method::Complete, move |(outcome,): (RunOutcome,)| {
      let this = Arc::clone(&this);
      async move { this.complete(outcome).await }
    });
  }

  pub async fn start_step(&self, name: String, counts_towards_total: bool) -> Result<RunnerInfo, HandlerError> {
    let info = self.ctx.session.start_step(name, counts_towards_total).await?;
    debug!(
      runner = %info.uid,
      step = info.executed_steps,
      name = info.current_step_name.as_deref().unwrap_or_default(),
      "Step started"
    );
    self.ctx.push_update(&info).await;
    Ok(info)
  }

  pub async fn update_part_percentage(&self, percent: f32) {
    let info = self.ctx.session.set_percent(percent).await;
    self.ctx.push_update(&info).await;
  }

  pub async fn set_additional_info(&self, key: String, value: String, steps: u32) {
    let info = self.ctx.session.set_additional_info(key, value, steps).await;
    self.ctx.push_update(&info).await;
  }

  /// Record the outcome and report the finished runner upstream.
  ///
  /// A second `Complete` is accepted but not reported again.
  pub async fn complete(&self, outcome: RunOutcome) -> Result<(), HandlerError> {
    let Some(finished) = self.ctx.session.complete(outcome).await else {
      return Ok(());
    };
    let info = self.ctx.session.info().await;
    self.ctx.push_update(&info).await;
    Ok(self.ctx.upstream.call(Method::RunnerFinished, (finished,)).await?)
  }
}
