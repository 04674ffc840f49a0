use std::sync::Arc;

use super::HandlerContext;
use crate::ipc::{HandlerError, HandlerRegistry, Method};

pub struct CacheHandler {
  ctx: HandlerContext,
}

impl CacheHandler {
  pub fn new(ctx: HandlerContext) -> Self {
    Self { ctx }
  }

  pub fn register(self: Arc<Self>, registry: &mut HandlerRegistry) {
    let this = Arc::clone(&self);
    registry.register(Method::GetJson, move |(key,): (String,)| {
      let this = Arc::clone(&this);
      async move { this.get_json(key).await }
    });

    let this = self;
    registry.register(
      Method::StoreJson,
      move |(key, json, ttl_minutes): (String, String, u32)| {
        let this = Arc::clone(&this);
        async move { this.store_json(key, json, ttl_minutes).await }
      },
    );
  }

  pub async fn get_json(&self, key: String) -> Result<Option<String>, HandlerError> {
    validate_key(&key)?;
    Ok(self.ctx.upstream.call(Method::GetJson, (key,)).await?)
  }

  /// Only well-formed JSON is relayed.
  pub async fn store_json(&self, key: String, json: String, ttl_minutes: u32) -> Result<(), HandlerError> {
    validate_key(&key)?;
    serde_json::from_str::<serde_json::Value>(&json)
      .map_err(|e| HandlerError::validation(format!("Invalid JSON for {key}: {e}")))?;
    Ok(
      self
        .ctx
        .upstream
        .call(Method::StoreJson, (key, json, ttl_minutes))
        .await?,
    )
  }
}

fn validate_key(key: &str) -> Result<(), HandlerError> {
  if key.trim().is_empty() {
    return Err(HandlerError::validation("Cache key is empty"));
  }
  Ok(())
}
