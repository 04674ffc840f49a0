use serde::{Serialize, de::DeserializeOwned};

use crate::ipc::{IpcError, Method, RpcChannel};

/// Server-side JSON cache shared by all runners.
#[derive(Debug, Clone)]
pub struct CacheProxy {
  channel: RpcChannel,
}

impl CacheProxy {
  pub fn new(channel: RpcChannel) -> Self {
    Self { channel }
  }

  pub async fn get_json(&self, key: &str) -> Result<Option<String>, IpcError> {
    self.channel.call(Method::GetJson, (key,)).await
  }

  pub async fn store_json(&self, key: &str, json: &str, ttl_minutes: u32) -> Result<(), IpcError> {
    self.channel.call(Method::StoreJson, (key, json, ttl_minutes)).await
  }

  /// [`get_json`](Self::get_json) decoded into `T`.
  pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, IpcError> {
    match self.get_json(key).await? {
      Some(json) => Ok(Some(serde_json::from_str(&json)?)),
      None => Ok(None),
    }
  }

  /// [`store_json`](Self::store_json) with `value` encoded first.
  pub async fn store<T: Serialize>(&self, key: &str, value: &T, ttl_minutes: u32) -> Result<(), IpcError> {
    let json = serde_json::to_string(value)?;
    self.store_json(key, &json, ttl_minutes).await
  }
}
