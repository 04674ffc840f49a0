//! Inbound method table.
//!
//! Each entry pairs a method name with a closure that decodes the positional
//! params into a typed tuple, runs the handler and encodes its result. The
//! channel looks methods up by name; there is no reflection involved.
//!
//! ```ignore
//! let mut registry = HandlerRegistry::new();
//! registry.register(Method::GetJson, move |(key,): (String,)| {
//!   let cache = cache.clone();
//!   async move { Ok(cache.get(&key)) }
//! });
//! ```

use std::{collections::HashMap, future::Future};

use futures::future::BoxFuture;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use super::IpcError;

type Handler = Box<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, HandlerError>> + Send + Sync>;

/// Failure of an inbound call. Rendered into the response's `Error` string.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
  #[error("Unknown method: {0}")]
  UnknownMethod(String),
  #[error("Invalid params: {0}")]
  InvalidParams(String),
  /// Local validation failed (e.g. a malformed path).
  #[error("{0}")]
  Validation(String),
  /// A policy stopped the call (e.g. step ceiling reached).
  #[error("{0}")]
  Policy(String),
  /// Relaying the call further upstream failed.
  #[error(transparent)]
  Upstream(#[from] IpcError),
  #[error("Internal error: {0}")]
  Internal(String),
}

impl HandlerError {
  pub fn validation(msg: impl Into<String>) -> Self {
    Self::Validation(msg.into())
  }

  pub fn policy(msg: impl Into<String>) -> Self {
    Self::Policy(msg.into())
  }
}

/// Method name → typed handler.
#[derive(Default)]
pub struct HandlerRegistry {
  handlers: HashMap<String, Handler>,
}

impl std::fmt::Debug for HandlerRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let mut methods: Vec<&str> = self.methods().collect();
    methods.sort_unstable();
    f.debug_struct("HandlerRegistry").field("methods", &methods).finish()
  }
}

impl HandlerRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register `handler` under `method`, replacing any previous entry.
  ///
  /// `P` is the positional parameter list, normally a tuple (`()` for none).
  /// `Abort` is handled by the channel itself and never reaches the registry.
  pub fn register<P, R, F, Fut>(&mut self, method: impl AsRef<str>, handler: F) -> &mut Self
  where
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
  {
    let entry: Handler = Box::new(move |params| -> BoxFuture<'static, Result<Value, HandlerError>> {
      match decode_params::<P>(params) {
        Ok(params) => {
          let fut = handler(params);
          Box::pin(async move {
            let result = fut.await?;
            serde_json::to_value(result).map_err(|e| HandlerError::Internal(e.to_string()))
          })
        }
        Err(e) => Box::pin(std::future::ready(Err(e))),
      }
    });
    self.handlers.insert(method.as_ref().to_string(), entry);
    self
  }

  /// Move every entry of `other` into this registry.
  pub fn merge(&mut self, other: HandlerRegistry) -> &mut Self {
    self.handlers.extend(other.handlers);
    self
  }

  pub fn contains(&self, method: &str) -> bool {
    self.handlers.contains_key(method)
  }

  pub fn methods(&self) -> impl Iterator<Item = &str> {
    self.handlers.keys().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.handlers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.handlers.is_empty()
  }

  /// Invoke the handler for `method`.
  pub async fn dispatch(&self, method: &str, params: Vec<Value>) -> Result<Value, HandlerError> {
    let Some(handler) = self.handlers.get(method) else {
      return Err(HandlerError::UnknownMethod(method.to_string()));
    };
    handler(params).await
  }
}

/// Positional params → `P`. An empty list also decodes as `()`.
fn decode_params<P: DeserializeOwned>(params: Vec<Value>) -> Result<P, HandlerError> {
  let empty = params.is_empty();
  match serde_json::from_value(Value::Array(params)) {
    Ok(decoded) => Ok(decoded),
    Err(_) if empty => serde_json::from_value(Value::Null).map_err(|e| HandlerError::InvalidParams(e.to_string())),
    Err(e) => Err(HandlerError::InvalidParams(e.to_string())),
  }
}
