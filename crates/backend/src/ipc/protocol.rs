//! Wire envelopes. One JSON object per line.
//!
//! ```text
//! request       {"Id": 7, "Method": "GetJson", "Params": ["key"]}
//! notification  {"Method": "RecordAverage", "Params": ["fps", 42.0]}
//! response      {"Id": 7, "Result": "...", "Error": null}
//! abort         {"Method": "Abort"}
//! ```

use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::Value;

/// Outbound call. No `Id` means no reply is expected.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Request {
  pub id: Option<u64>,
  pub method: String,
  #[serde(default)]
  pub params: Vec<Value>,
}

impl Request {
  pub fn call(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
    Self {
      id: Some(id),
      method: method.into(),
      params,
    }
  }

  pub fn notification(method: impl Into<String>, params: Vec<Value>) -> Self {
    Self {
      id: None,
      method: method.into(),
      params,
    }
  }

  pub fn is_notification(&self) -> bool {
    self.id.is_none()
  }
}

/// Reply to a request, matched by `Id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Response {
  pub id: u64,
  #[serde(default)]
  pub result: Value,
  #[serde(default)]
  pub error: Option<String>,
}

impl Response {
  pub fn ok(id: u64, result: Value) -> Self {
    Self {
      id,
      result,
      error: None,
    }
  }

  pub fn err(id: u64, error: impl Into<String>) -> Self {
    Self {
      id,
      result: Value::Null,
      error: Some(error.into()),
    }
  }

  /// An empty error string counts as success.
  pub fn into_result(self) -> Result<Value, String> {
    match self.error {
      Some(error) if !error.is_empty() => Err(error),
      _ => Ok(self.result),
    }
  }
}

/// Any inbound frame. Requests are recognised by their `Method` field.
///
/// A frame with a `Method` is only ever a request, so a malformed request is
/// rejected rather than mistaken for a response to one of our own calls.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
  Request(Request),
  Response(Response),
}

impl<'de> Deserialize<'de> for Frame {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let value = Value::deserialize(deserializer)?;
    let is_request = value.as_object().is_some_and(|frame| frame.contains_key("Method"));
    if is_request {
      Request::deserialize(value).map(Frame::Request).map_err(de::Error::custom)
    } else {
      Response::deserialize(value).map(Frame::Response).map_err(de::Error::custom)
    }
  }
}
