//! Test helpers for channel and handler tests.
//!
//! Everything runs over `tokio::io::duplex`, so no sockets are involved.
//! `RawPeer` speaks the wire format by hand for tests that need to control
//! exactly which frames arrive and when. `FakeServer` stands in for the
//! central server and records every call relayed to it.

use std::{
  collections::HashMap,
  future::Future,
  sync::{Arc, Mutex},
  time::Duration,
};

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use crate::ipc::{ChannelConfig, HandlerError, HandlerRegistry, Method, RpcChannel};

pub fn config(name: &str) -> ChannelConfig {
  ChannelConfig {
    name: name.to_string(),
    call_timeout: Some(Duration::from_secs(5)),
    max_frame_bytes: 64 * 1024,
  }
}

/// Two connected channels.
pub fn channel_pair(left: HandlerRegistry, right: HandlerRegistry) -> (RpcChannel, RpcChannel) {
  let (a, b) = tokio::io::duplex(256 * 1024);
  (
    RpcChannel::new(a, Arc::new(left), config("left")),
    RpcChannel::new(b, Arc::new(right), config("right")),
  )
}

/// A channel whose peer is driven by hand.
pub fn raw_pair(registry: HandlerRegistry, config: ChannelConfig) -> (RpcChannel, RawPeer) {
  let (a, b) = tokio::io::duplex(256 * 1024);
  (RpcChannel::new(a, Arc::new(registry), config), RawPeer::new(b))
}

pub struct RawPeer {
  reader: FramedRead<ReadHalf<DuplexStream>, LinesCodec>,
  writer: FramedWrite<WriteHalf<DuplexStream>, LinesCodec>,
}

impl RawPeer {
  pub fn new(stream: DuplexStream) -> Self {
    let (read_half, write_half) = tokio::io::split(stream);
    Self {
      reader: FramedRead::new(read_half, LinesCodec::new()),
      writer: FramedWrite::new(write_half, LinesCodec::new()),
    }
  }

  /// Next frame from the channel, parsed.
  pub async fn recv(&mut self) -> Value {
    let line = tokio::time::timeout(Duration::from_secs(5), self.reader.next())
      .await
      .expect("timed out waiting for a frame")
      .expect("stream ended")
      .expect("read failed");
    serde_json::from_str(&line).expect("channel wrote invalid JSON")
  }

  pub async fn send(&mut self, frame: Value) {
    self.send_line(&frame.to_string()).await;
  }

  pub async fn send_line(&mut self, line: &str) {
    self.writer.send(line).await.expect("write failed");
  }
}

/// Poll `check` until it holds or five seconds pass.
pub async fn wait_for<F, Fut>(mut check: F) -> bool
where
  F: FnMut() -> Fut,
  Fut: Future<Output = bool>,
{
  let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
  while tokio::time::Instant::now() < deadline {
    if check().await {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  false
}

// ============================================================================
// Fake server
// ============================================================================

type CallLog = Arc<Mutex<Vec<(String, Vec<Value>)>>>;

/// Methods a node sends to the server.
pub const SERVER_METHODS: &[Method] = &[
  Method::RegisterNode,
  Method::GetNode,
  Method::SendEmail,
  Method::RecordNotification,
  Method::GetJson,
  Method::StoreJson,
  Method::UpdateLibraryFile,
  Method::ExistsOnServer,
  Method::LibraryIgnorePath,
  Method::UploadThumbnail,
  Method::RecordRunningTotal,
  Method::RecordAverage,
  Method::RunnerUpdate,
  Method::RunnerFinished,
];

/// Server end of a node's upstream channel.
pub struct FakeServer {
  pub channel: RpcChannel,
  calls: CallLog,
}

impl FakeServer {
  /// Returns the server and the node's end of an in-memory connection.
  ///
  /// Methods without a canned response answer `null`.
  pub fn start(responses: Vec<(Method, Value)>, node_handlers: HandlerRegistry) -> (Self, RpcChannel) {
    let (a, b) = tokio::io::duplex(256 * 1024);
    let server = Self::serve(a, responses);
    let node = RpcChannel::new(b, Arc::new(node_handlers), config("upstream"));
    (server, node)
  }

  /// Serve an already connected stream, e.g. a node's TCP connection.
  pub fn serve<S>(stream: S, responses: Vec<(Method, Value)>) -> Self
  where
    S: AsyncRead + AsyncWrite + Send + 'static,
  {
    let calls: CallLog = Arc::default();
    let responses: Arc<HashMap<Method, Value>> = Arc::new(responses.into_iter().collect());

    let mut registry = HandlerRegistry::new();
    for method in SERVER_METHODS.iter().copied() {
      let calls = Arc::clone(&calls);
      let responses = Arc::clone(&responses);
      registry.register(method, move |params: Vec<Value>| {
        calls.lock().unwrap().push((method.to_string(), params));
        let reply = responses.get(&method).cloned().unwrap_or(Value::Null);
        std::future::ready(Ok::<_, HandlerError>(reply))
      });
    }

    Self {
      channel: RpcChannel::new(stream, Arc::new(registry), config("server")),
      calls,
    }
  }

  /// Params of every call received for `method`, in arrival order.
  pub fn calls_to(&self, method: Method) -> Vec<Vec<Value>> {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|(name, _)| name == method.as_str())
      .map(|(_, params)| params.clone())
      .collect()
  }

  pub async fn wait_for_call(&self, method: Method) -> Vec<Value> {
    let found = wait_for(|| {
      let done = !self.calls_to(method).is_empty();
      async move { done }
    })
    .await;
    assert!(found, "server never received {method}");
    self.calls_to(method).remove(0)
  }
}
