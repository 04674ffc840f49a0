//! Bidirectional, id-correlated RPC over one duplex byte stream.
//!
//! Both ends of a connection run the same [`RpcChannel`]. Each end can issue
//! requests and notifications and serve the other end's requests from its
//! [`HandlerRegistry`].
//!
//! # Threading Model
//!
//! - One listen task per channel reads frames strictly in arrival order
//! - Each inbound request runs on its own task, so a slow handler never
//!   stalls the read side
//! - Outbound frames from any number of callers go through a single
//!   write lock, so frames never interleave
//! - Outstanding calls live in a concurrent map keyed by id; the listen
//!   task completes them, callers insert and remove them
//!
//! # Failure
//!
//! When the stream closes or breaks, every outstanding call fails with a
//! connection error. Calls also fail after `call_timeout` if one is set.

use std::{
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
  time::Duration,
};

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::{
  io::{AsyncRead, AsyncWrite},
  sync::{Mutex, oneshot},
};
use bytes::BytesMut;
use tokio_util::{
  codec::{Decoder, FramedRead, FramedWrite, LinesCodec, LinesCodecError},
  sync::CancellationToken,
};
use tracing::{debug, info, trace, warn};

use super::{Frame, HandlerRegistry, IpcError, Method, Request, Response};
use crate::domain::config::RpcConfig;

type Reader = FramedRead<Box<dyn AsyncRead + Send + Unpin>, FrameCodec>;
type Writer = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, LinesCodec>;
type PendingCall = oneshot::Sender<Result<Value, IpcError>>;

/// Per-channel settings.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
  /// Label used in logs (e.g. `runner-<uid>`, `upstream`)
  pub name: String,
  /// How long a request waits for its response. `None` waits forever.
  pub call_timeout: Option<Duration>,
  /// Longest accepted line in bytes
  pub max_frame_bytes: usize,
}

impl Default for ChannelConfig {
  fn default() -> Self {
    Self::from_rpc("channel", &RpcConfig::default())
  }
}

impl ChannelConfig {
  pub fn from_rpc(name: impl Into<String>, rpc: &RpcConfig) -> Self {
    Self {
      name: name.into(),
      call_timeout: rpc.call_timeout(),
      max_frame_bytes: rpc.max_frame_bytes,
    }
  }

  pub fn named(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }
}

/// Handle to a running channel. Cheap to clone.
#[derive(Clone)]
pub struct RpcChannel {
  inner: Arc<Inner>,
}

impl std::fmt::Debug for RpcChannel {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RpcChannel")
      .field("name", &self.inner.name)
      .field("pending", &self.inner.pending.len())
      .field("closed", &self.inner.closed.is_cancelled())
      .finish()
  }
}

struct Inner {
  name: String,
  writer: Mutex<Writer>,
  pending: DashMap<u64, PendingCall>,
  next_id: AtomicU64,
  handlers: Arc<HandlerRegistry>,
  call_timeout: Option<Duration>,
  /// Cancelled when the peer sends `Abort`
  abort: CancellationToken,
  /// Cancelled when the channel is torn down
  closed: CancellationToken,
}

impl RpcChannel {
  /// Start a channel on an already established stream.
  pub fn new<S>(stream: S, handlers: Arc<HandlerRegistry>, config: ChannelConfig) -> Self
  where
    S: AsyncRead + AsyncWrite + Send + 'static,
  {
    let (reader, writer) = split(stream, &config);
    Self::start(reader, writer, handlers, config)
  }

  /// Initiating side: send the greeting line, then start.
  pub async fn connect<S>(
    stream: S,
    greeting: &str,
    handlers: Arc<HandlerRegistry>,
    config: ChannelConfig,
  ) -> Result<Self, IpcError>
  where
    S: AsyncRead + AsyncWrite + Send + 'static,
  {
    let (reader, mut writer) = split(stream, &config);
    writer.send(greeting).await?;
    debug!(channel = %config.name, "Greeting sent");
    Ok(Self::start(reader, writer, handlers, config))
  }

  /// Accepting side: read the greeting line, then start.
  ///
  /// Returns the channel and the greeting so the caller can validate it.
  pub async fn accept<S>(
    stream: S,
    handlers: Arc<HandlerRegistry>,
    config: ChannelConfig,
  ) -> Result<(Self, String), IpcError>
  where
    S: AsyncRead + AsyncWrite + Send + 'static,
  {
    let (mut reader, writer) = split(stream, &config);
    let greeting = match reader.next().await {
      Some(line) => line?,
      None => return Err(IpcError::Handshake("stream closed before greeting".into())),
    };
    debug!(channel = %config.name, greeting = %greeting, "Greeting received");
    Ok((Self::start(reader, writer, handlers, config), greeting))
  }

  fn start(reader: Reader, writer: Writer, handlers: Arc<HandlerRegistry>, config: ChannelConfig) -> Self {
    let inner = Arc::new(Inner {
      name: config.name,
      writer: Mutex::new(writer),
      pending: DashMap::new(),
      next_id: AtomicU64::new(1),
      handlers,
      call_timeout: config.call_timeout,
      abort: CancellationToken::new(),
      closed: CancellationToken::new(),
    });

    tokio::spawn(listen(Arc::clone(&inner), reader));
    Self { inner }
  }

  pub fn name(&self) -> &str {
    &self.inner.name
  }

  /// Send a request and wait for its typed result.
  ///
  /// `params` is the positional parameter list, normally a tuple.
  pub async fn call<R, P>(&self, method: impl AsRef<str>, params: P) -> Result<R, IpcError>
  where
    R: DeserializeOwned,
    P: Serialize,
  {
    let method = method.as_ref();
    let params = to_params(params)?;
    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

    let (tx, rx) = oneshot::channel();
    self.inner.pending.insert(id, tx);

    // teardown may have drained the table before our insert
    if self.inner.closed.is_cancelled() {
      self.inner.pending.remove(&id);
      return Err(IpcError::closed());
    }

    trace!(channel = %self.inner.name, id, method, "Sending request");
    if let Err(e) = self.inner.send_frame(&Request::call(id, method, params)).await {
      self.inner.pending.remove(&id);
      return Err(e);
    }

    let reply = match self.inner.call_timeout {
      Some(limit) => match tokio::time::timeout(limit, rx).await {
        Ok(reply) => reply,
        Err(_) => {
          self.inner.pending.remove(&id);
          warn!(channel = %self.inner.name, id, method, "Request timed out");
          return Err(IpcError::Timeout {
            method: method.to_string(),
            secs: limit.as_secs(),
          });
        }
      },
      None => rx.await,
    };

    let value = reply.map_err(|_| IpcError::closed())??;
    Ok(serde_json::from_value(value)?)
  }

  /// Send a notification. No id is allocated and no reply is awaited.
  pub async fn notify<P: Serialize>(&self, method: impl AsRef<str>, params: P) -> Result<(), IpcError> {
    let method = method.as_ref();
    trace!(channel = %self.inner.name, method, "Sending notification");
    self
      .inner
      .send_frame(&Request::notification(method, to_params(params)?))
      .await
  }

  /// Ask the peer to abort its work.
  pub async fn send_abort(&self) -> Result<(), IpcError> {
    self.notify(Method::Abort, ()).await
  }

  /// Token cancelled when the peer sends `Abort`.
  pub fn abort_token(&self) -> CancellationToken {
    self.inner.abort.clone()
  }

  pub fn is_aborted(&self) -> bool {
    self.inner.abort.is_cancelled()
  }

  pub fn is_closed(&self) -> bool {
    self.inner.closed.is_cancelled()
  }

  /// Resolves once the channel has been torn down.
  pub async fn closed(&self) {
    self.inner.closed.cancelled().await
  }

  /// Number of requests still waiting for a response.
  pub fn pending_calls(&self) -> usize {
    self.inner.pending.len()
  }

  /// Tear the channel down and close our half of the stream.
  pub async fn close(&self) {
    self.inner.shutdown();
    let mut writer = self.inner.writer.lock().await;
    if let Err(e) = SinkExt::<String>::close(&mut *writer).await {
      debug!(channel = %self.inner.name, error = %e, "Error closing writer");
    }
  }
}

impl Inner {
  async fn send_frame<T: Serialize>(&self, frame: &T) -> Result<(), IpcError> {
    if self.closed.is_cancelled() {
      return Err(IpcError::closed());
    }

    let json = serde_json::to_string(frame)?;
    let mut writer = self.writer.lock().await;
    if let Err(e) = writer.send(json).await {
      let err = IpcError::from(e);
      if err.is_transport() {
        warn!(channel = %self.name, error = %err, "Write failed, closing channel");
        self.shutdown();
      }
      return Err(err);
    }
    Ok(())
  }

  fn dispatch(self: &Arc<Self>, line: &str) {
    let line = line.trim();
    if line.is_empty() {
      return;
    }

    let frame: Frame = match serde_json::from_str(line) {
      Ok(frame) => frame,
      Err(e) => {
        warn!(channel = %self.name, error = %e, "Dropping unparseable frame");
        self.reject_malformed_call(line, &e);
        return;
      }
    };

    match frame {
      Frame::Request(request) if request.method == Method::Abort.as_str() => {
        self.raise_abort();
        // a peer that sent Abort as a call still gets its reply
        if let Some(id) = request.id {
          let inner = Arc::clone(self);
          tokio::spawn(async move {
            if let Err(e) = inner.send_frame(&Response::ok(id, Value::Null)).await {
              debug!(channel = %inner.name, id, error = %e, "Failed to acknowledge abort");
            }
          });
        }
      }
      Frame::Request(request) => {
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.handle_request(request).await });
      }
      Frame::Response(response) => self.complete(response),
    }
  }

  /// A request we could not decode still gets an error reply when its id is
  /// readable, so the caller does not wait for its timeout.
  fn reject_malformed_call(self: &Arc<Self>, line: &str, err: &serde_json::Error) {
    let Ok(Value::Object(object)) = serde_json::from_str::<Value>(line) else {
      return;
    };
    let Some(id) = object.get("Id").and_then(Value::as_u64) else {
      return;
    };
    if !object.contains_key("Method") {
      return;
    }

    let response = Response::err(id, format!("Invalid request: {err}"));
    let inner = Arc::clone(self);
    tokio::spawn(async move {
      if let Err(e) = inner.send_frame(&response).await {
        debug!(channel = %inner.name, id, error = %e, "Failed to reject malformed request");
      }
    });
  }

  fn raise_abort(&self) {
    if self.abort.is_cancelled() {
      debug!(channel = %self.name, "Duplicate abort ignored");
      return;
    }
    info!(channel = %self.name, "Abort requested by peer");
    self.abort.cancel();
  }

  async fn handle_request(&self, request: Request) {
    let Request { id, method, params } = request;
    trace!(channel = %self.name, ?id, method = %method, "Handling request");
    let outcome = self.handlers.dispatch(&method, params).await;

    let Some(id) = id else {
      if let Err(e) = outcome {
        warn!(channel = %self.name, method = %method, error = %e, "Notification handler failed");
      }
      return;
    };

    let response = match outcome {
      Ok(result) => Response::ok(id, result),
      Err(e) => {
        debug!(channel = %self.name, id, method = %method, error = %e, "Request failed");
        Response::err(id, e.to_string())
      }
    };

    if let Err(e) = self.send_frame(&response).await {
      warn!(channel = %self.name, id, method = %method, error = %e, "Failed to send response");
    }
  }

  fn complete(&self, response: Response) {
    let id = response.id;
    match self.pending.remove(&id) {
      Some((_, tx)) => {
        // the caller may have timed out and dropped its receiver
        let _ = tx.send(response.into_result().map_err(IpcError::Remote));
      }
      None => debug!(channel = %self.name, id, "Dropping response for unknown request id"),
    }
  }

  /// Mark the channel closed and fail every outstanding call.
  fn shutdown(&self) {
    self.closed.cancel();

    let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
    if !ids.is_empty() {
      debug!(channel = %self.name, count = ids.len(), "Failing pending calls");
    }
    for id in ids {
      if let Some((_, tx)) = self.pending.remove(&id) {
        let _ = tx.send(Err(IpcError::closed()));
      }
    }
  }
}

async fn listen(inner: Arc<Inner>, mut reader: Reader) {
  loop {
    let frame = tokio::select! {
      biased;

      _ = inner.closed.cancelled() => break,

      frame = reader.next() => frame,
    };

    match frame {
      Some(Ok(line)) => inner.dispatch(&line),
      Some(Err(e)) => {
        warn!(channel = %inner.name, error = %e, "Error reading from peer");
        break;
      }
      None => {
        debug!(channel = %inner.name, "Peer closed the stream");
        break;
      }
    }
  }

  inner.shutdown();
  debug!(channel = %inner.name, "Listener exited");
}

fn split<S>(stream: S, config: &ChannelConfig) -> (Reader, Writer)
where
  S: AsyncRead + AsyncWrite + Send + 'static,
{
  let (read_half, write_half) = tokio::io::split(stream);
  let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(read_half);
  let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(write_half);
  (
    FramedRead::new(reader, FrameCodec::new(&config.name, config.max_frame_bytes)),
    FramedWrite::new(writer, LinesCodec::new()),
  )
}

/// `LinesCodec` that skips oversized lines instead of failing the stream.
///
/// `FramedRead` ends the stream after any decode error, so the oversized
/// line is discarded here and decoding carries on with the next one.
struct FrameCodec {
  lines: LinesCodec,
  name: String,
}

impl FrameCodec {
  fn new(name: &str, max_frame_bytes: usize) -> Self {
    Self {
      lines: LinesCodec::new_with_max_length(max_frame_bytes),
      name: name.to_string(),
    }
  }
}

impl Decoder for FrameCodec {
  type Item = String;
  type Error = LinesCodecError;

  fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, LinesCodecError> {
    loop {
      match self.lines.decode(buf) {
        Err(LinesCodecError::MaxLineLengthExceeded) => {
          warn!(channel = %self.name, "Dropping oversized frame");
        }
        other => return other,
      }
    }
  }

  fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, LinesCodecError> {
    loop {
      match self.lines.decode_eof(buf) {
        Err(LinesCodecError::MaxLineLengthExceeded) => {
          warn!(channel = %self.name, "Dropping oversized frame");
        }
        other => return other,
      }
    }
  }
}

/// Positional params from a tuple (or a single value, or `()` for none).
fn to_params<P: Serialize>(params: P) -> Result<Vec<Value>, IpcError> {
  Ok(match serde_json::to_value(params)? {
    Value::Array(values) => values,
    Value::Null => Vec::new(),
    other => vec![other],
  })
}
