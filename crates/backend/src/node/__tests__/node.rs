//! Node lifecycle against a fake server on a real TCP socket.

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use serde_json::json;
  use tempfile::TempDir;
  use tokio::net::TcpListener;
  use tokio_util::sync::CancellationToken;
  use uuid::Uuid;

  use crate::{
    domain::{config::Config, runner::RunnerInfo},
    ipc::{IpcError, Method, __tests__::helpers::FakeServer},
    node::{
      Node, NodeError,
      __tests__::helpers::{RunnerBehavior, TaskLauncher, parameters},
    },
  };

  async fn start_node(
    socket_dir: &TempDir,
  ) -> (FakeServer, tokio::task::JoinHandle<Result<(), NodeError>>, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = Config::default();
    config.node.name = "node-under-test".into();
    config.node.server_address = listener.local_addr().unwrap().to_string();
    config.node.socket_dir = Some(socket_dir.path().to_path_buf());
    config.node.abort_grace_secs = 1;

    let cancel = CancellationToken::new();
    let node = Node::new(config, TaskLauncher::new(RunnerBehavior::Normal));
    let handle = tokio::spawn(node.run(cancel.clone()));

    let (stream, _) = listener.accept().await.unwrap();
    let registered = json!({"Uid": Uuid::new_v4(), "Name": "node-under-test", "Enabled": true});
    let server = FakeServer::serve(stream, vec![(Method::RegisterNode, registered)]);
    (server, handle, cancel)
  }

  #[tokio::test]
  async fn test_node_registers_and_runs_files() {
    let socket_dir = TempDir::new().unwrap();
    let (server, node, cancel) = start_node(&socket_dir).await;

    let hello = server.wait_for_call(Method::RegisterNode).await;
    assert_eq!(hello[0]["Name"], "node-under-test");
    assert_eq!(hello[0]["MaxRunners"], 2);

    let params = parameters(&["ok"], 10);
    let info: RunnerInfo = server.channel.call(Method::StartRunner, (&params,)).await.unwrap();
    assert_eq!(info.uid, params.uid);

    let finished = server.wait_for_call(Method::RunnerFinished).await;
    assert_eq!(finished[0]["Uid"], json!(params.uid));

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(10), node).await.unwrap().unwrap();
    assert!(result.is_ok(), "{result:?}");
  }

  #[tokio::test]
  async fn test_server_controls_runners() {
    let socket_dir = TempDir::new().unwrap();
    let (server, node, cancel) = start_node(&socket_dir).await;
    server.wait_for_call(Method::RegisterNode).await;

    let params = parameters(&["hang"], 10);
    server
      .channel
      .call::<RunnerInfo, _>(Method::StartRunner, (&params,))
      .await
      .unwrap();

    let err = server
      .channel
      .call::<RunnerInfo, _>(Method::StartRunner, (&params,))
      .await
      .unwrap_err();
    assert!(matches!(err, IpcError::Remote(ref msg) if msg.contains("already being processed")), "{err:?}");

    let status: Vec<RunnerInfo> = server.channel.call(Method::RunnerStatus, ()).await.unwrap();
    assert_eq!(status.len(), 1);

    let aborted: bool = server.channel.call(Method::AbortRunner, (params.uid,)).await.unwrap();
    assert!(aborted);
    let finished = server.wait_for_call(Method::RunnerFinished).await;
    assert_eq!(finished[0]["Outcome"], "Cancelled");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(10), node).await.unwrap().unwrap().unwrap();
  }

  #[tokio::test]
  async fn test_node_stops_when_server_disconnects() {
    let socket_dir = TempDir::new().unwrap();
    let (server, node, _cancel) = start_node(&socket_dir).await;
    server.wait_for_call(Method::RegisterNode).await;

    server.channel.close().await;
    let result = tokio::time::timeout(Duration::from_secs(10), node).await.unwrap().unwrap();
    assert!(matches!(result, Err(NodeError::Disconnected)), "{result:?}");
  }

  #[tokio::test]
  async fn test_unreachable_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let mut config = Config::default();
    config.node.server_address = address;
    let result = Node::new(config, TaskLauncher::new(RunnerBehavior::Normal))
      .run(CancellationToken::new())
      .await;
    assert!(matches!(result, Err(NodeError::Connect { .. })), "{result:?}");
  }
}
