//! Runner proxies against node handlers, with a fake server upstream.

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use pretty_assertions::assert_eq;
  use serde_json::{Value, json};
  use uuid::Uuid;

  use crate::{
    domain::{
      library::ObjectReference,
      runner::{FlowStep, NotificationSeverity, RunOutcome, RunnerParameters, RunnerState},
      work_item::{FileStatus, WorkItem},
    },
    ipc::{
      HandlerRegistry, IpcError, Method, RpcChannel,
      __tests__::helpers::{FakeServer, channel_pair, wait_for},
      handlers::{self, HandlerContext},
      proxy::Proxies,
    },
    node::session::RunnerSession,
  };

  struct Harness {
    server: FakeServer,
    session: Arc<RunnerSession>,
    runner: RpcChannel,
    proxies: Proxies,
  }

  fn parameters(max_steps: u32) -> RunnerParameters {
    RunnerParameters {
      uid: Uuid::new_v4(),
      node: ObjectReference::new(Uuid::new_v4(), "node-a"),
      file: WorkItem::new("/media/show/episode.mkv", None),
      flow: vec![FlowStep {
        name: "remux".into(),
        command: "true".into(),
        args: vec![],
        counts_towards_total: true,
      }],
      max_steps,
      temp_path: "/tmp/fleetflow".into(),
    }
  }

  fn harness(max_steps: u32, responses: Vec<(Method, Value)>) -> Harness {
    let (server, upstream) = FakeServer::start(responses, HandlerRegistry::new());
    let session = RunnerSession::new(parameters(max_steps));
    let registry = handlers::registry(HandlerContext::new(Arc::clone(&session), upstream));
    let (runner, _node) = channel_pair(HandlerRegistry::new(), registry);
    let proxies = Proxies::new(&runner);
    Harness {
      server,
      session,
      runner,
      proxies,
    }
  }

  fn remote_message(err: IpcError) -> String {
    match err {
      IpcError::Remote(msg) => msg,
      other => panic!("expected a remote error, got {other:?}"),
    }
  }

  // ==========================================================================
  // Basic
  // ==========================================================================

  #[tokio::test]
  async fn test_get_runner_parameters_is_answered_locally() {
    let h = harness(10, vec![]);
    let params = h.proxies.basic.get_runner_parameters().await.unwrap();

    assert_eq!(&params, h.session.parameters());
    assert_eq!(h.session.state().await, RunnerState::Running);
    assert!(h.server.calls_to(Method::GetNode).is_empty());
  }

  #[tokio::test]
  async fn test_get_node_is_relayed() {
    let node = json!({"Uid": Uuid::new_v4(), "Name": "node-a", "MaxRunners": 3});
    let h = harness(10, vec![(Method::GetNode, node)]);

    let node = h.proxies.basic.get_node().await.unwrap();
    assert_eq!(node.name, "node-a");
    assert_eq!(node.max_runners, 3);
  }

  #[tokio::test]
  async fn test_send_email_relays_result() {
    let h = harness(10, vec![(Method::SendEmail, json!(true))]);
    let to = vec!["ops@example.com".to_string()];
    assert!(h.proxies.basic.send_email(&to, "Done", "Encoded").await.unwrap());
    assert_eq!(
      h.server.calls_to(Method::SendEmail),
      vec![vec![json!(["ops@example.com"]), json!("Done"), json!("Encoded")]]
    );

    let err = h.proxies.basic.send_email(&[], "Done", "Encoded").await.unwrap_err();
    assert_eq!(remote_message(err), "No recipients");
  }

  #[tokio::test]
  async fn test_notification_is_relayed() {
    let h = harness(10, vec![]);
    h.proxies
      .basic
      .record_notification(NotificationSeverity::Warning, "Disk", "Almost full")
      .await
      .unwrap();

    let params = h.server.wait_for_call(Method::RecordNotification).await;
    assert_eq!(params, vec![json!("Warning"), json!("Disk"), json!("Almost full")]);
  }

  // ==========================================================================
  // Cache
  // ==========================================================================

  #[tokio::test]
  async fn test_cache_relay() {
    let h = harness(10, vec![(Method::GetJson, json!("{\"Width\":1920}"))]);

    let cached: Option<Value> = h.proxies.cache.get("probe").await.unwrap();
    assert_eq!(cached, Some(json!({"Width": 1920})));

    h.proxies.cache.store("probe", &json!({"Width": 1280}), 60).await.unwrap();
    assert_eq!(
      h.server.calls_to(Method::StoreJson),
      vec![vec![json!("probe"), json!("{\"Width\":1280}"), json!(60)]]
    );
  }

  #[tokio::test]
  async fn test_store_json_rejects_malformed_json() {
    let h = harness(10, vec![]);
    let err = h.proxies.cache.store_json("probe", "{not json", 5).await.unwrap_err();
    assert!(remote_message(err).starts_with("Invalid JSON for probe"));
    assert!(h.server.calls_to(Method::StoreJson).is_empty());
  }

  // ==========================================================================
  // Library file
  // ==========================================================================

  #[tokio::test]
  async fn test_update_library_file_keeps_local_copy() {
    let h = harness(10, vec![]);
    let mut item = h.session.file().await;
    item.original_size = 4096;

    h.proxies.library_file.update_library_file(&item).await.unwrap();
    assert_eq!(h.session.file().await.original_size, 4096);
    assert_eq!(h.server.calls_to(Method::UpdateLibraryFile).len(), 1);

    let stranger = WorkItem::new("/media/other.mkv", None);
    assert!(h.proxies.library_file.update_library_file(&stranger).await.is_err());
    assert_eq!(h.server.calls_to(Method::UpdateLibraryFile).len(), 1);
  }

  #[tokio::test]
  async fn test_exists_and_ignore_validate_paths() {
    let h = harness(10, vec![(Method::ExistsOnServer, json!(true))]);

    assert!(h.proxies.library_file.exists_on_server("/media/show", true).await.unwrap());
    h.proxies.library_file.library_ignore_path("/media/show/extras").await.unwrap();

    let err = h.proxies.library_file.exists_on_server("", false).await.unwrap_err();
    assert_eq!(remote_message(err), "Path is empty");
    assert_eq!(h.server.calls_to(Method::ExistsOnServer).len(), 1);
    assert_eq!(
      h.server.calls_to(Method::LibraryIgnorePath),
      vec![vec![json!("/media/show/extras")]]
    );
  }

  #[tokio::test]
  async fn test_thumbnail_must_decode() {
    let h = harness(10, vec![]);
    let file = h.session.file_uid();

    h.proxies.library_file.upload_thumbnail(file, b"\x89PNG").await.unwrap();
    assert_eq!(
      h.server.calls_to(Method::UploadThumbnail),
      vec![vec![json!(file), json!("iVBORw==")]]
    );

    let err = h
      .runner
      .call::<(), _>(Method::UploadThumbnail, (file, "***"))
      .await
      .unwrap_err();
    assert!(remote_message(err).starts_with("Thumbnail is not valid base64"));

    let err = h.proxies.library_file.upload_thumbnail(file, b"").await.unwrap_err();
    assert_eq!(remote_message(err), "Thumbnail is empty");
    assert_eq!(h.server.calls_to(Method::UploadThumbnail).len(), 1);
  }

  // ==========================================================================
  // Runner info
  // ==========================================================================

  #[tokio::test]
  async fn test_start_step_pushes_snapshot() {
    let h = harness(10, vec![]);
    let info = h.proxies.runner_info.start_step("Encode", true).await.unwrap();
    assert_eq!(info.current_step, 1);
    assert_eq!(info.current_step_name.as_deref(), Some("Encode"));

    let pushed = h.server.wait_for_call(Method::RunnerUpdate).await;
    assert_eq!(pushed[0]["CurrentStepName"], "Encode");
    assert_eq!(pushed[0]["ExecutedSteps"], 1);
  }

  #[tokio::test]
  async fn test_step_ceiling_is_enforced() {
    let h = harness(2, vec![]);
    h.proxies.runner_info.start_step("a", true).await.unwrap();
    h.proxies.runner_info.start_step("b", false).await.unwrap();

    let err = h.proxies.runner_info.start_step("c", true).await.unwrap_err();
    assert_eq!(remote_message(err), "Exceeded maximum number of steps (2)");
    assert_eq!(h.session.info().await.executed_steps, 2);
    assert_eq!(h.session.info().await.executed_steps_counted_towards_total, 1);
  }

  #[tokio::test]
  async fn test_progress_notifications_update_session() {
    let h = harness(10, vec![]);
    h.proxies.runner_info.start_step("Encode", true).await.unwrap();
    h.proxies.runner_info.update_part_percentage(42.5).await.unwrap();
    h.proxies.runner_info.set_additional_info("Fps", "120", 1).await.unwrap();

    let session = Arc::clone(&h.session);
    let updated = wait_for(|| {
      let session = Arc::clone(&session);
      async move {
        let info = session.info().await;
        info.current_step_percent == 42.5 && info.additional_info.contains_key("Fps")
      }
    })
    .await;
    assert!(updated);

    // the hint lives for one step only
    let info = h.proxies.runner_info.start_step("Mux", true).await.unwrap();
    assert!(info.additional_info.is_empty());
    assert_eq!(info.current_step_percent, 0.0);
  }

  #[tokio::test]
  async fn test_complete_reports_once() {
    let h = harness(10, vec![]);
    let outcome = RunOutcome::Processed { final_size: Some(2048) };
    h.proxies.runner_info.complete(&outcome).await.unwrap();
    h.proxies.runner_info.complete(&RunOutcome::failed("late")).await.unwrap();

    let finished = h.server.calls_to(Method::RunnerFinished);
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0][0]["Outcome"], json!({"Processed": {"FinalSize": 2048}}));

    assert_eq!(h.session.outcome().await, Some(outcome));
    assert_eq!(h.session.file().await.status, FileStatus::Processed);
  }

  // ==========================================================================
  // Statistics
  // ==========================================================================

  #[tokio::test]
  async fn test_statistics_are_relayed() {
    let h = harness(10, vec![]);
    h.proxies.statistics.record_running_total("Codec", "hevc").await.unwrap();
    h.proxies.statistics.record_average("Fps", 87).await.unwrap();

    assert_eq!(
      h.server.wait_for_call(Method::RecordRunningTotal).await,
      vec![json!("Codec"), json!("hevc")]
    );
    assert_eq!(
      h.server.wait_for_call(Method::RecordAverage).await,
      vec![json!("Fps"), json!(87)]
    );
  }

  #[tokio::test]
  async fn test_upstream_failure_surfaces_to_runner() {
    let h = harness(10, vec![]);
    h.server.channel.close().await;

    let err = h.proxies.cache.get_json("probe").await.unwrap_err();
    assert!(remote_message(err).contains("connection closed"));
  }
}
