//! Supervisor E2E tests with in-process runners on real Unix sockets.

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use serde_json::json;

  use crate::{
    domain::{config::Config, runner::RunnerState},
    ipc::{Method, __tests__::helpers::wait_for},
    node::{
      __tests__::helpers::{RunnerBehavior, SupervisorTestContext, parameters},
      session::RUNNER_LOST,
      supervisor::{SupervisorConfig, SupervisorError},
    },
  };

  // ==========================================================================
  // Completion
  // ==========================================================================

  #[tokio::test]
  async fn test_runner_completes_and_reports() {
    let ctx = SupervisorTestContext::new(RunnerBehavior::Normal);
    let params = parameters(&["ok", "ok"], 10);
    let file_uid = params.file.uid;

    let info = ctx.supervisor.start(params).await.expect("start runner");
    assert_eq!(info.total_steps, 2);

    assert_eq!(ctx.finished_outcome().await, json!({"Processed": {"FinalSize": null}}));
    assert!(ctx.wait_until_idle().await, "session should be released");
    assert!(!ctx.supervisor.is_processing(&file_uid));

    let updates = ctx.server.calls_to(Method::RunnerUpdate);
    assert!(updates.iter().any(|p| p[0]["CurrentStepName"] == "step-2"));

    let file = &ctx.server.calls_to(Method::UpdateLibraryFile)[0][0];
    assert_eq!(file["ExecutedNodes"].as_array().map(Vec::len), Some(2));
    assert_eq!(ctx.server.calls_to(Method::RunnerFinished).len(), 1);
  }

  #[tokio::test]
  async fn test_failed_step_fails_the_run() {
    let ctx = SupervisorTestContext::new(RunnerBehavior::Normal);
    ctx.supervisor.start(parameters(&["ok", "fail", "ok"], 10)).await.unwrap();

    assert_eq!(
      ctx.finished_outcome().await,
      json!({"Failed": {"Reason": "Step step-2 exited with code 2: boom"}})
    );
    let file = &ctx.server.calls_to(Method::UpdateLibraryFile)[0][0];
    assert_eq!(file["ExecutedNodes"].as_array().map(Vec::len), Some(2));
  }

  #[tokio::test]
  async fn test_step_ceiling_fails_the_run() {
    let ctx = SupervisorTestContext::new(RunnerBehavior::Normal);
    ctx.supervisor.start(parameters(&["ok", "ok"], 1)).await.unwrap();

    assert_eq!(
      ctx.finished_outcome().await,
      json!({"Failed": {"Reason": "Step step-2 refused: Exceeded maximum number of steps (1)"}})
    );
  }

  #[tokio::test]
  async fn test_unset_step_ceiling_uses_node_default() {
    let ctx = SupervisorTestContext::new(RunnerBehavior::Normal);
    ctx.supervisor.start(parameters(&["ok", "ok"], 0)).await.unwrap();

    assert_eq!(ctx.finished_outcome().await, json!({"Processed": {"FinalSize": null}}));
  }

  #[test]
  fn test_zero_step_ceiling_in_config_is_raised() {
    let mut config = Config::default();
    config.node.max_steps = 0;
    config.node.max_runners = 0;

    let supervisor_config = SupervisorConfig::from_config(&config);
    assert_eq!(supervisor_config.max_steps, 1);
    assert_eq!(supervisor_config.max_runners, 1);
  }

  // ==========================================================================
  // Admission
  // ==========================================================================

  #[tokio::test]
  async fn test_same_file_is_rejected_while_running() {
    let ctx = SupervisorTestContext::new(RunnerBehavior::Normal);
    let first = parameters(&["hang"], 10);
    let mut second = parameters(&["ok"], 10);
    second.file = first.file.clone();
    let runner_uid = first.uid;

    ctx.supervisor.start(first).await.unwrap();
    let err = ctx.supervisor.start(second).await.unwrap_err();
    assert!(matches!(err, SupervisorError::AlreadyRunning(_)), "{err:?}");

    assert!(ctx.supervisor.abort(runner_uid).await);
    assert!(ctx.wait_until_idle().await);
  }

  #[tokio::test]
  async fn test_runner_slots_are_capped() {
    let ctx = SupervisorTestContext::with(RunnerBehavior::Normal, |config| config.max_runners = 1);
    let first = parameters(&["hang"], 10);
    let runner_uid = first.uid;

    ctx.supervisor.start(first).await.unwrap();
    let err = ctx.supervisor.start(parameters(&["ok"], 10)).await.unwrap_err();
    assert!(matches!(err, SupervisorError::AtCapacity(1)), "{err:?}");

    ctx.supervisor.abort(runner_uid).await;
    assert!(ctx.wait_until_idle().await);

    // the slot is free again
    ctx.supervisor.start(parameters(&["ok"], 10)).await.unwrap();
  }

  #[tokio::test]
  async fn test_start_after_shutdown_is_refused() {
    let ctx = SupervisorTestContext::new(RunnerBehavior::Normal);
    ctx.cancel.cancel();
    let err = ctx.supervisor.start(parameters(&["ok"], 10)).await.unwrap_err();
    assert!(matches!(err, SupervisorError::ShuttingDown));
  }

  // ==========================================================================
  // Abort
  // ==========================================================================

  #[tokio::test]
  async fn test_abort_cancels_running_step() {
    let ctx = SupervisorTestContext::new(RunnerBehavior::Normal);
    let params = parameters(&["hang", "ok"], 10);
    let runner_uid = params.uid;
    ctx.supervisor.start(params).await.unwrap();

    // wait until the runner is inside its first step
    let supervisor = ctx.supervisor.clone();
    let running = wait_for(move || {
      let supervisor = supervisor.clone();
      async move {
        match supervisor.find(runner_uid) {
          Some(session) => session.info().await.executed_steps == 1,
          None => false,
        }
      }
    })
    .await;
    assert!(running);

    assert!(ctx.supervisor.abort(runner_uid).await);
    assert!(!ctx.supervisor.abort(runner_uid).await, "second abort is a no-op");

    assert_eq!(ctx.finished_outcome().await, json!("Cancelled"));
    assert!(ctx.wait_until_idle().await);
  }

  #[tokio::test]
  async fn test_unresponsive_runner_is_killed_after_grace() {
    let ctx = SupervisorTestContext::with(RunnerBehavior::Normal, |config| {
      config.abort_grace = Duration::from_millis(200)
    });
    let params = parameters(&["stubborn"], 10);
    let runner_uid = params.uid;
    ctx.supervisor.start(params).await.unwrap();

    let supervisor = ctx.supervisor.clone();
    let connected = wait_for(move || {
      let supervisor = supervisor.clone();
      async move {
        match supervisor.find(runner_uid) {
          Some(session) => session.state().await == RunnerState::Running,
          None => false,
        }
      }
    })
    .await;
    assert!(connected);

    ctx.supervisor.abort(runner_uid).await;
    assert_eq!(ctx.finished_outcome().await, json!("Cancelled"));
    assert!(ctx.wait_until_idle().await);
  }

  #[tokio::test]
  async fn test_abort_unknown_runner() {
    let ctx = SupervisorTestContext::new(RunnerBehavior::Normal);
    assert!(!ctx.supervisor.abort(uuid::Uuid::new_v4()).await);
  }

  // ==========================================================================
  // Lost runners
  // ==========================================================================

  #[tokio::test]
  async fn test_runner_exiting_without_complete_is_lost() {
    let ctx = SupervisorTestContext::new(RunnerBehavior::Crash);
    ctx.supervisor.start(parameters(&["ok"], 10)).await.unwrap();

    assert_eq!(ctx.finished_outcome().await, json!({"Failed": {"Reason": RUNNER_LOST}}));
    assert!(ctx.wait_until_idle().await);
  }

  #[tokio::test]
  async fn test_runner_that_never_connects_is_lost() {
    let ctx = SupervisorTestContext::with(RunnerBehavior::Silent, |config| {
      config.connect_timeout = Duration::from_millis(200)
    });
    ctx.supervisor.start(parameters(&["ok"], 10)).await.unwrap();

    assert_eq!(ctx.finished_outcome().await, json!({"Failed": {"Reason": RUNNER_LOST}}));
    assert!(ctx.wait_until_idle().await);
  }

  #[tokio::test]
  async fn test_wrong_greeting_is_rejected() {
    let ctx = SupervisorTestContext::new(RunnerBehavior::WrongGreeting);
    ctx.supervisor.start(parameters(&["ok"], 10)).await.unwrap();

    assert_eq!(ctx.finished_outcome().await, json!({"Failed": {"Reason": RUNNER_LOST}}));
    assert!(ctx.wait_until_idle().await);
  }

  // ==========================================================================
  // Status and shutdown
  // ==========================================================================

  #[tokio::test]
  async fn test_status_lists_live_sessions() {
    let ctx = SupervisorTestContext::new(RunnerBehavior::Normal);
    let params = parameters(&["hang"], 10);
    let file_uid = params.file.uid;
    ctx.supervisor.start(params).await.unwrap();

    let status = ctx.supervisor.status().await;
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].file_uid, file_uid);
    assert_eq!(ctx.supervisor.in_flight(), vec![file_uid]);

    ctx.supervisor.shutdown_all(Duration::from_secs(5)).await;
    assert_eq!(ctx.supervisor.active(), 0);
    assert_eq!(ctx.finished_outcome().await, json!("Cancelled"));
  }

  #[tokio::test]
  async fn test_socket_is_removed_after_run() {
    let ctx = SupervisorTestContext::new(RunnerBehavior::Normal);
    ctx.supervisor.start(parameters(&["ok"], 10)).await.unwrap();
    ctx.finished_outcome().await;
    assert!(ctx.wait_until_idle().await);

    let leftovers = std::fs::read_dir(ctx.socket_dir.path()).unwrap().count();
    assert_eq!(leftovers, 0);
  }
}
