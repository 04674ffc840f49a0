//! Logging setup for the node and runner processes

use std::path::Path;

use fleetflow::config::LogConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Parse log level from config string
fn parse_log_level(level: &str) -> tracing::Level {
  match level.to_lowercase().as_str() {
    "off" | "error" => tracing::Level::ERROR,
    "warn" => tracing::Level::WARN,
    "info" => tracing::Level::INFO,
    "debug" => tracing::Level::DEBUG,
    "trace" => tracing::Level::TRACE,
    _ => tracing::Level::INFO,
  }
}

fn env_filter(config: &LogConfig) -> EnvFilter {
  EnvFilter::builder()
    .with_default_directive(parse_log_level(&config.level).into())
    .from_env_lossy()
}

/// Console logging for short-lived commands
pub fn init_cli_logging() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
    .with_writer(std::io::stderr)
    .init();
}

/// Console logging with colors, for a node in the foreground
pub fn init_console_logging(config: &LogConfig) {
  tracing_subscriber::fmt()
    .with_env_filter(env_filter(config))
    .with_target(true)
    .with_ansi(true)
    .init();
}

/// File logging to `<dir>/<file_name>`, rotated per config.
///
/// Falls back to console logging when the directory cannot be created.
/// Returns the guard that must be kept alive for the duration of the program.
pub fn init_file_logging(config: &LogConfig, dir: &Path, file_name: &str) -> Option<WorkerGuard> {
  if std::fs::create_dir_all(dir).is_err() {
    init_console_logging(config);
    return None;
  }

  let file_appender = match config.rotation.as_str() {
    "hourly" => tracing_appender::rolling::hourly(dir, file_name),
    "never" => tracing_appender::rolling::never(dir, file_name),
    _ => tracing_appender::rolling::daily(dir, file_name),
  };
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::fmt()
    .with_env_filter(env_filter(config))
    .with_target(true)
    .with_ansi(false)
    .with_writer(file_writer)
    .init();

  Some(guard)
}
