//! FleetFlow - distributed media processing node and runner

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use fleetflow::{
  Node,
  config::Config,
  domain::{library::Library, work_item::WorkItem},
  node::{self, ProcessLauncher},
  queue::{self, FileFacts},
  runner::{self, CommandExecutor},
};
use rand::{SeedableRng, rngs::StdRng};
use serde::Deserialize;
use uuid::Uuid;

mod logging;

use logging::{init_cli_logging, init_console_logging, init_file_logging};

#[derive(Parser)]
#[command(name = "fleetflow")]
#[command(about = "Distributed media processing node")]
#[command(after_help = "\
QUICK START:
  fleetflow config init > ~/.config/fleetflow/config.toml
  fleetflow node --foreground       # Connect to the server and process files

TOOLS:
  fleetflow sort queue.json         # Show the order files would run in
  fleetflow detect lib.json <files> # Check files against a library's detection rules")]
struct Cli {
  /// Config file (default: ~/.config/fleetflow/config.toml)
  #[arg(long, global = true, value_name = "FILE")]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

/// Subcommands for `fleetflow config`
#[derive(Subcommand)]
enum ConfigCommand {
  /// Show current effective configuration
  Show,
  /// Print a commented default config file
  Init,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a processing node
  Node {
    /// Log to the console instead of node.log
    #[arg(long)]
    foreground: bool,
  },
  /// Process one file for a node (launched by the node, not by hand)
  #[command(hide = true)]
  Runner {
    /// Socket the node is listening on
    #[arg(long)]
    socket: PathBuf,
    /// Runner uid assigned by the node
    #[arg(long)]
    uid: Uuid,
  },
  /// Print the processing order of a queue snapshot
  #[command(after_help = "\
The snapshot is a JSON object with \"Libraries\" and \"Files\" arrays, in the
same shape the server sends them.")]
  Sort {
    /// Queue snapshot (JSON)
    snapshot: PathBuf,
    /// Rank by library priority and processing order (default: from config)
    #[arg(long)]
    advanced: bool,
    /// Seed for libraries using random order
    #[arg(long)]
    seed: Option<u64>,
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
  /// Check files against a library's detection rules
  Detect {
    /// Library definition (JSON)
    library: PathBuf,
    /// Files to check
    #[arg(required = true)]
    files: Vec<PathBuf>,
  },
  /// Manage configuration
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QueueSnapshot {
  #[serde(default)]
  libraries: Vec<Library>,
  #[serde(default)]
  files: Vec<WorkItem>,
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  let config = Config::load(cli.config.as_deref())?;

  // node and runner log according to config, everything else to stderr
  let _guard = match &cli.command {
    Commands::Node { foreground: true } => {
      init_console_logging(&config.log);
      None
    }
    Commands::Node { foreground: false } => init_file_logging(&config.log, &node::log_dir(&config), "node.log"),
    Commands::Runner { uid, .. } => init_file_logging(&config.log, &node::log_dir(&config), &format!("runner-{uid}.log")),
    _ => {
      init_cli_logging();
      None
    }
  };

  match cli.command {
    Commands::Node { .. } => cmd_node(config, cli.config),
    Commands::Runner { socket, uid } => cmd_runner(&config, &socket, uid),
    Commands::Sort {
      snapshot,
      advanced,
      seed,
      json,
    } => cmd_sort(&snapshot, advanced || config.queue.advanced, seed, json),
    Commands::Detect { library, files } => cmd_detect(&library, &files),
    Commands::Config { command } => match command {
      ConfigCommand::Show => cmd_config_show(&config),
      ConfigCommand::Init => {
        print!("{}", Config::generate_template());
        Ok(())
      }
    },
  }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
  tokio::runtime::Builder::new_multi_thread()
    .enable_all()
    .build()
    .context("Failed to start async runtime")
}

fn cmd_node(config: Config, config_path: Option<PathBuf>) -> Result<()> {
  let launcher = ProcessLauncher::current_exe()
    .context("Failed to locate the fleetflow executable")?
    .with_config(config_path);
  let node = Node::new(config, Arc::new(launcher));
  runtime()?.block_on(node.run_until_signal())?;
  Ok(())
}

fn cmd_runner(config: &Config, socket: &Path, uid: Uuid) -> Result<()> {
  // the outcome has already been reported to the node
  runtime()?.block_on(runner::run(socket, uid, &config.rpc, Arc::new(CommandExecutor)))?;
  Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
  let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
  serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn cmd_sort(snapshot: &Path, advanced: bool, seed: Option<u64>, json: bool) -> Result<()> {
  let snapshot: QueueSnapshot = read_json(snapshot)?;
  let policies = queue::policies_from(&snapshot.libraries);
  let queued: Vec<WorkItem> = snapshot.files.into_iter().filter(WorkItem::is_queued).collect();

  let sorted = match seed {
    Some(seed) => queue::sort_with_rng(queued, &policies, advanced, &mut StdRng::seed_from_u64(seed)),
    None => queue::sort(queued, &policies, advanced),
  };

  if json {
    println!("{}", serde_json::to_string_pretty(&sorted)?);
    return Ok(());
  }

  if sorted.is_empty() {
    println!("No files queued.");
    return Ok(());
  }
  for (i, file) in sorted.iter().enumerate() {
    let library = file.library.as_ref().map(|l| l.name.as_str()).unwrap_or("-");
    println!("{:>4}  {:<20} {}", i + 1, library, file.name);
  }
  Ok(())
}

fn cmd_detect(library: &Path, files: &[PathBuf]) -> Result<()> {
  let library: Library = read_json(library)?;
  let mut rejected = 0;
  for path in files {
    let metadata = std::fs::metadata(path).with_context(|| format!("Failed to stat {}", path.display()))?;
    let facts = FileFacts::from_metadata(&metadata)?;
    if queue::matches_detection(&library, &facts, None) {
      println!("match    {}", path.display());
    } else {
      rejected += 1;
      println!("no match {}", path.display());
    }
  }
  if rejected == files.len() {
    bail!("No file matches library {}", library.name);
  }
  Ok(())
}

fn cmd_config_show(config: &Config) -> Result<()> {
  match Config::user_config_path() {
    Some(path) if path.exists() => println!("# Loaded defaults overlaid with {}", path.display()),
    _ => println!("# Built-in defaults"),
  }
  println!("{}", toml::to_string_pretty(config)?);
  Ok(())
}
