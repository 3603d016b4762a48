use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};

use flow_e2e::config::{SuiteConfig, DEFAULT_CONFIG_FILE};
use flow_e2e::error::{HarnessError, Result};
use flow_e2e::flow::find_flow_binary;
use flow_e2e::harness::{ContextSettings, RunReport, Runner, RunnerOptions, ScenarioFilter};
use flow_e2e::scenarios;

#[derive(Parser)]
#[command(
  name = "flow-e2e",
  about = "End-to-end scenario suite for the flow CLI"
)]
struct Cli {
  #[command(subcommand)]
  command: Commands,

  /// Path to config file (defaults to flow-e2e.yaml when present)
  #[arg(short, long)]
  config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
  /// List scenarios in the catalog
  List {
    /// Only scenarios carrying one of these tags (comma-separated)
    #[arg(long, value_delimiter = ',')]
    tags: Vec<String>,
  },
  /// Run scenarios against the flow binary
  Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
  /// Scenario names; a name matching no scenario exactly selects by substring
  names: Vec<String>,

  /// Only scenarios carrying one of these tags (comma-separated)
  #[arg(long, value_delimiter = ',')]
  tags: Vec<String>,

  /// Keep every sandbox, passed or not
  #[arg(long)]
  keep: bool,

  /// Remove sandboxes of failed scenarios too
  #[arg(long)]
  no_keep_on_failure: bool,

  /// Stop after the first failed scenario
  #[arg(long)]
  fail_fast: bool,

  /// Echo every command and its output
  #[arg(short, long)]
  verbose: bool,

  /// Write a JSON report to this path
  #[arg(long)]
  report: Option<PathBuf>,

  /// Per-command timeout in seconds
  #[arg(long)]
  timeout: Option<u64>,
}

impl Cli {
  fn verbose(&self) -> bool {
    matches!(&self.command, Commands::Run(args) if args.verbose)
  }
}

#[tokio::main]
async fn main() {
  let cli = Cli::parse();
  let default_filter = if cli.verbose() {
    "info,flow_e2e=debug"
  } else {
    "info"
  };

  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
    )
    .init();

  match run(cli).await {
    Ok(true) => {}
    Ok(false) => std::process::exit(1),
    Err(e) => {
      error!("{e}");
      std::process::exit(1);
    }
  }
}

/// Returns whether every selected scenario passed.
async fn run(cli: Cli) -> Result<bool> {
  match cli.command {
    Commands::List { tags } => {
      cmd_list(&tags);
      Ok(true)
    }
    Commands::Run(args) => {
      let explicit = cli.config.is_some();
      let path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
      let config = SuiteConfig::load_or_default(&path, explicit)?;
      cmd_run(config, args).await
    }
  }
}

fn cmd_list(tags: &[String]) {
  for scenario in scenarios::all() {
    if !tags.is_empty() && !tags.iter().any(|t| scenario.has_tag(t)) {
      continue;
    }
    let explicit = if scenario.explicit_only {
      " (explicit only)"
    } else {
      ""
    };
    println!("{} [{}]{explicit}", scenario.name, scenario.tags.join(", "));
    println!("    {}", scenario.description);
  }
}

fn apply_overrides(config: &mut SuiteConfig, args: &RunArgs) -> Result<()> {
  if args.keep {
    config.keep_artifacts = true;
  }
  if args.no_keep_on_failure {
    config.keep_on_failure = false;
  }
  if args.fail_fast {
    config.fail_fast = true;
  }
  if let Some(secs) = args.timeout {
    if secs == 0 {
      return Err(HarnessError::Config(
        "--timeout must be greater than zero".into(),
      ));
    }
    config.command_timeout_secs = secs;
  }
  Ok(())
}

async fn cmd_run(mut config: SuiteConfig, args: RunArgs) -> Result<bool> {
  apply_overrides(&mut config, &args)?;

  let cwd = std::env::current_dir()?;
  // Scenarios that need the binary fail on their own when it is missing.
  let flow_binary = match find_flow_binary(&config, &cwd) {
    Ok(path) => {
      info!("using flow binary {}", path.display());
      Some(path)
    }
    Err(e) => {
      warn!("{e}");
      None
    }
  };

  let filter = ScenarioFilter {
    names: args.names.clone(),
    tags: args.tags.clone(),
  };
  let selected = filter.select(scenarios::all());
  if selected.is_empty() {
    return Err(HarnessError::NoScenarios(format!(
      "names={:?} tags={:?}",
      filter.names, filter.tags
    )));
  }
  info!("running {} scenario(s)", selected.len());

  let cancel = Arc::new(AtomicBool::new(false));
  let listener = {
    let cancel = cancel.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupted, stopping after the current step");
        cancel.store(true, Ordering::SeqCst);
      }
    })
  };

  let options = RunnerOptions {
    work_root: config.work_root.clone(),
    keep_artifacts: config.keep_artifacts,
    keep_on_failure: config.keep_on_failure,
    fail_fast: config.fail_fast,
    context: ContextSettings {
      flow_binary,
      command_timeout: Some(config.command_timeout()),
      extra_path: config.extra_path.clone(),
      verbose: args.verbose,
    },
  };

  let runner_cancel = cancel.clone();
  let report = tokio::task::spawn_blocking(move || {
    Runner::new(options).run(&selected, &runner_cancel)
  })
  .await
  .map_err(|e| HarnessError::Command(format!("runner task failed: {e}")))??;
  listener.abort();

  print_report(&report);
  if let Some(path) = &args.report {
    write_report(&report, path)?;
  }

  Ok(report.is_success())
}

fn print_report(report: &RunReport) {
  println!();
  println!("flow-e2e run {}", report.run_id);
  println!("================");
  for outcome in &report.outcomes {
    let status = format!("{:?}", outcome.status);
    let detail = match (&outcome.failed_step, &outcome.error) {
      (Some(step), Some(err)) => format!(" at '{step}': {err}"),
      (None, Some(err)) => format!(": {err}"),
      _ => String::new(),
    };
    println!("  {}: {status}{detail}", outcome.name);
    if let Some(sandbox) = &outcome.sandbox {
      println!("    sandbox kept at {}", sandbox.display());
    }
  }
  println!();
  println!("{}", report.summary());
}

fn write_report(report: &RunReport, path: &Path) -> Result<()> {
  report.write_json(path)?;
  info!("report written to {}", path.display());
  Ok(())
}
