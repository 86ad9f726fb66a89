use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use trellis_config::UnitDef;
use trellis_engine::{ApplyReport, Engine, EngineConfig, EngineError};
use trellis_expand::ExpandError;
use trellis_expr::{ParseError, Value};
use trellis_provider::ProviderRegistry;
use trellis_resolver::{ResolveError, Resolver, StandardResolver};
use trellis_state::{FsStateStore, SqliteStateStore, StateMap, StateStore};
use trellis_unit_registry::FsUnitRegistry;

/// Trellis - plan and apply declarative resource graphs
#[derive(Parser)]
#[command(name = "trellis")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.trellis)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// State file; a `.db` extension selects SQLite (default: <data-dir>/state.json)
  #[arg(long, global = true)]
  state: Option<PathBuf>,

  /// Directory of installed units (default: <data-dir>/units)
  #[arg(long, global = true)]
  units: Option<PathBuf>,

  /// Maximum number of provider operations in flight
  #[arg(long, global = true, default_value_t = 10)]
  parallelism: usize,

  /// Deadline for each provider operation, in milliseconds
  #[arg(long, global = true)]
  timeout_ms: Option<u64>,

  /// Read recorded resources from their providers before planning
  #[arg(long, global = true)]
  refresh: bool,

  /// Root input value as `name=value`; the value is parsed as JSON when it can be
  #[arg(long = "var", global = true, value_parser = parse_var)]
  vars: Vec<(String, Value)>,

  /// JSON file of root input values
  #[arg(long, global = true)]
  var_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Check that a configuration resolves, expands and forms an acyclic graph
  Validate { config: PathBuf },
  /// Show what apply would change
  Plan { config: PathBuf },
  /// Apply a configuration
  Apply { config: PathBuf },
  /// Destroy every recorded resource
  Destroy { config: PathBuf },
}

fn parse_var(raw: &str) -> Result<(String, Value), String> {
  let (name, value) = raw
    .split_once('=')
    .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
  let value = serde_json::from_str::<serde_json::Value>(value)
    .map(Value::from)
    .unwrap_or_else(|_| Value::from(value));
  Ok((name.to_string(), value))
}

fn main() -> ExitCode {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  let result = tokio::runtime::Runtime::new()
    .context("failed to start runtime")
    .and_then(|rt| rt.block_on(run(cli)));

  match result {
    Ok(code) => code,
    Err(e) => {
      eprintln!("error: {e:#}");
      exit_code_for(&e)
    }
  }
}

/// 2 for invalid input, 1 for anything that went wrong while planning or
/// applying.
fn exit_code_for(error: &anyhow::Error) -> ExitCode {
  let invalid = error.chain().any(|cause| {
    cause.is::<ResolveError>()
      || cause.is::<ParseError>()
      || cause.is::<serde_json::Error>()
      || cause.is::<ExpandError>()
      || cause
        .downcast_ref::<EngineError>()
        .is_some_and(EngineError::is_structural)
  });
  if invalid {
    ExitCode::from(2)
  } else {
    ExitCode::from(1)
  }
}

async fn run(cli: Cli) -> Result<ExitCode> {
  let data_dir = match cli.data_dir.clone() {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".trellis"),
  };
  let units_dir = cli.units.clone().unwrap_or_else(|| data_dir.join("units"));
  let state_path = cli.state.clone().unwrap_or_else(|| data_dir.join("state.json"));

  let config_file = match &cli.command {
    Command::Validate { config }
    | Command::Plan { config }
    | Command::Apply { config }
    | Command::Destroy { config } => config.clone(),
  };

  let variables = load_variables(&cli).await?;
  let unit_def = load_unit(&config_file).await?;
  let configuration = StandardResolver::new(FsUnitRegistry::new(&units_dir))
    .resolve(unit_def)
    .await
    .with_context(|| format!("failed to resolve {}", config_file.display()))?;

  let providers = ProviderRegistry::with_builtins();

  if let Command::Validate { .. } = cli.command {
    let composition = trellis_expand::compose(&configuration, variables)?;
    let plan = trellis_engine::plan(composition, &StateMap::new(), &providers)?;
    eprintln!(
      "Configuration is valid: {} instances, {} graph nodes.",
      plan.counts().create,
      plan.graph().len()
    );
    return Ok(ExitCode::SUCCESS);
  }

  let store = open_store(&state_path).await?;
  let engine = Engine::new(
    providers,
    store,
    EngineConfig {
      parallelism: cli.parallelism,
      default_timeout_ms: cli.timeout_ms,
      refresh: cli.refresh,
    },
  );

  let cancel = CancellationToken::new();
  let on_signal = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupt received, stopping after in-flight operations");
      on_signal.cancel();
    }
  });

  match cli.command {
    Command::Plan { .. } => {
      let plan = engine.plan(&configuration, variables).await?;
      println!("{plan}");
      Ok(ExitCode::SUCCESS)
    }
    Command::Apply { .. } => {
      let report = engine.apply(&configuration, variables, cancel).await?;
      print_report(&report)
    }
    Command::Destroy { .. } => {
      let report = engine.destroy(&configuration, variables, cancel).await?;
      print_report(&report)
    }
    Command::Validate { .. } => Ok(ExitCode::SUCCESS),
  }
}

async fn load_unit(path: &Path) -> Result<UnitDef> {
  let content = tokio::fs::read_to_string(path)
    .await
    .with_context(|| format!("failed to read configuration: {}", path.display()))?;
  let unit = serde_json::from_str(&content)
    .with_context(|| format!("failed to parse configuration: {}", path.display()))?;
  Ok(unit)
}

async fn load_variables(cli: &Cli) -> Result<BTreeMap<String, Value>> {
  let mut variables = BTreeMap::new();

  if let Some(path) = &cli.var_file {
    let content = tokio::fs::read_to_string(path)
      .await
      .with_context(|| format!("failed to read var file: {}", path.display()))?;
    let json: serde_json::Value = serde_json::from_str(&content)
      .with_context(|| format!("failed to parse var file: {}", path.display()))?;
    let serde_json::Value::Object(entries) = json else {
      bail!("var file {} must contain a JSON object", path.display());
    };
    variables.extend(entries.into_iter().map(|(k, v)| (k, Value::from(v))));
  }

  // Command-line values win over the var file.
  variables.extend(cli.vars.iter().cloned());
  Ok(variables)
}

async fn open_store(path: &Path) -> Result<Arc<dyn StateStore>> {
  if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
    tokio::fs::create_dir_all(parent)
      .await
      .with_context(|| format!("failed to create {}", parent.display()))?;
  }

  if path.extension().is_some_and(|ext| ext == "db") {
    let store = SqliteStateStore::open(path)
      .await
      .with_context(|| format!("failed to open state database: {}", path.display()))?;
    Ok(Arc::new(store))
  } else {
    Ok(Arc::new(FsStateStore::new(path)))
  }
}

fn print_report(report: &ApplyReport) -> Result<ExitCode> {
  for (address, action) in report.changed() {
    eprintln!("{address}: {action} complete");
  }
  for failure in &report.failed {
    eprintln!("{}: failed: {}", failure.address, failure.error);
  }
  for skip in &report.skipped {
    eprintln!("{}: skipped ({})", skip.address, skip.cause);
  }
  eprintln!(
    "Run {}: {} done, {} failed, {} skipped.",
    report.run_id,
    report.done.len(),
    report.failed.len(),
    report.skipped.len()
  );

  println!("{}", serde_json::to_string_pretty(&report.outputs)?);

  if report.is_success() {
    Ok(ExitCode::SUCCESS)
  } else {
    Ok(ExitCode::from(1))
  }
}
