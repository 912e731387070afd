//! sandbox-settle CLI
//!
//! Runs the built-in scenarios and prints their events and result as JSON.

use anyhow::Context;
use clap::{Parser, Subcommand};
use sandbox_settle::sandbox::{EventLog, Sandbox, SandboxConfig};
use sandbox_settle::{scenarios, VERSION};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sandbox-settle")]
#[command(author, version, about = "Completion tracking for sandboxed scripts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List the built-in scenarios
    List,

    /// Run a built-in scenario
    Run {
        /// Scenario name (see `list`)
        scenario: String,
        /// JSON sandbox configuration file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Override the virtual-time limit in milliseconds
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
        /// Override the task budget
        #[arg(long, value_name = "N")]
        max_tasks: Option<usize>,
        /// Run without tracking continuations
        #[arg(long)]
        no_intercept: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    setup_logging(cli.verbose);

    match cli.command {
        Commands::List => {
            println!("sandbox-settle v{}", VERSION);
            for scenario in scenarios::all() {
                println!("  {:<28} {}", scenario.name, scenario.description);
            }
            Ok(())
        }
        Commands::Run {
            scenario,
            config,
            timeout_ms,
            max_tasks,
            no_intercept,
        } => {
            let mut config = match config {
                Some(path) => SandboxConfig::from_file(&path)
                    .with_context(|| format!("loading config from '{}'", path.display()))?,
                None => SandboxConfig::default(),
            };
            if let Some(timeout_ms) = timeout_ms {
                config.timeout_ms = timeout_ms;
            }
            if let Some(max_tasks) = max_tasks {
                config.max_tasks = max_tasks;
            }
            if no_intercept {
                config.intercept_async = false;
            }
            run_scenario(&scenario, config)
        }
    }
}

fn run_scenario(name: &str, config: SandboxConfig) -> anyhow::Result<()> {
    let scenario = scenarios::find(name)?;
    let mut sandbox = Sandbox::new(config).context("invalid sandbox configuration")?;
    let log = EventLog::new();
    sandbox.on_event(log.listener());

    let result = sandbox.run(scenario.script)?;
    let output = serde_json::json!({
        "scenario": scenario.name,
        "events": log.events(),
        "result": result,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn setup_logging(verbosity: u8) {
    // RUST_LOG wins over -v
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
