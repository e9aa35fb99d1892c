//! Relay Mixer - command line entry point
//!
//! `plan` prints the shuffled route and time estimate for a configured path.
//! `simulate` runs a strategy end to end against the in-memory ledger and
//! prints the run report as JSON.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use relay_mixer::config::RelayConfig;
use relay_mixer::metrics::metrics;
use relay_mixer::provision::provision_bulk;
use relay_mixer::relay::{build_strategy, RelayPath, StrategyKind, TimingPolicy};
use relay_mixer::simulation::SimulatedLedger;
use relay_mixer::wallet::AccountRef;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PROVISION_WORKERS: usize = 4;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "relay.toml", global = true)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the execution order and time estimate without moving funds
    Plan {
        #[arg(short, long, default_value = "domino")]
        strategy: StrategyKind,
    },

    /// Run a strategy against the in-memory ledger
    Simulate {
        #[arg(short, long, default_value = "domino")]
        strategy: StrategyKind,

        #[arg(short, long)]
        amount: f64,

        /// Skip settle windows and jitter
        #[arg(long)]
        fast: bool,

        /// Print Prometheus metrics after the report
        #[arg(long)]
        print_metrics: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.json_logs)?;

    info!(config = %args.config.display(), "Loading configuration");
    let config = RelayConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    match args.command {
        Command::Plan { strategy } => plan(&config, strategy).await,
        Command::Simulate {
            strategy,
            amount,
            fast,
            print_metrics,
        } => simulate(&config, strategy, amount, fast, print_metrics).await,
    }
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let env_filter = if verbose {
        "relay_mixer=debug,info"
    } else {
        "relay_mixer=info,warn"
    };

    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| env_filter.into()),
    );

    // stdout is reserved for reports
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }

    Ok(())
}

/// Build the route from `[path]`, or provision throwaway middlemen
async fn resolve_path(config: &RelayConfig, ledger: &SimulatedLedger) -> Result<RelayPath> {
    let sim = &config.simulation;

    let (source, middlemen, destination) = match &config.path {
        Some(path) => {
            let middlemen: Vec<AccountRef> = path
                .middlemen
                .iter()
                .map(|m| ledger.account(m, 0.0))
                .collect();
            (
                ledger.account(&path.source, sim.source_balance),
                middlemen,
                ledger.account(&path.destination, 0.0),
            )
        }
        None => {
            warn!(
                count = sim.middlemen_count,
                "No [path] configured, provisioning middlemen"
            );
            let middlemen = provision_bulk(
                Arc::new(ledger.clone()),
                sim.middlemen_count,
                PROVISION_WORKERS,
            )
            .await
            .context("Failed to provision middlemen")?;
            (
                ledger.account("source", sim.source_balance),
                middlemen,
                ledger.account("destination", 0.0),
            )
        }
    };

    Ok(RelayPath::new(source, &middlemen, destination)?)
}

async fn plan(config: &RelayConfig, kind: StrategyKind) -> Result<()> {
    let ledger = SimulatedLedger::new(config.simulation.fee);
    let path = resolve_path(config, &ledger).await?;
    let strategy = build_strategy(kind, path.clone(), config.strategy_params(kind))?;

    let plan = serde_json::json!({
        "strategy": strategy.name(),
        "order": path.addresses(),
        "transfers": strategy.total_transfers(),
        "approx_minutes": strategy.approx_minutes(),
    });
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

async fn simulate(
    config: &RelayConfig,
    kind: StrategyKind,
    amount: f64,
    fast: bool,
    print_metrics: bool,
) -> Result<()> {
    let sim = &config.simulation;
    let ledger = SimulatedLedger::new(sim.fee);
    let path = resolve_path(config, &ledger).await?;

    // A sequential relay needs every middleman to cover its own fees
    if kind == StrategyKind::Domino {
        let reserve = sim
            .middleman_balance
            .unwrap_or(ledger.fee(config.priority) * path.hop_count() as f64);
        for middleman in path.middlemen() {
            ledger.account(middleman.address(), reserve);
        }
    } else if let Some(balance) = sim.middleman_balance {
        for middleman in path.middlemen() {
            ledger.account(middleman.address(), balance);
        }
    }
    for address in &sim.drop_fan_out_to {
        ledger.drop_incoming(address);
    }
    for address in &sim.fail_sends {
        ledger.fail_all_sends(address);
    }

    let mut params = config.strategy_params(kind);
    if fast {
        params = params.with_timing(TimingPolicy::immediate());
    }
    let mut strategy = build_strategy(kind, path, params)?;

    info!(
        strategy = strategy.name(),
        amount = %amount,
        approx_minutes = strategy.approx_minutes(),
        "Starting simulated run"
    );
    let result = strategy.start(amount).await;

    if let Some(report) = strategy.progress() {
        println!("{}", serde_json::to_string_pretty(report)?);
    }
    if print_metrics {
        println!("{}", metrics().gather_text()?);
    }

    match result {
        Ok(report) if report.has_failures() => {
            bail!("{} leg(s) failed", report.failed_legs().count())
        }
        Ok(_) => Ok(()),
        Err(e) => {
            error!(error = %e, "Simulated run failed");
            Err(e.into())
        }
    }
}
