//! Thin hosting runner: loads a layered config and a scenario file (rule +
//! simulated broker state + tick sequence), drives `fxauto_runtime::Engine`
//! to completion in simulated-clock mode, and maps the terminal engine state
//! to the exit codes documented in the external-interfaces contract. No
//! report rendering, no live broker wiring, no backtest orchestration outer
//! loop — that is all deliberately someone else's job.

mod scenario;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use fxauto_audit::{EventSink, InMemoryEventSink, JsonlEventSink};
use fxauto_broker::SimulatedBrokerAdapter;
use fxauto_monitor::NullAdvisory;
use fxauto_runtime::Engine;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "fxauto")]
#[command(about = "fxauto monitoring/rule-evaluation engine runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the layered config hash and print canonical JSON.
    ConfigHash {
        /// Paths in merge order (base -> environment override).
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Drive a scenario file through the engine to completion.
    Run {
        /// Layered config paths in merge order.
        #[arg(long = "config", required = true)]
        config_paths: Vec<PathBuf>,

        /// Scenario file: rule document + broker state + tick sequence.
        #[arg(long)]
        scenario: PathBuf,

        /// If set, write the hash-chained audit trail here instead of
        /// keeping it in memory.
        #[arg(long)]
        audit_log: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("fxauto_runner: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.cmd {
        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&std::path::Path> = paths.iter().map(PathBuf::as_path).collect();
            let loaded = match fxauto_config::load_layered(&path_refs) {
                Ok(l) => l,
                Err(err) => {
                    eprintln!("config invalid: {err:?}");
                    return Ok(ExitCode::from(1));
                }
            };
            println!("config_fingerprint={}", loaded.fingerprint);
            println!("{}", serde_json::to_string_pretty(&loaded.config)?);
            Ok(ExitCode::from(0))
        }
        Commands::Run { config_paths, scenario, audit_log } => {
            let path_refs: Vec<&std::path::Path> = config_paths.iter().map(PathBuf::as_path).collect();
            let loaded = match fxauto_config::load_layered(&path_refs) {
                Ok(l) => l,
                Err(err) => {
                    eprintln!("config invalid: {err:?}");
                    return Ok(ExitCode::from(1));
                }
            };

            let scen = match scenario::load(&scenario, loaded.config.pip_scale) {
                Ok(s) => s,
                Err(err) => {
                    eprintln!("scenario invalid: {err:?}");
                    return Ok(ExitCode::from(1));
                }
            };

            let start = match scen.start() {
                Some(t) => t,
                None => {
                    eprintln!("scenario invalid: tick sequence is empty");
                    return Ok(ExitCode::from(1));
                }
            };

            match audit_log {
                Some(path) => {
                    let sink = JsonlEventSink::create(&path)?;
                    drive_to_completion(loaded.config, scen, start, sink)
                }
                None => {
                    let sink = InMemoryEventSink::default();
                    drive_to_completion(loaded.config, scen, start, sink)
                }
            }
        }
    }
}

fn drive_to_completion<S: EventSink>(
    config: fxauto_config::EngineConfig,
    scen: scenario::Scenario,
    start: chrono::DateTime<chrono::Utc>,
    sink: S,
) -> Result<ExitCode> {
    let mut engine = Engine::<SimulatedBrokerAdapter, NullAdvisory, S>::new(
        config,
        scen.broker_offset_hours,
        start,
        scen.broker,
        NullAdvisory,
        sink,
    )?;

    engine.install_rule(scen.rule, start)?;

    for tick in scen.ticks {
        if let Err(err) = engine.step(tick) {
            warn!("engine step failed, treating as irrecoverable: {err:#}");
            return Ok(ExitCode::from(2));
        }
    }

    if engine.is_degraded() {
        info!("run finished in degraded mode");
        return Ok(ExitCode::from(3));
    }

    info!("run finished cleanly, {} position(s) tracked", engine.positions().iter().count());
    Ok(ExitCode::from(0))
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}
