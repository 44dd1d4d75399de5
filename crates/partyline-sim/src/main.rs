//! Partyline session simulator.
//!
//! Runs several sessions against the in-memory engine relay, applying
//! random host operations on a fixed tick interval and checking session
//! invariants after every tick.
//!
//! # Usage
//!
//! ```bash
//! # Four peers, 500 ticks at 60 Hz
//! partyline-sim --peers 4 --ticks 500 --tick-ms 16
//!
//! # Lossy relay with a JSON report
//! partyline-sim --seed 7 --loss 0.2 --report report.json
//! ```

mod error;
mod report;
mod sim;

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use partyline_core::{LogLevel, MAX_PLAYERS, SessionConfig};
use partyline_harness::APP_ID;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::time::MissedTickBehavior;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    error::RunError,
    report::Report,
    sim::{SimConfig, Simulation},
};

/// Partyline session simulator
#[derive(Parser, Debug)]
#[command(name = "partyline-sim")]
#[command(about = "Simulate partyline sessions over an in-memory engine")]
#[command(version)]
struct Args {
    /// Number of peers
    #[arg(
        short,
        long,
        default_value = "4",
        value_parser = clap::value_parser!(u8).range(1..=16)
    )]
    peers: u8,

    /// Ticks to run
    #[arg(short, long, default_value = "600")]
    ticks: u64,

    /// Milliseconds between ticks
    #[arg(long, default_value = "16")]
    tick_ms: u64,

    /// Seed for the relay and the operation stream
    #[arg(short, long, default_value = "0")]
    seed: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Player limit of the initial network
    #[arg(long, default_value_t = MAX_PLAYERS)]
    max_players: u32,

    /// Probability of losing a best-effort data message
    #[arg(long, default_value = "0.0")]
    loss: f64,

    /// Probability that a tick applies a random host operation
    #[arg(long, default_value = "0.25")]
    operation_rate: f64,

    /// Write a JSON report to this path
    #[arg(long)]
    report: Option<PathBuf>,
}

impl Args {
    fn sim_config(&self) -> SimConfig {
        SimConfig {
            seed: self.seed,
            peers: usize::from(self.peers),
            max_players: self.max_players,
            loss_rate: self.loss,
            operation_rate: self.operation_rate,
            session: SessionConfig {
                log_level: session_log_level(&self.log_level),
                ..SessionConfig::new(APP_ID)
            },
        }
    }
}

/// Session diagnostics matching a tracing filter level.
fn session_log_level(filter: &str) -> LogLevel {
    match filter.to_ascii_lowercase().as_str() {
        "off" | "error" | "warn" => LogLevel::None,
        "debug" | "trace" => LogLevel::Verbose,
        _ => LogLevel::Minimal,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!(peers = args.peers, seed = args.seed, "partyline simulation starting");

    let report = run(&args).await?;
    tracing::info!(
        ticks = report.ticks,
        operations = report.operations,
        rejected = report.rejected,
        networks = report.traffic.networks_created,
        delivered = report.traffic.messages_delivered,
        dropped = report.traffic.messages_dropped,
        "simulation finished"
    );

    if let Some(path) = &args.report {
        write_report(path, &report)?;
        tracing::info!(path = %path.display(), "report written");
    }

    if !report.violations.is_empty() {
        return Err(RunError::Violations { count: report.violations.len() }.into());
    }
    Ok(())
}

/// Tick the simulation until `args.ticks` or Ctrl-C.
async fn run(args: &Args) -> Result<Report, RunError> {
    let mut sim = Simulation::start(&args.sim_config())?;
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);

    let mut interval = tokio::time::interval(Duration::from_millis(args.tick_ms.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    for tick in 0..args.ticks {
        tokio::select! {
            _ = interval.tick() => {},
            _ = &mut shutdown => {
                tracing::warn!(tick, "interrupted");
                break;
            },
        }

        let before = sim.violations();
        sim.step(&mut rng);
        if sim.violations() > before {
            tracing::error!(tick, "stopping after invariant violation");
            break;
        }
    }

    Ok(sim.finish())
}

fn write_report(path: &Path, report: &Report) -> Result<(), RunError> {
    let json = serde_json::to_vec_pretty(report)?;
    std::fs::write(path, json)
        .map_err(|source| RunError::Write { path: path.to_path_buf(), source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_maps_to_session_diagnostics() {
        assert_eq!(session_log_level("warn"), LogLevel::None);
        assert_eq!(session_log_level("INFO"), LogLevel::Minimal);
        assert_eq!(session_log_level("debug"), LogLevel::Verbose);
        assert_eq!(session_log_level("partyline_core=trace"), LogLevel::Minimal);
    }

    #[test]
    fn args_parse() {
        let args = Args::try_parse_from([
            "partyline-sim",
            "--peers",
            "3",
            "--loss",
            "0.5",
            "--report",
            "out.json",
        ])
        .expect("arguments should parse");
        let config = args.sim_config();
        assert_eq!(config.peers, 3);
        assert_eq!(config.max_players, MAX_PLAYERS);
        assert!((config.loss_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(args.report, Some(PathBuf::from("out.json")));
    }

    #[test]
    fn peer_count_is_bounded() {
        assert!(Args::try_parse_from(["partyline-sim", "--peers", "0"]).is_err());
        assert!(Args::try_parse_from(["partyline-sim", "--peers", "17"]).is_err());
    }
}
