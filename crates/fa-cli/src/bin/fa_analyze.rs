//! Run a visibility or ground-risk analysis on a scenario file.
//!
//! Usage:
//!   cargo run -p fa-cli --bin fa-analyze -- visibility --scenario path.json --pretty
//!   cargo run -p fa-cli --bin fa-analyze -- ground-risk --demo

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use fa_cli::{demo_scenario, Scenario};
use fa_core::IgrcTable;
use serde::Serialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about = "Offline flight-path analysis")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Line-of-sight coverage of the path from the scenario's stations
    Visibility(Input),
    /// Population intersection and iGRC classification
    GroundRisk(Input),
}

#[derive(clap::Args, Debug)]
struct Input {
    /// Scenario JSON file
    #[arg(long, conflicts_with = "demo")]
    scenario: Option<PathBuf>,

    /// Use the built-in demo scenario instead of a file
    #[arg(long)]
    demo: bool,

    /// Demo centre latitude
    #[arg(long, default_value_t = -33.8688, allow_hyphen_values = true)]
    lat: f64,

    /// Demo centre longitude
    #[arg(long, default_value_t = 151.2093, allow_hyphen_values = true)]
    lon: f64,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

impl Input {
    fn scenario(&self) -> Result<Scenario> {
        match (&self.scenario, self.demo) {
            (Some(path), _) => Scenario::load(path),
            (None, true) => demo_scenario(self.lat, self.lon),
            (None, false) => bail!("pass --scenario <file> or --demo"),
        }
    }
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", text);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("fa_cli=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Command::Visibility(input) => {
            let scenario = input.scenario()?;
            tracing::info!(
                "Visibility for {}: {} coordinates, {} stations",
                scenario.label(),
                scenario.path.len(),
                scenario.stations.len()
            );

            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, cancelling analysis");
                    ctrl_c.cancel();
                }
            });

            let mut reported = 0.0;
            let report = scenario
                .run_visibility(&cancel, |pct| {
                    if pct - reported >= 25.0 || pct >= 100.0 {
                        tracing::info!("Progress {:.0}%", pct);
                        reported = pct;
                    }
                })
                .await?;
            if report.degraded_fidelity {
                tracing::warn!(
                    "{} of {} terrain samples missing",
                    report.stats.missing_elevation_samples,
                    report.stats.elevation_samples
                );
            }
            print_json(&report, input.pretty)
        }
        Command::GroundRisk(input) => {
            let scenario = input.scenario()?;
            tracing::info!(
                "Ground risk for {}: {} polygons",
                scenario.label(),
                scenario.polygons.len()
            );
            let output = scenario.run_ground_risk(&IgrcTable::standard())?;
            for line in &output.ground_risk.recommendations {
                tracing::info!("{}", line);
            }
            print_json(&output, input.pretty)
        }
    }
}
