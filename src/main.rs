//! Operator entry point.
//!
//! ```bash
//! # recording machine: recorder, eye-tracker, force sensor, turntable
//! cuex --config lab.yaml host --subject 17 --test-number 1
//!
//! # dry run of the host with simulated devices
//! cuex host --subject 17 --test-number 1 --simulate
//!
//! # presentation machine: subject window and operator mirror
//! cuex --config lab.yaml client --subject 17 --test-number 1
//!
//! # control-channel round trip, 50 pings at 10 Hz
//! cuex latency
//!
//! # write the order a test would use to CSV
//! cuex order "Unisensory Alcohol Visual" --output order.csv
//!
//! # check a spreadsheet order against the image folders
//! cuex order "Unisensory Alcohol Visual" --import order.xlsx --output order.csv
//! ```

mod app;
mod host;
mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cuex_core::TestCondition;
use cuex_session::{Config, ControlLink, LatencyProbe, Session};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "cuex")]
#[command(version, about = "Multisensory cue-reactivity sessions", long_about = None)]
struct Cli {
    /// YAML configuration; every key is optional
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides `logging.level`
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the recording side and serve the control channel
    Host {
        #[arg(short, long)]
        subject: String,

        /// 1 = passive viewing, 2 = Stroop
        #[arg(short, long)]
        test_number: u8,

        /// Use simulated devices
        #[arg(long)]
        simulate: bool,
    },

    /// Run the subject window against a host
    Client {
        #[arg(short, long)]
        subject: String,

        #[arg(short, long)]
        test_number: u8,

        /// Start at this test instead of the first of the session
        #[arg(long)]
        test: Option<String>,

        /// Ignore `platform.fullscreen`
        #[arg(long)]
        windowed: bool,
    },

    /// Measure the control-channel round trip
    Latency {
        #[arg(long, default_value = "50")]
        count: usize,
    },

    /// Export the image order a test would run with, shuffled and repeated
    /// as configured. With `--import`, a CSV or spreadsheet order is checked
    /// against the image folders first and exported normalized.
    Order {
        test: String,

        #[arg(short, long)]
        output: PathBuf,

        /// Order file to check and apply before exporting
        #[arg(long, value_name = "FILE")]
        import: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    config.validate()?;
    logging::init(cli.log_level.as_deref().unwrap_or(&config.logging.level), config.logging.file.as_deref())?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), os = std::env::consts::OS, "cuex");

    match cli.command {
        Commands::Host {
            subject,
            test_number,
            simulate,
        } => {
            let session = Session::new(subject, test_number, &config.paths.base_directory)?;
            host::run(&config, session, simulate)
        }
        Commands::Client {
            subject,
            test_number,
            test,
            windowed,
        } => {
            let session = Session::new(subject, test_number, &config.paths.base_directory)?;
            let first = test.map(|t| t.parse::<TestCondition>()).transpose()?;
            app::App::new(config, session, first, windowed)?.run()
        }
        Commands::Latency { count } => latency(&config, count),
        Commands::Order { test, output, import } => {
            let test: TestCondition = test.parse()?;
            let mut catalog = config.build_catalog()?;
            if let Some(path) = &import {
                let count = catalog
                    .import_order(test, path)
                    .with_context(|| format!("importing {}", path.display()))?;
                tracing::info!(%test, path = %path.display(), images = count, "order imported");
            }
            let seed = cuex_catalog::export_order(&catalog, test, &output)?;
            tracing::info!(%test, path = %output.display(), ?seed, "order exported");
            Ok(())
        }
    }
}

fn latency(config: &Config, count: usize) -> Result<()> {
    let addr = config.control_address();
    let (link, events) =
        ControlLink::connect(&addr, Duration::from_secs(5)).with_context(|| format!("connecting to {addr}"))?;
    let probe = LatencyProbe {
        count,
        ..LatencyProbe::default()
    }
    .with_threshold(config.latency_threshold());
    let report = probe.run(&link, &events, |msg| tracing::debug!(action = msg.action(), "ignored during latency test"))?;
    link.shutdown();

    println!(
        "{} of {} pings answered: average {:.3} ms, min {:.3} ms, max {:.3} ms",
        report.received, report.sent, report.average_ms, report.min_ms, report.max_ms
    );
    if report.aborted {
        println!("aborted: no reply within {:?}", probe.abort_after);
    }
    match report.check() {
        Ok(()) => println!("within {:.1} ms; ready to proceed", report.threshold_ms),
        Err(e) => println!("warning: {e}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_takes_an_import_file() {
        let cli = Cli::try_parse_from([
            "cuex",
            "order",
            "Unisensory Neutral Visual",
            "--output",
            "out.csv",
            "--import",
            "order.xlsx",
        ])
        .unwrap();
        match cli.command {
            Commands::Order { test, output, import } => {
                assert_eq!(test, "Unisensory Neutral Visual");
                assert_eq!(output, PathBuf::from("out.csv"));
                assert_eq!(import, Some(PathBuf::from("order.xlsx")));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
