//! CLI argument definitions for tickguard.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `simulate` | Drive synthetic ticks through the pipeline and report |
//! | `config` | Print the effective pipeline configuration |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | none | JSON config file; missing keys use defaults |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--strict` | `false` | Treat report warnings as failures |
//!
//! # Examples
//!
//! ```bash
//! tickguard simulate --duration-ms 5000 --rate 2000 --pretty
//! tickguard simulate --instruments IBM.N EUR= --defect-ratio 0.2 --seed 7
//! tickguard config --config pipeline.json --pretty
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "tickguard",
    author,
    version,
    about = "Price tick pipeline simulator",
    long_about = "Runs a synthetic multi-instrument tick feed through the tickguard pipeline \
(backpressure, data quality validation, resilient feed access) and prints a JSON report.\n\
\n\
Use 'tickguard <command> --help' for command-specific help."
)]
pub struct Cli {
    /// Pipeline configuration file (JSON).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Exit with code 5 when the report carries warnings.
    #[arg(long, global = true, default_value_t = false)]
    pub strict: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a synthetic tick feed through the pipeline.
    ///
    /// # Examples
    ///
    ///   tickguard simulate
    ///   tickguard simulate --rate 5000 --duration-ms 10000
    Simulate(SimulateArgs),

    /// Print the effective configuration as JSON.
    Config,
}

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// How long to generate ticks for, in milliseconds.
    #[arg(long, default_value_t = 2_000)]
    pub duration_ms: u64,

    /// Instruments to generate ticks for.
    #[arg(
        long,
        num_args = 1..,
        default_values_t = [
            String::from("IBM.N"),
            String::from("MSFT.O"),
            String::from("VOD.L"),
            String::from("EUR="),
            String::from(".SPX"),
        ]
    )]
    pub instruments: Vec<String>,

    /// Ticks per second across all instruments.
    #[arg(long, default_value_t = 500)]
    pub rate: u32,

    /// Share of ticks deliberately corrupted, between 0 and 1.
    #[arg(long, default_value_t = 0.05)]
    pub defect_ratio: f64,

    /// Seed for reproducible tick sequences.
    #[arg(long)]
    pub seed: Option<u64>,
}
