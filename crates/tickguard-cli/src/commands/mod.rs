mod config;
mod simulate;

use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tickguard_core::PipelineConfig;

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// What a command prints: its payload plus any warnings worth surfacing.
#[derive(Debug, Serialize)]
pub struct CommandOutput {
    pub data: Value,
    pub warnings: Vec<String>,
}

impl CommandOutput {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }
}

pub async fn run(cli: &Cli) -> Result<CommandOutput, CliError> {
    let pipeline_config = load_config(cli.config.as_deref())?;

    match &cli.command {
        Command::Simulate(args) => simulate::run(args, pipeline_config).await,
        Command::Config => config::run(&pipeline_config),
    }
}

/// Reads the config file when one is given, otherwise uses the defaults.
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig, CliError> {
    match path {
        Some(path) => Ok(PipelineConfig::from_path(path)?),
        None => Ok(PipelineConfig::default()),
    }
}
