use tickguard_core::PipelineConfig;

use crate::error::CliError;

use super::CommandOutput;

pub fn run(config: &PipelineConfig) -> Result<CommandOutput, CliError> {
    Ok(CommandOutput::ok(serde_json::to_value(config)?))
}
