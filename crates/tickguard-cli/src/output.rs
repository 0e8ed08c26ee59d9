use std::io::Write;

use crate::commands::CommandOutput;
use crate::error::CliError;

pub fn render(output: &CommandOutput, pretty: bool) -> Result<(), CliError> {
    write_to(&mut std::io::stdout().lock(), output, pretty)
}

fn write_to(out: &mut impl Write, output: &CommandOutput, pretty: bool) -> Result<(), CliError> {
    writeln!(out, "{}", to_json(output, pretty)?)?;
    out.flush()?;
    Ok(())
}

fn to_json(output: &CommandOutput, pretty: bool) -> Result<String, CliError> {
    let payload = if pretty {
        serde_json::to_string_pretty(output)?
    } else {
        serde_json::to_string(output)?
    };
    Ok(payload)
}
