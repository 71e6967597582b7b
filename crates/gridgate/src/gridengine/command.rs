use std::process::Output;

use bstr::ByteSlice;
use tokio::process::Command;

use crate::gridengine::GridEngineError;
use crate::gridengine::submit::format_command_line;

/// Captured output of a finished Grid Engine command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

pub fn create_command(program: &str, args: &[String]) -> Command {
    let mut command = Command::new(program);
    command.args(args);
    command.kill_on_drop(true);
    command
}

pub fn check_command_output(program: &str, output: Output) -> Result<Output, GridEngineError> {
    let status = output.status;
    if !status.success() {
        return Err(GridEngineError::CommandFailed {
            program: program.to_string(),
            code: status.code().unwrap_or(-1),
            stderr: output.stderr.to_str_lossy().trim().to_string(),
            stdout: output.stdout.to_str_lossy().trim().to_string(),
        });
    }
    Ok(output)
}

async fn spawn(program: &str, args: &[String]) -> Result<Output, GridEngineError> {
    log::debug!(
        "Running Grid Engine command `{}`",
        format_command_line(program, args)
    );
    let output = create_command(program, args)
        .output()
        .await
        .map_err(|source| GridEngineError::Spawn {
            program: program.to_string(),
            source,
        })?;
    log::trace!(
        "{program} output\nStdout\n{}Stderr\n{}",
        output.stdout.to_str_lossy(),
        output.stderr.to_str_lossy()
    );
    Ok(output)
}

/// Runs a command and fails if it exits with a non-zero code.
pub async fn run_command(
    program: &str,
    args: &[String],
) -> Result<CommandOutput, GridEngineError> {
    let output = check_command_output(program, spawn(program, args).await?)?;
    Ok(CommandOutput {
        stdout: output.stdout.to_str_lossy().into_owned(),
        stderr: output.stderr.to_str_lossy().into_owned(),
    })
}

/// Runs a command and returns its output regardless of the exit code.
pub async fn run_command_unchecked(
    program: &str,
    args: &[String],
) -> Result<CommandOutput, GridEngineError> {
    let output = spawn(program, args).await?;
    Ok(CommandOutput {
        stdout: output.stdout.to_str_lossy().into_owned(),
        stderr: output.stderr.to_str_lossy().into_owned(),
    })
}
