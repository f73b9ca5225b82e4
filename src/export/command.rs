use crate::export::converter::redact_command;
use std::process::{Command, Stdio};
use thiserror::Error;

/// Captured streams of a successful external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("could not start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{}` exited with {}", redact_command(.args), exit_label(.code))]
    Failed {
        args: Vec<String>,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}

/// Runs an external program synchronously, first element of `args` being the program.
///
/// A non-zero exit status is an error carrying the full argument list and
/// both captured streams.
pub trait CommandRunner: Send + Sync {
    fn run(&self, args: &[String]) -> Result<CommandOutput, CommandError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, args: &[String]) -> Result<CommandOutput, CommandError> {
        let (program, rest) = args.split_first().ok_or_else(|| CommandError::Spawn {
            program: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command line"),
        })?;

        tracing::debug!(command = %redact_command(args), "running external command");

        let output = Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| CommandError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            tracing::error!(
                command = %redact_command(args),
                exit_code = ?output.status.code(),
                %stdout,
                %stderr,
                "external command failed"
            );
            return Err(CommandError::Failed {
                args: args.to_vec(),
                code: output.status.code(),
                stdout,
                stderr,
            });
        }

        Ok(CommandOutput { stdout, stderr })
    }
}
