use crate::error::{NfdError, Result};
use std::fmt;

/// Whether a command only reads external state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Query,
    Mutation,
}

/// One external tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub program: String,
    pub args: Vec<String>,
    pub kind: CommandKind,
}

impl Command {
    pub fn query<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            kind: CommandKind::Query,
        }
    }

    pub fn mutation<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            kind: CommandKind::Mutation,
        }
    }

    pub fn is_mutation(&self) -> bool {
        self.kind == CommandKind::Mutation
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.chars().any(char::is_whitespace) {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    fn status_text(&self) -> String {
        match self.code {
            Some(code) => format!("exit status: {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Seam between the driver and the processes it spawns
pub trait CommandRunner {
    /// Run to completion. `Err` only when the process could not be spawned;
    /// a non-zero exit is reported through [`CommandOutput::success`].
    fn run(&self, command: &Command) -> Result<CommandOutput>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, command: &Command) -> Result<CommandOutput> {
        (**self).run(command)
    }
}

/// Runs commands on the host, blocking until each exits
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, command: &Command) -> Result<CommandOutput> {
        let output = std::process::Command::new(&command.program)
            .args(&command.args)
            .output()
            .map_err(|source| NfdError::CommandSpawn {
                command: command.to_string(),
                source,
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Executes queries through `inner`, only logs mutations
#[derive(Debug, Clone)]
pub struct DryRunRunner<R> {
    inner: R,
}

impl<R: CommandRunner> DryRunRunner<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: CommandRunner> CommandRunner for DryRunRunner<R> {
    fn run(&self, command: &Command) -> Result<CommandOutput> {
        if command.is_mutation() {
            tracing::info!("[DRY RUN] Would execute: {}", command);
            return Ok(CommandOutput::ok(""));
        }
        self.inner.run(command)
    }
}

/// Ordered commands run as a unit, stopping at the first failure
#[derive(Debug, Clone, Default)]
pub struct CommandBatch {
    commands: Vec<Command>,
}

impl CommandBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn extend(&mut self, commands: impl IntoIterator<Item = Command>) -> &mut Self {
        self.commands.extend(commands);
        self
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Run every command in order and return their concatenated stdout.
    ///
    /// The first non-zero exit aborts the batch; later commands are never
    /// issued and the error names the failing command.
    pub fn run<R: CommandRunner + ?Sized>(&self, runner: &R) -> Result<String> {
        let mut stdout = String::new();

        for command in &self.commands {
            if command.is_mutation() {
                tracing::info!("Executing: {}", command);
            } else {
                tracing::debug!("Querying: {}", command);
            }

            let output = runner.run(command)?;
            if !output.success {
                let text = if output.stderr.trim().is_empty() {
                    output.stdout.trim()
                } else {
                    output.stderr.trim()
                };
                return Err(NfdError::CommandFailed {
                    command: command.to_string(),
                    status: output.status_text(),
                    output: text.to_string(),
                });
            }

            stdout.push_str(&output.stdout);
        }

        Ok(stdout)
    }
}
