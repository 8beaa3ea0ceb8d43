use std::{fmt, io, process::Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

/// One command the launcher can start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    /// Passed to the platform shell as a single string.
    Shell(String),
    /// Executed directly without a shell.
    Program { program: String, args: Vec<String> },
}

impl CommandLine {
    pub fn shell(line: impl Into<String>) -> Self {
        Self::Shell(line.into())
    }

    pub fn program<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Program {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn adb<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::program("adb", args)
    }

    /// Lines that start with `adb ` are tokenized and run directly; anything
    /// else, or a line with unbalanced quotes, goes through the shell.
    pub fn from_device_line(line: &str) -> Self {
        if line.starts_with("adb ") {
            if let Some(mut argv) = split_args(line).filter(|argv| !argv.is_empty()) {
                let program = argv.remove(0);
                return Self::Program {
                    program,
                    args: argv,
                };
            }
        }
        Self::shell(line)
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell(line) => f.write_str(line),
            Self::Program { program, args } => {
                f.write_str(program)?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Trimmed stdout, falling back to stderr when stdout is empty.
    pub fn text(&self) -> &str {
        let stdout = self.stdout.trim();
        if stdout.is_empty() {
            self.stderr.trim()
        } else {
            stdout
        }
    }
}

#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Starts the command and returns as soon as the process exists.
    async fn spawn(&self, command: &CommandLine) -> io::Result<()>;

    /// Runs the command to completion and captures its output.
    async fn output(&self, command: &CommandLine) -> io::Result<CommandOutput>;
}

/// Launches real OS processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

#[async_trait]
impl ProcessLauncher for SystemLauncher {
    async fn spawn(&self, command: &CommandLine) -> io::Result<()> {
        let mut child = build_command(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        let label = command.to_string();
        debug!(command = %label, pid = ?child.id(), "process started");

        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => debug!(command = %label, "process exited"),
                Ok(status) => warn!(command = %label, %status, "process exited with failure"),
                Err(error) => warn!(command = %label, %error, "failed to wait for process"),
            }
        });
        Ok(())
    }

    async fn output(&self, command: &CommandLine) -> io::Result<CommandOutput> {
        let output = build_command(command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn build_command(command: &CommandLine) -> Command {
    match command {
        CommandLine::Shell(line) => shell_command(line),
        CommandLine::Program { program, args } => {
            let mut cmd = Command::new(program);
            cmd.args(args);
            cmd
        }
    }
}

#[cfg(windows)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").raw_arg(line);
    cmd
}

#[cfg(not(windows))]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(line);
    cmd
}

/// POSIX-style word splitting: whitespace separates words, single quotes are
/// literal, double quotes allow backslash escapes. Returns `None` when a quote
/// is left open.
pub fn split_args(line: &str) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Quote {
        None,
        Single,
        Double,
    }

    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote = Quote::None;
    let mut chars = line.chars();

    while let Some(ch) = chars.next() {
        match (quote, ch) {
            (Quote::None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (Quote::None, '\'') => {
                quote = Quote::Single;
                in_word = true;
            }
            (Quote::None, '"') => {
                quote = Quote::Double;
                in_word = true;
            }
            (Quote::None, '\\') => {
                in_word = true;
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            (Quote::Single, '\'') | (Quote::Double, '"') => quote = Quote::None,
            (Quote::Double, '\\') => match chars.next() {
                Some(next @ ('"' | '\\' | '$' | '`')) => current.push(next),
                Some(next) => {
                    current.push('\\');
                    current.push(next);
                }
                None => return None,
            },
            (_, c) => {
                in_word = true;
                current.push(c);
            }
        }
    }

    if quote != Quote::None {
        return None;
    }
    if in_word {
        words.push(current);
    }
    Some(words)
}

#[cfg(test)]
#[path = "tests/launcher_tests.rs"]
mod tests;
