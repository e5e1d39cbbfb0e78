//! Remote command execution results and output accumulation

use serde::{Deserialize, Serialize};

/// Captured output of one remote command invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Accumulated standard output
    pub stdout: String,
    /// Accumulated standard error
    pub stderr: String,
    /// Exit status, if the remote reported one before the result was finalized
    pub exit_status: Option<u32>,
}

impl ExecutionResult {
    /// Whether either stream produced any content
    pub fn has_output(&self) -> bool {
        !self.stdout.is_empty() || !self.stderr.is_empty()
    }

    /// Whether the command is known to have failed
    pub fn failed(&self) -> bool {
        matches!(self.exit_status, Some(code) if code != 0)
    }
}

/// Options applied to an exec channel
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Environment variables requested on the channel before exec
    pub env: Vec<(String, String)>,
}

/// Options for a file copy
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyOptions {
    /// Unix permission bits to apply to the remote file
    pub mode: Option<u32>,
}

/// Completion predicate over the accumulated `(stdout, stderr)`
pub type OutputPredicate<'p> = dyn for<'a, 'b> FnMut(&'a str, &'b str) -> bool + Send + 'p;

/// Which remote stream a chunk arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Accumulates stdout/stderr chunks and evaluates a completion predicate.
///
/// The predicate runs after every chunk until it first returns `true`; after
/// that the collector is latched and the predicate is never called again.
pub struct OutputCollector<'a> {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
    predicate: Option<&'a mut OutputPredicate<'a>>,
    satisfied: bool,
}

impl<'a> OutputCollector<'a> {
    /// Collector that only finishes when the channel closes
    pub fn new() -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_status: None,
            predicate: None,
            satisfied: false,
        }
    }

    /// Collector that finishes early once `predicate` holds
    pub fn until(predicate: &'a mut OutputPredicate<'a>) -> Self {
        Self {
            predicate: Some(predicate),
            ..Self::new()
        }
    }

    /// Append a chunk; returns `true` if the predicate is (now) satisfied.
    pub fn push(&mut self, stream: OutputStream, chunk: &[u8]) -> bool {
        if self.satisfied {
            return true;
        }

        match stream {
            OutputStream::Stdout => self.stdout.extend_from_slice(chunk),
            OutputStream::Stderr => self.stderr.extend_from_slice(chunk),
        }

        if let Some(predicate) = self.predicate.as_mut() {
            let stdout = String::from_utf8_lossy(&self.stdout);
            let stderr = String::from_utf8_lossy(&self.stderr);
            if predicate(&stdout, &stderr) {
                self.satisfied = true;
            }
        }

        self.satisfied
    }

    /// Record the exit status reported by the remote
    pub fn set_exit_status(&mut self, status: u32) {
        self.exit_status = Some(status);
    }

    /// Whether the predicate has fired
    pub fn is_satisfied(&self) -> bool {
        self.satisfied
    }

    /// Finalize into an [`ExecutionResult`]
    pub fn finish(self) -> ExecutionResult {
        ExecutionResult {
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
            exit_status: self.exit_status,
        }
    }
}

impl Default for OutputCollector<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a remote command line from a command and its arguments.
///
/// Arguments made only of safe characters are passed bare; anything else is
/// double-quoted, which both POSIX shells and `cmd.exe` understand.
pub fn command_line(command: &str, args: &[String]) -> String {
    let mut line = command.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&quote_arg(arg));
    }
    line
}

fn quote_arg(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("\"{}\"", arg.replace('"', "\\\""))
    }
}
