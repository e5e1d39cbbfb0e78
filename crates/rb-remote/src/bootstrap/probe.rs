//! Retried probes against a remote shell

use tracing::debug;

use rb_core::error::BootstrapError;
use rb_core::exec::{ExecOptions, ExecutionResult};
use rb_core::traits::RemoteHost;
use rb_core::RemotePlatform;

const PRESENT: &str = "__rb_present__";
const ABSENT: &str = "__rb_absent__";

/// Issues probe commands, re-running them while they produce no output
pub struct Prober<'a> {
    host: &'a dyn RemoteHost,
    attempts: u32,
}

impl<'a> Prober<'a> {
    pub fn new(host: &'a dyn RemoteHost, attempts: u32) -> Self {
        Self {
            host,
            attempts: attempts.max(1),
        }
    }

    /// Run `command` until either stream has content or the ceiling is hit.
    ///
    /// Returns the last result, which is empty if every attempt was.
    pub async fn probe(&self, command: &str) -> Result<ExecutionResult, BootstrapError> {
        let mut result = ExecutionResult::default();
        for attempt in 1..=self.attempts {
            result = self
                .host
                .execute(command, &[], &ExecOptions::default())
                .await?;
            if result.has_output() {
                return Ok(result);
            }
            debug!("Probe `{}` silent (attempt {}/{})", command, attempt, self.attempts);
        }
        Ok(result)
    }

    /// Whether `path` is an existing directory on the remote.
    ///
    /// The check prints a sentinel on both outcomes, so silence after every
    /// attempt is an error rather than "absent".
    pub async fn directory_exists(
        &self,
        platform: RemotePlatform,
        path: &str,
    ) -> Result<bool, BootstrapError> {
        let command = existence_command(platform, path);
        let result = self.probe(&command).await?;

        if result.stdout.contains(PRESENT) {
            Ok(true)
        } else if result.stdout.contains(ABSENT) {
            Ok(false)
        } else {
            Err(BootstrapError::NoResponse {
                command,
                attempts: self.attempts,
            })
        }
    }
}

fn existence_command(platform: RemotePlatform, path: &str) -> String {
    let cd = if platform.is_windows() { "cd /d" } else { "cd" };
    format!("{} \"{}\" && echo {} || echo {}", cd, path, PRESENT, ABSENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_existence_command() {
        assert_eq!(
            existence_command(RemotePlatform::Linux, "/home/a/.app"),
            "cd \"/home/a/.app\" && echo __rb_present__ || echo __rb_absent__"
        );
        assert!(existence_command(RemotePlatform::Windows, "C:\\x").starts_with("cd /d \"C:\\x\""));
    }
}
