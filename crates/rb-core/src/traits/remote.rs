//! Remote connection traits

use std::path::Path;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::exec::{CopyOptions, ExecOptions, ExecutionResult, OutputPredicate};

/// Command execution and file transfer over an authenticated remote session
#[async_trait]
pub trait RemoteHost: Send + Sync {
    /// Run `command` with `args` and collect its output until the channel closes
    async fn execute(
        &self,
        command: &str,
        args: &[String],
        options: &ExecOptions,
    ) -> Result<ExecutionResult, TransportError>;

    /// Run `command` until `predicate(stdout, stderr)` first holds or the channel closes.
    ///
    /// The predicate is evaluated after every chunk on either stream and never
    /// again once it returned `true`.
    async fn execute_until(
        &self,
        command: &str,
        predicate: &mut OutputPredicate<'_>,
        args: &[String],
        options: &ExecOptions,
    ) -> Result<ExecutionResult, TransportError>;

    /// Copy a local file to `remote_path`, optionally setting its mode
    async fn copy(
        &self,
        local_path: &Path,
        remote_path: &str,
        options: &CopyOptions,
    ) -> Result<(), TransportError>;
}

/// Tunnels local byte streams to the remote backend
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Pipe `socket` to the recorded remote target.
    ///
    /// A rejected forward is logged and the socket dropped; it never fails the caller.
    async fn forward(&self, socket: TcpStream);

    /// Token cancelled once when the underlying connection goes away
    fn disconnected(&self) -> CancellationToken;
}
