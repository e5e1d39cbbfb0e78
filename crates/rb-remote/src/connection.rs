//! Authenticated SSH connection to one remote host
//!
//! A [`RemoteConnection`] owns a single russh client session. Every operation
//! opens its own channel on that session: exec channels for commands, an SFTP
//! subsystem for copies and direct-tcpip channels for forwarded sockets.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::keys::ssh_key::{self, HashAlg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::FileAttributes;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, trace, warn};

use rb_core::config::SshConfig;
use rb_core::error::{AuthError, ConfigError, TransportError};
use rb_core::exec::{
    command_line, CopyOptions, ExecOptions, ExecutionResult, OutputCollector, OutputPredicate,
    OutputStream,
};
use rb_core::traits::{Forwarder, RemoteHost};

use crate::auth::{self, AuthNegotiator};

/// Host forwarded sockets are connected to on the remote side
const FORWARD_HOST: &str = "127.0.0.1";

/// Where to connect: `user@host[:port]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub username: String,
    pub host: String,
    pub port: u16,
}

impl ConnectTarget {
    /// Parse `[user@]host[:port]`, filling gaps from `defaults`.
    ///
    /// IPv6 literals must be bracketed when a port is given (`[::1]:2222`).
    pub fn parse(input: &str, defaults: &SshConfig) -> Result<Self, ConfigError> {
        let input = input.trim();
        let (username, rest) = match input.rsplit_once('@') {
            Some((user, rest)) if !user.is_empty() => (user.to_string(), rest),
            Some(_) => return Err(ConfigError::Invalid(format!("empty user in {:?}", input))),
            None => (defaults.username.clone(), input),
        };

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| ConfigError::Invalid(format!("unclosed '[' in {:?}", input)))?;
            match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if tail.is_empty() => (host, None),
                None => return Err(ConfigError::Invalid(format!("bad target {:?}", input))),
            }
        } else {
            match rest.rsplit_once(':') {
                Some((host, port)) if !host.contains(':') => (host, Some(port)),
                _ => (rest, None),
            }
        };

        if host.is_empty() {
            return Err(ConfigError::Invalid(format!("missing host in {:?}", input)));
        }

        let port = match port {
            Some(port) => port
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid(format!("bad port {:?}", port)))?,
            None => defaults.port,
        };

        Ok(Self {
            username,
            host: host.to_string(),
            port,
        })
    }

    /// `host:port` as used for the TCP connection and in errors
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// `user@host`, with the port only when it is not 22
    pub fn label(&self) -> String {
        if self.port == 22 {
            format!("{}@{}", self.username, self.host)
        } else {
            format!("{}@{}", self.username, self.address())
        }
    }
}

/// Set `cell` to `port` unless it already holds a different port
fn fix_port(cell: &OnceLock<u16>, port: u16) -> Result<(), TransportError> {
    match cell.set(port) {
        Ok(()) => Ok(()),
        Err(_) => match cell.get() {
            Some(&current) if current == port => Ok(()),
            Some(&current) => Err(TransportError::ForwardPortFixed {
                current,
                requested: port,
            }),
            None => Ok(()),
        },
    }
}

/// russh client handler: host key logging and disconnect detection
struct ClientHandler {
    expected_host_key: Option<String>,
    /// Cancels the connection's `closed` token when the session task drops the handler
    _disconnect: DropGuard,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256).to_string();
        debug!("Server host key: {}", fingerprint);

        if let Some(expected) = &self.expected_host_key {
            if fingerprint == *expected {
                debug!("Host key matches configured fingerprint");
            } else {
                warn!(
                    "Host key differs from configured: expected {}, got {}",
                    expected, fingerprint
                );
            }
        }

        Ok(true)
    }
}

/// One authenticated SSH session
pub struct RemoteConnection {
    handle: Handle<ClientHandler>,
    label: String,
    username: String,
    closed: CancellationToken,
    disposed: AtomicBool,
    forward_port: OnceLock<u16>,
}

impl RemoteConnection {
    /// Open the transport to `target`. The session is not yet authenticated.
    pub async fn connect(target: &ConnectTarget, ssh: &SshConfig) -> Result<Self, TransportError> {
        let config = client::Config {
            keepalive_interval: Some(ssh.keepalive_interval),
            keepalive_max: ssh.keepalive_max,
            ..Default::default()
        };

        let closed = CancellationToken::new();
        let handler = ClientHandler {
            expected_host_key: ssh.expected_host_key.clone(),
            _disconnect: closed.clone().drop_guard(),
        };

        let address = target.address();
        debug!("Connecting to {}", address);
        let handle = tokio::time::timeout(
            ssh.connect_timeout,
            client::connect(
                Arc::new(config),
                (target.host.as_str(), target.port),
                handler,
            ),
        )
        .await
        .map_err(|_| TransportError::ConnectTimeout(address.clone()))?
        .map_err(|e| TransportError::Connect {
            address: address.clone(),
            message: e.to_string(),
        })?;

        info!("Connected to {}", address);

        Ok(Self {
            handle,
            label: target.label(),
            username: target.username.clone(),
            closed,
            disposed: AtomicBool::new(false),
            forward_port: OnceLock::new(),
        })
    }

    /// Run the authentication handshake, letting `negotiator` choose credentials
    pub async fn authenticate(&mut self, negotiator: &mut AuthNegotiator) -> Result<(), AuthError> {
        self.ensure_open()?;
        auth::authenticate(&mut self.handle, &self.username, negotiator).await
    }

    /// Human-readable `user@host`
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the transport has gone away
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Record the remote port forwarded sockets connect to.
    ///
    /// The port is fixed once set; setting the same value again is a no-op.
    pub fn set_forward_port(&self, port: u16) -> Result<(), TransportError> {
        fix_port(&self.forward_port, port)
    }

    /// The recorded forward port, if bootstrap has completed
    pub fn forward_port(&self) -> Option<u16> {
        self.forward_port.get().copied()
    }

    /// Disconnect the transport. Safe to call more than once.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!("Disposing connection {}", self.label);
        if !self.closed.is_cancelled() {
            if let Err(e) = self
                .handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
            {
                debug!("Disconnect of {} failed: {}", self.label, e);
            }
        }
        self.closed.cancel();
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.is_cancelled() || self.disposed.load(Ordering::SeqCst) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    fn channel_error(&self, e: russh::Error) -> TransportError {
        if self.closed.is_cancelled() {
            TransportError::Closed
        } else {
            TransportError::ChannelOpen(e.to_string())
        }
    }

    async fn open_exec(
        &self,
        command: &str,
        args: &[String],
        options: &ExecOptions,
    ) -> Result<Channel<Msg>, TransportError> {
        self.ensure_open()?;

        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| self.channel_error(e))?;

        for (name, value) in &options.env {
            channel
                .set_env(false, name.as_str(), value.as_str())
                .await
                .map_err(|e| TransportError::Ssh(e.to_string()))?;
        }

        let line = command_line(command, args);
        debug!("exec on {}: {}", self.label, line);
        channel
            .exec(true, line)
            .await
            .map_err(|e| self.channel_error(e))?;

        Ok(channel)
    }

    /// Pump channel messages into `collector` until close or the predicate fires.
    ///
    /// After an early finish the channel is drained in a background task so the
    /// remote process keeps running undisturbed.
    async fn collect(
        &self,
        mut channel: Channel<Msg>,
        mut collector: OutputCollector<'_>,
    ) -> Result<ExecutionResult, TransportError> {
        loop {
            let msg = tokio::select! {
                msg = channel.wait() => msg,
                _ = self.closed.cancelled() => return Err(TransportError::Closed),
            };

            let Some(msg) = msg else { break };
            let satisfied = match msg {
                ChannelMsg::Data { ref data } => {
                    trace!("{} stdout bytes", data.len());
                    collector.push(OutputStream::Stdout, data)
                }
                ChannelMsg::ExtendedData { ref data, ext: 1 } => {
                    trace!("{} stderr bytes", data.len());
                    collector.push(OutputStream::Stderr, data)
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    collector.set_exit_status(exit_status);
                    false
                }
                ChannelMsg::Close => break,
                _ => false,
            };

            if satisfied {
                tokio::spawn(async move { while channel.wait().await.is_some() {} });
                break;
            }
        }

        Ok(collector.finish())
    }
}

#[async_trait]
impl RemoteHost for RemoteConnection {
    async fn execute(
        &self,
        command: &str,
        args: &[String],
        options: &ExecOptions,
    ) -> Result<ExecutionResult, TransportError> {
        let channel = self.open_exec(command, args, options).await?;
        self.collect(channel, OutputCollector::new()).await
    }

    async fn execute_until(
        &self,
        command: &str,
        predicate: &mut OutputPredicate<'_>,
        args: &[String],
        options: &ExecOptions,
    ) -> Result<ExecutionResult, TransportError> {
        let channel = self.open_exec(command, args, options).await?;
        self.collect(channel, OutputCollector::until(predicate)).await
    }

    async fn copy(
        &self,
        local_path: &Path,
        remote_path: &str,
        options: &CopyOptions,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;

        // SFTP paths always use forward slashes, Windows servers included
        let target = remote_path.replace('\\', "/");
        let copy_error = |message: String| TransportError::Copy {
            remote: target.clone(),
            message,
        };

        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| self.channel_error(e))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| copy_error(e.to_string()))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| copy_error(e.to_string()))?;

        let mut source = tokio::fs::File::open(local_path).await?;
        let mut file = sftp
            .create(target.as_str())
            .await
            .map_err(|e| copy_error(e.to_string()))?;
        let bytes = tokio::io::copy(&mut source, &mut file).await?;
        file.shutdown().await?;
        debug!("Copied {} bytes to {}", bytes, target);

        if let Some(mode) = options.mode {
            let attrs = FileAttributes {
                permissions: Some(mode),
                ..FileAttributes::empty()
            };
            sftp.set_metadata(target.as_str(), attrs)
                .await
                .map_err(|e| copy_error(e.to_string()))?;
        }

        Ok(())
    }
}

#[async_trait]
impl Forwarder for RemoteConnection {
    /// Pipe `socket` through a direct-tcpip channel until either side closes
    async fn forward(&self, mut socket: TcpStream) {
        let Some(port) = self.forward_port() else {
            warn!("Forward on {} requested before a port was set", self.label);
            return;
        };
        if self.ensure_open().is_err() {
            warn!("Forward on {} rejected: connection closed", self.label);
            return;
        }

        let (origin_host, origin_port) = socket
            .peer_addr()
            .map(|addr| (addr.ip().to_string(), u32::from(addr.port())))
            .unwrap_or_else(|_| (FORWARD_HOST.to_string(), 0));

        let channel = match self
            .handle
            .channel_open_direct_tcpip(FORWARD_HOST, u32::from(port), origin_host, origin_port)
            .await
        {
            Ok(channel) => channel,
            Err(e) => {
                warn!("Forward to {}:{} rejected: {}", FORWARD_HOST, port, e);
                return;
            }
        };

        let mut stream = channel.into_stream();
        tokio::select! {
            result = tokio::io::copy_bidirectional(&mut socket, &mut stream) => match result {
                Ok((sent, received)) => trace!("Forward closed: {} bytes out, {} bytes in", sent, received),
                Err(e) => debug!("Forward ended: {}", e),
            },
            _ = self.closed.cancelled() => debug!("Forward ended by disconnect"),
        }
    }

    fn disconnected(&self) -> CancellationToken {
        self.closed.clone()
    }
}
