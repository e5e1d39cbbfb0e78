//! Remote bootstrap
//!
//! Brings a freshly authenticated host to the point where the application
//! backend is listening: detect the platform, locate the home directory,
//! provision the runtime and payload, then launch. Each step checks remote
//! state first, so re-running against a provisioned host only launches.

mod fetch;
mod layout;
mod probe;

pub use fetch::{HttpRuntimeFetcher, RuntimeFetcher};
pub use layout::{app_dir_name, ArchiveKind, RemoteLayout, RuntimeArtifact};
pub use probe::Prober;

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use rb_core::config::{AppConfig, BridgeConfig, RuntimeConfig};
use rb_core::error::BootstrapError;
use rb_core::exec::{CopyOptions, ExecOptions, ExecutionResult};
use rb_core::traits::{PayloadPackager, ProgressSink, RemoteHost};
use rb_core::RemotePlatform;

/// Platform probe; `ver` answers on Windows where `uname` is missing
pub const PLATFORM_PROBE: &str = "uname -s || ver";

/// Line the backend prints once it accepts connections
pub const LISTENING_PATTERN: &str = r"listening on http://localhost:(\d+)";

/// Remote file name the packaged payload is uploaded to
pub const PAYLOAD_ARCHIVE: &str = "payload.tar.gz";

/// What a completed bootstrap produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapOutcome {
    pub platform: RemotePlatform,
    /// Absolute application directory on the remote
    pub app_dir: String,
    /// Port the backend announced
    pub port: u16,
}

/// Runs the bootstrap steps against one remote host
pub struct Bootstrapper {
    app: AppConfig,
    runtime: RuntimeConfig,
    probe_attempts: u32,
    launch_timeout: Duration,
    packager: Arc<dyn PayloadPackager>,
    fetcher: Arc<dyn RuntimeFetcher>,
    progress: Arc<dyn ProgressSink>,
}

impl Bootstrapper {
    pub fn new(
        config: &BridgeConfig,
        packager: Arc<dyn PayloadPackager>,
        fetcher: Arc<dyn RuntimeFetcher>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            app: config.app.clone(),
            runtime: config.runtime.clone(),
            probe_attempts: config.bootstrap.probe_attempts,
            launch_timeout: config.bootstrap.launch_timeout,
            packager,
            fetcher,
            progress,
        }
    }

    /// Provision (if needed) and launch the backend, returning its port
    pub async fn run(&self, host: &dyn RemoteHost) -> Result<BootstrapOutcome, BootstrapError> {
        let prober = Prober::new(host, self.probe_attempts);

        self.progress.report("Detecting remote platform");
        let platform = self.detect_platform(&prober).await?;
        info!("Remote platform: {}", platform);

        let home = self.home_directory(&prober, platform).await?;
        debug!("Remote home: {}", home);

        let artifact = RuntimeArtifact::resolve(&self.runtime, platform);
        let layout = RemoteLayout::new(platform, &home, &self.app, &artifact);

        self.ensure_app_dir(host, &prober, &layout).await?;
        self.ensure_runtime(host, &prober, &layout, &artifact).await?;
        self.ensure_payload(host, &prober, &layout).await?;

        self.progress.report("Starting remote backend");
        let port = self.launch(host, &layout).await?;
        info!("Remote backend listening on port {}", port);

        Ok(BootstrapOutcome {
            platform,
            app_dir: layout.app_dir,
            port,
        })
    }

    async fn detect_platform(&self, prober: &Prober<'_>) -> Result<RemotePlatform, BootstrapError> {
        let result = prober.probe(PLATFORM_PROBE).await?;
        if !result.has_output() {
            return Err(BootstrapError::NoResponse {
                command: PLATFORM_PROBE.to_string(),
                attempts: self.probe_attempts,
            });
        }

        RemotePlatform::classify(&result.stdout, &result.stderr).ok_or_else(|| {
            BootstrapError::UnknownPlatform(format!("{}{}", result.stdout, result.stderr))
        })
    }

    async fn home_directory(
        &self,
        prober: &Prober<'_>,
        platform: RemotePlatform,
    ) -> Result<String, BootstrapError> {
        if !platform.is_windows() {
            let result = prober.probe("eval echo ~").await?;
            return non_empty(result.stdout.trim()).ok_or(BootstrapError::HomeDirectory);
        }

        // An unset variable is echoed back verbatim by cmd.exe
        let profile = prober.probe("echo %USERPROFILE%").await?;
        if let Some(home) = non_empty(profile.stdout.trim()).filter(|h| !h.contains('%')) {
            return Ok(home);
        }

        let fallback = prober.probe("echo %HOMEDRIVE%%HOMEPATH%").await?;
        non_empty(fallback.stdout.trim())
            .filter(|h| !h.contains('%'))
            .ok_or(BootstrapError::HomeDirectory)
    }

    async fn ensure_app_dir(
        &self,
        host: &dyn RemoteHost,
        prober: &Prober<'_>,
        layout: &RemoteLayout,
    ) -> Result<(), BootstrapError> {
        if prober.directory_exists(layout.platform, &layout.app_dir).await? {
            debug!("Application directory {} present", layout.app_dir);
            return Ok(());
        }

        self.progress.report(&format!("Creating {}", layout.app_dir));
        let command = if layout.platform.is_windows() {
            format!("mkdir \"{}\"", layout.app_dir)
        } else {
            format!("mkdir -p \"{}\"", layout.app_dir)
        };
        let result = run(host, &command).await?;
        if !result.stderr.trim().is_empty() {
            return Err(BootstrapError::CreateDirectory {
                path: layout.app_dir.clone(),
                stderr: result.stderr,
            });
        }
        Ok(())
    }

    async fn ensure_runtime(
        &self,
        host: &dyn RemoteHost,
        prober: &Prober<'_>,
        layout: &RemoteLayout,
        artifact: &RuntimeArtifact,
    ) -> Result<(), BootstrapError> {
        if prober
            .directory_exists(layout.platform, &layout.runtime_dir)
            .await?
        {
            debug!("Runtime {} present", layout.runtime_dir);
            return Ok(());
        }

        self.progress
            .report(&format!("Downloading runtime {}", artifact.file_name()));
        let local = self.fetcher.fetch(artifact).await?;

        let remote_archive = layout.in_app_dir(&artifact.file_name());
        self.progress.report("Uploading runtime");
        host.copy(&local, &remote_archive, &CopyOptions::default())
            .await?;

        self.progress.report("Extracting runtime");
        let command = runtime_extract_command(layout, artifact.archive, &remote_archive);
        if let Err(e) = extract(host, &command, &remote_archive).await {
            discard_directory(host, layout.platform, &layout.runtime_dir).await;
            return Err(e);
        }
        remove(host, layout.platform, &remote_archive).await;
        Ok(())
    }

    async fn ensure_payload(
        &self,
        host: &dyn RemoteHost,
        prober: &Prober<'_>,
        layout: &RemoteLayout,
    ) -> Result<(), BootstrapError> {
        if prober
            .directory_exists(layout.platform, &layout.lib_dir)
            .await?
        {
            debug!("Payload {} present", layout.lib_dir);
            return Ok(());
        }

        self.progress.report("Packaging application");
        let local = self.packager.package_application().await?;

        let remote_archive = layout.in_app_dir(PAYLOAD_ARCHIVE);
        self.progress.report("Uploading application");
        host.copy(&local, &remote_archive, &CopyOptions::default())
            .await?;

        self.progress.report("Extracting application");
        let mkdir = if layout.platform.is_windows() {
            "mkdir"
        } else {
            "mkdir -p"
        };
        let command = format!(
            "{} \"{}\" && tar -xzf \"{}\" -C \"{}\"",
            mkdir, layout.lib_dir, remote_archive, layout.lib_dir
        );
        // A half-filled lib directory would pass the presence check on the next run
        if let Err(e) = extract(host, &command, &remote_archive).await {
            discard_directory(host, layout.platform, &layout.lib_dir).await;
            return Err(e);
        }
        remove(host, layout.platform, &remote_archive).await;
        Ok(())
    }

    async fn launch(&self, host: &dyn RemoteHost, layout: &RemoteLayout) -> Result<u16, BootstrapError> {
        let pattern = Regex::new(LISTENING_PATTERN).map_err(|e| BootstrapError::LaunchFailed {
            stderr: e.to_string(),
        })?;

        let cd = if layout.platform.is_windows() {
            "cd /d"
        } else {
            "cd"
        };
        let command = format!(
            "{} \"{}\" && \"{}\" \"{}\"",
            cd,
            layout.app_dir,
            layout.runtime_executable(),
            layout.entry_point(&self.app.entry_point)
        );
        let args = ["--port=0".to_string(), "--remote".to_string()];

        let mut ready = |stdout: &str, _stderr: &str| pattern.is_match(stdout);
        let result = tokio::time::timeout(
            self.launch_timeout,
            host.execute_until(&command, &mut ready, &args, &ExecOptions::default()),
        )
        .await
        .map_err(|_| BootstrapError::LaunchTimeout(self.launch_timeout))??;

        pattern
            .captures(&result.stdout)
            .and_then(|captures| captures.get(1))
            .and_then(|port| port.as_str().parse::<u16>().ok())
            .ok_or(BootstrapError::LaunchFailed {
                stderr: result.stderr,
            })
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

async fn run(host: &dyn RemoteHost, command: &str) -> Result<ExecutionResult, BootstrapError> {
    Ok(host.execute(command, &[], &ExecOptions::default()).await?)
}

fn runtime_extract_command(layout: &RemoteLayout, kind: ArchiveKind, archive: &str) -> String {
    match kind {
        ArchiveKind::Zip => format!(
            "powershell -NoProfile -NonInteractive -Command \"Expand-Archive -Force -LiteralPath '{}' -DestinationPath '{}'\"",
            archive, layout.app_dir
        ),
        ArchiveKind::TarGz => format!("cd \"{}\" && tar -xzf \"{}\"", layout.app_dir, archive),
        ArchiveKind::TarXz => format!("cd \"{}\" && tar -xJf \"{}\"", layout.app_dir, archive),
    }
}

async fn extract(host: &dyn RemoteHost, command: &str, archive: &str) -> Result<(), BootstrapError> {
    let result = run(host, command).await?;
    if result.failed() {
        return Err(BootstrapError::Extract {
            archive: archive.to_string(),
            stderr: result.stderr,
        });
    }
    Ok(())
}

/// Best-effort removal of an uploaded archive
async fn remove(host: &dyn RemoteHost, platform: RemotePlatform, path: &str) {
    let command = if platform.is_windows() {
        format!("del /f /q \"{}\"", path)
    } else {
        format!("rm -f \"{}\"", path)
    };
    match run(host, &command).await {
        Ok(result) if result.failed() => warn!("Could not remove {}: {}", path, result.stderr.trim()),
        Ok(_) => {}
        Err(e) => warn!("Could not remove {}: {}", path, e),
    }
}

/// Best-effort removal of a directory left behind by a failed extraction
async fn discard_directory(host: &dyn RemoteHost, platform: RemotePlatform, path: &str) {
    let command = if platform.is_windows() {
        format!("rmdir /s /q \"{}\"", path)
    } else {
        format!("rm -rf \"{}\"", path)
    };
    debug!("Discarding {}", path);
    match run(host, &command).await {
        Ok(result) if result.failed() => warn!("Could not discard {}: {}", path, result.stderr.trim()),
        Ok(_) => {}
        Err(e) => warn!("Could not discard {}: {}", path, e),
    }
}
