//! Remote directory layout and runtime artifact naming

use rb_core::config::{AppConfig, RuntimeConfig};
use rb_core::RemotePlatform;

/// Archive format of a runtime release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
    TarXz,
}

impl ArchiveKind {
    /// Format used for a platform's runtime release
    pub fn for_platform(platform: RemotePlatform) -> Self {
        match platform {
            RemotePlatform::Windows => ArchiveKind::Zip,
            RemotePlatform::Darwin => ArchiveKind::TarGz,
            RemotePlatform::Linux => ArchiveKind::TarXz,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveKind::Zip => "zip",
            ArchiveKind::TarGz => "tar.gz",
            ArchiveKind::TarXz => "tar.xz",
        }
    }
}

/// A runtime release resolved for one remote platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeArtifact {
    pub version: String,
    pub platform: RemotePlatform,
    pub arch: String,
    pub archive: ArchiveKind,
    pub url: String,
}

impl RuntimeArtifact {
    pub fn resolve(config: &RuntimeConfig, platform: RemotePlatform) -> Self {
        let archive = ArchiveKind::for_platform(platform);
        let url = config
            .url_template
            .replace("{version}", &config.version)
            .replace("{platform}", platform_token(platform))
            .replace("{arch}", &config.arch)
            .replace("{ext}", archive.extension());

        Self {
            version: config.version.clone(),
            platform,
            arch: config.arch.clone(),
            archive,
            url,
        }
    }

    /// Directory the archive unpacks to, e.g. `node-v20.11.1-linux-x64`
    pub fn dir_name(&self) -> String {
        format!(
            "node-v{}-{}-{}",
            self.version,
            platform_token(self.platform),
            self.arch
        )
    }

    /// Archive file name, e.g. `node-v20.11.1-linux-x64.tar.xz`
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.dir_name(), self.archive.extension())
    }
}

fn platform_token(platform: RemotePlatform) -> &'static str {
    match platform {
        RemotePlatform::Windows => "win",
        RemotePlatform::Linux => "linux",
        RemotePlatform::Darwin => "darwin",
    }
}

/// Name of the application directory under the remote home
pub fn app_dir_name(app: &AppConfig) -> String {
    let raw = format!(".{}-{}-remote", app.name, app.version);
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Absolute remote paths for one deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    pub platform: RemotePlatform,
    pub app_dir: String,
    pub runtime_dir: String,
    pub lib_dir: String,
}

impl RemoteLayout {
    pub fn new(platform: RemotePlatform, home: &str, app: &AppConfig, runtime: &RuntimeArtifact) -> Self {
        let app_dir = platform.join(home, &[app_dir_name(app)]);
        let runtime_dir = platform.join(&app_dir, &[runtime.dir_name()]);
        let lib_dir = platform.join(&app_dir, &["lib"]);
        Self {
            platform,
            app_dir,
            runtime_dir,
            lib_dir,
        }
    }

    /// Path of a file directly inside the application directory
    pub fn in_app_dir(&self, name: &str) -> String {
        self.platform.join(&self.app_dir, &[name])
    }

    /// Runtime executable inside the runtime directory
    pub fn runtime_executable(&self) -> String {
        if self.platform.is_windows() {
            self.platform.join(&self.runtime_dir, &["node.exe"])
        } else {
            self.platform.join(&self.runtime_dir, &["bin", "node"])
        }
    }

    /// Entry point relative to the application directory (`lib/<entry>`)
    pub fn entry_point(&self, entry: &str) -> String {
        let segments: Vec<&str> = entry.split(['/', '\\']).collect();
        self.platform.join("lib", &segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> AppConfig {
        AppConfig {
            name: "note book".to_string(),
            version: "1.2.0".to_string(),
            ..AppConfig::default()
        }
    }

    #[test]
    fn test_app_dir_name_is_sanitized() {
        assert_eq!(app_dir_name(&app()), ".note_book-1.2.0-remote");

        let weird = AppConfig {
            name: "a/b\\c:d".to_string(),
            ..app()
        };
        assert_eq!(app_dir_name(&weird), ".a_b_c_d-1.2.0-remote");
    }

    #[test]
    fn test_runtime_artifact_per_platform() {
        let config = RuntimeConfig {
            version: "20.11.1".to_string(),
            ..RuntimeConfig::default()
        };

        let linux = RuntimeArtifact::resolve(&config, RemotePlatform::Linux);
        assert_eq!(linux.file_name(), "node-v20.11.1-linux-x64.tar.xz");
        assert_eq!(
            linux.url,
            "https://nodejs.org/dist/v20.11.1/node-v20.11.1-linux-x64.tar.xz"
        );

        let mac = RuntimeArtifact::resolve(&config, RemotePlatform::Darwin);
        assert_eq!(mac.file_name(), "node-v20.11.1-darwin-x64.tar.gz");

        let windows = RuntimeArtifact::resolve(&config, RemotePlatform::Windows);
        assert_eq!(windows.dir_name(), "node-v20.11.1-win-x64");
        assert_eq!(windows.archive, ArchiveKind::Zip);
    }

    #[test]
    fn test_layout_windows_paths() {
        let runtime = RuntimeArtifact::resolve(&RuntimeConfig::default(), RemotePlatform::Windows);
        let layout = RemoteLayout::new(
            RemotePlatform::Windows,
            "C:\\Users\\alice",
            &AppConfig::default(),
            &runtime,
        );

        assert_eq!(layout.app_dir, "C:\\Users\\alice\\.app-0.1.0-remote");
        assert_eq!(layout.lib_dir, "C:\\Users\\alice\\.app-0.1.0-remote\\lib");
        assert!(layout.runtime_executable().ends_with("-win-x64\\node.exe"));
        assert_eq!(layout.entry_point("dist/main.js"), "lib\\dist\\main.js");
    }

    #[test]
    fn test_layout_posix_paths() {
        let runtime = RuntimeArtifact::resolve(&RuntimeConfig::default(), RemotePlatform::Linux);
        let layout = RemoteLayout::new(
            RemotePlatform::Linux,
            "/home/alice",
            &AppConfig::default(),
            &runtime,
        );

        assert_eq!(layout.app_dir, "/home/alice/.app-0.1.0-remote");
        assert!(layout.runtime_executable().ends_with("-linux-x64/bin/node"));
        assert_eq!(layout.in_app_dir("payload.tar.gz"), "/home/alice/.app-0.1.0-remote/payload.tar.gz");
        assert_eq!(layout.entry_point("main.js"), "lib/main.js");
    }
}
