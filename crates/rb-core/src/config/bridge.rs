//! Bridge configuration sections

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Top-level configuration for the remote bridge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// SSH transport settings
    pub ssh: SshConfig,
    /// Authentication retry budgets
    pub auth: AuthConfig,
    /// Application payload deployed to the remote host
    pub app: AppConfig,
    /// Runtime provisioned on the remote host
    pub runtime: RuntimeConfig,
    /// Bootstrap probing and launch
    pub bootstrap: BootstrapConfig,
    /// Local gateway listener
    pub gateway: GatewayConfig,
}

/// SSH transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Port used when the target does not name one
    pub port: u16,

    /// Username used when the target does not name one
    pub username: String,

    /// Private key files offered for public-key authentication, in order
    pub identity_files: Vec<PathBuf>,

    /// Expected server key fingerprint (`SHA256:...`); mismatches are logged
    pub expected_host_key: Option<String>,

    /// Connection timeout
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Interval between keepalive requests
    #[serde(with = "duration_secs")]
    pub keepalive_interval: Duration,

    /// Unanswered keepalives before the connection is considered dead
    pub keepalive_max: usize,
}

impl Default for SshConfig {
    fn default() -> Self {
        let ssh_dir = dirs::home_dir().unwrap_or_default().join(".ssh");

        Self {
            port: 22,
            username: whoami::username(),
            identity_files: ["id_ed25519", "id_ecdsa", "id_rsa"]
                .iter()
                .map(|name| ssh_dir.join(name))
                .collect(),
            expected_host_key: None,
            connect_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(15),
            keepalive_max: 3,
        }
    }
}

/// Per-method retry budgets for one connection attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Passphrase prompts per encrypted key
    pub passphrase_retries: u32,
    /// Password submissions
    pub password_retries: u32,
    /// Keyboard-interactive rounds
    pub keyboard_interactive_retries: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            passphrase_retries: 3,
            password_retries: 3,
            keyboard_interactive_retries: 3,
        }
    }
}

/// Application payload settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application name, used in the remote directory name
    pub name: String,

    /// Application version, used in the remote directory name
    pub version: String,

    /// Local directory packaged and shipped as the payload
    pub local_dir: PathBuf,

    /// Entry point script, relative to the payload root
    pub entry_point: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "app".to_string(),
            version: "0.1.0".to_string(),
            local_dir: PathBuf::from("."),
            entry_point: "main.js".to_string(),
        }
    }
}

/// Remote runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Runtime release version (without the leading `v`)
    pub version: String,

    /// CPU architecture token used in artifact names
    pub arch: String,

    /// Download URL with `{version}`, `{platform}`, `{arch}` and `{ext}` placeholders
    pub url_template: String,

    /// Local cache for downloaded archives and packaged payloads
    pub cache_dir: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            version: "20.11.1".to_string(),
            arch: "x64".to_string(),
            url_template:
                "https://nodejs.org/dist/v{version}/node-v{version}-{platform}-{arch}.{ext}"
                    .to_string(),
            cache_dir: super::default_cache_dir(),
        }
    }
}

/// Bootstrap probing and launch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Attempts for a probe that produced no output
    pub probe_attempts: u32,

    /// How long to wait for the backend to announce its port
    #[serde(with = "duration_secs")]
    pub launch_timeout: Duration,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            probe_attempts: 20,
            launch_timeout: Duration::from_secs(60),
        }
    }
}

/// Local gateway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the gateway listens on
    pub bind_address: String,

    /// Directory served for requests that are not routed to a remote session
    pub static_dir: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            static_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.ssh.port, 22);
        assert_eq!(config.ssh.identity_files.len(), 3);
        assert_eq!(config.auth.passphrase_retries, 3);
        assert_eq!(config.auth.keyboard_interactive_retries, 3);
        assert_eq!(config.bootstrap.launch_timeout, Duration::from_secs(60));
        assert_eq!(config.runtime.arch, "x64");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let text = r#"
            [ssh]
            port = 2222
            connect_timeout = 5

            [app]
            name = "notebook"
        "#;
        let config: BridgeConfig = toml::from_str(text).unwrap();
        assert_eq!(config.ssh.port, 2222);
        assert_eq!(config.ssh.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.ssh.keepalive_max, 3);
        assert_eq!(config.app.name, "notebook");
        assert_eq!(config.app.entry_point, "main.js");
        assert_eq!(config.bootstrap.probe_attempts, 20);
    }
}
