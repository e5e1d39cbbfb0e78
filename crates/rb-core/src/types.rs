//! Core domain types

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Opaque token identifying one established remote session.
///
/// The same value is handed to the local frontend as the `remoteId` cookie.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Wrap an existing token
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive a fresh id for a session with the given label.
    ///
    /// Two connections to the same target still get distinct ids because a
    /// random nonce is mixed into the digest.
    pub fn generate(label: &str) -> Self {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut hasher = Sha256::new();
        hasher.update(label.as_bytes());
        hasher.update(nonce);
        let digest = hasher.finalize();

        Self(hex::encode(&digest[..16]))
    }

    /// Get the raw token
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Operating system family of the remote host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemotePlatform {
    Windows,
    Linux,
    Darwin,
}

impl RemotePlatform {
    /// Classify the output of the platform probe (`uname -s || ver`).
    pub fn classify(stdout: &str, stderr: &str) -> Option<Self> {
        let text = format!("{stdout}\n{stderr}").to_ascii_lowercase();
        if text.contains("linux") {
            Some(Self::Linux)
        } else if text.contains("darwin") {
            Some(Self::Darwin)
        } else if ["windows", "mingw", "msys", "cygwin"]
            .iter()
            .any(|marker| text.contains(marker))
        {
            Some(Self::Windows)
        } else {
            None
        }
    }

    /// Path separator used by the remote shell
    pub fn separator(&self) -> char {
        match self {
            Self::Windows => '\\',
            Self::Linux | Self::Darwin => '/',
        }
    }

    /// Whether the remote side is a Windows host
    pub fn is_windows(&self) -> bool {
        matches!(self, Self::Windows)
    }

    /// Join path segments with this platform's separator.
    ///
    /// Trailing separators on `base` are collapsed so `~/` and `~` join the same way.
    pub fn join<S: AsRef<str>>(&self, base: &str, segments: &[S]) -> String {
        let sep = self.separator();
        let mut path = base.trim_end_matches(['/', '\\']).to_string();
        for segment in segments {
            let segment = segment.as_ref().trim_matches(['/', '\\']);
            if segment.is_empty() {
                continue;
            }
            path.push(sep);
            path.push_str(segment);
        }
        path
    }
}

impl fmt::Display for RemotePlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemotePlatform::Windows => write!(f, "windows"),
            RemotePlatform::Linux => write!(f, "linux"),
            RemotePlatform::Darwin => write!(f, "darwin"),
        }
    }
}

/// Descriptive data supplied when a connection is registered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescriptor {
    /// Human-readable label, e.g. `alice@build-box`
    pub label: String,
    /// Remote kind tag reported by the status endpoint
    pub kind: String,
    /// Backend port on the remote side (0 if not yet bootstrapped)
    pub port: u16,
}

impl SessionDescriptor {
    /// Descriptor for an SSH-backed session
    pub fn ssh(label: impl Into<String>, port: u16) -> Self {
        Self {
            label: label.into(),
            kind: "ssh".to_string(),
            port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_generate_is_hex_and_unique() {
        let a = SessionId::generate("alice@host");
        let b = SessionId::generate("alice@host");
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_classify_platforms() {
        assert_eq!(
            RemotePlatform::classify("Linux\n", ""),
            Some(RemotePlatform::Linux)
        );
        assert_eq!(
            RemotePlatform::classify("Darwin\n", ""),
            Some(RemotePlatform::Darwin)
        );
        assert_eq!(
            RemotePlatform::classify(
                "\r\nMicrosoft Windows [Version 10.0.19045.3570]\r\n",
                "'uname' is not recognized as an internal or external command"
            ),
            Some(RemotePlatform::Windows)
        );
        assert_eq!(
            RemotePlatform::classify("MINGW64_NT-10.0-19045", ""),
            Some(RemotePlatform::Windows)
        );
        assert_eq!(RemotePlatform::classify("FreeBSD", ""), None);
        assert_eq!(RemotePlatform::classify("", ""), None);
    }

    #[test]
    fn test_join_uses_platform_separator() {
        let posix = RemotePlatform::Linux.join("/home/alice/", &[".app-remote", "lib"]);
        assert_eq!(posix, "/home/alice/.app-remote/lib");

        let windows = RemotePlatform::Windows.join("C:\\Users\\alice", &[".app-remote", "lib"]);
        assert_eq!(windows, "C:\\Users\\alice\\.app-remote\\lib");
    }

    #[test]
    fn test_platform_display() {
        assert_eq!(RemotePlatform::Darwin.to_string(), "darwin");
        assert_eq!(RemotePlatform::Windows.to_string(), "windows");
    }
}
