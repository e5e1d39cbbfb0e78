//! Credential candidates and the identities they come from

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use russh::keys::PrivateKey;

/// One credential offered for public-key authentication
#[derive(Clone)]
pub enum CredentialCandidate {
    /// Already-decrypted key material, submitted as is
    Key(Arc<PrivateKey>),
    /// Key file on local disk, read and parsed when its turn comes
    KeyFile(PathBuf),
}

impl CredentialCandidate {
    /// Short description for logs
    pub fn describe(&self) -> String {
        match self {
            CredentialCandidate::Key(key) => format!("in-memory {} key", key.algorithm()),
            CredentialCandidate::KeyFile(path) => path.display().to_string(),
        }
    }
}

impl std::fmt::Debug for CredentialCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CredentialCandidate({})", self.describe())
    }
}

/// Supplies the ordered credential candidates for one connection attempt
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn gather_candidates(&self) -> Vec<CredentialCandidate>;
}

/// Identity provider returning a fixed list of key files
#[derive(Debug, Clone, Default)]
pub struct ConfiguredIdentities {
    files: Vec<PathBuf>,
}

impl ConfiguredIdentities {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl IdentityProvider for ConfiguredIdentities {
    async fn gather_candidates(&self) -> Vec<CredentialCandidate> {
        self.files
            .iter()
            .cloned()
            .map(CredentialCandidate::KeyFile)
            .collect()
    }
}
