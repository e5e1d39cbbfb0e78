//! Local cache of downloaded runtime archives

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use rb_core::error::BootstrapError;

use super::layout::RuntimeArtifact;

/// Obtains a runtime archive on local disk
#[async_trait]
pub trait RuntimeFetcher: Send + Sync {
    /// Return a local path to the archive for `artifact`, downloading if needed
    async fn fetch(&self, artifact: &RuntimeArtifact) -> Result<PathBuf, BootstrapError>;
}

/// Downloads runtime archives over HTTP(S) into `<cache>/runtimes`
pub struct HttpRuntimeFetcher {
    client: reqwest::Client,
    cache_dir: PathBuf,
}

impl HttpRuntimeFetcher {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            cache_dir: cache_dir.into(),
        }
    }

    /// Cached location for `artifact`
    pub fn cached_path(&self, artifact: &RuntimeArtifact) -> PathBuf {
        self.cache_dir.join("runtimes").join(artifact.file_name())
    }

    async fn download(&self, url: &str, target: &Path) -> Result<(), BootstrapError> {
        let fail = |message: String| BootstrapError::Download {
            url: url.to_string(),
            message,
        };

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| fail(e.to_string()))?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| fail(e.to_string()))?;

        let partial = target.with_file_name(format!(
            "{}.part",
            target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        ));
        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(|e| fail(e.to_string()))?;

        let mut body = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| fail(e.to_string()))?;
            file.write_all(&chunk).await.map_err(|e| fail(e.to_string()))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| fail(e.to_string()))?;
        drop(file);

        tokio::fs::rename(&partial, target)
            .await
            .map_err(|e| fail(e.to_string()))?;
        debug!("Downloaded {} bytes from {}", written, url);
        Ok(())
    }
}

#[async_trait]
impl RuntimeFetcher for HttpRuntimeFetcher {
    async fn fetch(&self, artifact: &RuntimeArtifact) -> Result<PathBuf, BootstrapError> {
        let target = self.cached_path(artifact);
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            debug!("Using cached runtime {}", target.display());
            return Ok(target);
        }

        info!("Downloading {}", artifact.url);
        self.download(&artifact.url, &target).await?;
        Ok(target)
    }
}
