//! Payload packaging into a gzipped tarball

use std::fs::File;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Builder, HeaderMode};
use tracing::debug;

use rb_core::error::BootstrapError;
use rb_core::traits::PayloadPackager;

/// Packages a local application directory as `<cache>/payloads/<name>.tar.gz`.
///
/// Entries are added in sorted order with normalized headers, so packaging an
/// unchanged directory yields the same bytes.
#[derive(Debug, Clone)]
pub struct TarPackager {
    source_dir: PathBuf,
    archive_path: PathBuf,
}

impl TarPackager {
    pub fn new(source_dir: impl Into<PathBuf>, cache_dir: &Path, name: &str) -> Self {
        Self {
            source_dir: source_dir.into(),
            archive_path: cache_dir.join("payloads").join(format!("{}.tar.gz", name)),
        }
    }
}

#[async_trait]
impl PayloadPackager for TarPackager {
    async fn package_application(&self) -> Result<PathBuf, BootstrapError> {
        let source = self.source_dir.clone();
        let target = self.archive_path.clone();

        tokio::task::spawn_blocking(move || build_archive(&source, &target))
            .await
            .map_err(|e| BootstrapError::Package(e.to_string()))??;

        debug!("Packaged {} into {}", self.source_dir.display(), self.archive_path.display());
        Ok(self.archive_path.clone())
    }
}

fn build_archive(source: &Path, target: &Path) -> Result<(), BootstrapError> {
    let fail = |e: std::io::Error| BootstrapError::Package(format!("{}: {}", source.display(), e));

    if !source.is_dir() {
        return Err(BootstrapError::Package(format!(
            "{} is not a directory",
            source.display()
        )));
    }
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(fail)?;
    }

    let file = File::create(target).map_err(fail)?;
    let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
    builder.mode(HeaderMode::Deterministic);
    builder.follow_symlinks(false);

    append_tree(&mut builder, source, Path::new("")).map_err(fail)?;

    builder.into_inner().and_then(|gz| gz.finish()).map_err(fail)?;
    Ok(())
}

fn append_tree<W: std::io::Write>(
    builder: &mut Builder<W>,
    dir: &Path,
    prefix: &Path,
) -> std::io::Result<()> {
    let mut entries = std::fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let name = prefix.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            builder.append_dir(&name, &path)?;
            append_tree(builder, &path, &name)?;
        } else {
            builder.append_path_with_name(&path, &name)?;
        }
    }
    Ok(())
}
