//! Writes one remote file into a local directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::error::{FetchError, Result};
use crate::remote::FileContentSource;
use crate::request::{RepoRef, remote_base_name};

/// Fetches file content and writes it to disk.
#[derive(Clone)]
pub struct FileMaterializer {
    source: Arc<dyn FileContentSource>,
    cancel: CancellationToken,
}

impl FileMaterializer {
    pub fn new(source: Arc<dyn FileContentSource>, cancel: CancellationToken) -> Self {
        Self { source, cancel }
    }

    /// Download `remote_path` into `local_dir`, named after its base name.
    ///
    /// The file is fully written and closed before this returns `Ok`. A failed
    /// write leaves whatever was written so far in place.
    pub async fn materialize(
        &self,
        repo: &RepoRef,
        remote_path: &str,
        local_dir: &Path,
    ) -> Result<PathBuf> {
        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let file_name = remote_base_name(remote_path);
        if file_name.is_empty() || file_name == "." || file_name == ".." {
            return Err(FetchError::parse(remote_path, "remote path has no file name"));
        }
        let destination = local_dir.join(file_name);

        tokio::fs::create_dir_all(local_dir)
            .await
            .map_err(|e| FetchError::filesystem(local_dir, e))?;

        let content = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
            content = self.source.fetch(repo, remote_path) => content?,
        };
        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        write_file(&destination, &content).await?;
        tracing::info!("downloaded: {}", destination.display());
        Ok(destination)
    }
}

async fn write_file(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| FetchError::filesystem(path, e))?;
    file.write_all(content)
        .await
        .map_err(|e| FetchError::filesystem(path, e))?;
    file.flush()
        .await
        .map_err(|e| FetchError::filesystem(path, e))?;
    file.sync_all()
        .await
        .map_err(|e| FetchError::filesystem(path, e))?;
    Ok(())
}
