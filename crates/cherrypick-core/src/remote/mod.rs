//! Remote backends: listing directory trees and serving file content.
//!
//! Two implementations share the same traits:
//! - [`GitHubApi`]: the REST contents API plus the raw-content host
//! - [`CloneBackend`]: a cached bare clone read through git2

mod clone;
mod github;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{BackendKind, FetchConfig};
use crate::credentials::Credentials;
use crate::error::Result;
use crate::request::RepoRef;

pub use clone::CloneBackend;
pub use github::GitHubApi;

/// Kind of a listing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
}

/// One child returned by a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    /// Path from the repository root.
    pub remote_path: String,
    pub kind: EntryKind,
}

impl RemoteEntry {
    pub fn file(name: impl Into<String>, remote_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            remote_path: remote_path.into(),
            kind: EntryKind::File,
        }
    }

    pub fn directory(name: impl Into<String>, remote_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            remote_path: remote_path.into(),
            kind: EntryKind::Directory,
        }
    }
}

/// Lists the immediate children of a remote directory.
#[async_trait]
pub trait RemoteTreeLister: Send + Sync {
    async fn list(&self, repo: &RepoRef, path: &str) -> Result<Vec<RemoteEntry>>;
}

/// Serves the raw bytes of a remote file.
#[async_trait]
pub trait FileContentSource: Send + Sync {
    async fn fetch(&self, repo: &RepoRef, path: &str) -> Result<Vec<u8>>;
}

#[async_trait]
impl<T: RemoteTreeLister + ?Sized> RemoteTreeLister for Arc<T> {
    async fn list(&self, repo: &RepoRef, path: &str) -> Result<Vec<RemoteEntry>> {
        (**self).list(repo, path).await
    }
}

#[async_trait]
impl<T: FileContentSource + ?Sized> FileContentSource for Arc<T> {
    async fn fetch(&self, repo: &RepoRef, path: &str) -> Result<Vec<u8>> {
        (**self).fetch(repo, path).await
    }
}

/// A backend that can both list and serve content.
pub trait RemoteBackend: RemoteTreeLister + FileContentSource {}

impl<T: RemoteTreeLister + FileContentSource + ?Sized> RemoteBackend for T {}

/// Build the backend selected in `config`.
pub fn build_backend(config: &FetchConfig, credentials: Credentials) -> Result<Arc<dyn RemoteBackend>> {
    let backend: Arc<dyn RemoteBackend> = match config.backend {
        BackendKind::Api => Arc::new(GitHubApi::new(
            &config.api_base,
            &config.raw_base,
            credentials,
        )?),
        BackendKind::Clone => Arc::new(CloneBackend::new(
            config.resolved_state_dir(),
            &config.clone_base,
            credentials,
        )),
    };
    Ok(backend)
}
