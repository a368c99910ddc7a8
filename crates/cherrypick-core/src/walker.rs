//! Recursive, concurrent directory walk.
//!
//! Each listing fans out into one spawned task per entry: files go through
//! the [`ConcurrencyGate`] and the [`FileMaterializer`], directories recurse
//! without a permit. Every level joins all of its children before it
//! reports, so the top-level call returns only once the whole subtree is
//! done.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{FetchError, PartialFailure, PathFailure, Result};
use crate::gate::ConcurrencyGate;
use crate::materialize::FileMaterializer;
use crate::remote::{EntryKind, RemoteBackend, RemoteEntry, RemoteTreeLister};
use crate::request::RepoRef;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Files written by a successful walk.
#[derive(Debug, Clone, Default)]
pub struct WalkSummary {
    pub written: Vec<PathBuf>,
}

/// Results gathered at one level, including everything below it.
#[derive(Debug, Default)]
struct LevelOutcome {
    written: Vec<PathBuf>,
    failures: Vec<PathFailure>,
    cancelled: bool,
}

impl LevelOutcome {
    fn absorb(&mut self, child: LevelOutcome) {
        self.written.extend(child.written);
        self.failures.extend(child.failures);
        self.cancelled |= child.cancelled;
    }
}

enum ChildDone {
    File(PathBuf),
    Directory(LevelOutcome),
}

/// Walks a remote directory and mirrors it locally.
#[derive(Clone)]
pub struct DirectoryWalker {
    lister: Arc<dyn RemoteTreeLister>,
    materializer: FileMaterializer,
    gate: ConcurrencyGate,
}

impl DirectoryWalker {
    pub fn new(
        lister: Arc<dyn RemoteTreeLister>,
        materializer: FileMaterializer,
        gate: ConcurrencyGate,
    ) -> Self {
        Self {
            lister,
            materializer,
            gate,
        }
    }

    /// Build a walker whose lister and materializer share one backend.
    ///
    /// The gate's cancellation token is used for the whole walk.
    pub fn from_backend(backend: Arc<dyn RemoteBackend>, gate: ConcurrencyGate) -> Self {
        let materializer =
            FileMaterializer::new(Arc::new(Arc::clone(&backend)), gate.cancel_token().clone());
        Self::new(Arc::new(backend), materializer, gate)
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Mirror `remote_path` (and everything below it) into `local_destination`.
    ///
    /// Fails with the listing error if `remote_path` itself can't be listed,
    /// with [`FetchError::Cancelled`] if cancellation was observed anywhere,
    /// and with [`FetchError::PartialFailure`] naming every failed path if
    /// some descendants failed.
    pub async fn walk(
        &self,
        repo: &RepoRef,
        remote_path: &str,
        local_destination: &Path,
    ) -> Result<WalkSummary> {
        let outcome = self
            .clone()
            .walk_level(
                Arc::new(repo.clone()),
                remote_path.to_string(),
                local_destination.to_path_buf(),
            )
            .await?;

        if outcome.cancelled {
            return Err(FetchError::Cancelled);
        }
        let partial = PartialFailure::new(outcome.failures);
        if !partial.is_empty() {
            return Err(FetchError::PartialFailure(partial));
        }
        Ok(WalkSummary {
            written: outcome.written,
        })
    }

    /// Download one file into `local_dir`, holding a permit for the duration.
    pub async fn fetch_file(
        &self,
        repo: &RepoRef,
        remote_path: &str,
        local_dir: &Path,
    ) -> Result<PathBuf> {
        if self.gate.cancel_token().is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let permit = self.gate.acquire().await?;
        let result = self.materializer.materialize(repo, remote_path, local_dir).await;
        permit.release();
        result
    }

    fn walk_level(
        self,
        repo: Arc<RepoRef>,
        remote_path: String,
        local: PathBuf,
    ) -> BoxFuture<Result<LevelOutcome>> {
        Box::pin(async move {
            let cancel = self.gate.cancel_token().clone();
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let entries = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                listed = self.lister.list(&repo, &remote_path) => listed?,
            };
            tokio::fs::create_dir_all(&local)
                .await
                .map_err(|e| FetchError::filesystem(&local, e))?;
            tracing::debug!(
                "Listed {} entries under {}",
                entries.len(),
                repo.describe(&remote_path)
            );

            let mut outcome = LevelOutcome::default();
            let mut children = Vec::with_capacity(entries.len());

            for entry in entries {
                if let Err(cause) = check_entry_name(&entry) {
                    tracing::warn!("Skipping {}: {}", entry.remote_path, cause);
                    outcome.failures.push(PathFailure {
                        path: entry.remote_path,
                        cause,
                    });
                    continue;
                }

                let walker = self.clone();
                let repo = Arc::clone(&repo);
                let path = entry.remote_path.clone();
                let handle = match entry.kind {
                    EntryKind::File => {
                        let dir = local.clone();
                        tokio::spawn(async move {
                            walker
                                .fetch_file(&repo, &entry.remote_path, &dir)
                                .await
                                .map(ChildDone::File)
                        })
                    }
                    EntryKind::Directory => {
                        let child_local = local.join(&entry.name);
                        tokio::spawn(async move {
                            walker
                                .walk_level(repo, entry.remote_path, child_local)
                                .await
                                .map(ChildDone::Directory)
                        })
                    }
                };
                children.push((path, handle));
            }

            for (path, handle) in children {
                match handle.await {
                    Ok(Ok(ChildDone::File(written))) => outcome.written.push(written),
                    Ok(Ok(ChildDone::Directory(sub))) => outcome.absorb(sub),
                    Ok(Err(FetchError::Cancelled)) => outcome.cancelled = true,
                    Ok(Err(cause)) => {
                        tracing::warn!("Failed to fetch {}: {}", path, cause);
                        outcome.failures.push(PathFailure { path, cause });
                    }
                    Err(join_err) => {
                        tracing::warn!("Task for {} did not complete: {}", path, join_err);
                        outcome.failures.push(PathFailure {
                            path,
                            cause: FetchError::Task {
                                message: join_err.to_string(),
                            },
                        });
                    }
                }
            }

            Ok(outcome)
        })
    }
}

/// Reject names that would escape or collapse the local directory.
fn check_entry_name(entry: &RemoteEntry) -> Result<()> {
    let name = entry.name.as_str();
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(FetchError::parse(
            &entry.remote_path,
            format!("unsafe entry name '{}'", name),
        ));
    }
    Ok(())
}
