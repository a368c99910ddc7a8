//! Clone backend: bare-clones a repository once, then reads trees and blobs
//! from the local object database.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use git2::{ErrorCode, ObjectType, Oid, Repository};
use tokio::sync::OnceCell;
use url::Url;

use super::{FileContentSource, RemoteEntry, RemoteTreeLister};
use crate::credentials::Credentials;
use crate::error::{FetchError, Result};
use crate::request::RepoRef;

const GIT_ENV_OVERRIDES: [&str; 4] = [
    "GIT_DIR",
    "GIT_WORK_TREE",
    "GIT_INDEX_FILE",
    "GIT_COMMON_DIR",
];

type CellMap<K, V> = Mutex<HashMap<K, Arc<OnceCell<V>>>>;

/// Lists and reads files from a cached bare clone.
///
/// Each repository is cloned at most once per process; each reference is
/// resolved to a commit once and every later call reads that commit.
#[derive(Debug)]
pub struct CloneBackend {
    state_dir: PathBuf,
    clone_base: String,
    credentials: Credentials,
    clones: CellMap<String, PathBuf>,
    commits: CellMap<RepoRef, Oid>,
}

impl CloneBackend {
    pub fn new(state_dir: PathBuf, clone_base: &str, credentials: Credentials) -> Self {
        Self {
            state_dir,
            clone_base: clone_base.trim_end_matches('/').to_string(),
            credentials,
            clones: Mutex::new(HashMap::new()),
            commits: Mutex::new(HashMap::new()),
        }
    }

    /// Clone URL without credentials.
    pub fn repo_url(&self, repo: &RepoRef) -> String {
        format!("{}/{}/{}", self.clone_base, repo.owner, repo.repo)
    }

    /// Compute the bare repo directory path for a repository.
    pub fn bare_repo_dir(&self, repo: &RepoRef) -> PathBuf {
        let hash = blake3::hash(self.repo_url(repo).as_bytes()).to_hex().to_string();
        self.state_dir.join("git").join(format!("{}.git", hash))
    }

    /// Resolve `repo.reference` to a commit, cloning first if needed.
    pub async fn resolve_commit(&self, repo: &RepoRef) -> Result<String> {
        let (_, oid) = self.prepare(repo).await?;
        Ok(oid.to_string())
    }

    /// URL used for network operations, with credentials embedded.
    fn network_url(&self, repo: &RepoRef) -> String {
        let clean = self.repo_url(repo);
        let Some(token) = self.credentials.token() else {
            return clean;
        };
        let Ok(mut url) = Url::parse(&clean) else {
            return clean;
        };
        if url.scheme() != "https" && url.scheme() != "http" {
            return clean;
        }
        let username = self.credentials.username().unwrap_or("x-access-token");
        if url.set_username(username).is_err() || url.set_password(Some(token)).is_err() {
            return clean;
        }
        url.to_string()
    }

    async fn prepare(&self, repo: &RepoRef) -> Result<(PathBuf, Oid)> {
        let clone_cell = cell_for(&self.clones, self.repo_url(repo));
        let bare_dir = clone_cell
            .get_or_try_init(|| {
                Self::ensure_bare_repo(
                    self.bare_repo_dir(repo),
                    self.repo_url(repo),
                    self.network_url(repo),
                )
            })
            .await?
            .clone();

        let commit_cell = cell_for(&self.commits, repo.clone());
        let oid = *commit_cell
            .get_or_try_init(|| {
                Self::resolve_reference(
                    bare_dir.clone(),
                    repo.reference.clone(),
                    self.network_url(repo),
                    repo.describe(""),
                )
            })
            .await?;

        Ok((bare_dir, oid))
    }

    /// Ensure the bare repository exists and return its path.
    ///
    /// A fresh clone is made in a staging directory and renamed into place,
    /// so an interrupted clone never leaves a half-made repository behind.
    async fn ensure_bare_repo(
        bare_dir: PathBuf,
        clean_url: String,
        network_url: String,
    ) -> Result<PathBuf> {
        if bare_dir.exists() {
            tracing::debug!("Refreshing clone of {} at {}", clean_url, bare_dir.display());
            let refresh = run_git(
                Some(&bare_dir),
                &[
                    "fetch",
                    "--quiet",
                    "--prune",
                    &network_url,
                    "+refs/heads/*:refs/heads/*",
                    "+refs/tags/*:refs/tags/*",
                ],
                &clean_url,
            )
            .await;
            if let Err(err) = refresh {
                tracing::warn!("Using cached clone of {} as-is: {}", clean_url, err);
            }
            return Ok(bare_dir);
        }

        let parent = bare_dir.parent().ok_or_else(|| FetchError::Repository {
            message: format!("bare repo directory has no parent: {}", bare_dir.display()),
        })?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| FetchError::filesystem(parent, e))?;

        let staging = staging_dir(&bare_dir);
        if staging.exists() {
            tokio::fs::remove_dir_all(&staging)
                .await
                .map_err(|e| FetchError::filesystem(&staging, e))?;
        }
        let staging_str = staging.to_str().ok_or_else(|| FetchError::Repository {
            message: format!("invalid bare repo dir: {}", staging.display()),
        })?;

        tracing::info!("Cloning {}", clean_url);
        let cloned = run_git(
            None,
            &["clone", "--bare", "--quiet", &network_url, staging_str],
            &clean_url,
        )
        .await;
        if let Err(err) = cloned {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(err);
        }
        if network_url != clean_url {
            run_git(
                Some(&staging),
                &["remote", "set-url", "origin", &clean_url],
                &clean_url,
            )
            .await?;
        }
        tokio::fs::rename(&staging, &bare_dir)
            .await
            .map_err(|e| FetchError::filesystem(&bare_dir, e))?;
        Ok(bare_dir)
    }

    /// Resolve a branch, tag or SHA to a commit id.
    ///
    /// Tries the local clone first. Otherwise the reference is fetched into
    /// its own `refs/cherrypick/` ref, so concurrent fetches of different
    /// references in one clone never read each other's result.
    async fn resolve_reference(
        bare_dir: PathBuf,
        reference: String,
        network_url: String,
        target: String,
    ) -> Result<Oid> {
        let dir = bare_dir.clone();
        let spec = reference.clone();
        if let Some(oid) = run_blocking(move || Self::lookup_commit(&dir, &spec)).await? {
            return Ok(oid);
        }

        let pinned = pinned_ref(&reference);
        tracing::debug!("Fetching reference {} for {}", reference, target);
        let refspec = format!("+{}:{}", reference, pinned);
        run_git(
            Some(&bare_dir),
            &["fetch", "--quiet", &network_url, &refspec],
            &target,
        )
        .await?;

        run_blocking(move || {
            Self::lookup_commit(&bare_dir, &pinned)?.ok_or_else(|| not_found(&target))
        })
        .await
    }

    fn lookup_commit(bare_dir: &Path, spec: &str) -> Result<Option<Oid>> {
        let repo = Repository::open_bare(bare_dir)?;
        match repo.revparse_single(spec) {
            Ok(obj) => Ok(Some(obj.peel_to_commit()?.id())),
            Err(_) => Ok(None),
        }
    }

    fn list_tree(bare_dir: &Path, commit: Oid, path: &str, target: &str) -> Result<Vec<RemoteEntry>> {
        let repo = Repository::open_bare(bare_dir)?;
        let root = repo.find_commit(commit)?.tree()?;

        let tree = if path.is_empty() {
            root
        } else {
            let entry = root
                .get_path(Path::new(path))
                .map_err(|e| missing_or_repo_error(e, target))?;
            match entry.kind() {
                Some(ObjectType::Tree) => repo.find_tree(entry.id())?,
                Some(ObjectType::Blob) => {
                    let name = crate::request::remote_base_name(path);
                    return Ok(vec![RemoteEntry::file(name, path)]);
                }
                _ => return Err(not_found(target)),
            }
        };

        let mut entries = Vec::with_capacity(tree.len());
        for entry in tree.iter() {
            let Some(name) = entry.name() else {
                tracing::debug!("Skipping non UTF-8 entry under {}", target);
                continue;
            };
            let child_path = if path.is_empty() {
                name.to_string()
            } else {
                format!("{}/{}", path, name)
            };
            match entry.kind() {
                Some(ObjectType::Tree) => entries.push(RemoteEntry::directory(name, child_path)),
                Some(ObjectType::Blob) => entries.push(RemoteEntry::file(name, child_path)),
                _ => tracing::debug!("Skipping unsupported entry: {}", child_path),
            }
        }
        Ok(entries)
    }

    fn read_blob(bare_dir: &Path, commit: Oid, path: &str, target: &str) -> Result<Vec<u8>> {
        let repo = Repository::open_bare(bare_dir)?;
        let tree = repo.find_commit(commit)?.tree()?;
        let entry = tree
            .get_path(Path::new(path))
            .map_err(|e| missing_or_repo_error(e, target))?;
        if entry.kind() != Some(ObjectType::Blob) {
            return Err(not_found(target));
        }
        let blob = repo.find_blob(entry.id())?;
        Ok(blob.content().to_vec())
    }
}

#[async_trait]
impl RemoteTreeLister for CloneBackend {
    async fn list(&self, repo: &RepoRef, path: &str) -> Result<Vec<RemoteEntry>> {
        let (bare_dir, commit) = self.prepare(repo).await?;
        let path = path.to_string();
        let target = repo.describe(&path);
        run_blocking(move || Self::list_tree(&bare_dir, commit, &path, &target)).await
    }
}

#[async_trait]
impl FileContentSource for CloneBackend {
    async fn fetch(&self, repo: &RepoRef, path: &str) -> Result<Vec<u8>> {
        let (bare_dir, commit) = self.prepare(repo).await?;
        let path = path.to_string();
        let target = repo.describe(&path);
        run_blocking(move || Self::read_blob(&bare_dir, commit, &path, &target)).await
    }
}

fn cell_for<K, V>(map: &CellMap<K, V>, key: K) -> Arc<OnceCell<V>>
where
    K: std::hash::Hash + Eq,
{
    let mut cells = map.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    Arc::clone(cells.entry(key).or_default())
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FetchError::Task {
            message: e.to_string(),
        })?
}

fn not_found(target: &str) -> FetchError {
    FetchError::NotFound {
        target: target.to_string(),
        authenticated: true,
    }
}

fn missing_or_repo_error(err: git2::Error, target: &str) -> FetchError {
    if err.code() == ErrorCode::NotFound {
        not_found(target)
    } else {
        err.into()
    }
}

/// Local ref that holds a fetched `reference`.
fn pinned_ref(reference: &str) -> String {
    format!("refs/cherrypick/{}", blake3::hash(reference.as_bytes()).to_hex())
}

fn staging_dir(bare_dir: &Path) -> PathBuf {
    bare_dir.with_extension("partial")
}

/// Run a git command, classifying failures.
///
/// The child is killed if the returned future is dropped. `target` names the
/// repository in errors; arguments are never logged since they may carry
/// credentials.
async fn run_git(cwd: Option<&Path>, args: &[&str], target: &str) -> Result<()> {
    let mut cmd = tokio::process::Command::new("git");
    cmd.args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .kill_on_drop(true);
    for key in GIT_ENV_OVERRIDES {
        cmd.env_remove(key);
    }
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let output = cmd
        .output()
        .await
        .map_err(|e| FetchError::transport(target, format!("failed to run git: {}", e)))?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(classify_git_failure(stderr.trim(), target))
}

pub(crate) fn classify_git_failure(stderr: &str, target: &str) -> FetchError {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("authentication failed")
        || lower.contains("could not read username")
        || lower.contains("terminal prompts disabled")
        || lower.contains("403")
    {
        FetchError::Auth {
            target: target.to_string(),
            status: 401,
        }
    } else if lower.contains("not found")
        || lower.contains("does not exist")
        || lower.contains("couldn't find remote ref")
        || lower.contains("does not appear to be a git repository")
    {
        FetchError::NotFound {
            target: target.to_string(),
            authenticated: false,
        }
    } else {
        FetchError::transport(target, format!("git: {}", stderr))
    }
}
