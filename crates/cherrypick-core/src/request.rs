//! Fetch requests and the parser that builds them from repository URLs.

use std::fmt;
use std::path::{Path, PathBuf};

use percent_encoding::percent_decode_str;
use serde::Serialize;
use url::Url;

use crate::error::{FetchError, Result};

/// Repository coordinates shared by every backend call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
    /// Branch, tag or commit SHA.
    pub reference: String,
}

impl RepoRef {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            reference: reference.into(),
        }
    }

    /// Human-readable label for a path inside this repository.
    pub fn describe(&self, path: &str) -> String {
        if path.is_empty() {
            format!("{}/{}@{}", self.owner, self.repo, self.reference)
        } else {
            format!("{}/{}@{}:{}", self.owner, self.repo, self.reference, path)
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.owner, self.repo, self.reference)
    }
}

/// What a request points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchTarget {
    /// A directory subtree, walked recursively.
    Directory,
    /// A single file, downloaded straight into the local root.
    File,
}

/// One top-level user request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchRequest {
    repo: RepoRef,
    remote_path: String,
    local_root: PathBuf,
    target: FetchTarget,
}

impl FetchRequest {
    /// Create a directory request.
    pub fn new(repo: RepoRef, remote_path: impl Into<String>, local_root: impl Into<PathBuf>) -> Self {
        Self {
            repo,
            remote_path: normalize_path(&remote_path.into()),
            local_root: local_root.into(),
            target: FetchTarget::Directory,
        }
    }

    /// Create a single-file request.
    pub fn file(repo: RepoRef, remote_path: impl Into<String>, local_root: impl Into<PathBuf>) -> Self {
        Self {
            target: FetchTarget::File,
            ..Self::new(repo, remote_path, local_root)
        }
    }

    pub fn repo(&self) -> &RepoRef {
        &self.repo
    }

    pub fn owner(&self) -> &str {
        &self.repo.owner
    }

    pub fn repo_name(&self) -> &str {
        &self.repo.repo
    }

    pub fn reference(&self) -> &str {
        &self.repo.reference
    }

    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    pub fn target(&self) -> FetchTarget {
        self.target
    }

    /// Parse a repository URL into a request.
    ///
    /// Supports formats:
    /// - `https://github.com/org/repo`
    /// - `https://github.com/org/repo/tree/ref/path`
    /// - `https://github.com/org/repo/blob/ref/path/file.md`
    /// - `https://github.com/org/repo/path` (default branch)
    /// - `github.com/org/repo` (scheme optional)
    /// - `github:org/repo`, `github:org/repo@ref`, `github:org/repo@ref/path`
    pub fn parse(input: &str, default_branch: &str, local_root: impl Into<PathBuf>) -> Result<Self> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(FetchError::parse(input, "empty repository URL"));
        }

        let (repo, path, target) = match raw.strip_prefix("github:") {
            Some(shorthand) => Self::parse_shorthand(input, shorthand, default_branch)?,
            None => Self::parse_url(input, raw, default_branch)?,
        };

        Ok(Self {
            repo,
            remote_path: path,
            local_root: local_root.into(),
            target,
        })
    }

    fn parse_url(
        input: &str,
        raw: &str,
        default_branch: &str,
    ) -> Result<(RepoRef, String, FetchTarget)> {
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("https://{}", raw)
        };

        let url = Url::parse(&with_scheme)
            .map_err(|e| FetchError::parse(input, format!("not a valid URL ({})", e)))?;
        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(FetchError::parse(
                input,
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }

        let decoded = url
            .path_segments()
            .map(|s| {
                s.filter(|seg| !seg.is_empty())
                    .map(|seg| decode_segment(input, seg))
                    .collect::<Result<Vec<String>>>()
            })
            .transpose()?
            .unwrap_or_default();
        let segments: Vec<&str> = decoded.iter().map(String::as_str).collect();

        let (owner, repo) = Self::owner_and_repo(input, &segments)?;
        let rest = &segments[2..];

        match rest.first().copied() {
            Some(kind @ ("tree" | "blob")) => {
                let reference = rest.get(1).ok_or_else(|| {
                    FetchError::parse(input, format!("missing reference after /{}/", kind))
                })?;
                let path = rest[2..].join("/");
                let target = if kind == "blob" {
                    if path.is_empty() {
                        return Err(FetchError::parse(input, "missing file path after /blob/<ref>/"));
                    }
                    FetchTarget::File
                } else {
                    FetchTarget::Directory
                };
                Ok((RepoRef::new(owner, repo, *reference), path, target))
            }
            _ => Ok((
                RepoRef::new(owner, repo, default_branch),
                rest.join("/"),
                FetchTarget::Directory,
            )),
        }
    }

    /// Parse `org/repo[@ref][/path]`.
    fn parse_shorthand(
        input: &str,
        shorthand: &str,
        default_branch: &str,
    ) -> Result<(RepoRef, String, FetchTarget)> {
        if let Some((repo_part, rest)) = shorthand.split_once('@') {
            let segments: Vec<&str> = repo_part.split('/').filter(|s| !s.is_empty()).collect();
            if segments.len() != 2 {
                return Err(FetchError::parse(input, "expected github:<owner>/<repo>@<ref>"));
            }
            let (owner, repo) = Self::owner_and_repo(input, &segments)?;
            let (reference, path) = rest.split_once('/').unwrap_or((rest, ""));
            if reference.is_empty() {
                return Err(FetchError::parse(input, "missing reference after '@'"));
            }
            return Ok((
                RepoRef::new(owner, repo, reference),
                normalize_path(path),
                FetchTarget::Directory,
            ));
        }

        let segments: Vec<&str> = shorthand.split('/').filter(|s| !s.is_empty()).collect();
        let (owner, repo) = Self::owner_and_repo(input, &segments)?;
        Ok((
            RepoRef::new(owner, repo, default_branch),
            segments[2..].join("/"),
            FetchTarget::Directory,
        ))
    }

    fn owner_and_repo(input: &str, segments: &[&str]) -> Result<(String, String)> {
        if segments.len() < 2 {
            return Err(FetchError::parse(
                input,
                "expected <owner>/<repo>, e.g. https://github.com/owner/repo",
            ));
        }
        let owner = segments[0];
        let repo = segments[1].strip_suffix(".git").unwrap_or(segments[1]);
        if repo.is_empty() {
            return Err(FetchError::parse(input, "repository name is empty"));
        }
        Ok((owner.to_string(), repo.to_string()))
    }
}

/// Undo the URL's percent-encoding of one path segment.
fn decode_segment(input: &str, segment: &str) -> Result<String> {
    percent_decode_str(segment)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| FetchError::parse(input, format!("path segment '{}' is not valid UTF-8", segment)))
}

/// Strip leading/trailing slashes and empty components.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Base name of a remote path.
pub fn remote_base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
