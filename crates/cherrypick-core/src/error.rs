//! Error types shared by every fetch component.

use std::fmt;
use std::path::PathBuf;

/// Hint shown when a remote resource may be private.
pub const CREDENTIALS_HINT: &str =
    "if this is a private repository, set GITHUB_TOKEN to a token that has access to it";

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, FetchError>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced while listing, downloading or writing remote content.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The remote path or reference does not exist.
    #[error("not found: {target}{}", not_found_hint(.authenticated))]
    NotFound { target: String, authenticated: bool },

    /// Credentials are required or were rejected.
    #[error("authentication failed for {target} (HTTP {status}); {}", CREDENTIALS_HINT)]
    Auth { target: String, status: u16 },

    /// The request never produced a response.
    #[error("transport error for {target}: {source}")]
    Transport {
        target: String,
        #[source]
        source: BoxError,
    },

    /// Any other non-success status.
    #[error("unexpected HTTP {status} from {target}")]
    Status { target: String, status: u16 },

    /// The listing body could not be decoded.
    #[error("malformed listing from {target}: {source}")]
    Decode {
        target: String,
        #[source]
        source: serde_json::Error,
    },

    /// The local clone database could not be read.
    #[error("repository error: {message}")]
    Repository { message: String },

    /// Creating a directory or writing a file failed.
    #[error("filesystem error at {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The user-supplied request could not be understood.
    #[error("invalid request '{input}': {reason}")]
    Parse { input: String, reason: String },

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// The operation was aborted by the caller or a deadline.
    #[error("operation cancelled")]
    Cancelled,

    /// A spawned unit of work panicked.
    #[error("task failed: {message}")]
    Task { message: String },

    /// One or more descendants of a walk failed.
    #[error(transparent)]
    PartialFailure(PartialFailure),
}

fn not_found_hint(authenticated: &bool) -> String {
    if *authenticated {
        String::new()
    } else {
        format!(" ({})", CREDENTIALS_HINT)
    }
}

impl FetchError {
    pub fn transport(target: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Transport {
            target: target.into(),
            source: source.into(),
        }
    }

    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub fn parse(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// True when supplying credentials might fix the failure.
    pub fn is_auth(&self) -> bool {
        match self {
            Self::Auth { .. } => true,
            Self::NotFound { authenticated, .. } => !authenticated,
            _ => false,
        }
    }
}

impl From<git2::Error> for FetchError {
    fn from(err: git2::Error) -> Self {
        Self::Repository {
            message: err.message().to_string(),
        }
    }
}

/// One failed remote path and why it failed.
#[derive(Debug)]
pub struct PathFailure {
    pub path: String,
    pub cause: FetchError,
}

/// Aggregate of every failure collected by a walk.
#[derive(Debug, Default)]
pub struct PartialFailure {
    failures: Vec<PathFailure>,
}

impl PartialFailure {
    pub fn new(failures: Vec<PathFailure>) -> Self {
        Self { failures }
    }

    pub fn failures(&self) -> &[PathFailure] {
        &self.failures
    }

    /// Remote paths that failed, sorted.
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.failures.iter().map(|f| f.path.as_str()).collect();
        paths.sort_unstable();
        paths
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for PartialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} path(s) failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n  {}: {}", failure.path, failure.cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for PartialFailure {}
