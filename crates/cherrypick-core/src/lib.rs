//! Cherrypick Core Library
//!
//! Fetches a subtree of files from a GitHub repository and writes it to
//! local disk with relative paths preserved. Downloads run in parallel under
//! one global concurrency cap; failures of individual files are collected
//! instead of aborting the rest of the tree.

pub mod config;
pub mod credentials;
pub mod error;
pub mod fetch;
pub mod gate;
pub mod materialize;
pub mod remote;
pub mod request;
pub mod walker;

/// Re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::config::{BackendKind, ConfigStore, FetchConfig};
    pub use crate::credentials::Credentials;

    // Errors
    pub use crate::error::{FetchError, PartialFailure, PathFailure};

    // Requests
    pub use crate::request::{FetchRequest, FetchTarget, RepoRef};

    // Backends
    pub use crate::remote::{
        CloneBackend, EntryKind, FileContentSource, GitHubApi, RemoteBackend, RemoteEntry,
        RemoteTreeLister, build_backend,
    };

    // Fetching
    pub use crate::fetch::{FetchOptions, FetchReport, Fetcher};
    pub use crate::gate::{ConcurrencyGate, Permit};
    pub use crate::materialize::FileMaterializer;
    pub use crate::walker::{DirectoryWalker, WalkSummary};
}
