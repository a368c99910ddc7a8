//! In-memory backend that records how it was called.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cherrypick_core::error::{FetchError, Result};
use cherrypick_core::remote::{FileContentSource, RemoteEntry, RemoteTreeLister};
use cherrypick_core::request::RepoRef;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct MemoryBackend {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    panicking: BTreeSet<String>,
    failing_fetches: HashMap<String, u16>,
    failing_lists: HashMap<String, u16>,
    delay: Duration,
    cancel_after: Option<(usize, CancellationToken)>,
    watch: Option<CancellationToken>,

    in_flight: AtomicUsize,
    peak: AtomicUsize,
    list_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    calls_after_cancel: AtomicUsize,
    fetched: Mutex<Vec<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, path: &str, content: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.to_string(), content.into());
        self
    }

    /// Declare a directory, which may stay empty.
    pub fn dir(mut self, path: &str) -> Self {
        self.dirs.insert(path.to_string());
        self
    }

    /// Make fetching `path` panic.
    pub fn panic_fetch(mut self, path: &str) -> Self {
        self.panicking.insert(path.to_string());
        self
    }

    /// Make fetching `path` fail with an HTTP-like status.
    pub fn fail_fetch(mut self, path: &str, status: u16) -> Self {
        self.failing_fetches.insert(path.to_string(), status);
        self
    }

    /// Make listing `path` fail with an HTTP-like status.
    pub fn fail_list(mut self, path: &str, status: u16) -> Self {
        self.failing_lists.insert(path.to_string(), status);
        self
    }

    /// Hold every fetch for `delay` so concurrent downloads overlap.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Cancel `token` from inside the `n`th fetch.
    pub fn cancel_after(mut self, n: usize, token: CancellationToken) -> Self {
        self.watch = Some(token.clone());
        self.cancel_after = Some((n, token));
        self
    }

    /// Count calls that start after `token` is cancelled.
    pub fn watch(mut self, token: CancellationToken) -> Self {
        self.watch = Some(token);
        self
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn calls_after_cancel(&self) -> usize {
        self.calls_after_cancel.load(Ordering::SeqCst)
    }

    pub fn fetched(&self) -> Vec<String> {
        let mut fetched = self.fetched.lock().unwrap().clone();
        fetched.sort();
        fetched
    }

    /// Remote files below `root`, with `root/` stripped.
    pub fn files_under(&self, root: &str) -> BTreeMap<String, Vec<u8>> {
        self.files
            .iter()
            .filter_map(|(path, content)| {
                let rel = if root.is_empty() {
                    Some(path.as_str())
                } else {
                    path.strip_prefix(root).and_then(|r| r.strip_prefix('/'))
                };
                rel.map(|r| (r.to_string(), content.clone()))
            })
            .collect()
    }

    fn note_call(&self) {
        if let Some(token) = &self.watch
            && token.is_cancelled()
        {
            self.calls_after_cancel.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_dir(&self, path: &str) -> bool {
        if path.is_empty() {
            return true;
        }
        let prefix = format!("{}/", path);
        self.dirs.contains(path)
            || self.files.keys().chain(&self.dirs).any(|f| f.starts_with(&prefix))
    }
}

fn status_error(repo: &RepoRef, path: &str, status: u16) -> FetchError {
    let target = repo.describe(path);
    match status {
        404 => FetchError::NotFound {
            target,
            authenticated: false,
        },
        401 | 403 => FetchError::Auth { target, status },
        _ => FetchError::Status { target, status },
    }
}

#[async_trait]
impl RemoteTreeLister for MemoryBackend {
    async fn list(&self, repo: &RepoRef, path: &str) -> Result<Vec<RemoteEntry>> {
        self.note_call();
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(status) = self.failing_lists.get(path) {
            return Err(status_error(repo, path, *status));
        }
        if self.files.contains_key(path) {
            let name = path.rsplit('/').next().unwrap_or(path);
            return Ok(vec![RemoteEntry::file(name, path)]);
        }
        if !self.is_dir(path) {
            return Err(status_error(repo, path, 404));
        }

        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        };
        let mut files = BTreeSet::new();
        let mut dirs = BTreeSet::new();
        for key in self.files.keys() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    dirs.insert(dir.to_string());
                }
                None => {
                    files.insert(rest.to_string());
                }
            }
        }
        for key in &self.dirs {
            if let Some(rest) = key.strip_prefix(&prefix) {
                let dir = rest.split_once('/').map_or(rest, |(dir, _)| dir);
                dirs.insert(dir.to_string());
            }
        }

        let mut entries: Vec<RemoteEntry> = files
            .into_iter()
            .map(|name| RemoteEntry::file(name.clone(), format!("{}{}", prefix, name)))
            .collect();
        entries.extend(
            dirs.into_iter()
                .map(|name| RemoteEntry::directory(name.clone(), format!("{}{}", prefix, name))),
        );
        Ok(entries)
    }
}

#[async_trait]
impl FileContentSource for MemoryBackend {
    async fn fetch(&self, repo: &RepoRef, path: &str) -> Result<Vec<u8>> {
        self.note_call();
        let call = self.fetch_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some((n, token)) = &self.cancel_after
            && call == *n
        {
            token.cancel();
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.fetched.lock().unwrap().push(path.to_string());

        if self.panicking.contains(path) {
            panic!("fetch of {} blew up", path);
        }
        if let Some(status) = self.failing_fetches.get(path) {
            return Err(status_error(repo, path, *status));
        }
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| status_error(repo, path, 404))
    }
}
