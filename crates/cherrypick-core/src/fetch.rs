//! Top-level fetch orchestration.
//!
//! A [`Fetcher`] runs [`FetchRequest`]s against one backend. Every request
//! gets its own gate and cancellation token, so parallel requests never
//! share permits.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{DEFAULT_CONCURRENCY, FetchConfig};
use crate::error::{FetchError, Result};
use crate::gate::ConcurrencyGate;
use crate::remote::RemoteBackend;
use crate::request::{FetchRequest, FetchTarget};
use crate::walker::DirectoryWalker;

/// Tuning knobs for a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Maximum concurrent downloads per request.
    pub concurrency: usize,
    /// Deadline for each request; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            timeout: None,
        }
    }
}

impl From<&FetchConfig> for FetchOptions {
    fn from(config: &FetchConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            timeout: config.timeout(),
        }
    }
}

/// Outcome of one successful request.
#[derive(Debug, Clone, Serialize)]
pub struct FetchReport {
    pub request: FetchRequest,
    pub written: Vec<PathBuf>,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Runs fetch requests against a backend.
#[derive(Clone)]
pub struct Fetcher {
    backend: Arc<dyn RemoteBackend>,
    options: FetchOptions,
}

impl Fetcher {
    pub fn new(backend: Arc<dyn RemoteBackend>, options: FetchOptions) -> Self {
        Self { backend, options }
    }

    /// Run one request with a fresh cancellation token.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchReport> {
        self.fetch_with_cancel(request, CancellationToken::new()).await
    }

    /// Run one request; cancelling `cancel` aborts it.
    ///
    /// When a timeout is configured the token is cancelled at the deadline.
    /// Either way the walk winds down fully before this returns, and files
    /// already written are kept.
    pub async fn fetch_with_cancel(
        &self,
        request: &FetchRequest,
        cancel: CancellationToken,
    ) -> Result<FetchReport> {
        let started = Instant::now();
        let _deadline = self.options.timeout.map(|timeout| arm_deadline(timeout, cancel.clone()));

        let gate = ConcurrencyGate::new(self.options.concurrency, cancel);
        let walker = DirectoryWalker::from_backend(Arc::clone(&self.backend), gate);

        tracing::info!(
            "Fetching {} into {}",
            request.repo().describe(request.remote_path()),
            request.local_root().display()
        );

        let written = match request.target() {
            FetchTarget::Directory => {
                walker
                    .walk(request.repo(), request.remote_path(), request.local_root())
                    .await?
                    .written
            }
            FetchTarget::File => vec![
                walker
                    .fetch_file(request.repo(), request.remote_path(), request.local_root())
                    .await?,
            ],
        };

        let elapsed = started.elapsed();
        tracing::info!(
            "Fetched {} file(s) from {} in {:.2?}",
            written.len(),
            request.repo(),
            elapsed
        );

        Ok(FetchReport {
            request: request.clone(),
            written,
            elapsed,
        })
    }

    /// Run several requests, one after another or all at once.
    ///
    /// Results come back in request order.
    pub async fn fetch_all(
        &self,
        requests: &[FetchRequest],
        parallel: bool,
    ) -> Vec<(FetchRequest, Result<FetchReport>)> {
        if !parallel {
            let mut results = Vec::with_capacity(requests.len());
            for request in requests {
                let result = self.fetch(request).await;
                results.push((request.clone(), result));
            }
            return results;
        }

        let handles: Vec<_> = requests
            .iter()
            .cloned()
            .map(|request| {
                let fetcher = self.clone();
                tokio::spawn(async move {
                    let result = fetcher.fetch(&request).await;
                    (request, result)
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (request, handle) in requests.iter().zip(handles) {
            let result = handle.await.unwrap_or_else(|e| {
                (
                    request.clone(),
                    Err(FetchError::Task {
                        message: e.to_string(),
                    }),
                )
            });
            results.push(result);
        }
        results
    }
}

/// Cancels `cancel` after `timeout` unless the returned guard is dropped first.
fn arm_deadline(timeout: Duration, cancel: CancellationToken) -> tokio_util::sync::DropGuard {
    let disarm = CancellationToken::new();
    let guard = disarm.clone().drop_guard();
    tokio::spawn(async move {
        tokio::select! {
            _ = disarm.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!("Deadline of {:?} reached, cancelling", timeout);
                cancel.cancel();
            }
        }
    });
    guard
}
