//! Directory walk tests against the in-memory backend.

mod support;

use std::sync::Arc;
use std::time::Duration;

use cherrypick_core::error::FetchError;
use cherrypick_core::gate::ConcurrencyGate;
use cherrypick_core::request::RepoRef;
use cherrypick_core::walker::DirectoryWalker;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use support::memory::MemoryBackend;
use support::read_tree;

fn repo() -> RepoRef {
    RepoRef::new("octo", "hello", "main")
}

fn docs_tree() -> MemoryBackend {
    MemoryBackend::new()
        .file("docs/a.md", "# A")
        .file("docs/b.md", "# B")
        .file("docs/sub/c.md", "# C")
        .file("README.md", "outside the requested root")
}

fn walker(backend: &Arc<MemoryBackend>, capacity: usize) -> DirectoryWalker {
    DirectoryWalker::from_backend(
        backend.clone(),
        ConcurrencyGate::new(capacity, CancellationToken::new()),
    )
}

/// A tree with a deep chain plus wide directories.
fn mixed_tree(width: usize, depth: usize) -> MemoryBackend {
    let mut backend = MemoryBackend::new();
    let mut dir = String::from("root");
    for level in 0..depth {
        for i in 0..width {
            backend = backend.file(&format!("{}/f{}.txt", dir, i), format!("{}:{}", level, i));
        }
        backend = backend.file(&format!("{}/wide{}/only.txt", dir, level), "leaf");
        dir = format!("{}/d{}", dir, level);
    }
    backend.file(&format!("{}/bottom.txt", dir), "bottom")
}

// =========================================================================
// Layout
// =========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn docs_example_is_mirrored() {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("out");
    let backend = Arc::new(docs_tree());

    let summary = walker(&backend, 50)
        .walk(&repo(), "docs", &out)
        .await
        .expect("walk should succeed");

    assert_eq!(summary.written.len(), 3);
    let tree = read_tree(&out);
    assert_eq!(tree.keys().collect::<Vec<_>>(), vec!["a.md", "b.md", "sub/c.md"]);
    assert_eq!(tree["sub/c.md"], b"# C");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn local_layout_matches_remote_tree() {
    for (width, depth) in [(1, 0), (1, 1), (3, 4), (12, 2), (1, 9)] {
        let temp = TempDir::new().unwrap();
        let backend = Arc::new(mixed_tree(width, depth));

        walker(&backend, 4)
            .walk(&repo(), "root", temp.path())
            .await
            .unwrap_or_else(|e| panic!("width {} depth {}: {}", width, depth, e));

        assert_eq!(
            read_tree(temp.path()),
            backend.files_under("root"),
            "width {} depth {}",
            width,
            depth
        );
    }
}

#[tokio::test]
async fn walking_repository_root() {
    let temp = TempDir::new().unwrap();
    let backend = Arc::new(docs_tree());

    walker(&backend, 2).walk(&repo(), "", temp.path()).await.unwrap();

    assert_eq!(read_tree(temp.path()), backend.files_under(""));
}

#[tokio::test]
async fn rerun_overwrites_with_identical_content() {
    let temp = TempDir::new().unwrap();
    let backend = Arc::new(mixed_tree(4, 3));

    walker(&backend, 8).walk(&repo(), "root", temp.path()).await.unwrap();
    let first = read_tree(temp.path());
    walker(&backend, 8).walk(&repo(), "root", temp.path()).await.unwrap();
    let second = read_tree(temp.path());

    assert_eq!(first, second);
    assert_eq!(backend.fetch_calls(), 2 * first.len());
}

// =========================================================================
// Concurrency
// =========================================================================

#[tokio::test]
async fn empty_remote_directories_are_created() {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("out");
    let backend = Arc::new(docs_tree().dir("docs/empty").dir("docs/sub/deeper"));

    let summary = walker(&backend, 4).walk(&repo(), "docs", &out).await.unwrap();

    assert_eq!(summary.written.len(), 3);
    assert!(out.join("empty").is_dir());
    assert!(out.join("sub").join("deeper").is_dir());
    assert_eq!(std::fs::read_dir(out.join("empty")).unwrap().count(), 0);
}

#[tokio::test]
async fn empty_requested_root_still_creates_destination() {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("nothing");
    let backend = Arc::new(MemoryBackend::new().dir("blank"));

    let summary = walker(&backend, 4).walk(&repo(), "blank", &out).await.unwrap();

    assert!(summary.written.is_empty());
    assert!(out.is_dir());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn downloads_in_flight_never_exceed_capacity() {
    for capacity in [1, 2, 5, 16] {
        let temp = TempDir::new().unwrap();
        let backend = Arc::new(mixed_tree(10, 4).delay(Duration::from_millis(3)));

        walker(&backend, capacity)
            .walk(&repo(), "root", temp.path())
            .await
            .unwrap();

        let peak = backend.peak_in_flight();
        assert!(peak <= capacity, "capacity {} but saw {}", capacity, peak);
        assert!(peak >= 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn downloads_overlap_when_capacity_allows() {
    let temp = TempDir::new().unwrap();
    let mut backend = MemoryBackend::new().delay(Duration::from_millis(50));
    for i in 0..8 {
        backend = backend.file(&format!("flat/{}.txt", i), "x");
    }
    let backend = Arc::new(backend);

    walker(&backend, 8).walk(&repo(), "flat", temp.path()).await.unwrap();

    assert!(backend.peak_in_flight() > 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gate_is_fully_released_after_walk_with_failures() {
    let temp = TempDir::new().unwrap();
    let backend = Arc::new(docs_tree().fail_fetch("docs/b.md", 500));
    let walker = walker(&backend, 3);

    let _ = walker.walk(&repo(), "docs", temp.path()).await;

    assert_eq!(walker.gate().available(), 3);
}

// =========================================================================
// Failure Isolation
// =========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_missing_file_is_reported_and_siblings_written() {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("out");
    let backend = Arc::new(docs_tree().fail_fetch("docs/b.md", 404));

    let err = walker(&backend, 50)
        .walk(&repo(), "docs", &out)
        .await
        .unwrap_err();

    let FetchError::PartialFailure(partial) = err else {
        panic!("expected partial failure, got {}", err);
    };
    assert_eq!(partial.paths(), vec!["docs/b.md"]);
    assert!(matches!(
        partial.failures()[0].cause,
        FetchError::NotFound { .. }
    ));
    assert!(out.join("a.md").exists());
    assert!(out.join("sub").join("c.md").exists());
    assert!(!out.join("b.md").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn panicking_download_is_recorded_as_task_failure() {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("out");
    let backend = Arc::new(docs_tree().panic_fetch("docs/sub/c.md"));
    let walker = walker(&backend, 2);

    let err = walker.walk(&repo(), "docs", &out).await.unwrap_err();

    let FetchError::PartialFailure(partial) = err else {
        panic!("expected partial failure, got {}", err);
    };
    assert_eq!(partial.paths(), vec!["docs/sub/c.md"]);
    assert!(matches!(partial.failures()[0].cause, FetchError::Task { .. }));
    assert!(out.join("a.md").exists());
    assert!(out.join("b.md").exists());
    assert_eq!(walker.gate().available(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_failure_among_many_siblings() {
    let temp = TempDir::new().unwrap();
    let mut backend = MemoryBackend::new();
    for i in 0..25 {
        backend = backend.file(&format!("many/{:02}.txt", i), format!("{}", i));
    }
    let backend = Arc::new(backend.fail_fetch("many/13.txt", 503));

    let err = walker(&backend, 4)
        .walk(&repo(), "many", temp.path())
        .await
        .unwrap_err();

    let FetchError::PartialFailure(partial) = err else {
        panic!("expected partial failure, got {}", err);
    };
    assert_eq!(partial.paths(), vec!["many/13.txt"]);
    assert_eq!(read_tree(temp.path()).len(), 24);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failures_from_every_depth_are_aggregated() {
    let temp = TempDir::new().unwrap();
    let backend = Arc::new(
        mixed_tree(2, 3)
            .fail_fetch("root/f0.txt", 500)
            .fail_fetch("root/d0/d1/f1.txt", 404)
            .fail_list("root/d0/wide1", 403),
    );

    let err = walker(&backend, 4)
        .walk(&repo(), "root", temp.path())
        .await
        .unwrap_err();

    let FetchError::PartialFailure(partial) = err else {
        panic!("expected partial failure, got {}", err);
    };
    assert_eq!(
        partial.paths(),
        vec!["root/d0/d1/f1.txt", "root/d0/wide1", "root/f0.txt"]
    );
    let auth = partial
        .failures()
        .iter()
        .find(|f| f.path == "root/d0/wide1")
        .unwrap();
    assert!(auth.cause.is_auth());
    assert!(temp.path().join("d0").join("f0.txt").exists());
}

#[tokio::test]
async fn root_listing_failure_is_returned_directly() {
    let temp = TempDir::new().unwrap();
    let backend = Arc::new(docs_tree());

    let err = walker(&backend, 4)
        .walk(&repo(), "does/not/exist", temp.path())
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::NotFound { .. }));
    assert_eq!(backend.fetch_calls(), 0);
    assert!(read_tree(temp.path()).is_empty());
}

#[tokio::test]
async fn unsafe_entry_names_are_not_written() {
    use async_trait::async_trait;
    use cherrypick_core::remote::{FileContentSource, RemoteEntry, RemoteTreeLister};

    struct Hostile;

    #[async_trait]
    impl RemoteTreeLister for Hostile {
        async fn list(
            &self,
            _repo: &RepoRef,
            path: &str,
        ) -> cherrypick_core::error::Result<Vec<RemoteEntry>> {
            assert_eq!(path, "docs");
            Ok(vec![
                RemoteEntry::directory("..", "docs/.."),
                RemoteEntry::file("ok.md", "docs/ok.md"),
            ])
        }
    }

    #[async_trait]
    impl FileContentSource for Hostile {
        async fn fetch(&self, _repo: &RepoRef, _path: &str) -> cherrypick_core::error::Result<Vec<u8>> {
            Ok(b"ok".to_vec())
        }
    }

    let temp = TempDir::new().unwrap();
    let out = temp.path().join("out");
    let walker = DirectoryWalker::from_backend(
        Arc::new(Hostile),
        ConcurrencyGate::new(2, CancellationToken::new()),
    );

    let err = walker.walk(&repo(), "docs", &out).await.unwrap_err();

    let FetchError::PartialFailure(partial) = err else {
        panic!("expected partial failure, got {}", err);
    };
    assert_eq!(partial.paths(), vec!["docs/.."]);
    assert!(out.join("ok.md").exists());
}

// =========================================================================
// Cancellation
// =========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_mid_walk_stops_new_downloads() {
    let temp = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let mut backend = MemoryBackend::new().delay(Duration::from_millis(2));
    for i in 0..30 {
        backend = backend.file(&format!("flat/{:02}.txt", i), "x");
    }
    let backend = Arc::new(backend.cancel_after(3, cancel.clone()));
    let walker =
        DirectoryWalker::from_backend(backend.clone(), ConcurrencyGate::new(1, cancel.clone()));

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        walker.walk(&repo(), "flat", temp.path()),
    )
    .await
    .expect("walk did not stop after cancellation");

    assert!(matches!(result, Err(FetchError::Cancelled)));
    assert_eq!(backend.fetch_calls(), 3);
    assert_eq!(backend.calls_after_cancel(), 0);
    assert_eq!(read_tree(temp.path()).len(), 2, "files written before cancel are kept");
}

#[tokio::test]
async fn cancelled_before_start_issues_no_calls() {
    let temp = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let backend = Arc::new(docs_tree());
    let walker = DirectoryWalker::from_backend(backend.clone(), ConcurrencyGate::new(4, cancel));

    let err = walker.walk(&repo(), "docs", temp.path()).await.unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(backend.list_calls(), 0);
    assert_eq!(backend.fetch_calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_overrides_partial_failures() {
    let temp = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let mut backend = MemoryBackend::new();
    for i in 0..10 {
        backend = backend.file(&format!("flat/{}.txt", i), "x");
    }
    let backend = Arc::new(
        backend
            .fail_fetch("flat/0.txt", 404)
            .cancel_after(2, cancel.clone()),
    );
    let walker = DirectoryWalker::from_backend(backend.clone(), ConcurrencyGate::new(1, cancel));

    let err = walker.walk(&repo(), "flat", temp.path()).await.unwrap_err();

    assert!(err.is_cancelled(), "got {}", err);
}
