//! Cherrypick - fetch directories out of GitHub repositories
//!
//! Usage:
//!   cherrypick https://github.com/org/repo/tree/main/docs
//!   cherrypick url1,url2 --parallel      # several requests at once
//!   cherrypick github:org/repo@v1/src -d out --backend clone

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cherrypick_core::config::{BackendKind, ConfigStore, FetchConfig};
use cherrypick_core::credentials::Credentials;
use cherrypick_core::error::{CREDENTIALS_HINT, FetchError};
use cherrypick_core::fetch::{FetchOptions, FetchReport, Fetcher};
use cherrypick_core::remote::build_backend;
use cherrypick_core::request::FetchRequest;

#[derive(Parser)]
#[command(name = "cherrypick")]
#[command(about = "Fetch directories from GitHub repositories", long_about = None)]
#[command(version)]
struct Cli {
    /// Repository URLs; each argument may hold several, separated by commas
    #[arg(required = true, value_name = "URLS")]
    urls: Vec<String>,

    /// Destination directory [env: CHERRYPICK_DOWNLOAD_DIR]
    #[arg(short, long)]
    dest: Option<PathBuf>,

    /// Maximum concurrent downloads per request
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Branch used when a URL names none
    #[arg(short, long)]
    branch: Option<String>,

    /// How to reach the repository
    #[arg(long)]
    backend: Option<BackendArg>,

    /// Give up on a request after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Run all requests at the same time instead of one after another
    #[arg(long)]
    parallel: bool,

    /// Config file (defaults to ./cherrypick.toml, then the user config dir)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, default_value = "table")]
    format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    /// GitHub REST contents API and raw downloads
    Api,
    /// Bare clone, read locally
    Clone,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Api => BackendKind::Api,
            BackendArg::Clone => BackendKind::Clone,
        }
    }
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable summary
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

/// Exit status when every request succeeded.
const EXIT_OK: u8 = 0;
/// Exit status when at least one request failed.
const EXIT_FAILED: u8 = 1;
/// Exit status when setup failed before any download started.
const EXIT_USAGE: u8 = 2;

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is fine
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cherrypick=info,cherrypick_core=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(e) => {
            eprintln!("Error: Failed to get current directory: {}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    ExitCode::from(run(&cli, &cwd, &|key| std::env::var(key).ok()).await)
}

/// Run every request and print the results, returning the exit status.
async fn run(cli: &Cli, cwd: &Path, lookup: Lookup<'_>) -> u8 {
    let (fetcher, requests) = match prepare(cli, cwd, lookup) {
        Ok(prepared) => prepared,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return EXIT_USAGE;
        }
    };

    let started = Instant::now();
    let results = fetcher.fetch_all(&requests, cli.parallel).await;
    let elapsed = started.elapsed();

    let printed = match cli.format {
        OutputFormat::Table => {
            print_table(&results);
            println!("Time taken to download the directories: {:.2?}", elapsed);
            Ok(())
        }
        OutputFormat::Json => print_json(&results, elapsed),
    };
    if let Err(e) = printed {
        eprintln!("Error: {:#}", e);
        return EXIT_USAGE;
    }

    exit_status(&results)
}

fn exit_status(results: &[(FetchRequest, Result<FetchReport, FetchError>)]) -> u8 {
    if results.iter().all(|(_, r)| r.is_ok()) {
        EXIT_OK
    } else {
        EXIT_FAILED
    }
}

/// Resolve configuration and parse every URL before any download starts.
fn prepare(cli: &Cli, cwd: &Path, lookup: Lookup<'_>) -> Result<(Fetcher, Vec<FetchRequest>)> {
    let config = resolve_config(cli, cwd, lookup)?;
    tracing::debug!("Using config {:?}", config);

    let requests = collect_requests(&cli.urls, &config)?;

    std::fs::create_dir_all(&config.download_dir).with_context(|| {
        format!(
            "Failed to create destination folder {}",
            config.download_dir.display()
        )
    })?;

    let credentials = Credentials::from_lookup(lookup);
    let backend = build_backend(&config, credentials)?;
    let fetcher = Fetcher::new(backend, FetchOptions::from(&config));

    Ok((fetcher, requests))
}

/// Layer config file, then environment, then flags.
fn resolve_config(cli: &Cli, cwd: &Path, lookup: Lookup<'_>) -> Result<FetchConfig> {
    let store = ConfigStore::discover(cli.config.as_deref(), cwd)?;
    let mut config = store
        .load()
        .with_context(|| format!("Failed to load {}", store.config_path().display()))?;
    config.apply_env(lookup)?;

    if let Some(dest) = &cli.dest {
        config.download_dir = dest.clone();
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(branch) = &cli.branch {
        config.default_branch = branch.clone();
    }
    if let Some(backend) = cli.backend {
        config.backend = backend.into();
    }
    if let Some(secs) = cli.timeout {
        config.timeout_secs = Some(secs);
    }
    config.validate()?;
    Ok(config)
}

/// Split comma-separated arguments and parse each URL, failing on the first bad one.
fn collect_requests(urls: &[String], config: &FetchConfig) -> Result<Vec<FetchRequest>> {
    let requests = urls
        .iter()
        .flat_map(|arg| arg.split(','))
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(|url| FetchRequest::parse(url, &config.default_branch, &config.download_dir))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if requests.is_empty() {
        anyhow::bail!("No repository URLs given");
    }
    Ok(requests)
}

fn print_table(results: &[(FetchRequest, Result<FetchReport, FetchError>)]) {
    let mut needs_hint = false;

    for (request, result) in results {
        let label = request.repo().describe(request.remote_path());
        match result {
            Ok(report) => {
                println!(
                    "✓ {} -> {} ({} files, {:.2?})",
                    label,
                    request.local_root().display(),
                    report.written.len(),
                    report.elapsed
                );
            }
            Err(FetchError::PartialFailure(partial)) => {
                println!("✗ {}: {} path(s) failed", label, partial.len());
                for failure in partial.failures() {
                    println!("  {}: {}", failure.path, failure.cause);
                    needs_hint |= failure.cause.is_auth();
                }
            }
            Err(e) => {
                println!("✗ {}: {}", label, e);
                needs_hint |= e.is_auth();
            }
        }
    }

    if needs_hint {
        println!();
        println!("Hint: {}", CREDENTIALS_HINT);
    }
}

fn print_json(
    results: &[(FetchRequest, Result<FetchReport, FetchError>)],
    elapsed: std::time::Duration,
) -> Result<()> {
    let requests: Vec<_> = results
        .iter()
        .map(|(request, result)| match result {
            Ok(report) => serde_json::json!({
                "ok": true,
                "report": report,
            }),
            Err(FetchError::PartialFailure(partial)) => serde_json::json!({
                "request": request,
                "ok": false,
                "error": "partial failure",
                "failures": partial
                    .failures()
                    .iter()
                    .map(|f| serde_json::json!({ "path": f.path, "error": f.cause.to_string() }))
                    .collect::<Vec<_>>(),
            }),
            Err(e) => serde_json::json!({
                "request": request,
                "ok": false,
                "error": e.to_string(),
            }),
        })
        .collect();

    let output = serde_json::json!({
        "requests": requests,
        "elapsed_secs": elapsed.as_secs_f64(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
