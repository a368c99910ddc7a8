//! GitHub REST backend.
//!
//! Listings come from `GET /repos/{owner}/{repo}/contents/{path}?ref={ref}`,
//! file bytes from `raw.githubusercontent.com/{owner}/{repo}/{ref}/{path}`.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use super::{FileContentSource, RemoteEntry, RemoteTreeLister};
use crate::credentials::Credentials;
use crate::error::{FetchError, Result};
use crate::request::RepoRef;

const USER_AGENT: &str = concat!("cherrypick/", env!("CARGO_PKG_VERSION"));
const API_ACCEPT: &str = "application/vnd.github+json";

/// Backend talking to the GitHub REST API and raw-content host.
#[derive(Debug, Clone)]
pub struct GitHubApi {
    client: reqwest::Client,
    api_base: Url,
    raw_base: Url,
    credentials: Credentials,
}

impl GitHubApi {
    pub fn new(api_base: &str, raw_base: &str, credentials: Credentials) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::transport("HTTP client", e))?;

        Ok(Self {
            client,
            api_base: parse_base(api_base)?,
            raw_base: parse_base(raw_base)?,
            credentials,
        })
    }

    /// Public github.com endpoints.
    pub fn github(credentials: Credentials) -> Result<Self> {
        Self::new(
            "https://api.github.com",
            "https://raw.githubusercontent.com",
            credentials,
        )
    }

    /// URL of the contents listing for `path`.
    pub fn contents_url(&self, repo: &RepoRef, path: &str) -> Result<Url> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::Config(format!("invalid API base URL: {}", self.api_base)))?
            .pop_if_empty()
            .extend(["repos", repo.owner.as_str(), repo.repo.as_str(), "contents"])
            .extend(path_segments(path));
        url.query_pairs_mut().append_pair("ref", &repo.reference);
        Ok(url)
    }

    /// URL of the raw bytes of `path`.
    pub fn raw_url(&self, repo: &RepoRef, path: &str) -> Result<Url> {
        let mut url = self.raw_base.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::Config(format!("invalid raw base URL: {}", self.raw_base)))?
            .pop_if_empty()
            .extend([repo.owner.as_str(), repo.repo.as_str()])
            .extend(path_segments(&repo.reference))
            .extend(path_segments(path));
        Ok(url)
    }

    async fn get(&self, url: Url, accept: Option<&str>, target: String) -> Result<Vec<u8>> {
        tracing::debug!("GET {}", url);

        let mut request = self.client.get(url);
        if let Some(accept) = accept {
            request = request.header(reqwest::header::ACCEPT, accept);
        }
        let response = self
            .credentials
            .apply(request)
            .send()
            .await
            .map_err(|e| FetchError::transport(target.clone(), e))?;

        if let Some(err) = classify_status(response.status(), &target, self.credentials.is_present()) {
            return Err(err);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::transport(target, e))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl RemoteTreeLister for GitHubApi {
    async fn list(&self, repo: &RepoRef, path: &str) -> Result<Vec<RemoteEntry>> {
        let target = repo.describe(path);
        let url = self.contents_url(repo, path)?;
        let body = self.get(url, Some(API_ACCEPT), target.clone()).await?;
        parse_listing(&body, &target)
    }
}

#[async_trait]
impl FileContentSource for GitHubApi {
    async fn fetch(&self, repo: &RepoRef, path: &str) -> Result<Vec<u8>> {
        let url = self.raw_url(repo, path)?;
        self.get(url, None, repo.describe(path)).await
    }
}

fn parse_base(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| FetchError::Config(format!("invalid base URL '{}': {}", raw, e)))?;
    if url.cannot_be_a_base() {
        return Err(FetchError::Config(format!("invalid base URL '{}'", raw)));
    }
    Ok(url)
}

fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Map a response status to an error, or `None` on success.
pub(crate) fn classify_status(
    status: StatusCode,
    target: &str,
    authenticated: bool,
) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }
    let err = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::Auth {
            target: target.to_string(),
            status: status.as_u16(),
        },
        StatusCode::NOT_FOUND => FetchError::NotFound {
            target: target.to_string(),
            authenticated,
        },
        _ => FetchError::Status {
            target: target.to_string(),
            status: status.as_u16(),
        },
    };
    Some(err)
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: ContentKind,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ContentKind {
    File,
    Dir,
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContentsBody {
    Listing(Vec<ContentItem>),
    Single(ContentItem),
}

/// Decode a contents response into entries.
///
/// A path naming a single file yields one object instead of an array.
/// Symlinks and submodules are skipped.
pub(crate) fn parse_listing(body: &[u8], target: &str) -> Result<Vec<RemoteEntry>> {
    let parsed: ContentsBody = serde_json::from_slice(body).map_err(|source| FetchError::Decode {
        target: target.to_string(),
        source,
    })?;

    let items = match parsed {
        ContentsBody::Listing(items) => items,
        ContentsBody::Single(item) => vec![item],
    };

    let entries = items
        .into_iter()
        .filter_map(|item| match item.kind {
            ContentKind::File => Some(RemoteEntry::file(item.name, item.path)),
            ContentKind::Dir => Some(RemoteEntry::directory(item.name, item.path)),
            ContentKind::Other => {
                tracing::debug!("Skipping unsupported entry: {}", item.path);
                None
            }
        })
        .collect();
    Ok(entries)
}
