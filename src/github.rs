//! Repository metadata fetcher.
//!
//! [`HostingApi`] is the seam to the version-control hosting provider;
//! [`GitHubClient`] implements it against the GitHub REST API.
//!
//! # Retry Strategy
//!
//! All calls are idempotent GETs, so transient failures are retried with
//! exponential backoff up to `github.max_retries` times:
//! - network errors, timeouts and HTTP 5xx → retry
//! - HTTP 404, or 403 without rate-limit headers → [`AnalysisError::NotFound`]
//! - HTTP 429, or 403 with `x-ratelimit-remaining: 0` → [`AnalysisError::RateLimited`]
//!   carrying the `x-ratelimit-reset` time; never retried
//! - other HTTP 4xx → fail immediately

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use crate::config::GithubConfig;
use crate::error::AnalysisError;
use crate::models::{RepoMetadata, TreeEntry};
use crate::repo_ref::RepoRef;

/// Read access to a hosting provider.
#[async_trait]
pub trait HostingApi: Send + Sync {
    async fn repository(&self, repo: &RepoRef) -> Result<RepoMetadata, AnalysisError>;

    /// Flat list of every file (blob) on `branch`.
    async fn file_tree(&self, repo: &RepoRef, branch: &str)
        -> Result<Vec<TreeEntry>, AnalysisError>;

    /// Raw text of one file.
    async fn file_content(
        &self,
        repo: &RepoRef,
        branch: &str,
        path: &str,
    ) -> Result<String, AnalysisError>;
}

/// GitHub REST API client.
pub struct GitHubClient {
    client: reqwest::Client,
    api_url: Url,
    token: Option<String>,
    max_retries: u32,
    retry_base: Duration,
}

#[derive(Deserialize)]
struct RepoResponse {
    full_name: String,
    html_url: String,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    forks_count: u64,
    default_branch: String,
    pushed_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    language: Option<String>,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeItem>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeItem {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    size: Option<u64>,
}

impl GitHubClient {
    /// Builds a client from configuration. The token is read from the
    /// environment variable named by `token_env`, if set.
    pub fn new(config: &GithubConfig) -> anyhow::Result<Self> {
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        let api_url = Url::parse(&config.api_url)
            .map_err(|e| anyhow::anyhow!("invalid github.api_url '{}': {}", config.api_url, e))?;

        Ok(Self {
            client,
            api_url,
            token,
            max_retries: config.max_retries,
            retry_base: Duration::from_millis(500),
        })
    }

    /// Overrides the first backoff delay (doubles per attempt).
    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, AnalysisError> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| AnalysisError::InvalidInput("github.api_url cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base * (1u32 << (attempt - 1).min(5))
    }

    /// GET with retry. `what` names the resource in error messages.
    async fn get(
        &self,
        url: Url,
        accept: &str,
        what: &str,
    ) -> Result<reqwest::Response, AnalysisError> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff(attempt);
                tracing::debug!(%url, attempt, ?delay, "retrying hosting API request");
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .get(url.clone())
                .header(header::ACCEPT, accept)
                .header("X-GitHub-Api-Version", "2022-11-28");
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if let Some(err) = rate_limit_error(status, response.headers()) {
                        tracing::warn!(%url, "hosting API rate limit exceeded");
                        return Err(err);
                    }
                    if status == StatusCode::NOT_FOUND || status == StatusCode::FORBIDDEN {
                        return Err(AnalysisError::NotFound(what.to_string()));
                    }
                    let body = response.text().await.unwrap_or_default();
                    if status.is_server_error() {
                        last_err = Some(AnalysisError::Network(format!(
                            "GitHub API error {}: {}",
                            status,
                            body.trim()
                        )));
                        continue;
                    }
                    return Err(AnalysisError::NotFound(format!(
                        "{} (GitHub API error {}: {})",
                        what,
                        status,
                        body.trim()
                    )));
                }
                Err(e) => {
                    let err = AnalysisError::from(e);
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    tracing::warn!(%url, attempt, error = %err, "hosting API request failed");
                    last_err = Some(err);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| AnalysisError::Network(format!("{}: retries exhausted", what))))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, what: &str) -> Result<T, AnalysisError> {
        let response = self.get(url, "application/vnd.github+json", what).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| AnalysisError::Network(format!("invalid response for {}: {}", what, e)))
    }
}

/// Distinguishes quota exhaustion from other 403/429 responses.
fn rate_limit_error(status: StatusCode, headers: &header::HeaderMap) -> Option<AnalysisError> {
    let remaining = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(str::trim);
    let exhausted = status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN
            && (remaining == Some("0") || headers.contains_key(header::RETRY_AFTER)));
    if !exhausted {
        return None;
    }

    let reset_at = headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0));
    Some(AnalysisError::RateLimited { reset_at })
}

#[async_trait]
impl HostingApi for GitHubClient {
    async fn repository(&self, repo: &RepoRef) -> Result<RepoMetadata, AnalysisError> {
        let url = self.endpoint(&["repos", &repo.owner, &repo.name])?;
        let body: RepoResponse = self.get_json(url, &repo.full_name()).await?;

        // Empty repositories have no pushed_at.
        let pushed_at = body
            .pushed_at
            .or(body.updated_at)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        Ok(RepoMetadata {
            full_name: body.full_name,
            url: body.html_url,
            stars: body.stargazers_count,
            forks: body.forks_count,
            default_branch: body.default_branch,
            pushed_at,
            primary_language: body.language,
        })
    }

    async fn file_tree(
        &self,
        repo: &RepoRef,
        branch: &str,
    ) -> Result<Vec<TreeEntry>, AnalysisError> {
        let mut url = self.endpoint(&["repos", &repo.owner, &repo.name, "git", "trees", branch])?;
        url.query_pairs_mut().append_pair("recursive", "1");
        let what = format!("{} tree at {}", repo.full_name(), branch);
        let body: TreeResponse = self.get_json(url, &what).await?;

        if body.truncated {
            tracing::warn!(repo = %repo, "file tree truncated by the hosting API");
        }

        Ok(body
            .tree
            .into_iter()
            .filter(|item| item.kind == "blob")
            .map(|item| TreeEntry {
                path: item.path,
                size: item.size.unwrap_or(0),
            })
            .collect())
    }

    async fn file_content(
        &self,
        repo: &RepoRef,
        branch: &str,
        path: &str,
    ) -> Result<String, AnalysisError> {
        let mut segments = vec!["repos", repo.owner.as_str(), repo.name.as_str(), "contents"];
        segments.extend(path.split('/').filter(|s| !s.is_empty()));
        let mut url = self.endpoint(&segments)?;
        url.query_pairs_mut().append_pair("ref", branch);

        let what = format!("{}:{}", repo.full_name(), path);
        let response = self.get(url, "application/vnd.github.raw", &what).await?;
        response.text().await.map_err(AnalysisError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> header::HeaderMap {
        let mut map = header::HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, v.parse().unwrap());
        }
        map
    }

    #[test]
    fn forbidden_with_quota_left_is_not_rate_limited() {
        let h = headers(&[("x-ratelimit-remaining", "12")]);
        assert!(rate_limit_error(StatusCode::FORBIDDEN, &h).is_none());
    }

    #[test]
    fn exhausted_quota_reports_reset_time() {
        let h = headers(&[
            ("x-ratelimit-remaining", "0"),
            ("x-ratelimit-reset", "1767225600"),
        ]);
        match rate_limit_error(StatusCode::FORBIDDEN, &h) {
            Some(AnalysisError::RateLimited { reset_at }) => {
                assert_eq!(reset_at.unwrap().timestamp(), 1_767_225_600);
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
    }

    #[test]
    fn too_many_requests_is_always_rate_limited() {
        let err = rate_limit_error(StatusCode::TOO_MANY_REQUESTS, &header::HeaderMap::new());
        assert!(matches!(err, Some(AnalysisError::RateLimited { reset_at: None })));
    }

    #[test]
    fn endpoint_encodes_segments() {
        let config = GithubConfig {
            api_url: "http://localhost:9999/api/".to_string(),
            token_env: "ATLAS_TEST_UNSET_TOKEN".to_string(),
            ..GithubConfig::default()
        };
        let client = GitHubClient::new(&config).unwrap();
        let url = client
            .endpoint(&["repos", "o", "n", "git", "trees", "feature/x"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:9999/api/repos/o/n/git/trees/feature%2Fx"
        );
    }
}
