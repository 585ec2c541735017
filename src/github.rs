use reqwest::StatusCode;
use serde::Deserialize;
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::identifier::RepoIdentifier;

// === Errors ===

/// Failures talking to the GitHub REST API.
///
/// The display strings are shown to users as-is.
#[derive(Debug, Error)]
pub enum GitHubError {
    /// GitHub answered with a non-success status (usually 404 for a repo that does not exist)
    #[error("Invalid GitHub URL specified.")]
    RemoteUnavailable { status: StatusCode },

    /// The request never got an answer
    #[error("Could not reach GitHub: {0}")]
    Unreachable(#[source] reqwest::Error),

    /// Success status but the body is not JSON of the expected shape
    #[error("GitHub responded with invalid JSON.")]
    MalformedResponse,

    /// Success status but the body decodes to nothing (`[]`, `{}`, `null`, ...)
    #[error("GitHub responded with empty JSON.")]
    EmptyResponse,

    /// Statistics were still being computed after every polling attempt
    #[error("GitHub still generating data, try again later.")]
    StillGenerating,
}

// === Configuration ===

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Connection and polling settings for [`GitHubClient`]
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub api_base: String,
    pub token: Option<String>,
    /// Total attempts against an endpoint that answers 202
    pub poll_attempts: u32,
    /// Fixed wait before the second and later attempts
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            token: None,
            poll_attempts: 3,
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
        }
    }
}

// === Wire types ===

/// One entry of `GET /repos/{owner}/{repo}/commits`
///
/// Every field is optional: GitHub sends `"author": null` for commits whose
/// email is not linked to an account.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Commit {
    #[serde(default)]
    pub commit: Option<CommitDetail>,
    #[serde(default)]
    pub author: Option<CommitAuthor>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommitDetail {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommitAuthor {
    #[serde(default)]
    pub login: Option<String>,
}

impl Commit {
    pub fn message(&self) -> Option<&str> {
        self.commit.as_ref()?.message.as_deref()
    }

    pub fn author_login(&self) -> Option<&str> {
        self.author.as_ref()?.login.as_deref()
    }
}

/// One entry of `GET /repos/{owner}/{repo}/stats/contributors`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContributorStats {
    #[serde(default)]
    pub weeks: Option<Vec<WeeklyStats>>,
}

/// `a` = additions, `d` = deletions for one week
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WeeklyStats {
    #[serde(default)]
    pub a: Option<i64>,
    #[serde(default)]
    pub d: Option<i64>,
}

impl WeeklyStats {
    pub fn additions(&self) -> i64 {
        self.a.unwrap_or(0)
    }

    pub fn deletions(&self) -> i64 {
        self.d.unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    resources: RateLimitResources,
}

#[derive(Debug, Deserialize)]
pub struct RateLimitResources {
    pub core: RateLimit,
}

#[derive(Debug, Deserialize)]
pub struct RateLimit {
    pub limit: u32,
    pub remaining: u32,
    pub reset: u64,
}

// === Polling ===

/// Outcome of one request against an endpoint that computes asynchronously
#[derive(Debug)]
pub enum Generation<T> {
    Ready(T),
    StillComputing,
}

/// Run `operation` until it is ready, at most `attempts` times.
///
/// `delay` runs before every attempt except the first. Exhausting the
/// attempts yields [`GitHubError::StillGenerating`]; any error from
/// `operation` stops polling immediately.
pub async fn poll_until_ready<T, F, Fut, D, DFut>(
    attempts: u32,
    mut operation: F,
    mut delay: D,
) -> Result<T, GitHubError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Generation<T>, GitHubError>>,
    D: FnMut() -> DFut,
    DFut: Future<Output = ()>,
{
    for attempt in 0..attempts {
        if attempt > 0 {
            delay().await;
        }

        match operation().await? {
            Generation::Ready(value) => return Ok(value),
            Generation::StillComputing => {
                debug!(attempt = attempt + 1, attempts, "statistics still computing");
            }
        }
    }

    Err(GitHubError::StillGenerating)
}

// === Client ===

/// GitHub REST client for the two endpoints we summarize
#[derive(Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    config: GitHubConfig,
}

impl GitHubClient {
    pub fn new(config: GitHubConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("github-status/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;

        Ok(Self { client, config })
    }

    fn endpoint(&self, repo: &RepoIdentifier, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            repo.owner(),
            repo.project(),
            path
        )
    }

    /// Build REST request with auth header if token available
    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.get(url);
        if let Some(token) = &self.config.token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }
        req.header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    /// Send a GET and log its timing
    async fn send_request(&self, url: &str) -> Result<reqwest::Response, GitHubError> {
        let start = Instant::now();
        let result = self.request(url).send().await;

        match &result {
            Ok(response) => debug!(
                %url,
                status = response.status().as_u16(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "GET"
            ),
            Err(e) => warn!(%url, error = %e, "GET failed"),
        }

        result.map_err(GitHubError::Unreachable)
    }

    /// Latest page of commits, newest first
    pub async fn fetch_commit_page(&self, repo: &RepoIdentifier) -> Result<Vec<Commit>, GitHubError> {
        let url = self.endpoint(repo, "commits");
        let response = self.send_request(&url).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GitHubError::RemoteUnavailable { status });
        }

        decode_list(response).await
    }

    /// Per-contributor weekly statistics, polling while GitHub computes them
    pub async fn fetch_contributor_stats(
        &self,
        repo: &RepoIdentifier,
    ) -> Result<Vec<ContributorStats>, GitHubError> {
        let url = self.endpoint(repo, "stats/contributors");
        let url = url.as_str();
        let interval = self.config.poll_interval;

        poll_until_ready(
            self.config.poll_attempts,
            move || self.contributor_stats_attempt(url),
            move || tokio::time::sleep(interval),
        )
        .await
    }

    async fn contributor_stats_attempt(
        &self,
        url: &str,
    ) -> Result<Generation<Vec<ContributorStats>>, GitHubError> {
        let response = self.send_request(url).await?;

        let status = response.status();
        if status == StatusCode::ACCEPTED {
            return Ok(Generation::StillComputing);
        }
        if !status.is_success() {
            return Err(GitHubError::RemoteUnavailable { status });
        }

        decode_list(response).await.map(Generation::Ready)
    }

    /// Check the REST rate limit for the configured token
    pub async fn rate_limit(&self) -> Result<RateLimitResources, GitHubError> {
        let url = format!("{}/rate_limit", self.config.api_base.trim_end_matches('/'));
        let response = self.send_request(&url).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GitHubError::RemoteUnavailable { status });
        }

        let data: RateLimitResponse = response
            .json()
            .await
            .map_err(|_| GitHubError::MalformedResponse)?;
        Ok(data.resources)
    }
}

/// Whether a JSON document counts as "nothing" (Python-style falsiness)
fn is_empty_json(value: &serde_json::Value) -> bool {
    use serde_json::Value;
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Decode a successful response body into a non-empty list
async fn decode_list<T>(response: reqwest::Response) -> Result<Vec<T>, GitHubError>
where
    T: serde::de::DeserializeOwned,
{
    let body = response.text().await.map_err(GitHubError::Unreachable)?;
    parse_list(&body)
}

fn parse_list<T>(body: &str) -> Result<Vec<T>, GitHubError>
where
    T: serde::de::DeserializeOwned,
{
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|_| GitHubError::MalformedResponse)?;

    if is_empty_json(&value) {
        return Err(GitHubError::EmptyResponse);
    }

    serde_json::from_value(value).map_err(|_| GitHubError::MalformedResponse)
}
