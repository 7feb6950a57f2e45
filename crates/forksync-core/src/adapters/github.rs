//! GitHub REST adapter for the issue tracker, activity and contribution ports.
//!
//! The token is only ever passed to `bearer_auth()`; it is never logged or
//! included in error messages.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use forksync_state::TrackedRepository;
use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::ports::{
    ActivitySource, AuthoredItem, AuthoredPage, CiSignal, ContributionSource, IssueCandidate,
    IssueIdentity, IssuePage, IssueTracker, RepoActivity,
};
use crate::provider::{ProviderError, RateLimitInfo};

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const USER_AGENT: &str = "forksync";
const PER_PAGE: usize = 50;

pub struct GitHubClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl GitHubClient {
    pub fn new(token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_API_URL.to_string(),
            token,
        }
    }

    /// Point at a GitHub Enterprise or test server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let mut request = self.client.get(format!("{}{}", self.base_url, path));
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }
        request
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ProviderError> {
        let response = request.send().await.map_err(transport_error)?;
        check_status(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let response = self.send(self.get(path)).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("GET {path}: {e}")))
    }
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Network(format!("request timed out: {err}"))
    } else if err.is_decode() {
        ProviderError::Malformed(err.to_string())
    } else {
        ProviderError::Network(err.to_string())
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// `x-ratelimit-remaining` / `x-ratelimit-reset` as reported quota.
fn rate_limit_info(headers: &HeaderMap) -> Option<RateLimitInfo> {
    let remaining = header_u64(headers, "x-ratelimit-remaining")?;
    let reset = header_u64(headers, "x-ratelimit-reset")?;
    let reset_at = Utc.timestamp_opt(i64::try_from(reset).ok()?, 0).single()?;
    Some(RateLimitInfo {
        remaining: u32::try_from(remaining).unwrap_or(u32::MAX),
        reset_at,
    })
}

/// When a limited response says we may try again.
fn rate_limit_reset(headers: &HeaderMap, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if let Some(secs) = header_u64(headers, "retry-after") {
        return Some(now + ChronoDuration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 2)));
    }
    match rate_limit_info(headers) {
        Some(info) if info.remaining == 0 => Some(info.reset_at),
        _ => None,
    }
}

/// Map a non-success status to the provider taxonomy.
fn status_error(status: StatusCode, headers: &HeaderMap, body: &str) -> ProviderError {
    let message = serde_json::from_str::<ApiMessage>(body)
        .map(|m| m.message)
        .unwrap_or_else(|_| body.chars().take(200).collect());

    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN {
        if let Some(reset_at) = rate_limit_reset(headers, Utc::now()) {
            return ProviderError::RateLimited { reset_at };
        }
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Authentication(message),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
            reset_at: Utc::now() + ChronoDuration::seconds(60),
        },
        s if s.is_server_error() => ProviderError::Server {
            status: s.as_u16(),
            message,
        },
        s => ProviderError::Rejected {
            status: s.as_u16(),
            message,
        },
    }
}

async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let headers = response.headers().clone();
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &headers, &body))
}

/// `owner/repo` from an https or ssh GitHub URL.
pub fn owner_and_repo(url: &str) -> Result<(String, String), ProviderError> {
    let trimmed = url.trim().trim_end_matches('/');
    let path = if let Some(rest) = trimmed.strip_prefix("git@") {
        rest.split_once(':').map(|(_, p)| p)
    } else {
        trimmed
            .split_once("://")
            .and_then(|(_, rest)| rest.split_once('/'))
            .map(|(_, p)| p)
    };
    let path = path
        .map(|p| p.trim_end_matches(".git"))
        .ok_or_else(|| ProviderError::Operation(format!("not a GitHub URL: {url}")))?;
    let mut parts = path.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(repo), None) if !owner.is_empty() && !repo.is_empty() => {
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(ProviderError::Operation(format!(
            "cannot parse owner/repo from {url}"
        ))),
    }
}

#[derive(Deserialize)]
struct ApiMessage {
    message: String,
}

#[derive(Deserialize)]
struct ApiLabel {
    name: String,
}

#[derive(Deserialize)]
struct ApiIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<ApiLabel>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    closed_at: Option<DateTime<Utc>>,
    html_url: String,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Deserialize, Default)]
struct ApiReactions {
    #[serde(default)]
    total_count: u32,
}

#[derive(Deserialize)]
struct ApiPullRef {
    #[serde(default)]
    merged_at: Option<DateTime<Utc>>,
}

/// One hit from `/search/issues`.
#[derive(Deserialize)]
struct ApiSearchItem {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<ApiLabel>,
    state: String,
    #[serde(default)]
    comments: u32,
    #[serde(default)]
    reactions: ApiReactions,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    html_url: String,
    /// `https://api.github.com/repos/{owner}/{name}`
    repository_url: String,
    #[serde(default)]
    pull_request: Option<ApiPullRef>,
}

#[derive(Deserialize)]
struct ApiSearchResults {
    items: Vec<ApiSearchItem>,
}

#[derive(Deserialize)]
struct ApiRepository {
    #[serde(default)]
    pushed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    open_issues_count: u32,
}

#[derive(Deserialize)]
struct ApiCombinedStatus {
    state: String,
    #[serde(default)]
    total_count: u32,
}

fn to_candidate(full_name: &str, issue: ApiIssue) -> IssueCandidate {
    IssueCandidate {
        identity: IssueIdentity::new(full_name, issue.number),
        title: issue.title,
        labels: issue.labels.into_iter().map(|l| l.name).collect::<BTreeSet<_>>(),
        created_at: issue.created_at,
        updated_at: issue.updated_at,
        body: issue.body.unwrap_or_default(),
        url: Some(issue.html_url),
    }
}

fn to_authored(item: ApiSearchItem) -> Result<AuthoredItem, ProviderError> {
    let mut segments = item.repository_url.trim_end_matches('/').rsplit('/');
    let repo = match (segments.next(), segments.next()) {
        (Some(name), Some(owner)) if !name.is_empty() && !owner.is_empty() => {
            format!("{owner}/{name}")
        }
        _ => {
            return Err(ProviderError::Malformed(format!(
                "search hit without repository: {}",
                item.repository_url
            )))
        }
    };
    Ok(AuthoredItem {
        identity: IssueIdentity::new(repo, item.number),
        title: item.title,
        body: item.body.unwrap_or_default(),
        labels: item.labels.into_iter().map(|l| l.name).collect(),
        url: Some(item.html_url),
        is_pull_request: item.pull_request.is_some(),
        closed: item.state == "closed",
        merged: item
            .pull_request
            .as_ref()
            .is_some_and(|pr| pr.merged_at.is_some()),
        comments: item.comments,
        reactions: item.reactions.total_count,
        created_at: item.created_at,
        updated_at: item.updated_at,
    })
}

fn ci_signal(status: &ApiCombinedStatus) -> CiSignal {
    if status.total_count == 0 {
        return CiSignal::Unknown;
    }
    match status.state.as_str() {
        "success" => CiSignal::Passing,
        "failure" | "error" => CiSignal::Failing,
        "pending" => CiSignal::Pending,
        _ => CiSignal::Unknown,
    }
}

#[async_trait]
impl IssueTracker for GitHubClient {
    async fn list_open_issues(
        &self,
        repo: &TrackedRepository,
        page_token: Option<&str>,
    ) -> Result<IssuePage, ProviderError> {
        let (owner, name) = owner_and_repo(&repo.upstream_url)?;
        let page: u32 = match page_token {
            None => 1,
            Some(token) => token
                .parse()
                .map_err(|_| ProviderError::Malformed(format!("bad page token {token:?}")))?,
        };
        let path = format!(
            "/repos/{owner}/{name}/issues?state=open&per_page={PER_PAGE}&page={page}"
        );
        let response = self.send(self.get(&path)).await?;
        let rate_limit = rate_limit_info(response.headers());
        let raw: Vec<ApiIssue> = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("GET {path}: {e}")))?;

        let full = raw.len() == PER_PAGE;
        let full_name = format!("{owner}/{name}");
        let issues = raw
            .into_iter()
            .filter(|i| i.pull_request.is_none())
            .map(|i| to_candidate(&full_name, i))
            .collect();
        Ok(IssuePage {
            issues,
            next_page: full.then(|| (page + 1).to_string()),
            rate_limit,
        })
    }
}

#[async_trait]
impl ContributionSource for GitHubClient {
    async fn authored_by(
        &self,
        author: &str,
        page_token: Option<&str>,
    ) -> Result<AuthoredPage, ProviderError> {
        if author.is_empty() || !author.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ProviderError::Operation(format!(
                "not a GitHub username: {author:?}"
            )));
        }
        let page: u32 = match page_token {
            None => 1,
            Some(token) => token
                .parse()
                .map_err(|_| ProviderError::Malformed(format!("bad page token {token:?}")))?,
        };
        let path = format!(
            "/search/issues?q=author:{author}&sort=updated&order=desc&per_page={PER_PAGE}&page={page}"
        );
        let results: ApiSearchResults = self.get_json(&path).await?;
        let full = results.items.len() == PER_PAGE;
        let items = results
            .items
            .into_iter()
            .map(to_authored)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(AuthoredPage {
            items,
            next_page: full.then(|| (page + 1).to_string()),
        })
    }
}

#[async_trait]
impl ActivitySource for GitHubClient {
    async fn activity(&self, repo: &TrackedRepository) -> Result<RepoActivity, ProviderError> {
        let (owner, name) = owner_and_repo(&repo.upstream_url)?;
        let info: ApiRepository = self.get_json(&format!("/repos/{owner}/{name}")).await?;

        let since = Utc::now() - ChronoDuration::days(30);
        let recent: Vec<ApiIssue> = self
            .get_json(&format!(
                "/repos/{owner}/{name}/issues?state=all&per_page=100&since={}",
                since.format("%Y-%m-%dT%H:%M:%SZ")
            ))
            .await?;
        let recent = recent.iter().filter(|i| i.pull_request.is_none());
        let (mut opened, mut closed) = (0u32, 0u32);
        for issue in recent {
            if issue.created_at >= since {
                opened += 1;
            }
            if issue.closed_at.is_some_and(|c| c >= since) {
                closed += 1;
            }
        }

        let status: ApiCombinedStatus = self
            .get_json(&format!(
                "/repos/{owner}/{name}/commits/{}/status",
                repo.branch
            ))
            .await?;

        Ok(RepoActivity {
            last_upstream_activity: info.pushed_at,
            open_issues: info.open_issues_count,
            opened_last_30d: opened,
            closed_last_30d: closed,
            ci: ci_signal(&status),
        })
    }
}
