//! Scripted collaborators (testing only)
//!
//! - `FakeGit`: per-repository upstream heads, divergence and merge outcomes
//! - `FakeIssueTracker`: canned issue pages per repository
//! - `FakeLlm`: substring-matched relevance with an optional delay
//! - `FakeActivity`: canned upstream activity
//! - `FakeContributions`: authored issues and pull requests, paged
//!
//! Every fake counts its calls so tests can assert on provider traffic.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forksync_state::{RepoId, TrackedRepository};

use crate::discovery::SkillProfile;
use crate::ports::{
    ActivitySource, AnalysisResponse, AuthoredItem, AuthoredPage, ContributionSource, Difficulty,
    Divergence, GitOperations, IssueAnalysis, IssueCandidate, IssueIdentity, IssuePage,
    IssueTracker, LlmAnalyzer, MergeMode, MergeOutcome, RepoActivity, TokenUsage, UpstreamHead,
};
use crate::provider::ProviderError;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Build an issue with fixed timestamps.
pub fn issue(
    repo: &str,
    number: u64,
    title: &str,
    labels: &[&str],
    created_at: DateTime<Utc>,
) -> IssueCandidate {
    IssueCandidate {
        identity: IssueIdentity::new(repo, number),
        title: title.to_string(),
        labels: labels.iter().map(|l| l.to_string()).collect::<BTreeSet<_>>(),
        created_at,
        updated_at: created_at,
        body: format!("{title}\n\nSee the attached report."),
        url: Some(format!("https://github.com/{repo}/issues/{number}")),
    }
}

// ---------------------------------------------------------------------------
// Git
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct GitScript {
    head: String,
    divergence: Divergence,
    conflict: Option<Vec<String>>,
    fetch_errors: VecDeque<ProviderError>,
    merge_error: Option<ProviderError>,
    fetches: u32,
    merges: u32,
}

impl Default for GitScript {
    fn default() -> Self {
        Self {
            head: "0000000".to_string(),
            divergence: Divergence {
                ahead: 0,
                behind: 0,
            },
            conflict: None,
            fetch_errors: VecDeque::new(),
            merge_error: None,
            fetches: 0,
            merges: 0,
        }
    }
}

/// Git double keyed by repository id.
///
/// A clean merge moves the fork onto upstream: `behind` drops to zero and
/// the next fetch reports the same head.
#[derive(Debug, Default)]
pub struct FakeGit {
    repos: Mutex<HashMap<RepoId, GitScript>>,
}

impl FakeGit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_upstream(&self, repo: &RepoId, head: &str, ahead: u32, behind: u32) {
        let mut repos = lock(&self.repos);
        let script = repos.entry(repo.clone()).or_default();
        script.head = head.to_string();
        script.divergence = Divergence { ahead, behind };
    }

    /// Make the next merge for `repo` stop on `paths`.
    pub fn set_conflict(&self, repo: &RepoId, paths: &[&str]) {
        let mut repos = lock(&self.repos);
        repos.entry(repo.clone()).or_default().conflict =
            Some(paths.iter().map(|p| p.to_string()).collect());
    }

    /// Queue an error for the next fetch. Queued errors are consumed in order.
    pub fn fail_fetch(&self, repo: &RepoId, err: ProviderError) {
        let mut repos = lock(&self.repos);
        repos
            .entry(repo.clone())
            .or_default()
            .fetch_errors
            .push_back(err);
    }

    pub fn fail_merge(&self, repo: &RepoId, err: ProviderError) {
        let mut repos = lock(&self.repos);
        repos.entry(repo.clone()).or_default().merge_error = Some(err);
    }

    pub fn fetch_count(&self, repo: &RepoId) -> u32 {
        lock(&self.repos).get(repo).map_or(0, |s| s.fetches)
    }

    pub fn merge_count(&self, repo: &RepoId) -> u32 {
        lock(&self.repos).get(repo).map_or(0, |s| s.merges)
    }
}

#[async_trait]
impl GitOperations for FakeGit {
    async fn fetch_upstream(&self, repo: &TrackedRepository) -> Result<UpstreamHead, ProviderError> {
        let mut repos = lock(&self.repos);
        let script = repos.entry(repo.id.clone()).or_default();
        script.fetches += 1;
        if let Some(err) = script.fetch_errors.pop_front() {
            return Err(err);
        }
        Ok(UpstreamHead {
            commit: script.head.clone(),
            reference: format!("upstream/{}", repo.branch),
        })
    }

    async fn divergence(
        &self,
        repo: &TrackedRepository,
        _upstream_commit: &str,
    ) -> Result<Divergence, ProviderError> {
        let repos = lock(&self.repos);
        Ok(repos
            .get(&repo.id)
            .map(|s| s.divergence)
            .unwrap_or(Divergence {
                ahead: 0,
                behind: 0,
            }))
    }

    async fn merge_or_fast_forward(
        &self,
        repo: &TrackedRepository,
        upstream_commit: &str,
        mode: MergeMode,
    ) -> Result<MergeOutcome, ProviderError> {
        let mut repos = lock(&self.repos);
        let script = repos.entry(repo.id.clone()).or_default();
        script.merges += 1;
        if let Some(err) = script.merge_error.clone() {
            return Err(err);
        }
        if let Some(paths) = script.conflict.clone() {
            return Ok(MergeOutcome::Conflicted { paths });
        }
        let head = match mode {
            MergeMode::FastForwardOnly => upstream_commit.to_string(),
            MergeMode::Merge => format!("merge-{upstream_commit}"),
        };
        script.divergence.behind = 0;
        if mode == MergeMode::Merge {
            script.divergence.ahead += 1;
        }
        Ok(MergeOutcome::Merged { head })
    }
}

// ---------------------------------------------------------------------------
// Issue tracker
// ---------------------------------------------------------------------------

/// Issue tracker serving canned pages. Page tokens are page indexes.
#[derive(Debug, Default)]
pub struct FakeIssueTracker {
    pages: Mutex<HashMap<String, Vec<IssuePage>>>,
    errors: Mutex<HashMap<String, ProviderError>>,
    calls: AtomicU32,
}

impl FakeIssueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `issues` as a single page for `repo`.
    pub fn with_issues(self, repo: &RepoId, issues: Vec<IssueCandidate>) -> Self {
        self.set_pages(
            repo,
            vec![IssuePage {
                issues,
                ..IssuePage::default()
            }],
        );
        self
    }

    /// Serve several pages; `next_page` is filled in automatically.
    pub fn set_pages(&self, repo: &RepoId, mut pages: Vec<IssuePage>) {
        let count = pages.len();
        for (i, page) in pages.iter_mut().enumerate() {
            page.next_page = (i + 1 < count).then(|| (i + 1).to_string());
        }
        lock(&self.pages).insert(repo.to_string(), pages);
    }

    /// Every listing for `repo` fails with `err`.
    pub fn fail(&self, repo: &RepoId, err: ProviderError) {
        lock(&self.errors).insert(repo.to_string(), err);
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IssueTracker for FakeIssueTracker {
    async fn list_open_issues(
        &self,
        repo: &TrackedRepository,
        page_token: Option<&str>,
    ) -> Result<IssuePage, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.errors).get(repo.id.as_str()) {
            return Err(err.clone());
        }
        let index = match page_token {
            None => 0,
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| ProviderError::Malformed(format!("bad page token {token:?}")))?,
        };
        Ok(lock(&self.pages)
            .get(repo.id.as_str())
            .and_then(|pages| pages.get(index).cloned())
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// LLM
// ---------------------------------------------------------------------------

/// Analyzer whose relevance is chosen by the first rule whose needle occurs
/// in the issue text. Unmatched text scores `default_relevance`.
#[derive(Debug)]
pub struct FakeLlm {
    rules: Mutex<Vec<(String, f64)>>,
    failures: Mutex<Vec<(String, ProviderError)>>,
    garbled: Mutex<Vec<String>>,
    default_relevance: f64,
    delay: Option<Duration>,
    calls: AtomicU32,
}

impl Default for FakeLlm {
    fn default() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            garbled: Mutex::new(Vec::new()),
            default_relevance: 0.5,
            delay: None,
            calls: AtomicU32::new(0),
        }
    }
}

impl FakeLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_relevance(self, needle: &str, relevance: f64) -> Self {
        lock(&self.rules).push((needle.to_string(), relevance));
        self
    }

    /// Sleep this long inside every call, to widen race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_on(self, needle: &str, err: ProviderError) -> Self {
        lock(&self.failures).push((needle.to_string(), err));
        self
    }

    /// Answer matching issues with text that is not an analysis. Usage is
    /// still reported.
    pub fn garble_on(self, needle: &str) -> Self {
        lock(&self.garbled).push(needle.to_string());
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmAnalyzer for FakeLlm {
    async fn analyze(
        &self,
        issue_text: &str,
        profile: &SkillProfile,
    ) -> Result<AnalysisResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failure = lock(&self.failures)
            .iter()
            .find(|(needle, _)| issue_text.contains(needle.as_str()))
            .map(|(_, err)| err.clone());
        if let Some(err) = failure {
            return Err(err);
        }
        let usage = TokenUsage {
            input_tokens: (issue_text.len() as u64).div_ceil(4),
            output_tokens: 50,
        };
        if lock(&self.garbled)
            .iter()
            .any(|needle| issue_text.contains(needle.as_str()))
        {
            return Ok(AnalysisResponse {
                analysis: Err("analysis reply contains no JSON object".to_string()),
                usage,
            });
        }
        let relevance = lock(&self.rules)
            .iter()
            .find(|(needle, _)| issue_text.contains(needle.as_str()))
            .map_or(self.default_relevance, |(_, r)| *r);

        let summary = issue_text.lines().nth(1).unwrap_or_default().to_string();
        Ok(AnalysisResponse {
            analysis: Ok(IssueAnalysis {
                summary,
                difficulty: Difficulty::Intermediate,
                relevance,
                reasoning: format!("scored against {}", profile.describe()),
            }),
            usage,
        })
    }
}

// ---------------------------------------------------------------------------
// Activity
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FakeActivity {
    activity: Mutex<HashMap<RepoId, Result<RepoActivity, ProviderError>>>,
    calls: AtomicU32,
}

impl FakeActivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, repo: &RepoId, activity: RepoActivity) {
        lock(&self.activity).insert(repo.clone(), Ok(activity));
    }

    pub fn fail(&self, repo: &RepoId, err: ProviderError) {
        lock(&self.activity).insert(repo.clone(), Err(err));
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActivitySource for FakeActivity {
    async fn activity(&self, repo: &TrackedRepository) -> Result<RepoActivity, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.activity)
            .get(&repo.id)
            .cloned()
            .unwrap_or_else(|| Ok(RepoActivity::default()))
    }
}

// ---------------------------------------------------------------------------
// Contributions
// ---------------------------------------------------------------------------

/// Build an authored item with fixed timestamps.
pub fn authored(
    repo: &str,
    number: u64,
    title: &str,
    labels: &[&str],
    created_at: DateTime<Utc>,
) -> AuthoredItem {
    AuthoredItem {
        identity: IssueIdentity::new(repo, number),
        title: title.to_string(),
        body: String::new(),
        labels: labels.iter().map(|l| l.to_string()).collect::<BTreeSet<_>>(),
        url: Some(format!("https://github.com/{repo}/issues/{number}")),
        is_pull_request: false,
        closed: false,
        merged: false,
        comments: 0,
        reactions: 0,
        created_at,
        updated_at: created_at,
    }
}

#[derive(Debug)]
pub struct FakeContributions {
    items: Mutex<HashMap<String, Vec<AuthoredItem>>>,
    errors: Mutex<VecDeque<ProviderError>>,
    page_size: usize,
    calls: AtomicU32,
}

impl Default for FakeContributions {
    fn default() -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            errors: Mutex::new(VecDeque::new()),
            page_size: 50,
            calls: AtomicU32::new(0),
        }
    }
}

impl FakeContributions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Replace what `author` has authored.
    pub fn set(&self, author: &str, items: Vec<AuthoredItem>) {
        lock(&self.items).insert(author.to_string(), items);
    }

    /// Fail the next call with `err`.
    pub fn fail_next(&self, err: ProviderError) {
        lock(&self.errors).push_back(err);
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContributionSource for FakeContributions {
    async fn authored_by(
        &self,
        author: &str,
        page_token: Option<&str>,
    ) -> Result<AuthoredPage, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.errors).pop_front() {
            return Err(err);
        }
        let start: usize = match page_token {
            None => 0,
            Some(token) => token
                .parse()
                .map_err(|_| ProviderError::Malformed(format!("bad page token {token:?}")))?,
        };
        let all = lock(&self.items).get(author).cloned().unwrap_or_default();
        let end = (start + self.page_size).min(all.len());
        let items = all.get(start..end).map(<[_]>::to_vec).unwrap_or_default();
        Ok(AuthoredPage {
            items,
            next_page: (end < all.len()).then(|| end.to_string()),
        })
    }
}
