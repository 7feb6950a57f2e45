use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use forksync_state::{RepoId, TrackedRepository};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, Instrument};

use super::budget::{BudgetSnapshot, CostBudget};
use super::cache::{cache_key, AnalysisCache, AnalysisCacheEntry, CacheOutcome};
use super::profile::SkillProfile;
use super::ranking::{rank, Opportunity, ScoringPolicy, WeightedScoring};
use super::AnalysisFailure;
use crate::config::EngineConfig;
use crate::error::{ForkSyncError, Result};
use crate::metrics::METRICS;
use crate::obs;
use crate::ports::{
    IssueAnalysis, IssueCandidate, IssueIdentity, IssueTracker, LlmAnalyzer, TokenUsage,
};
use crate::provider::{ApiFacade, CallError, Provider};
use crate::sync::CancelSignal;

/// A candidate left out of the ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedCandidate {
    pub repo: RepoId,
    pub issue: IssueIdentity,
    pub kind: String,
    pub reason: String,
}

/// A repository whose issues could not be fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRepository {
    pub repo: RepoId,
    pub kind: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub opportunities: Vec<Opportunity>,
    pub candidates_seen: usize,
    pub skipped: Vec<SkippedCandidate>,
    pub failed_repos: Vec<FailedRepository>,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Tokens spent by analyses this run triggered.
    pub usage: TokenUsage,
    pub budget: BudgetSnapshot,
}

type FetchOutcome = std::result::Result<Vec<IssueCandidate>, CallError>;
type AnalysisOutcome = std::result::Result<(AnalysisCacheEntry, CacheOutcome), AnalysisFailure>;

struct Candidate {
    repo: TrackedRepository,
    issue: IssueCandidate,
}

pub struct DiscoveryEngine {
    facade: Arc<ApiFacade>,
    issues: Arc<dyn IssueTracker>,
    llm: Arc<dyn LlmAnalyzer>,
    cache: Arc<AnalysisCache>,
    budget: Arc<CostBudget>,
    policy: Arc<dyn ScoringPolicy>,
    concurrency_limit: usize,
    max_issue_pages: u32,
}

impl DiscoveryEngine {
    pub fn new(
        facade: Arc<ApiFacade>,
        issues: Arc<dyn IssueTracker>,
        llm: Arc<dyn LlmAnalyzer>,
        cache: Arc<AnalysisCache>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            facade,
            issues,
            llm,
            cache,
            budget: Arc::new(CostBudget::new(config.budget.clone())),
            policy: Arc::new(WeightedScoring::new(
                config.ranking_weights.clone(),
                config.recency_half_life_days,
            )),
            concurrency_limit: config.concurrency_limit.max(1),
            max_issue_pages: config.max_issue_pages.max(1),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn ScoringPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn budget(&self) -> &Arc<CostBudget> {
        &self.budget
    }

    /// Rank open issues across `repos` for `profile`, keeping the top `limit`.
    ///
    /// Per-repository fetch failures and per-candidate analysis failures are
    /// reported in the result. Rejected credentials abort the run.
    #[instrument(skip(self, repos, profile), fields(repos = repos.len(), limit))]
    pub async fn discover(
        &self,
        repos: &[TrackedRepository],
        profile: &SkillProfile,
        limit: usize,
    ) -> Result<DiscoveryReport> {
        self.discover_with_cancel(repos, profile, limit, &CancelSignal::new())
            .await
    }

    /// [`discover`](Self::discover), stopping new fetches and analyses once
    /// `cancel` fires. Work not dispatched is reported as `cancelled`.
    pub async fn discover_with_cancel(
        &self,
        repos: &[TrackedRepository],
        profile: &SkillProfile,
        limit: usize,
        cancel: &CancelSignal,
    ) -> Result<DiscoveryReport> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = obs::run_span("discovery", &run_id);
        self.run(run_id, repos, profile, limit, cancel)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        run_id: String,
        repos: &[TrackedRepository],
        profile: &SkillProfile,
        limit: usize,
        cancel: &CancelSignal,
    ) -> Result<DiscoveryReport> {
        obs::emit_discovery_started(&run_id, repos.len(), limit);

        // 1. fetch, per repository, in input order
        let fetch_limit = self
            .facade
            .suggested_parallelism(Provider::IssueTracker, self.concurrency_limit);
        let fetched: Vec<(TrackedRepository, Option<FetchOutcome>)> = stream::iter(repos.iter().cloned())
            .map(|repo| async move {
                if cancel.is_cancelled() {
                    return (repo, None);
                }
                let issues = self.fetch_issues(&repo).await;
                (repo, Some(issues))
            })
            .buffered(fetch_limit)
            .collect()
            .await;

        // 2. dedup on (tracked repo, issue identity)
        let mut seen: HashSet<(RepoId, IssueIdentity)> = HashSet::new();
        let mut candidates = Vec::new();
        let mut failed_repos = Vec::new();
        for (repo, issues) in fetched {
            let Some(issues) = issues else {
                failed_repos.push(FailedRepository {
                    repo: repo.id.clone(),
                    kind: "cancelled".to_string(),
                    reason: "not fetched: run cancelled".to_string(),
                });
                continue;
            };
            match issues {
                Ok(issues) => {
                    for issue in issues {
                        if seen.insert((repo.id.clone(), issue.identity.clone())) {
                            candidates.push(Candidate {
                                repo: repo.clone(),
                                issue,
                            });
                        }
                    }
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    obs::emit_repo_fetch_failed(&repo.id, &e);
                    failed_repos.push(FailedRepository {
                        repo: repo.id.clone(),
                        kind: e.sync_kind().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        let candidates_seen = candidates.len();
        debug!(candidates = candidates_seen, "candidates after dedup");

        // 3. analyze through the cache
        let analyze_limit = self
            .facade
            .suggested_parallelism(Provider::Llm, self.concurrency_limit);
        let analyzed: Vec<(Candidate, Option<AnalysisOutcome>)> = stream::iter(candidates)
            .map(|c| async move {
                if cancel.is_cancelled() {
                    return (c, None);
                }
                let outcome = self.analyze(&c.issue, profile).await;
                (c, Some(outcome))
            })
            .buffered(analyze_limit)
            .collect()
            .await;

        // 4. score
        let now = self.facade.clock().now();
        let mut opportunities = Vec::new();
        let mut skipped = Vec::new();
        let (mut hits, mut misses) = (0u64, 0u64);
        let mut usage = TokenUsage::default();
        for (candidate, outcome) in analyzed {
            let Some(outcome) = outcome else {
                skipped.push(SkippedCandidate {
                    repo: candidate.repo.id.clone(),
                    issue: candidate.issue.identity.clone(),
                    kind: "cancelled".to_string(),
                    reason: "not analyzed: run cancelled".to_string(),
                });
                continue;
            };
            let (entry, how) = match outcome {
                Ok(ok) => ok,
                Err(AnalysisFailure::Provider(e)) if e.is_fatal() => {
                    return Err(ForkSyncError::from(e));
                }
                Err(failure) => {
                    obs::emit_candidate_skipped(
                        &candidate.repo.id,
                        &candidate.issue.identity.to_string(),
                        &failure,
                    );
                    skipped.push(SkippedCandidate {
                        repo: candidate.repo.id.clone(),
                        issue: candidate.issue.identity.clone(),
                        kind: failure.kind().to_string(),
                        reason: failure.to_string(),
                    });
                    continue;
                }
            };
            match how {
                CacheOutcome::Hit => {
                    hits += 1;
                    METRICS.inc_cache_hits();
                }
                CacheOutcome::Computed => {
                    misses += 1;
                    usage.add(entry.usage);
                    METRICS.inc_cache_misses();
                }
                CacheOutcome::Coalesced => {
                    misses += 1;
                    METRICS.inc_cache_misses();
                }
            }

            let skill_match = profile.label_affinity(&candidate.issue.labels);
            let mut opportunity = Opportunity {
                repo: candidate.repo.id.clone(),
                issue: candidate.issue,
                analysis: entry.analysis,
                cache_key: entry.key,
                health_score: candidate.repo.health_score,
                composite_score: 0.0,
            };
            opportunity.composite_score =
                self.policy.score(&opportunity.inputs(skill_match, now));
            opportunities.push(opportunity);
        }

        // 5. order and truncate
        let opportunities = rank(opportunities, limit);

        obs::emit_discovery_finished(
            &run_id,
            opportunities.len(),
            skipped.len(),
            failed_repos.len(),
            hits,
            misses,
        );
        METRICS.flush();

        Ok(DiscoveryReport {
            run_id,
            generated_at: now,
            opportunities,
            candidates_seen,
            skipped,
            failed_repos,
            cache_hits: hits,
            cache_misses: misses,
            usage,
            budget: self.budget.snapshot(),
        })
    }

    /// Up to `max_issue_pages` pages of open issues.
    async fn fetch_issues(
        &self,
        repo: &TrackedRepository,
    ) -> FetchOutcome {
        let mut issues = Vec::new();
        let mut token: Option<String> = None;
        for _ in 0..self.max_issue_pages {
            let page = self
                .facade
                .call(Provider::IssueTracker, "list_open_issues", || {
                    self.issues.list_open_issues(repo, token.as_deref())
                })
                .await?;
            if let Some(info) = page.rate_limit {
                self.facade.record_rate_limit(Provider::IssueTracker, info);
            }
            issues.extend(page.issues);
            match page.next_page {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(issues)
    }

    async fn analyze(
        &self,
        issue: &IssueCandidate,
        profile: &SkillProfile,
    ) -> AnalysisOutcome {
        let key = cache_key(issue, profile);
        let profile_fp = profile.fingerprint();

        let facade = Arc::clone(&self.facade);
        let llm = Arc::clone(&self.llm);
        let budget = Arc::clone(&self.budget);
        let text = issue.analysis_text();
        let identity = issue.identity.clone();
        let profile = profile.clone();
        let entry_key = key.to_string();
        let entry_profile = profile_fp.to_string();

        self.cache
            .get_or_compute(&key, &profile_fp, move || async move {
                let reservation = budget.reserve(&text)?;
                METRICS.inc_llm_calls();
                let response = match facade
                    .call(Provider::Llm, "analyze", || llm.analyze(&text, &profile))
                    .await
                {
                    Ok(response) => response,
                    Err(e) => {
                        budget.release(reservation);
                        return Err(AnalysisFailure::Provider(e));
                    }
                };
                // Billed whether or not the reply parses.
                budget.settle(reservation, response.usage);
                facade.record_tokens(Provider::Llm, response.usage.total());
                let analysis = response
                    .analysis
                    .map_err(AnalysisFailure::InvalidOutput)
                    .and_then(validate)?;
                Ok(AnalysisCacheEntry {
                    key: entry_key,
                    issue: identity,
                    profile_fingerprint: entry_profile,
                    analysis,
                    usage: response.usage,
                    computed_at: facade.clock().now(),
                })
            })
            .await
    }
}

fn validate(analysis: IssueAnalysis) -> std::result::Result<IssueAnalysis, AnalysisFailure> {
    if !analysis.relevance.is_finite() || !(0.0..=1.0).contains(&analysis.relevance) {
        return Err(AnalysisFailure::InvalidOutput(format!(
            "relevance {} outside [0, 1]",
            analysis.relevance
        )));
    }
    Ok(analysis)
}
