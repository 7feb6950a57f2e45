//! Discovery & Ranking Engine against scripted tracker and analyzer.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use forksync_core::discovery::AnalysisCache;
use forksync_core::fakes::{issue, FakeIssueTracker, FakeLlm};
use forksync_core::ports::IssuePage;
use forksync_core::{
    ApiFacade, CancelSignal, DiscoveryEngine, DiscoveryReport, EngineConfig, ForkSyncError,
    ManualClock, ProviderError, SkillProfile,
};
use forksync_state::fakes::MemoryKvStore;
use forksync_state::{RepoId, TrackedRepository};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

fn days_ago(days: i64) -> DateTime<Utc> {
    t0() - chrono::Duration::days(days)
}

fn tracked(name: &str) -> TrackedRepository {
    TrackedRepository::new(
        RepoId::new(name),
        format!("/forks/{name}"),
        format!("https://github.com/{name}.git"),
        t0(),
    )
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.retry.jitter = false;
    config.retry.backoff_base_ms = 10;
    config
}

fn engine(tracker: Arc<FakeIssueTracker>, llm: Arc<FakeLlm>) -> DiscoveryEngine {
    engine_with(tracker, llm, &config())
}

fn engine_with(
    tracker: Arc<FakeIssueTracker>,
    llm: Arc<FakeLlm>,
    config: &EngineConfig,
) -> DiscoveryEngine {
    let clock = Arc::new(ManualClock::new(t0()));
    let facade = Arc::new(ApiFacade::new(config, clock.clone()));
    let cache = Arc::new(AnalysisCache::new(
        Arc::new(MemoryKvStore::new()),
        clock,
        config.cache_ttl(),
    ));
    DiscoveryEngine::new(facade, tracker, llm, cache, config)
}

/// A docs typo and a crash bug in one repository, a refactor in another.
fn fleet() -> (Vec<TrackedRepository>, Arc<FakeIssueTracker>) {
    let widgets = tracked("octo/widgets");
    let gadgets = tracked("acme/gadgets");
    let tracker = FakeIssueTracker::new()
        .with_issues(
            &widgets.id,
            vec![
                issue("octo/widgets", 7, "Fix typo in README", &["docs"], days_ago(2)),
                issue("octo/widgets", 9, "Crash on empty config", &["bug"], days_ago(2)),
            ],
        )
        .with_issues(
            &gadgets.id,
            vec![issue(
                "acme/gadgets",
                3,
                "Refactor the scheduler",
                &["enhancement"],
                days_ago(20),
            )],
        );
    (vec![widgets, gadgets], Arc::new(tracker))
}

fn scripted_llm() -> FakeLlm {
    FakeLlm::new()
        .with_relevance("typo", 0.9)
        .with_relevance("Crash", 0.3)
        .with_relevance("Refactor", 0.6)
}

fn docs_profile() -> SkillProfile {
    SkillProfile::new().with_skill("documentation", 0.9)
}

fn ranking(report: &DiscoveryReport) -> Vec<(String, f64)> {
    report
        .opportunities
        .iter()
        .map(|o| (o.issue.identity.to_string(), o.composite_score))
        .collect()
}

#[tokio::test]
async fn docs_issue_outranks_bug_for_a_documentation_profile() {
    let (repos, tracker) = fleet();
    let llm = Arc::new(scripted_llm());
    let engine = engine(tracker, llm);

    let report = engine.discover(&repos, &docs_profile(), 10).await.unwrap();

    let order: Vec<String> = ranking(&report).into_iter().map(|(id, _)| id).collect();
    assert_eq!(order.len(), 3);
    let docs = order.iter().position(|id| id == "octo/widgets#7").unwrap();
    let bug = order.iter().position(|id| id == "octo/widgets#9").unwrap();
    assert!(docs < bug, "ranking was {order:?}");
    assert_eq!(order[0], "octo/widgets#7");

    let scores: Vec<f64> = report.opportunities.iter().map(|o| o.composite_score).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    assert_eq!(report.candidates_seen, 3);
    assert!(report.skipped.is_empty());
    assert!(report.failed_repos.is_empty());
}

#[tokio::test]
async fn limit_truncates_after_ordering() {
    let (repos, tracker) = fleet();
    let engine = engine(tracker, Arc::new(scripted_llm()));

    let report = engine.discover(&repos, &docs_profile(), 1).await.unwrap();
    assert_eq!(report.opportunities.len(), 1);
    assert_eq!(
        report.opportunities[0].issue.identity.to_string(),
        "octo/widgets#7"
    );
}

#[tokio::test]
async fn second_run_is_served_from_cache() {
    let (repos, tracker) = fleet();
    let llm = Arc::new(scripted_llm());
    let engine = engine(tracker, llm.clone());

    let first = engine.discover(&repos, &docs_profile(), 10).await.unwrap();
    assert_eq!(llm.call_count(), 3);
    assert_eq!((first.cache_hits, first.cache_misses), (0, 3));

    let second = engine.discover(&repos, &docs_profile(), 10).await.unwrap();
    assert_eq!(llm.call_count(), 3);
    assert_eq!((second.cache_hits, second.cache_misses), (3, 0));
    assert_eq!(second.usage.total(), 0);
    assert_eq!(ranking(&first), ranking(&second));

    // A different profile is a different analysis.
    let rust = SkillProfile::new().with_skill("rust", 1.0);
    engine.discover(&repos, &rust, 10).await.unwrap();
    assert_eq!(llm.call_count(), 6);
}

#[tokio::test]
async fn parallel_runs_share_one_analysis_per_issue() {
    let widgets = tracked("octo/widgets");
    let tracker = Arc::new(FakeIssueTracker::new().with_issues(
        &widgets.id,
        vec![issue("octo/widgets", 7, "Fix typo in README", &["docs"], days_ago(2))],
    ));
    let llm = Arc::new(
        FakeLlm::new()
            .with_relevance("typo", 0.9)
            .with_delay(Duration::from_millis(50)),
    );
    let engine = Arc::new(engine(tracker, llm.clone()));
    let repos = vec![widgets];
    let profile = docs_profile();

    let runs = (0..5).map(|_| engine.discover(&repos, &profile, 10));
    let reports = futures::future::join_all(runs).await;

    assert_eq!(llm.call_count(), 1);
    for report in reports {
        let report = report.unwrap();
        assert_eq!(report.opportunities.len(), 1);
        assert_eq!(report.cache_hits + report.cache_misses, 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_on_separate_tasks_share_one_analysis() {
    let widgets = tracked("octo/widgets");
    let tracker = Arc::new(FakeIssueTracker::new().with_issues(
        &widgets.id,
        vec![issue("octo/widgets", 7, "Fix typo in README", &["docs"], days_ago(2))],
    ));
    let llm = Arc::new(
        FakeLlm::new()
            .with_relevance("typo", 0.9)
            .with_delay(Duration::from_millis(50)),
    );
    let engine = Arc::new(engine(tracker, llm.clone()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = Arc::clone(&engine);
        let repos = vec![widgets.clone()];
        handles.push(tokio::spawn(async move {
            engine.discover(&repos, &docs_profile(), 10).await
        }));
    }
    for handle in handles {
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.opportunities.len(), 1);
    }
    assert_eq!(llm.call_count(), 1);
}

#[tokio::test]
async fn identical_inputs_rank_identically() {
    let (repos, tracker_a) = fleet();
    let (_, tracker_b) = fleet();
    let a = engine(tracker_a, Arc::new(scripted_llm()))
        .discover(&repos, &docs_profile(), 10)
        .await
        .unwrap();
    let b = engine(tracker_b, Arc::new(scripted_llm()))
        .discover(&repos, &docs_profile(), 10)
        .await
        .unwrap();
    assert_eq!(ranking(&a), ranking(&b));
}

#[tokio::test]
async fn equal_scores_break_ties_by_issue_identity() {
    let repo = tracked("octo/widgets");
    let tracker = Arc::new(FakeIssueTracker::new().with_issues(
        &repo.id,
        vec![
            issue("octo/widgets", 30, "Same shape", &[], days_ago(1)),
            issue("octo/widgets", 4, "Same shape", &[], days_ago(1)),
            issue("octo/widgets", 12, "Same shape", &[], days_ago(1)),
        ],
    ));
    let engine = engine(tracker, Arc::new(FakeLlm::new()));

    let report = engine
        .discover(&[repo], &SkillProfile::new(), 10)
        .await
        .unwrap();
    let numbers: Vec<u64> = report
        .opportunities
        .iter()
        .map(|o| o.issue.identity.number)
        .collect();
    assert_eq!(numbers, vec![4, 12, 30]);
}

#[tokio::test]
async fn failed_analysis_skips_only_that_candidate() {
    let (repos, tracker) = fleet();
    let llm = Arc::new(scripted_llm().fail_on(
        "Crash",
        ProviderError::Rejected {
            status: 400,
            message: "prompt too long".into(),
        },
    ));
    let engine = engine(tracker, llm);

    let report = engine.discover(&repos, &docs_profile(), 10).await.unwrap();

    assert_eq!(report.opportunities.len(), 2);
    assert_eq!(report.skipped.len(), 1);
    let skipped = &report.skipped[0];
    assert_eq!(skipped.issue.to_string(), "octo/widgets#9");
    assert_eq!(skipped.kind, "provider");
}

#[tokio::test]
async fn failed_analyses_are_not_cached() {
    let (repos, tracker) = fleet();
    let llm = Arc::new(scripted_llm().fail_on(
        "Crash",
        ProviderError::Malformed("not json".into()),
    ));
    let engine = engine(tracker, llm.clone());

    engine.discover(&repos, &docs_profile(), 10).await.unwrap();
    engine.discover(&repos, &docs_profile(), 10).await.unwrap();
    // Two successes cached once; the failure is asked again.
    assert_eq!(llm.call_count(), 4);
}

#[tokio::test]
async fn out_of_range_relevance_is_rejected() {
    let (repos, tracker) = fleet();
    let llm = Arc::new(
        FakeLlm::new()
            .with_relevance("Refactor", 1.7)
            .with_relevance("typo", 0.9),
    );
    let engine = engine(tracker, llm);

    let report = engine.discover(&repos, &docs_profile(), 10).await.unwrap();
    assert_eq!(report.opportunities.len(), 2);
    assert_eq!(report.skipped[0].kind, "invalid_output");
}

#[tokio::test]
async fn unparseable_reply_is_skipped_but_still_billed() {
    let (repos, tracker) = fleet();
    let llm = Arc::new(scripted_llm().garble_on("Refactor"));
    let engine = engine(tracker, llm.clone());

    let report = engine.discover(&repos, &docs_profile(), 10).await.unwrap();

    assert_eq!(report.opportunities.len(), 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].kind, "invalid_output");

    let budget = engine.budget().snapshot();
    assert_eq!(budget.requests, 3);
    assert_eq!(budget.usage.output_tokens, 150);
    assert!(budget.reserved_usd.abs() < 1e-12);
    let billed = engine.budget().cost_of(budget.usage.total());
    assert!((budget.spent_usd - billed).abs() < 1e-12);
}

#[tokio::test]
async fn fetch_failure_excludes_only_that_repository() {
    let (repos, tracker) = fleet();
    tracker.fail(
        &RepoId::new("acme/gadgets"),
        ProviderError::Rejected {
            status: 404,
            message: "Not Found".into(),
        },
    );
    let engine = engine(tracker, Arc::new(scripted_llm()));

    let report = engine.discover(&repos, &docs_profile(), 10).await.unwrap();

    assert_eq!(report.failed_repos.len(), 1);
    assert_eq!(report.failed_repos[0].repo.as_str(), "acme/gadgets");
    assert!(report
        .opportunities
        .iter()
        .all(|o| o.repo.as_str() == "octo/widgets"));
    assert_eq!(report.opportunities.len(), 2);
}

#[tokio::test]
async fn rejected_credentials_abort_the_run() {
    let (repos, tracker) = fleet();
    tracker.fail(
        &RepoId::new("octo/widgets"),
        ProviderError::Authentication("Bad credentials".into()),
    );
    let engine = engine(tracker, Arc::new(scripted_llm()));

    let err = engine
        .discover(&repos, &docs_profile(), 10)
        .await
        .unwrap_err();
    assert!(matches!(err, ForkSyncError::Authentication { .. }));
}

#[tokio::test]
async fn pages_are_followed_up_to_the_bound() {
    let repo = tracked("octo/widgets");
    let tracker = FakeIssueTracker::new();
    let pages = (1..=5)
        .map(|n| IssuePage {
            issues: vec![issue("octo/widgets", n, &format!("Issue {n}"), &[], days_ago(1))],
            ..IssuePage::default()
        })
        .collect();
    tracker.set_pages(&repo.id, pages);
    let tracker = Arc::new(tracker);

    let mut cfg = config();
    cfg.max_issue_pages = 2;
    let engine = engine_with(tracker.clone(), Arc::new(FakeLlm::new()), &cfg);

    let report = engine.discover(&[repo], &SkillProfile::new(), 10).await.unwrap();
    assert_eq!(report.candidates_seen, 2);
    assert_eq!(tracker.call_count(), 2);
}

#[tokio::test]
async fn duplicate_repositories_are_analyzed_once() {
    let (repos, tracker) = fleet();
    let llm = Arc::new(scripted_llm());
    let engine = engine(tracker, llm.clone());
    let doubled: Vec<_> = repos.iter().chain(repos.iter()).cloned().collect();

    let report = engine.discover(&doubled, &docs_profile(), 10).await.unwrap();
    assert_eq!(report.candidates_seen, 3);
    assert_eq!(report.opportunities.len(), 3);
    assert_eq!(llm.call_count(), 3);
}

#[tokio::test]
async fn per_request_budget_skips_expensive_candidates() {
    let (repos, tracker) = fleet();
    let llm = Arc::new(scripted_llm());
    let mut cfg = config();
    cfg.budget.max_cost_per_request_usd = 1e-9;
    let engine = engine_with(tracker, llm.clone(), &cfg);

    let report = engine.discover(&repos, &docs_profile(), 10).await.unwrap();
    assert!(report.opportunities.is_empty());
    assert_eq!(report.skipped.len(), 3);
    assert!(report.skipped.iter().all(|s| s.kind == "budget_exceeded"));
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn cancelled_run_reports_everything_as_cancelled() {
    let (repos, tracker) = fleet();
    let llm = Arc::new(scripted_llm());
    let engine = engine(tracker.clone(), llm.clone());
    let cancel = CancelSignal::new();
    cancel.cancel();

    let report = engine
        .discover_with_cancel(&repos, &docs_profile(), 10, &cancel)
        .await
        .unwrap();
    assert!(report.opportunities.is_empty());
    assert_eq!(report.failed_repos.len(), 2);
    assert!(report.failed_repos.iter().all(|f| f.kind == "cancelled"));
    assert_eq!(tracker.call_count(), 0);
    assert_eq!(llm.call_count(), 0);
}
