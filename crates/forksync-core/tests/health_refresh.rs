//! Health refresh through the facade and the store.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use forksync_core::fakes::FakeActivity;
use forksync_core::ports::{CiSignal, RepoActivity};
use forksync_core::{
    ApiFacade, EngineConfig, ForkSyncError, HealthAggregator, HealthStatus, HealthSummary,
    ManualClock, ProviderError, RepositoryStateStore,
};
use forksync_state::fakes::MemoryKvStore;
use forksync_state::{RepoId, SyncOutcome, SyncResult, TrackedRepository};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

async fn setup(names: &[&str]) -> (Arc<RepositoryStateStore>, Arc<FakeActivity>, HealthAggregator) {
    let mut config = EngineConfig::default();
    config.retry.jitter = false;
    config.retry.backoff_base_ms = 10;
    let facade = Arc::new(ApiFacade::new(&config, Arc::new(ManualClock::new(t0()))));
    let store = Arc::new(RepositoryStateStore::empty(
        Arc::new(MemoryKvStore::new()),
        20,
    ));
    for name in names {
        store
            .register(TrackedRepository::new(
                RepoId::new(*name),
                format!("/forks/{name}"),
                format!("https://github.com/{name}.git"),
                t0(),
            ))
            .await
            .unwrap();
    }
    let source = Arc::new(FakeActivity::new());
    let aggregator = HealthAggregator::new(
        facade,
        source.clone(),
        store.clone(),
        config.health_weights.clone(),
    );
    (store, source, aggregator)
}

fn conflicted(name: &str) -> SyncResult {
    SyncResult {
        repo: RepoId::new(name),
        status: SyncOutcome::Conflicted,
        commits_behind: 2,
        commits_ahead: 1,
        conflicted_paths: vec!["src/lib.rs".to_string()],
        upstream_head: Some("c1".to_string()),
        error: None,
        started_at: t0(),
        finished_at: t0(),
    }
}

#[tokio::test]
async fn refresh_scores_and_stores_each_repository() {
    let (store, source, aggregator) = setup(&["octo/healthy", "octo/neglected"]).await;
    let healthy = RepoId::new("octo/healthy");
    let neglected = RepoId::new("octo/neglected");

    source.set(
        &healthy,
        RepoActivity {
            last_upstream_activity: Some(t0()),
            open_issues: 12,
            opened_last_30d: 4,
            closed_last_30d: 4,
            ci: CiSignal::Passing,
        },
    );
    source.set(
        &neglected,
        RepoActivity {
            last_upstream_activity: Some(t0() - chrono::Duration::days(90)),
            open_issues: 80,
            opened_last_30d: 10,
            closed_last_30d: 1,
            ci: CiSignal::Failing,
        },
    );
    store
        .record_sync_result(&neglected, conflicted("octo/neglected"))
        .await
        .unwrap();

    let reports = aggregator
        .refresh(&[healthy.clone(), neglected.clone()], 4)
        .await
        .unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].repo, healthy);
    assert!((reports[0].score.unwrap() - 100.0).abs() < 1e-9);
    assert_eq!(reports[0].status, Some(HealthStatus::Excellent));

    let low = reports[1].score.unwrap();
    assert!((low - 10.25).abs() < 1e-9, "score was {low}");
    assert_eq!(reports[1].status, Some(HealthStatus::Critical));

    assert_eq!(store.get(&healthy).unwrap().health_score, reports[0].score);
    assert_eq!(store.get(&neglected).unwrap().health_score, Some(low));

    let summary = HealthSummary::from_repositories(&store.list());
    assert_eq!((summary.excellent, summary.critical, summary.unscored), (1, 1, 0));
}

#[tokio::test]
async fn signal_failure_leaves_previous_score() {
    let (store, source, aggregator) = setup(&["octo/widgets"]).await;
    let id = RepoId::new("octo/widgets");
    store.record_health(&id, 64.0).await.unwrap();
    source.fail(
        &id,
        ProviderError::Rejected {
            status: 404,
            message: "Not Found".into(),
        },
    );

    let reports = aggregator
        .refresh(&[id.clone(), RepoId::new("octo/ghost")], 2)
        .await
        .unwrap();

    assert!(reports[0].score.is_none());
    assert!(reports[0].error.is_some());
    assert!(reports[1].error.as_deref().unwrap().contains("not registered"));
    assert_eq!(store.get(&id).unwrap().health_score, Some(64.0));
}

#[tokio::test]
async fn rejected_credentials_abort_refresh() {
    let (_store, source, aggregator) = setup(&["octo/widgets"]).await;
    let id = RepoId::new("octo/widgets");
    source.fail(&id, ProviderError::Authentication("Bad credentials".into()));

    let err = aggregator.refresh(&[id], 1).await.unwrap_err();
    assert!(matches!(err, ForkSyncError::Authentication { .. }));
    assert_eq!(source.call_count(), 1);
}
