//! Batch Coordinator and Sync Engine against scripted git.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use forksync_core::fakes::FakeGit;
use forksync_core::{
    ApiFacade, BatchCoordinator, CancelSignal, Clock, EngineConfig, ManualClock, ProviderError,
    RepositoryStateStore, SyncEngine, SyncPhase,
};
use forksync_state::fakes::MemoryKvStore;
use forksync_state::{RepoId, SyncErrorKind, SyncOutcome, TrackedRepository};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

struct Harness {
    clock: Arc<ManualClock>,
    git: Arc<FakeGit>,
    store: Arc<RepositoryStateStore>,
    engine: Arc<SyncEngine>,
    coordinator: BatchCoordinator,
}

async fn harness(names: &[&str]) -> Harness {
    let mut config = EngineConfig::default();
    config.retry.jitter = false;
    config.retry.backoff_base_ms = 10;

    let clock = Arc::new(ManualClock::new(t0()));
    let facade = Arc::new(ApiFacade::new(&config, clock.clone()));
    let store = Arc::new(RepositoryStateStore::empty(
        Arc::new(MemoryKvStore::new()),
        config.history_limit,
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
    let git = Arc::new(FakeGit::new());
    let engine = Arc::new(SyncEngine::new(git.clone(), facade, store.clone()));
    Harness {
        clock,
        git,
        store,
        coordinator: BatchCoordinator::new(engine.clone()),
        engine,
    }
}

fn ids(names: &[&str]) -> Vec<RepoId> {
    names.iter().map(|n| RepoId::new(*n)).collect()
}

#[tokio::test]
async fn mixed_fleet_end_to_end() {
    let names = ["octo/alpha", "octo/beta", "octo/gamma"];
    let h = harness(&names).await;
    let all = ids(&names);
    let (a, b, c) = (all[0].clone(), all[1].clone(), all[2].clone());
    h.git.set_upstream(&a, "a1", 0, 0);
    h.git.set_upstream(&b, "b1", 0, 3);
    h.git.set_upstream(&c, "c1", 2, 1);
    h.git.set_conflict(&c, &["src/x.py"]);

    let summary = h
        .coordinator
        .sync_all(&ids(&names), 2, &CancelSignal::new())
        .await;

    assert_eq!(summary.total(), 3);
    assert_eq!(
        summary.results.iter().map(|r| r.repo.clone()).collect::<Vec<_>>(),
        ids(&names)
    );
    assert_eq!(summary.results[0].status, SyncOutcome::UpToDate);

    let merged = &summary.results[1];
    assert_eq!(merged.status, SyncOutcome::Merged);
    assert_eq!((merged.commits_behind, merged.commits_ahead), (3, 0));

    let conflicted = &summary.results[2];
    assert_eq!(conflicted.status, SyncOutcome::Conflicted);
    assert_eq!(conflicted.conflicted_paths, vec!["src/x.py".to_string()]);
    assert_eq!((conflicted.commits_behind, conflicted.commits_ahead), (1, 2));

    assert_eq!(
        (summary.up_to_date, summary.merged, summary.conflicted, summary.errored),
        (1, 1, 1, 0)
    );
    assert!(summary.fatal.is_none());

    // Conflicts are recorded but do not advance the known upstream commit.
    let stored = h.store.get(&c).unwrap();
    assert_eq!(stored.sync_status, Some(SyncOutcome::Conflicted));
    assert!(stored.last_upstream_commit.is_none());
    assert_eq!(
        h.store.get(&b).unwrap().last_upstream_commit.as_deref(),
        Some("b1")
    );
}

#[tokio::test]
async fn second_sync_without_upstream_change_is_up_to_date() {
    let h = harness(&["octo/beta"]).await;
    let id = RepoId::new("octo/beta");
    h.git.set_upstream(&id, "b1", 0, 4);

    let first = h.engine.sync(&id).await;
    assert_eq!(first.status, SyncOutcome::Merged);

    let (second, phases) = h.engine.sync_traced(&id).await;
    assert_eq!(second.status, SyncOutcome::UpToDate);
    assert_eq!((second.commits_behind, second.commits_ahead), (0, 0));
    assert_eq!(h.git.merge_count(&id), 1);
    assert_eq!(
        phases,
        vec![
            SyncPhase::Idle,
            SyncPhase::Fetching,
            SyncPhase::Comparing,
            SyncPhase::UpToDate,
            SyncPhase::Recorded,
        ]
    );
    assert_eq!(h.store.history(&id).unwrap().len(), 2);
}

#[tokio::test]
async fn failures_and_unknown_ids_still_yield_one_result_each_in_order() {
    let names = ["octo/alpha", "octo/beta"];
    let h = harness(&names).await;
    let alpha = RepoId::new("octo/alpha");
    h.git.set_upstream(&alpha, "a1", 0, 0);
    for _ in 0..3 {
        h.git
            .fail_fetch(&RepoId::new("octo/beta"), ProviderError::Network("reset".into()));
    }

    let requested = ids(&["octo/beta", "octo/ghost", "octo/alpha", "octo/beta"]);
    let summary = h
        .coordinator
        .sync_all(&requested, 4, &CancelSignal::new())
        .await;

    assert_eq!(summary.total(), 4);
    let repos: Vec<_> = summary.results.iter().map(|r| r.repo.clone()).collect();
    assert_eq!(repos, requested);

    assert_eq!(summary.results[0].error_kind(), Some(SyncErrorKind::Transient));
    assert_eq!(
        summary.results[1].error_kind(),
        Some(SyncErrorKind::NotRegistered)
    );
    assert_eq!(summary.results[2].status, SyncOutcome::UpToDate);
    // Repeated id: synced once, result repeated.
    assert_eq!(summary.results[3], summary.results[0]);
    assert_eq!(h.git.fetch_count(&RepoId::new("octo/beta")), 3);

    // Unknown ids are not recorded.
    assert!(h.store.get(&RepoId::new("octo/ghost")).is_none());
    assert!(!summary.is_success());
}

#[tokio::test]
async fn transient_fetch_failure_recovers_within_retry_budget() {
    let h = harness(&["octo/beta"]).await;
    let id = RepoId::new("octo/beta");
    h.git.set_upstream(&id, "b2", 0, 1);
    h.git.fail_fetch(
        &id,
        ProviderError::Server {
            status: 502,
            message: "bad gateway".into(),
        },
    );

    let result = h.engine.sync(&id).await;
    assert_eq!(result.status, SyncOutcome::Merged);
    assert_eq!(h.git.fetch_count(&id), 2);
}

#[tokio::test]
async fn pre_cancelled_batch_dispatches_nothing() {
    let names = ["octo/alpha", "octo/beta", "octo/gamma"];
    let h = harness(&names).await;
    let cancel = CancelSignal::new();
    cancel.cancel();

    let summary = h.coordinator.sync_all(&ids(&names), 2, &cancel).await;

    assert_eq!(summary.total(), 3);
    assert!(summary
        .results
        .iter()
        .all(|r| r.error_kind() == Some(SyncErrorKind::Cancelled)));
    for id in ids(&names) {
        assert_eq!(h.git.fetch_count(&id), 0);
        assert!(h.store.get(&id).unwrap().sync_status.is_none());
    }
}

#[tokio::test]
async fn authentication_failure_stops_further_dispatch() {
    let names = ["octo/alpha", "octo/beta", "octo/gamma"];
    let h = harness(&names).await;
    let alpha = RepoId::new("octo/alpha");
    h.git
        .fail_fetch(&alpha, ProviderError::Authentication("bad credentials".into()));

    let summary = h
        .coordinator
        .sync_all(&ids(&names), 1, &CancelSignal::new())
        .await;

    assert_eq!(summary.total(), 3);
    assert_eq!(
        summary.results[0].error_kind(),
        Some(SyncErrorKind::Authentication)
    );
    assert_eq!(
        summary.results[1].error_kind(),
        Some(SyncErrorKind::Cancelled)
    );
    assert_eq!(
        summary.results[2].error_kind(),
        Some(SyncErrorKind::Cancelled)
    );
    assert!(summary.fatal.is_some());
    // Credentials are never retried.
    assert_eq!(h.git.fetch_count(&alpha), 1);
    assert_eq!(h.git.fetch_count(&RepoId::new("octo/beta")), 0);
}

#[tokio::test]
async fn merge_refusal_is_a_git_error() {
    let h = harness(&["octo/beta"]).await;
    let id = RepoId::new("octo/beta");
    h.git.set_upstream(&id, "b1", 1, 1);
    h.git.fail_merge(
        &id,
        ProviderError::Operation("working tree has uncommitted changes".into()),
    );

    let (result, phases) = h.engine.sync_traced(&id).await;
    assert_eq!(result.status, SyncOutcome::Error);
    assert_eq!(result.error_kind(), Some(SyncErrorKind::Git));
    assert_eq!(result.upstream_head.as_deref(), Some("b1"));
    assert_eq!(phases.last(), Some(&SyncPhase::Recorded));
    assert!(phases.contains(&SyncPhase::Error));
}

#[tokio::test]
async fn fleet_larger_than_the_git_window_syncs_without_waiting() {
    let names: Vec<String> = (0..75).map(|i| format!("octo/fork-{i:02}")).collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    let h = harness(&names).await;
    for id in ids(&names) {
        h.git.set_upstream(&id, "u1", 0, 0);
    }

    let summary = h
        .coordinator
        .sync_all(&ids(&names), 4, &CancelSignal::new())
        .await;

    assert_eq!(summary.total(), 75);
    assert_eq!(summary.up_to_date, 75);
    assert!(h.clock.sleeps().is_empty());
    assert_eq!(h.clock.now(), t0());
}
