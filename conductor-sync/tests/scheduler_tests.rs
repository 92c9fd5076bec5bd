//! Tier Scheduler behaviour, driven through the orchestrator.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use conductor_core::{ErrorCode, ExecutionStatus, PriorityTier};
use conductor_sync::{ConnectorError, SyncBatch};

use common::{builder_with_fakes, depends_on, key, target, FakeConnector, Gauge};

const SEC: Duration = Duration::from_secs(1);

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

fn after(duration: Duration) -> chrono::DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(duration).expect("duration")
}

// ---------------------------------------------------------------------------
// 1. Tier ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tiers_dispatch_in_strict_order() {
    let orchestrator = builder_with_fakes(vec![
        target("a/low", PriorityTier::Low, secs(60)),
        target("b/medium", PriorityTier::Medium, secs(60)),
        target("c/high", PriorityTier::High, secs(60)),
        target("d/realtime", PriorityTier::RealTime, secs(60)),
        target("e/high", PriorityTier::High, secs(60)),
        target("f/realtime", PriorityTier::RealTime, secs(60)),
    ])
    .build()
    .expect("build");

    let summary = orchestrator.tick().finish().await;
    let dispatched = &summary.report.dispatched;

    let order: Vec<String> = dispatched.iter().map(|d| d.key.to_string()).collect();
    assert_eq!(
        order,
        ["d/realtime", "f/realtime", "c/high", "e/high", "b/medium", "a/low"]
    );
    for pair in dispatched.windows(2) {
        assert!(pair[0].tier <= pair[1].tier);
        assert!(pair[0].dispatched_at <= pair[1].dispatched_at);
        assert_eq!(pair[0].sequence + 1, pair[1].sequence);
    }
    assert_eq!(summary.executions.len(), 6);
    assert!(summary
        .executions
        .iter()
        .all(|o| o.record.status == ExecutionStatus::Success));
}

#[tokio::test]
async fn targets_run_again_only_after_their_interval() {
    let orchestrator = builder_with_fakes(vec![target("a/x", PriorityTier::High, secs(60))])
        .build()
        .expect("build");

    assert_eq!(orchestrator.tick().finish().await.executions.len(), 1);
    assert!(orchestrator.tick_at(after(secs(30))).finish().await.executions.is_empty());
    assert_eq!(orchestrator.tick_at(after(secs(61))).finish().await.executions.len(), 1);
}

// ---------------------------------------------------------------------------
// 2. Dependencies
// ---------------------------------------------------------------------------

/// A real-time, B high depending on A: A goes out before B is evaluated.
#[tokio::test]
async fn prerequisite_dispatches_first_and_both_end_successful() {
    let orchestrator = builder_with_fakes(vec![
        target("svc/a", PriorityTier::RealTime, secs(60)),
        depends_on(target("svc/b", PriorityTier::High, secs(300)), &["svc/a"]),
    ])
    .build()
    .expect("build");

    let first = orchestrator.tick().finish().await;
    assert_eq!(first.report.dispatched[0].key, key("svc/a"));
    assert_eq!(first.report.skipped.len(), 1);
    assert_eq!(first.report.skipped[0].key, key("svc/b"));

    let second = orchestrator.tick().finish().await;
    assert_eq!(
        second.record_for(&key("svc/b")).map(|r| r.status),
        Some(ExecutionStatus::Success)
    );

    let status = orchestrator.status().await;
    for raw in ["svc/a", "svc/b"] {
        assert_eq!(
            status.target(&key(raw)).expect("target").status,
            ExecutionStatus::Success
        );
    }
}

/// C depends on D, which has no record: C is skipped and stays due.
#[tokio::test(start_paused = true)]
async fn skip_leaves_prerequisite_untouched_and_due_timer_unchanged() {
    let c = depends_on(target("svc/c", PriorityTier::High, secs(300)), &["svc/d"]);
    let d = target("svc/d", PriorityTier::Low, secs(300));
    let slow_d = FakeConnector::new("svc/d").delay(secs(5)).shared();
    let orchestrator = builder_with_fakes(vec![c, d])
        .connector(key("svc/d"), slow_d)
        .build()
        .expect("build");

    let first = orchestrator.tick();
    let report = first.report().clone();
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].dependency, key("svc/d"));
    assert!(report.skipped[0].recorded);
    let d_record = orchestrator.state().get(&key("svc/d")).and_then(|s| s.last_record);
    assert!(d_record.is_none());

    let c_state = orchestrator.state().get(&key("svc/c")).expect("c state");
    let skip = c_state.last_record.expect("skip record");
    assert_eq!(skip.status, ExecutionStatus::Skipped);
    assert_eq!(skip.error_code, Some(ErrorCode::Dependency));
    assert!(skip.error.expect("reason").contains("never run"));
    assert!(c_state.last_execution.is_none());

    // One tick later C is evaluated again; D is still running and not re-dispatched.
    let second = orchestrator.tick_at(after(SEC));
    assert_eq!(second.report().skipped[0].key, key("svc/c"));
    assert_eq!(second.report().still_running, [key("svc/d")]);
    assert!(second.report().dispatched.is_empty());

    first.finish().await;
    second.finish().await;
    let third = orchestrator.tick().finish().await;
    assert_eq!(
        third.record_for(&key("svc/c")).map(|r| r.status),
        Some(ExecutionStatus::Success)
    );
}

#[tokio::test]
async fn dependent_is_skipped_until_prerequisite_succeeds() {
    let flaky = FakeConnector::new("src/a")
        .then(Err(ConnectorError::permanent("down")))
        .then(Err(ConnectorError::permanent("down")))
        .shared();
    let orchestrator = builder_with_fakes(vec![
        target("src/a", PriorityTier::RealTime, Duration::from_millis(800)),
        depends_on(target("dst/b", PriorityTier::High, secs(60)), &["src/a"]),
    ])
    .connector(key("src/a"), flaky)
    .build()
    .expect("build");

    let mut b_statuses = Vec::new();
    for _ in 0..4 {
        let summary = orchestrator.tick_at(after(SEC)).finish().await;
        let b = orchestrator.state().get(&key("dst/b")).expect("b state");
        b_statuses.push(b.last_record.expect("b record").status);
        if summary.record_for(&key("dst/b")).is_some() {
            break;
        }
    }

    // a fails, fails, succeeds; b only runs on the tick after the success.
    assert_eq!(
        b_statuses,
        [
            ExecutionStatus::Skipped,
            ExecutionStatus::Skipped,
            ExecutionStatus::Skipped,
            ExecutionStatus::Success,
        ]
    );
}

#[tokio::test]
async fn stale_prerequisite_blocks_its_dependent() {
    let orchestrator = builder_with_fakes(vec![
        depends_on(target("dst/b", PriorityTier::High, secs(60)), &["src/a"]),
        target("src/a", PriorityTier::Low, secs(1)),
    ])
    .build()
    .expect("build");

    // Tick 1: b skipped (a never ran), a succeeds.
    orchestrator.tick().finish().await;

    // Tick 2, three seconds on: a's success is older than 2 × 1s.
    let stale = orchestrator.tick_at(after(secs(3))).finish().await;
    let skip = &stale.report.skipped[0];
    assert_eq!(skip.key, key("dst/b"));
    assert!(skip.reason.contains("exceeds"), "{}", skip.reason);
    assert!(stale.record_for(&key("src/a")).is_some());

    // Tick 3, right after a's fresh success: b runs.
    let fresh = orchestrator.tick_at(after(Duration::from_millis(200))).finish().await;
    assert_eq!(
        fresh.record_for(&key("dst/b")).map(|r| r.status),
        Some(ExecutionStatus::Success)
    );
}

// ---------------------------------------------------------------------------
// 3. Worker pools
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn medium_tier_runs_at_most_pool_size_at_once() {
    let gauge = Gauge::new();
    let keys = ["m/one", "m/two", "m/three", "m/four", "m/five"];
    let mut builder = builder_with_fakes(
        keys.iter()
            .map(|raw| target(raw, PriorityTier::Medium, secs(60)))
            .collect(),
    )
    .worker_pool_size(3);
    for raw in keys {
        builder = builder.connector(
            key(raw),
            FakeConnector::new(raw).delay(secs(10)).gauge(&gauge).shared(),
        );
    }
    let orchestrator = builder.build().expect("build");

    let summary = orchestrator.tick().finish().await;

    assert_eq!(gauge.max(), 3);
    assert_eq!(summary.executions.len(), 5);
    let starts = gauge.starts();
    let started: Vec<String> = starts.iter().map(|(k, _)| k.to_string()).collect();
    assert_eq!(started, keys, "waiting targets start first-in first-out");
    let first = starts[0].1;
    assert!(starts[..3].iter().all(|(_, at)| *at - first < SEC));
    assert!(starts[3..].iter().all(|(_, at)| *at - first >= secs(10)));
}

#[tokio::test(start_paused = true)]
async fn high_tier_is_not_bounded_by_the_pool() {
    let gauge = Gauge::new();
    let keys = ["h/one", "h/two", "h/three", "h/four", "h/five"];
    let mut builder = builder_with_fakes(
        keys.iter()
            .map(|raw| target(raw, PriorityTier::High, secs(60)))
            .collect(),
    )
    .worker_pool_size(2);
    for raw in keys {
        builder = builder.connector(
            key(raw),
            FakeConnector::new(raw).delay(secs(10)).gauge(&gauge).shared(),
        );
    }
    let orchestrator = builder.build().expect("build");

    orchestrator.tick().finish().await;
    assert_eq!(gauge.max(), 5);
}

// ---------------------------------------------------------------------------
// 4. Mutual exclusion across the scheduler and force-syncs
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn force_syncs_and_a_tick_never_overlap_on_one_target() {
    let gauge = Gauge::new();
    let connector = FakeConnector::new("crm/deals")
        .delay(Duration::from_millis(100))
        .gauge(&gauge)
        .returning(SyncBatch::counted(1))
        .shared();
    let orchestrator = Arc::new(
        builder_with_fakes(vec![target("crm/deals", PriorityTier::High, secs(60))])
            .connector(key("crm/deals"), connector.clone())
            .build()
            .expect("build"),
    );

    let tick = orchestrator.tick();
    let mut forced = Vec::new();
    for _ in 0..4 {
        let orchestrator = Arc::clone(&orchestrator);
        forced.push(tokio::spawn(async move {
            orchestrator.force_sync(&key("crm/deals")).await
        }));
    }
    let summary = tick.finish().await;
    let mut records: Vec<_> = summary.executions.into_iter().map(|o| o.record).collect();
    for task in forced {
        records.push(task.await.expect("join").expect("force sync").record);
    }

    assert_eq!(connector.calls(), 5);
    assert_eq!(gauge.max(), 1);
    records.sort_by_key(|r| r.started_at);
    for pair in records.windows(2) {
        assert!(pair[0].recorded_at <= pair[1].started_at);
    }
    let metrics = orchestrator.state().get(&key("crm/deals")).expect("state").metrics;
    assert_eq!(metrics.successes, 5);
}
