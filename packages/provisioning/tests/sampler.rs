mod common;

use std::sync::Arc;
use std::time::Duration;

use provisioning::error::{SamplePhase, TargetError};
use provisioning::model::StatCategory;
use provisioning::sampler::{SamplerSummary, StatsSampler, MONITORING_DATABASE};
use provisioning::target::SystemIssue;
use provisioning_test_support::{Op, RecordingTarget, TestClock};
use serde_json::json;
use time::macros::datetime;
use tokio_util::sync::CancellationToken;

const PERIOD: Duration = Duration::from_secs(5);

fn sampler(target: &Arc<RecordingTarget>) -> StatsSampler<RecordingTarget, TestClock> {
    let clock = TestClock::stepping(datetime!(2024-05-01 12:00 UTC), time::Duration::seconds(5));
    StatsSampler::with_clock(Arc::clone(target), clock).period(PERIOD)
}

async fn run_for(sampler: StatsSampler<RecordingTarget, TestClock>, elapsed: Duration) -> SamplerSummary {
    let cancel = CancellationToken::new();
    let handle = sampler.spawn(cancel.clone());
    tokio::time::sleep(elapsed).await;
    cancel.cancel();
    handle.await.expect("sampler task panicked")
}

fn reads_appended(target: &RecordingTarget, table: &str) -> Vec<u64> {
    target
        .samples()
        .iter()
        .filter(|(_, t, _)| t == table)
        .map(|(_, _, sample)| {
            let payload = match &sample.payload {
                serde_json::Value::Array(items) => &items[0],
                other => other,
            };
            payload["read"].as_u64().expect("read counter")
        })
        .collect()
}

/// Test: a failing read on tick 3 of 5 does not stop ticks 4 and 5
#[tokio::test(start_paused = true)]
async fn test_tick_three_failure_is_contained() {
    let target = Arc::new(RecordingTarget::new());
    target.fail_nth(Op::ServerStats, 3, TargetError::failed("stats unavailable"));
    target.fail_nth(Op::QueryStats, 3, TargetError::failed("stats unavailable"));

    let summary = run_for(sampler(&target), PERIOD * 5 + Duration::from_secs(2)).await;

    assert_eq!(
        summary,
        SamplerSummary {
            ticks: 5,
            appended: 8,
            failures: 2,
        }
    );
    assert_eq!(reads_appended(&target, "server_stats"), vec![1, 2, 4, 5]);
    assert_eq!(reads_appended(&target, "query_stats"), vec![1, 2, 4, 5]);
    assert!(target
        .samples()
        .iter()
        .all(|(db, _, _)| db == MONITORING_DATABASE));
}

/// Test: the first tick fires one period after start
#[tokio::test(start_paused = true)]
async fn test_no_sample_before_first_period() {
    let target = Arc::new(RecordingTarget::new());

    let summary = run_for(sampler(&target), PERIOD - Duration::from_millis(1)).await;

    assert_eq!(summary.ticks, 0);
    assert!(target.samples().is_empty());
    assert_eq!(target.count(Op::ServerStats), 0);
}

/// Test: cancelling stops the loop; no tick runs afterwards
#[tokio::test(start_paused = true)]
async fn test_cancel_stops_sampling() {
    let target = Arc::new(RecordingTarget::new());
    let cancel = CancellationToken::new();
    let handle = sampler(&target).spawn(cancel.clone());

    tokio::time::sleep(PERIOD * 2 + Duration::from_secs(1)).await;
    cancel.cancel();
    let summary = handle.await.expect("sampler task panicked");
    tokio::time::sleep(PERIOD * 3).await;

    assert_eq!(summary.ticks, 2);
    assert_eq!(target.count(Op::ServerStats), 2);
}

/// Test: one tick appends a timestamped sample per category
#[tokio::test]
async fn test_tick_appends_both_categories() {
    let target = Arc::new(RecordingTarget::new());
    let clock = TestClock::fixed(datetime!(2024-05-01 12:00 UTC));
    let sampler = StatsSampler::with_clock(Arc::clone(&target), clock).database("metrics");

    let outcome = sampler.tick().await;

    assert_eq!(outcome.appended, 2);
    assert!(outcome.failures.is_empty());
    let samples = target.samples();
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].0, "metrics");
    assert_eq!(samples[0].1, "server_stats");
    assert_eq!(samples[0].2.category, StatCategory::Server);
    assert_eq!(samples[1].1, "query_stats");
    assert_eq!(
        samples[0].2.to_document(),
        json!({
            "timestamp": "2024-05-01T12:00:00Z",
            "stats": { "read": 1, "connections": 1 },
        })
    );
}

/// Test: an append failure is reported for its category only
#[tokio::test]
async fn test_append_failure_reports_phase() {
    let target = Arc::new(RecordingTarget::new());
    target.fail_nth(Op::AppendSample, 1, TargetError::failed("disk full"));
    let sampler = StatsSampler::with_clock(
        Arc::clone(&target),
        TestClock::fixed(datetime!(2024-05-01 12:00 UTC)),
    );

    let outcome = sampler.tick().await;

    assert_eq!(outcome.appended, 1);
    assert_eq!(outcome.failures.len(), 1);
    let failure = &outcome.failures[0];
    assert_eq!(failure.category, StatCategory::Server);
    assert_eq!(failure.phase, SamplePhase::Append);
    assert!(failure.to_string().contains("disk full"));
}

/// Test: a zero period is raised to the minimum instead of panicking inside the task
#[tokio::test(start_paused = true)]
async fn test_zero_period_is_clamped() {
    let target = Arc::new(RecordingTarget::new());
    let sampler = sampler(&target).period(Duration::ZERO);

    let summary = run_for(sampler, Duration::from_millis(5)).await;

    assert!(summary.ticks >= 1);
    assert_eq!(summary.failures, 0);
}

/// Test: every tick reads the issue feed; an unreadable feed is not a sampling failure
#[tokio::test]
async fn test_tick_reports_system_issues() {
    let target = Arc::new(RecordingTarget::new());
    target.set_issues(vec![SystemIssue {
        session: "42".into(),
        blocked_by: vec!["17".into()],
        statement: "UPDATE users SET x = 1".into(),
        waiting_seconds: 3.0,
    }]);
    target.fail_nth(Op::CurrentIssues, 2, TargetError::failed("permission denied"));
    let sampler = StatsSampler::with_clock(
        Arc::clone(&target),
        TestClock::fixed(datetime!(2024-05-01 12:00 UTC)),
    );

    let first = sampler.tick().await;
    let second = sampler.tick().await;

    assert_eq!(first.issues, 1);
    assert_eq!(second.issues, 0);
    assert!(second.failures.is_empty());
    assert_eq!(second.appended, 2);
    assert_eq!(target.count(Op::CurrentIssues), 2);
}
