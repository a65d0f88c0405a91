// tests/dispatch_cycle.rs
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{body, document, harness, harness_with, Behavior, FlakyStore};
use serde_json::json;
use status_relay::dispatch::ServiceOutcome;
use status_relay::store::{JsonStore, KvStore, Namespace};
use status_relay::{DestinationId, LoopState};
use tokio_util::sync::CancellationToken;

const T0: &str = "2026-10-16T12:00:00Z";

fn github_doc(sections: &[(&str, &str, &str)]) -> status_relay::ingest::RawDocument {
    document("Incident with Actions", T0, &body(sections))
}

#[tokio::test(start_paused = true)]
async fn fan_out_isolates_failing_destination() {
    let h = harness(&["github"]);
    let subs = h.dispatch.subscriptions();
    subs.add("guild-a", "github", DestinationId(1)).await.unwrap();
    subs.add("guild-a", "github", DestinationId(2)).await.unwrap();
    subs.add("guild-b", "github", DestinationId(3)).await.unwrap();
    h.notifier.fail_for(DestinationId(2));
    h.source.serve(
        "github",
        github_doc(&[("Oct 16, 12:00 UTC", "Investigating", "Looking into it.")]),
        "etag-1",
    );

    let report = h.dispatch.run_cycle().await;

    assert_eq!(
        report.outcome("github"),
        Some(&ServiceOutcome::Delivered {
            delivered: 2,
            failed: 1
        })
    );
    assert_eq!(
        h.notifier.destinations(),
        vec![DestinationId(1), DestinationId(3)]
    );
    assert_eq!(h.notifier.attempts(), 3);
    // Accepted state stays in place despite the failed destination.
    assert!(h.dispatch.detector().last_known("github").await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn refetch_of_unchanged_entry_is_not_resent() {
    let h = harness(&["github"]);
    h.dispatch
        .subscriptions()
        .add("guild-a", "github", DestinationId(10))
        .await
        .unwrap();
    let sections = [("Oct 16, 12:00 UTC", "Investigating", "Looking into it.")];
    h.source.serve("github", github_doc(&sections), "etag-1");
    h.dispatch.run_cycle().await;

    // Same content, new published time and new etag: a ghost.
    h.source.serve(
        "github",
        document("Incident with Actions", "2026-10-16T12:03:00Z", &body(&sections)),
        "etag-2",
    );
    let report = h.dispatch.run_cycle().await;

    assert_eq!(report.outcome("github"), Some(&ServiceOutcome::Ghost));
    assert_eq!(h.notifier.destinations().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn caching_token_round_trips_and_unchanged_is_quiet() {
    let h = harness(&["github"]);
    h.source.serve(
        "github",
        github_doc(&[("Oct 16, 12:00 UTC", "Investigating", "x")]),
        "etag-1",
    );
    h.dispatch.run_cycle().await;
    h.source.set("github", Behavior::Unchanged);
    let report = h.dispatch.run_cycle().await;

    assert_eq!(report.outcome("github"), Some(&ServiceOutcome::Unchanged));
    assert_eq!(
        h.source.calls_for("github"),
        vec![None, Some("etag-1".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn non_200_is_a_fetch_failure_without_state_change() {
    let h = harness(&["github"]);
    h.source.set(
        "github",
        Behavior::Serve {
            document: github_doc(&[("Oct 16, 12:00 UTC", "Investigating", "x")]),
            token: Some("etag-bad".into()),
            status: 503,
        },
    );
    let report = h.dispatch.run_cycle().await;

    assert!(matches!(
        report.outcome("github"),
        Some(ServiceOutcome::Failed { .. })
    ));
    assert!(h
        .store
        .get(Namespace::CachingToken, "github")
        .await
        .unwrap()
        .is_none());
    assert!(h.dispatch.detector().last_known("github").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn malformed_feed_skips_service_and_keeps_going() {
    let h = harness(&["broken", "github"]);
    h.source.serve(
        "broken",
        status_relay::ingest::RawDocument::default(),
        "etag-x",
    );
    h.source.serve(
        "github",
        github_doc(&[("Oct 16, 12:00 UTC", "Investigating", "x")]),
        "etag-1",
    );
    let report = h.dispatch.run_cycle().await;

    assert!(matches!(
        report.outcome("broken"),
        Some(ServiceOutcome::Failed { .. })
    ));
    assert!(matches!(
        report.outcome("github"),
        Some(ServiceOutcome::Delivered { .. })
    ));
    // No token stored for a document that could not be normalized.
    assert!(h
        .store
        .get(Namespace::CachingToken, "broken")
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        h.store.get(Namespace::CachingToken, "github").await.unwrap(),
        Some(json!("etag-1"))
    );
}

#[tokio::test(start_paused = true)]
async fn connection_failure_does_not_abort_cycle() {
    let h = harness(&["down", "github"]);
    h.source.set("down", Behavior::ConnectionRefused);
    h.source.serve(
        "github",
        github_doc(&[("Oct 16, 12:00 UTC", "Investigating", "x")]),
        "etag-1",
    );
    let report = h.dispatch.run_cycle().await;
    assert!(!report.timed_out);
    assert_eq!(report.outcomes.len(), 2);
    assert!(matches!(
        report.outcome("github"),
        Some(ServiceOutcome::Delivered { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn hanging_fetch_defers_remaining_services_to_next_cycle() {
    let h = harness(&["slow", "github"]);
    h.dispatch
        .subscriptions()
        .add("guild-a", "github", DestinationId(5))
        .await
        .unwrap();
    h.source.set("slow", Behavior::Hang);
    h.source.serve(
        "github",
        github_doc(&[("Oct 16, 12:00 UTC", "Investigating", "x")]),
        "etag-1",
    );

    let first = h.dispatch.run_cycle().await;
    assert!(first.timed_out);
    assert_eq!(first.skipped, vec!["slow".to_string(), "github".to_string()]);
    assert!(h.notifier.destinations().is_empty());
    assert_eq!(h.dispatch.state(), LoopState::Idle);

    h.source.set("slow", Behavior::Unchanged);
    let second = h.dispatch.run_cycle().await;
    assert!(!second.timed_out);
    assert_eq!(h.notifier.destinations(), vec![DestinationId(5)]);
}

#[tokio::test(start_paused = true)]
async fn loop_waits_for_readiness_and_stops_on_cancel() {
    let h = harness(&["github"]);
    h.source.set("github", Behavior::Unchanged);
    let cancel = CancellationToken::new();
    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<()>();
    let mut status = h.dispatch.watch_status();

    let task = tokio::spawn(h.dispatch.clone().run(
        async move {
            let _ = ready_rx.await;
        },
        cancel.clone(),
    ));

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(h.dispatch.state(), LoopState::NotStarted);
    assert!(h.source.calls_for("github").is_empty());

    ready_tx.send(()).unwrap();
    status
        .wait_for(|s| s.cycles >= 1 && s.state == LoopState::Idle)
        .await
        .unwrap();
    assert!(h.dispatch.is_healthy(chrono::Utc::now()));

    // Two more ticks at the 3 minute interval.
    tokio::time::sleep(Duration::from_secs(361)).await;
    assert!(h.dispatch.status().cycles >= 3);

    cancel.cancel();
    task.await.unwrap();
    assert_eq!(h.dispatch.state(), LoopState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn manual_check_uses_the_same_pipeline() {
    let h = harness(&["github"]);
    h.dispatch
        .subscriptions()
        .add("guild-a", "github", DestinationId(9))
        .await
        .unwrap();
    h.source.serve(
        "github",
        github_doc(&[("Oct 16, 12:00 UTC", "Investigating", "x")]),
        "etag-1",
    );
    let outcome = h.dispatch.check_service("GitHub").await.unwrap();
    assert_eq!(
        outcome,
        ServiceOutcome::Delivered {
            delivered: 1,
            failed: 0
        }
    );
    assert!(h.dispatch.check_service("nope").await.is_err());
}

#[tokio::test(start_paused = true)]
async fn failed_state_write_leaves_token_unset_so_update_is_retried() {
    let store = Arc::new(JsonStore::in_memory());
    let h = harness_with(
        &["github"],
        store.clone(),
        Arc::new(FlakyStore::new(store, 1)),
    );
    h.dispatch
        .subscriptions()
        .add("guild-a", "github", DestinationId(8))
        .await
        .unwrap();
    h.source.set(
        "github",
        Behavior::Conditional {
            document: github_doc(&[("Oct 16, 12:00 UTC", "Investigating", "x")]),
            token: "etag-1".into(),
        },
    );

    let first = h.dispatch.run_cycle().await;
    assert!(matches!(
        first.outcome("github"),
        Some(ServiceOutcome::Failed { .. })
    ));
    assert!(h
        .store
        .get(Namespace::CachingToken, "github")
        .await
        .unwrap()
        .is_none());

    let second = h.dispatch.run_cycle().await;
    assert_eq!(
        second.outcome("github"),
        Some(&ServiceOutcome::Delivered {
            delivered: 1,
            failed: 0
        })
    );
    assert_eq!(h.notifier.destinations(), vec![DestinationId(8)]);

    let third = h.dispatch.run_cycle().await;
    assert_eq!(third.outcome("github"), Some(&ServiceOutcome::Unchanged));
    assert_eq!(
        h.source.calls_for("github"),
        vec![None, None, Some("etag-1".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_during_hanging_fetch_abandons_the_cycle() {
    let h = harness(&["slow", "github"]);
    h.dispatch
        .subscriptions()
        .add("guild-a", "github", DestinationId(5))
        .await
        .unwrap();
    h.source.set("slow", Behavior::Hang);
    h.source.serve(
        "github",
        github_doc(&[("Oct 16, 12:00 UTC", "Investigating", "x")]),
        "etag-1",
    );
    let cancel = CancellationToken::new();
    let mut status = h.dispatch.watch_status();
    let started = tokio::time::Instant::now();

    let task = tokio::spawn(h.dispatch.clone().run(async {}, cancel.clone()));
    status
        .wait_for(|s| s.state == LoopState::Polling)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.source.calls_for("slow").len(), 1);

    cancel.cancel();
    task.await.unwrap();

    assert_eq!(h.dispatch.state(), LoopState::Stopped);
    assert!(started.elapsed() < h.dispatch.config().cycle_timeout);
    assert!(h.source.calls_for("github").is_empty());
    assert!(h.notifier.destinations().is_empty());
    assert_eq!(h.dispatch.status().cycles, 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_before_readiness_stops_without_polling() {
    let h = harness(&["github"]);
    h.source.serve(
        "github",
        github_doc(&[("Oct 16, 12:00 UTC", "Investigating", "x")]),
        "etag-1",
    );
    let cancel = CancellationToken::new();
    let task = tokio::spawn(
        h.dispatch
            .clone()
            .run(std::future::pending::<()>(), cancel.clone()),
    );

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(h.dispatch.state(), LoopState::NotStarted);

    cancel.cancel();
    task.await.unwrap();

    assert_eq!(h.dispatch.state(), LoopState::Stopped);
    assert_eq!(h.dispatch.status().cycles, 0);
    assert!(h.source.calls_for("github").is_empty());
    assert!(h.notifier.destinations().is_empty());
}
