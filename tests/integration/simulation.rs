//! Race-day simulation.
//!
//! Replays a compressed race day through all three stages, moving the
//! clock and the pool snapshots between passes the way the cron schedule
//! and the tote feed would.

use chrono::Duration;
use std::sync::Arc;

use crate::mock_tote::{MockTote, Script};
use crate::{dead_race, jackpot_race, race, statuses, t0, world, World};
use superfecta::platforms::WageringProvider;
use superfecta::resilience::{GuardedWagering, ProviderGuard, RetryPolicy};
use superfecta::storage::{MemoryStore, RecommendationStore, SqliteStore};
use superfecta::types::RecommendationStatus;

const SF1: &str = "2026-10-19-SF1";

fn fast_guard() -> ProviderGuard {
    ProviderGuard::new(
        RetryPolicy {
            max_retries: 2,
            base_backoff: std::time::Duration::from_millis(1),
            timeout: std::time::Duration::from_secs(1),
        },
        100,
        100,
    )
}

/// Below-threshold at scan, held while the pool is dead, ready once the
/// jackpot lands, then placed.
async fn below_threshold_to_placement(store: Arc<dyn RecommendationStore>) {
    let tote = Arc::new(MockTote::new());
    let World {
        manager, source, ..
    } = world(vec![dead_race("SF1", 30)], store.clone(), tote.clone());

    manager.morning_scan(t0().date_naive(), t0()).await.unwrap();
    let rec = store.get_recommendation(SF1).await.unwrap().unwrap();
    assert_eq!(rec.status, RecommendationStatus::Monitoring);
    assert_eq!(rec.decision_reason.as_deref(), Some("non-positive-ev"));

    manager.live_monitor(t0() + Duration::minutes(10)).await.unwrap();
    manager.execute_ready(t0() + Duration::minutes(11)).await.unwrap();
    manager.live_monitor(t0() + Duration::minutes(20)).await.unwrap();
    assert_eq!(tote.attempts(), 0, "nothing may be placed before ready");
    assert_eq!(
        store.get_recommendation(SF1).await.unwrap().unwrap().status,
        RecommendationStatus::Hold
    );

    source.upsert_race(jackpot_race("SF1", 30));
    manager.live_monitor(t0() + Duration::minutes(26)).await.unwrap();
    let summary = manager.execute_ready(t0() + Duration::minutes(27)).await.unwrap();
    assert_eq!(summary.count("placed"), 1);

    let rec = store.get_recommendation(SF1).await.unwrap().unwrap();
    assert_eq!(rec.status, RecommendationStatus::Placed);
    assert!(rec.ready_at.unwrap() <= rec.finalized_at.unwrap());
    assert_eq!(tote.attempts(), 1);
    assert_eq!(tote.requests()[0].recommendation_id, SF1);

    let checks = store.live_checks(SF1).await.unwrap();
    let trail: Vec<RecommendationStatus> = checks.iter().map(|c| c.status).collect();
    assert_eq!(
        trail,
        vec![
            RecommendationStatus::Hold,
            RecommendationStatus::Hold,
            RecommendationStatus::Ready
        ]
    );
    assert!(checks.windows(2).all(|w| w[0].check_ts <= w[1].check_ts));
    assert!(!checks[0].threshold_met);
    assert!(checks[2].threshold_met);
}

#[tokio::test]
async fn test_below_threshold_never_skips_ready_memory() {
    below_threshold_to_placement(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn test_below_threshold_never_skips_ready_sqlite() {
    let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
    below_threshold_to_placement(Arc::new(store)).await;
}

#[tokio::test]
async fn test_race_day_mixed_card() {
    let tote = Arc::new(MockTote::new());
    let mut small_field = jackpot_race("SF3", 60);
    small_field.runners.truncate(4);
    let World {
        manager, store, ..
    } = world(
        vec![
            jackpot_race("SF1", 30),
            dead_race("SF2", 45),
            small_field,
            race("SF4", -10, 400.0, 0.3, 20_000.0),
        ],
        Arc::new(MemoryStore::new()),
        tote.clone(),
    );

    let scan = manager.morning_scan(t0().date_naive(), t0()).await.unwrap();
    assert_eq!(scan.considered, 4);
    assert_eq!(scan.count("filtered"), 2);
    assert_eq!(scan.count("monitoring"), 2);

    let monitor = manager.live_monitor(t0() + Duration::minutes(26)).await.unwrap();
    assert_eq!(monitor.count("ready"), 1);
    assert_eq!(monitor.count("hold"), 1);

    manager.execute_ready(t0() + Duration::minutes(27)).await.unwrap();
    // SF2 is 15 minutes past post by now.
    let late = manager.live_monitor(t0() + Duration::minutes(60)).await.unwrap();
    assert_eq!(late.count("skipped"), 1);

    let tally = statuses(&store).await;
    assert_eq!(tally.get("placed"), Some(&1));
    assert_eq!(tally.get("skipped"), Some(&1));
    assert_eq!(tally.get("filtered"), Some(&2));
    assert_eq!(tote.attempts(), 1);

    let sf4 = store
        .get_recommendation("2026-10-19-SF4")
        .await
        .unwrap()
        .unwrap();
    assert!(sf4
        .decision_reason
        .as_deref()
        .unwrap()
        .contains("post-time-passed"));

    // A finished card leaves nothing for another pass.
    let again = manager.live_monitor(t0() + Duration::minutes(61)).await.unwrap();
    assert_eq!(again.considered, 0);
}

#[tokio::test]
async fn test_not_accepted_placement_is_resent_with_same_ticket() {
    let tote = Arc::new(MockTote::new());
    tote.script([Script::NotAccepted("HTTP 429".to_string())]);
    let guarded: Arc<dyn WageringProvider> =
        Arc::new(GuardedWagering::new("mock", tote.clone(), fast_guard()));
    let World { manager, store, .. } =
        world(vec![jackpot_race("SF1", 30)], Arc::new(MemoryStore::new()), guarded);

    manager.morning_scan(t0().date_naive(), t0()).await.unwrap();
    manager.live_monitor(t0() + Duration::minutes(26)).await.unwrap();
    manager.execute_ready(t0() + Duration::minutes(27)).await.unwrap();

    let rec = store.get_recommendation(SF1).await.unwrap().unwrap();
    assert_eq!(rec.status, RecommendationStatus::Placed);
    assert_eq!(rec.bet_id.as_deref(), Some("MOCK-SF1-2"));

    let requests = tote.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].recommendation_id, requests[1].recommendation_id);
    assert_eq!(requests[0].total_stake, requests[1].total_stake);
}

#[tokio::test]
async fn test_ambiguous_placement_is_never_resent() {
    let tote = Arc::new(MockTote::new());
    tote.script([Script::Ambiguous("connection reset after send".to_string())]);
    let guarded: Arc<dyn WageringProvider> =
        Arc::new(GuardedWagering::new("mock", tote.clone(), fast_guard()));
    let World { manager, store, .. } =
        world(vec![jackpot_race("SF1", 30)], Arc::new(MemoryStore::new()), guarded);

    manager.morning_scan(t0().date_naive(), t0()).await.unwrap();
    manager.live_monitor(t0() + Duration::minutes(26)).await.unwrap();
    let summary = manager.execute_ready(t0() + Duration::minutes(27)).await.unwrap();
    assert_eq!(summary.count("error"), 1);
    assert_eq!(tote.attempts(), 1);

    let rec = store.get_recommendation(SF1).await.unwrap().unwrap();
    assert_eq!(rec.status, RecommendationStatus::Error);
    assert!(!rec.retryable);
    assert!(rec.bet_id.is_none());

    // Needs a human: later passes leave it alone.
    let monitor = manager.live_monitor(t0() + Duration::minutes(28)).await.unwrap();
    assert_eq!(monitor.considered, 0);
    let execute = manager.execute_ready(t0() + Duration::minutes(28)).await.unwrap();
    assert_eq!(execute.considered, 0);
    assert_eq!(tote.attempts(), 1);
}

#[tokio::test]
async fn test_rejection_keeps_operator_reason() {
    let tote = Arc::new(MockTote::new());
    tote.script([Script::Reject("POOL_CLOSED".to_string())]);
    let World { manager, store, .. } =
        world(vec![jackpot_race("SF1", 30)], Arc::new(MemoryStore::new()), tote.clone());

    manager.morning_scan(t0().date_naive(), t0()).await.unwrap();
    manager.live_monitor(t0() + Duration::minutes(26)).await.unwrap();
    manager.execute_ready(t0() + Duration::minutes(27)).await.unwrap();

    let rec = store.get_recommendation(SF1).await.unwrap().unwrap();
    assert_eq!(rec.status, RecommendationStatus::Error);
    assert_eq!(rec.decision_reason.as_deref(), Some("POOL_CLOSED"));
}
