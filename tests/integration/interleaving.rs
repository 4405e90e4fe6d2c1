//! Stages running in separate processes against one store.
//!
//! Each `LifecycleManager` has its own in-process locks, so two managers
//! sharing a store behave like two cron jobs sharing a database. The only
//! thing keeping them apart is the store's version check.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::mock_tote::MockTote;
use crate::{jackpot_race, manager_over, t0};
use superfecta::data::cache::CachedRaceSource;
use superfecta::data::snapshot::SnapshotSource;
use superfecta::data::RaceDataSource;
use superfecta::storage::{MemoryStore, RecommendationStore, SqliteStore};
use superfecta::types::{PlannerError, ProductStatus, RaceCandidate, RaceContext, RecommendationStatus};

const SF1: &str = "2026-10-19-SF1";

/// Source that stalls every `race_context` call until released, so a test
/// can run another stage while a Live Monitor is mid-evaluation.
struct GatedSource {
    inner: Arc<SnapshotSource>,
    entered: Notify,
    release: Notify,
}

impl GatedSource {
    fn new(inner: Arc<SnapshotSource>) -> Self {
        Self {
            inner,
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl RaceDataSource for GatedSource {
    async fn list_candidates(&self, date: NaiveDate) -> Result<Vec<RaceCandidate>, PlannerError> {
        self.inner.list_candidates(date).await
    }

    async fn race_context(&self, product_id: &str) -> Result<RaceContext, PlannerError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.race_context(product_id).await
    }
}

/// A Live Monitor that read a `ready` record before another process placed
/// it must not write its stale copy back over the placement.
async fn stalled_monitor_cannot_reopen_placement(store: Arc<dyn RecommendationStore>) {
    let snapshot = Arc::new(SnapshotSource::from_races(vec![jackpot_race("SF1", 30)]));
    let tote = Arc::new(MockTote::new());

    let gated = Arc::new(GatedSource::new(snapshot.clone()));
    let monitor_proc = manager_over(gated.clone(), store.clone(), tote.clone());
    let execute_proc = manager_over(snapshot.clone(), store.clone(), tote.clone());

    execute_proc.morning_scan(t0().date_naive(), t0()).await.unwrap();
    execute_proc
        .live_monitor(t0() + Duration::minutes(26))
        .await
        .unwrap();
    assert_eq!(
        store.get_recommendation(SF1).await.unwrap().unwrap().status,
        RecommendationStatus::Ready
    );

    let (monitored, executed) = tokio::join!(
        monitor_proc.live_monitor(t0() + Duration::seconds(26 * 60 + 30)),
        async {
            gated.entered.notified().await;
            let executed = execute_proc
                .execute_ready(t0() + Duration::minutes(27))
                .await;
            gated.release.notify_one();
            executed
        }
    );
    let monitored = monitored.unwrap();
    let executed = executed.unwrap();
    assert_eq!(executed.count("placed"), 1);
    assert_eq!(monitored.count("stale"), 1);
    assert!(monitored.failures.is_empty());

    let rec = store.get_recommendation(SF1).await.unwrap().unwrap();
    assert_eq!(rec.status, RecommendationStatus::Placed);
    assert_eq!(rec.bet_id.as_deref(), Some("MOCK-SF1-1"));

    // Neither process finds anything left to place.
    let again = execute_proc
        .execute_ready(t0() + Duration::minutes(28))
        .await
        .unwrap();
    assert_eq!(again.considered, 0);
    assert_eq!(tote.attempts(), 1);
}

#[tokio::test]
async fn test_stalled_monitor_cannot_reopen_placement_memory() {
    stalled_monitor_cannot_reopen_placement(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn test_stalled_monitor_cannot_reopen_placement_sqlite() {
    let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
    stalled_monitor_cannot_reopen_placement(Arc::new(store)).await;
}

/// The monitor saw the product open through the cache; it closes before
/// Execute runs. Execute must see the close even though the cached entry
/// is still within its TTL.
#[tokio::test]
async fn test_product_closed_after_monitor_is_not_placed() {
    let snapshot = Arc::new(SnapshotSource::from_races(vec![jackpot_race("SF1", 30)]));
    let cached = Arc::new(CachedRaceSource::new(snapshot.clone(), Duration::seconds(20), 16));
    let store: Arc<dyn RecommendationStore> = Arc::new(MemoryStore::new());
    let tote = Arc::new(MockTote::new());
    let manager = manager_over(cached.clone(), store.clone(), tote.clone());

    manager.morning_scan(t0().date_naive(), t0()).await.unwrap();
    let monitor = manager
        .live_monitor(t0() + Duration::minutes(26))
        .await
        .unwrap();
    assert_eq!(monitor.count("ready"), 1);

    let mut closed = jackpot_race("SF1", 30);
    closed.product_status = ProductStatus::Closed;
    snapshot.upsert_race(closed);
    assert_eq!(
        cached.race_context("SF1").await.unwrap().product_status,
        ProductStatus::Open,
        "cached entry still says open"
    );

    let summary = manager
        .execute_ready(t0() + Duration::minutes(27))
        .await
        .unwrap();
    assert_eq!(summary.count("skipped"), 1);
    assert_eq!(tote.attempts(), 0);

    let rec = store.get_recommendation(SF1).await.unwrap().unwrap();
    assert_eq!(rec.status, RecommendationStatus::Skipped);
    assert_eq!(rec.decision_reason.as_deref(), Some("status:CLOSED"));
}
