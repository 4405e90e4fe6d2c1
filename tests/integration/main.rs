//! Integration tests for the recommendation lifecycle.
//!
//! Drives Morning Scan → Live Monitor → Execute through the public API
//! with in-memory race snapshots, both stores and a scriptable tote.

mod interleaving;
mod mock_tote;
mod simulation;

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

use superfecta::data::snapshot::SnapshotSource;
use superfecta::data::RaceDataSource;
use superfecta::engine::{LifecycleConfig, LifecycleManager};
use superfecta::platforms::WageringProvider;
use superfecta::storage::RecommendationStore;
use superfecta::strategy::optimizer::{OptimizerConfig, StakingOptimizer};
use superfecta::strategy::presets::builtin_presets;
use superfecta::strategy::Planner;
use superfecta::types::{PoolContext, ProductStatus, RaceContext, Runner};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
}

/// Eight-runner field with a clear favourite.
pub fn runners() -> Vec<Runner> {
    [2.5, 4.0, 5.0, 7.0, 9.0, 12.0, 16.0, 21.0]
        .iter()
        .enumerate()
        .map(|(i, &odds)| {
            let number = i as u32 + 1;
            Runner {
                id: format!("h{number}"),
                name: format!("Horse {number}"),
                number,
                model_probability: None,
                odds: Some(odds),
                is_key: false,
                is_poor: false,
            }
        })
        .collect()
}

pub fn race(product_id: &str, post_in_minutes: i64, gross: f64, takeout: f64, rollover: f64) -> RaceContext {
    RaceContext {
        race_id: format!("RACE-{product_id}"),
        product_id: product_id.to_string(),
        event_name: format!("Meeting {product_id}"),
        start_time: t0() + Duration::minutes(post_in_minutes),
        product_status: ProductStatus::Open,
        runners: runners(),
        pool: PoolContext {
            gross_total: gross,
            net_total: gross * (1.0 - takeout),
            takeout,
            rollover,
            multiplier: 1.0,
            currency: "GBP".to_string(),
            own_stake: 0.0,
        },
    }
}

/// Large carried-over jackpot against a small pool.
pub fn jackpot_race(product_id: &str, post_in_minutes: i64) -> RaceContext {
    race(product_id, post_in_minutes, 400.0, 0.3, 20_000.0)
}

/// Takeout so punitive that no stake can profit.
pub fn dead_race(product_id: &str, post_in_minutes: i64) -> RaceContext {
    race(product_id, post_in_minutes, 50.0, 0.9, 0.0)
}

pub struct World {
    pub manager: LifecycleManager,
    pub source: Arc<SnapshotSource>,
    pub store: Arc<dyn RecommendationStore>,
}

pub fn world(
    races: Vec<RaceContext>,
    store: Arc<dyn RecommendationStore>,
    wagering: Arc<dyn WageringProvider>,
) -> World {
    let source = Arc::new(SnapshotSource::from_races(races));
    let manager = manager_over(source.clone(), store.clone(), wagering);
    World {
        manager,
        source,
        store,
    }
}

/// A manager reading from any source. Two of these sharing a store stand
/// in for two processes sharing a database.
pub fn manager_over(
    source: Arc<dyn RaceDataSource>,
    store: Arc<dyn RecommendationStore>,
    wagering: Arc<dyn WageringProvider>,
) -> LifecycleManager {
    let planner = Arc::new(Planner::new(
        StakingOptimizer::new(OptimizerConfig::default()),
        builtin_presets(),
        "balanced",
    ));
    let config = LifecycleConfig {
        auto_place: true,
        max_concurrency: 4,
        ..LifecycleConfig::default()
    };
    LifecycleManager::new(planner, source, store, wagering, config)
}

/// Tally of recommendation statuses, for compact assertions.
pub async fn statuses(store: &Arc<dyn RecommendationStore>) -> BTreeMap<String, usize> {
    let mut out = BTreeMap::new();
    for rec in store.list_for_date(t0().date_naive()).await.unwrap() {
        *out.entry(rec.status.to_string()).or_insert(0) += 1;
    }
    out
}
