//! Recommendation lifecycle: Morning Scan → Live Monitor → Execute.
//!
//! Each stage is one bounded batch. Items run concurrently up to
//! `max_concurrency`; a failing item is recorded in the stage summary and
//! never aborts the others. Live Monitor and Execute take the per-id lock
//! from `locks` before reading a recommendation, so a stale `ready` can
//! never race a fresh re-evaluation within one process. Across processes
//! every write goes through the store's version check: a stage that lost
//! the race drops its write and reports the item as `stale`.

pub mod executor;
pub mod locks;
pub mod monitor;
pub mod scanner;

use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{AppConfig, LiveConfig, ScanConfig};
use crate::data::RaceDataSource;
use crate::platforms::{WagerMode, WageringProvider};
use crate::storage::RecommendationStore;
use crate::strategy::Planner;
use crate::types::{PlannerError, Recommendation, Stage, StageSummary};
use locks::RecommendationLocks;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub tote_bank: f64,
    pub max_concurrency: usize,
    pub scan: ScanConfig,
    pub live: LiveConfig,
    pub auto_place: bool,
    pub mode: WagerMode,
}

impl From<&AppConfig> for LifecycleConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            tote_bank: cfg.engine.tote_bank,
            max_concurrency: cfg.engine.max_concurrency,
            scan: cfg.scan.clone(),
            live: cfg.live.clone(),
            auto_place: cfg.execution.auto_place,
            mode: cfg.execution.mode,
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct LifecycleManager {
    planner: Arc<Planner>,
    source: Arc<dyn RaceDataSource>,
    store: Arc<dyn RecommendationStore>,
    wagering: Arc<dyn WageringProvider>,
    config: LifecycleConfig,
    locks: RecommendationLocks,
}

impl LifecycleManager {
    pub fn new(
        planner: Arc<Planner>,
        source: Arc<dyn RaceDataSource>,
        store: Arc<dyn RecommendationStore>,
        wagering: Arc<dyn WageringProvider>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            planner,
            source,
            store,
            wagering,
            config,
            locks: RecommendationLocks::new(),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RecommendationStore> {
        &self.store
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    /// Fresh copy of a recommendation, or `NotFound`.
    async fn load(&self, id: &str) -> Result<Recommendation, PlannerError> {
        self.store
            .get_recommendation(id)
            .await?
            .ok_or_else(|| PlannerError::NotFound(format!("recommendation {id}")))
    }

    /// Conditional write. False means another writer moved the record on
    /// since it was read; the caller must not act on its copy any further.
    async fn save(&self, rec: &mut Recommendation) -> Result<bool, PlannerError> {
        let written = self.store.upsert_recommendation(rec).await?;
        if !written {
            warn!(id = %rec.id, status = %rec.status, "Recommendation changed underneath, write dropped");
        }
        Ok(written)
    }

    /// Save and report the outcome as the stored status.
    async fn finish(&self, rec: &mut Recommendation) -> Result<&'static str, PlannerError> {
        if self.save(rec).await? {
            Ok(rec.status.as_str())
        } else {
            Ok("stale")
        }
    }

    /// Run `process` over `items` with bounded concurrency and fold the
    /// per-item outcomes into a summary.
    async fn run_stage<T, F, Fut>(&self, stage: Stage, items: Vec<(String, T)>, process: F) -> StageSummary
    where
        F: Fn(String, T) -> Fut,
        Fut: Future<Output = Result<&'static str, PlannerError>>,
    {
        let mut summary = StageSummary::new(stage);
        summary.considered = items.len();

        let results: Vec<(String, Result<&'static str, PlannerError>)> = stream::iter(items)
            .map(|(id, item)| {
                let fut = process(id.clone(), item);
                async move { (id, fut.await) }
            })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        for (id, result) in results {
            match result {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    warn!(stage = %stage, id = %id, error = %e, "Item failed");
                    summary.record_failure(&id, e.to_string());
                }
            }
        }

        info!(stage = %stage, summary = %summary, "Stage complete");
        summary
    }
}

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------
