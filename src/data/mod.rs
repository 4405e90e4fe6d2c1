//! Race data sources.
//!
//! Defines the `RaceDataSource` trait the lifecycle stages read from, plus
//! wrappers that add caching (`cache`) and the shared provider guard.
//! `snapshot` serves races from a JSON file or from memory.

pub mod cache;
pub mod snapshot;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;

use crate::resilience::ProviderGuard;
use crate::types::{PlannerError, RaceCandidate, RaceContext};

/// Abstraction over race-card and pool providers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RaceDataSource: Send + Sync {
    /// Superfecta products racing on `date`.
    async fn list_candidates(&self, date: NaiveDate) -> Result<Vec<RaceCandidate>, PlannerError>;

    /// Current runners, odds, pool and product status for one product.
    async fn race_context(&self, product_id: &str) -> Result<RaceContext, PlannerError>;

    /// Like `race_context`, but never served from a cache. Execute reads
    /// through this so a product that closed after the last monitor pass
    /// is seen as closed.
    async fn fresh_race_context(&self, product_id: &str) -> Result<RaceContext, PlannerError> {
        self.race_context(product_id).await
    }
}

/// Data source behind the shared guard; transient failures are retried.
pub struct GuardedRaceSource {
    inner: Arc<dyn RaceDataSource>,
    guard: ProviderGuard,
    name: String,
}

impl GuardedRaceSource {
    pub fn new(name: impl Into<String>, inner: Arc<dyn RaceDataSource>, guard: ProviderGuard) -> Self {
        Self {
            inner,
            guard,
            name: name.into(),
        }
    }
}

#[async_trait]
impl RaceDataSource for GuardedRaceSource {
    async fn list_candidates(&self, date: NaiveDate) -> Result<Vec<RaceCandidate>, PlannerError> {
        self.guard
            .run(&self.name, "list_candidates", PlannerError::is_transient, || {
                self.inner.list_candidates(date)
            })
            .await
    }

    async fn race_context(&self, product_id: &str) -> Result<RaceContext, PlannerError> {
        self.guard
            .run(&self.name, "race_context", PlannerError::is_transient, || {
                self.inner.race_context(product_id)
            })
            .await
    }

    async fn fresh_race_context(&self, product_id: &str) -> Result<RaceContext, PlannerError> {
        self.guard
            .run(&self.name, "race_context", PlannerError::is_transient, || {
                self.inner.fresh_race_context(product_id)
            })
            .await
    }
}
