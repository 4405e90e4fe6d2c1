//! Persistence layer.
//!
//! Recommendations are stored by id and rewritten on every transition,
//! guarded by a version check so two processes never overwrite each
//! other; live checks are append-only. `memory` backs tests and dry runs, `sqlite`
//! is the durable store used by the binary.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::types::{LiveCheck, PlannerError, Recommendation, RecommendationStatus};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait RecommendationStore: Send + Sync {
    /// Insert, or replace the stored row if `accepts_write` allows it. On
    /// success `rec.version` is bumped to the stored version. Returns false,
    /// leaving the stored row and `rec` untouched, when the row has moved on.
    async fn upsert_recommendation(&self, rec: &mut Recommendation) -> Result<bool, PlannerError>;

    async fn get_recommendation(&self, id: &str) -> Result<Option<Recommendation>, PlannerError>;

    /// Recommendations in any of `statuses`, ordered by post time then id.
    async fn list_by_status(
        &self,
        statuses: &[RecommendationStatus],
    ) -> Result<Vec<Recommendation>, PlannerError>;

    /// Every recommendation for a run date, ordered by post time then id.
    async fn list_for_date(&self, run_date: NaiveDate) -> Result<Vec<Recommendation>, PlannerError>;

    /// Append a check. Returns false when `check.check_id` was already stored.
    async fn append_live_check(&self, check: &LiveCheck) -> Result<bool, PlannerError>;

    /// Checks for one recommendation in `check_ts` order.
    async fn live_checks(&self, recommendation_id: &str) -> Result<Vec<LiveCheck>, PlannerError>;
}

/// A write made against `expected_version` may replace `stored` only if
/// nobody wrote in between and the stored row is still open: terminal
/// records and records carrying a bet id are final.
pub(crate) fn accepts_write(stored: &Recommendation, expected_version: u64) -> bool {
    stored.version == expected_version && !stored.status.is_terminal() && stored.bet_id.is_none()
}

pub(crate) fn sort_recommendations(recs: &mut [Recommendation]) {
    recs.sort_by(|a, b| {
        a.start_time
            .cmp(&b.start_time)
            .then_with(|| a.id.cmp(&b.id))
    });
}
