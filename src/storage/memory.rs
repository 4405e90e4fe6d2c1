//! In-memory store.

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Mutex;

use super::{accepts_write, sort_recommendations, RecommendationStore};
use crate::types::{LiveCheck, PlannerError, Recommendation, RecommendationStatus};

#[derive(Default)]
pub struct MemoryStore {
    recommendations: DashMap<String, Recommendation>,
    checks: Mutex<Vec<LiveCheck>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecommendationStore for MemoryStore {
    async fn upsert_recommendation(&self, rec: &mut Recommendation) -> Result<bool, PlannerError> {
        let mut next = rec.clone();
        next.version = rec.version + 1;
        match self.recommendations.entry(rec.id.clone()) {
            Entry::Occupied(mut stored) => {
                if !accepts_write(stored.get(), rec.version) {
                    return Ok(false);
                }
                stored.insert(next);
            }
            Entry::Vacant(slot) => {
                slot.insert(next);
            }
        }
        rec.version += 1;
        Ok(true)
    }

    async fn get_recommendation(&self, id: &str) -> Result<Option<Recommendation>, PlannerError> {
        Ok(self.recommendations.get(id).map(|r| r.value().clone()))
    }

    async fn list_by_status(
        &self,
        statuses: &[RecommendationStatus],
    ) -> Result<Vec<Recommendation>, PlannerError> {
        let mut out: Vec<Recommendation> = self
            .recommendations
            .iter()
            .filter(|r| statuses.contains(&r.status))
            .map(|r| r.value().clone())
            .collect();
        sort_recommendations(&mut out);
        Ok(out)
    }

    async fn list_for_date(&self, run_date: NaiveDate) -> Result<Vec<Recommendation>, PlannerError> {
        let mut out: Vec<Recommendation> = self
            .recommendations
            .iter()
            .filter(|r| r.run_date == run_date)
            .map(|r| r.value().clone())
            .collect();
        sort_recommendations(&mut out);
        Ok(out)
    }

    async fn append_live_check(&self, check: &LiveCheck) -> Result<bool, PlannerError> {
        let mut checks = self.checks.lock().await;
        if checks.iter().any(|c| c.check_id == check.check_id) {
            return Ok(false);
        }
        checks.push(check.clone());
        Ok(true)
    }

    async fn live_checks(&self, recommendation_id: &str) -> Result<Vec<LiveCheck>, PlannerError> {
        let mut out: Vec<LiveCheck> = self
            .checks
            .lock()
            .await
            .iter()
            .filter(|c| c.recommendation_id == recommendation_id)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.check_ts);
        Ok(out)
    }
}
