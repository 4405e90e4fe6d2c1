//! Morning Scan.
//!
//! Lists the day's superfecta products, applies the pre-filters, and plans
//! every survivor under the default preset. Creates one recommendation per
//! product; records already moved on by later stages are left untouched.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info};

use super::LifecycleManager;
use crate::config::ScanConfig;
use crate::types::{
    minutes_between, PlannerError, RaceCandidate, Recommendation, RecommendationStatus, Stage,
    StageSummary,
};

/// Reasons a candidate fails the pre-filters; empty when it qualifies.
pub fn filter_reasons(candidate: &RaceCandidate, scan: &ScanConfig, now: DateTime<Utc>) -> Vec<String> {
    let mut reasons = Vec::new();
    let n = candidate.n_competitors;
    if n < scan.min_competitors || n > scan.max_competitors {
        reasons.push(format!(
            "competitors:{n} outside [{}, {}]",
            scan.min_competitors, scan.max_competitors
        ));
    }
    if scan.require_rollover && candidate.rollover <= 0.0 {
        reasons.push("no-rollover".to_string());
    }
    if let Some(roi) = candidate.roi_current {
        if roi < scan.min_roi {
            reasons.push(format!("roi:{roi:.3} below {:.3}", scan.min_roi));
        }
    }
    if minutes_between(now, candidate.start_time) < 0.0 {
        reasons.push("post-time-passed".to_string());
    }
    reasons
}

impl LifecycleManager {
    /// Morning Scan for `run_date`, evaluated as of `now`.
    pub async fn morning_scan(
        &self,
        run_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<StageSummary, PlannerError> {
        let mut candidates = self.source.list_candidates(run_date).await?;
        if candidates.len() > self.config.scan.max_candidates {
            info!(
                listed = candidates.len(),
                max = self.config.scan.max_candidates,
                "Truncating scan candidates"
            );
            candidates.truncate(self.config.scan.max_candidates);
        }
        info!(date = %run_date, count = candidates.len(), "Starting morning scan");

        let items = candidates
            .into_iter()
            .map(|c| (Recommendation::make_id(run_date, &c.product_id), c))
            .collect();

        Ok(self
            .run_stage(Stage::MorningScan, items, |id, candidate| {
                self.scan_one(id, candidate, run_date, now)
            })
            .await)
    }

    async fn scan_one(
        &self,
        id: String,
        candidate: RaceCandidate,
        run_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<&'static str, PlannerError> {
        let _guard = self.locks.acquire(&id).await;

        let existing = self.store.get_recommendation(&id).await?;
        if let Some(ref rec) = existing {
            if !matches!(
                rec.status,
                RecommendationStatus::Filtered | RecommendationStatus::Error
            ) {
                debug!(id = %id, status = %rec.status, "Already in lifecycle, leaving as is");
                return Ok("unchanged");
            }
        }

        let preset = self.planner.default_preset().to_string();
        let mut rec = Recommendation::new(
            run_date,
            &candidate,
            &preset,
            RecommendationStatus::Monitoring,
            now,
        );
        if let Some(prev) = existing {
            rec.created_at = prev.created_at;
            rec.version = prev.version;
        }

        let reasons = filter_reasons(&candidate, &self.config.scan, now);
        if !reasons.is_empty() {
            rec.status = RecommendationStatus::Filtered;
            rec.decision_reason = Some(reasons.join(";"));
            debug!(id = %id, reason = ?rec.decision_reason, "Filtered");
            return self.finish(&mut rec).await;
        }

        let planned = match self.source.race_context(&candidate.product_id).await {
            Ok(race) => {
                rec.start_time = race.start_time;
                rec.minutes_to_post = Some(race.minutes_to_post(now));
                self.planner.plan(&race, &preset, self.config.tote_bank)
            }
            Err(e) => Err(e),
        };

        match planned {
            Ok(plan) if plan.is_empty() => {
                rec.status = RecommendationStatus::Error;
                rec.decision_reason = Some("no-lines".to_string());
            }
            Ok(plan) => {
                if !plan.is_positive_ev() {
                    rec.decision_reason = Some("non-positive-ev".to_string());
                }
                debug!(id = %id, plan = %plan, "Planned");
                rec.plan = Some(plan);
            }
            Err(e) => {
                rec.status = RecommendationStatus::Error;
                rec.retryable = e.is_transient();
                rec.decision_reason = Some(e.to_string());
            }
        }

        self.finish(&mut rec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fixtures::{harness, paper, rich_race, t0, thin_race};
    use crate::storage::RecommendationStore;
    use chrono::Duration;

    fn day() -> NaiveDate {
        t0().date_naive()
    }

    #[test]
    fn test_filter_reasons_collects_every_failure() {
        let scan = ScanConfig {
            require_rollover: true,
            min_roi: 0.1,
            ..ScanConfig::default()
        };
        let cand = RaceCandidate {
            product_id: "SF1".into(),
            race_id: "R1".into(),
            event_name: "Test".into(),
            start_time: t0() - Duration::minutes(5),
            n_competitors: 4,
            rollover: 0.0,
            roi_current: Some(0.02),
            currency: "GBP".into(),
        };
        let reasons = filter_reasons(&cand, &scan, t0());
        assert_eq!(reasons.len(), 4);
        assert!(reasons[0].starts_with("competitors:4"));
        assert_eq!(reasons[1], "no-rollover");
        assert!(reasons[2].starts_with("roi:"));
        assert_eq!(reasons[3], "post-time-passed");

        let ok = RaceCandidate {
            n_competitors: 8,
            rollover: 10.0,
            roi_current: None,
            start_time: t0() + Duration::minutes(60),
            ..cand
        };
        assert!(filter_reasons(&ok, &scan, t0()).is_empty());
    }

    #[tokio::test]
    async fn test_scan_classifies_candidates() {
        let mut small = rich_race("SF3", 120);
        small.runners.truncate(4);
        let h = harness(
            vec![rich_race("SF1", 60), thin_race("SF2", 90), small],
            paper(),
            false,
        );

        let summary = h.manager.morning_scan(day(), t0()).await.unwrap();
        assert_eq!(summary.considered, 3);
        assert_eq!(summary.count("monitoring"), 2);
        assert_eq!(summary.count("filtered"), 1);
        assert!(summary.failures.is_empty());

        let rich = h.store.get_recommendation("2026-10-19-SF1").await.unwrap().unwrap();
        assert_eq!(rich.status, RecommendationStatus::Monitoring);
        assert!(rich.plan.as_ref().unwrap().is_positive_ev());
        assert_eq!(rich.decision_reason, None);

        let thin = h.store.get_recommendation("2026-10-19-SF2").await.unwrap().unwrap();
        assert_eq!(thin.status, RecommendationStatus::Monitoring);
        assert_eq!(thin.decision_reason.as_deref(), Some("non-positive-ev"));

        let filtered = h.store.get_recommendation("2026-10-19-SF3").await.unwrap().unwrap();
        assert_eq!(filtered.status, RecommendationStatus::Filtered);
        assert!(filtered.plan.is_none());
        assert!(filtered
            .decision_reason
            .as_deref()
            .unwrap()
            .starts_with("competitors:4"));
    }

    #[tokio::test]
    async fn test_fetch_failure_becomes_retryable_error() {
        let h = harness(vec![rich_race("SF1", 60)], paper(), false);
        h.source.fail_product("SF1", "upstream 503");

        let summary = h.manager.morning_scan(day(), t0()).await.unwrap();
        assert_eq!(summary.count("error"), 1);
        let rec = h.store.get_recommendation("2026-10-19-SF1").await.unwrap().unwrap();
        assert_eq!(rec.status, RecommendationStatus::Error);
        assert!(rec.retryable);
        assert!(rec.decision_reason.unwrap().contains("upstream 503"));
    }

    #[tokio::test]
    async fn test_invalid_odds_is_non_retryable_error() {
        let mut bad = rich_race("SF1", 60);
        bad.runners[0].odds = Some(1.0);
        let h = harness(vec![bad], paper(), false);

        h.manager.morning_scan(day(), t0()).await.unwrap();
        let rec = h.store.get_recommendation("2026-10-19-SF1").await.unwrap().unwrap();
        assert_eq!(rec.status, RecommendationStatus::Error);
        assert!(!rec.retryable);
    }

    #[tokio::test]
    async fn test_rescan_leaves_live_records_but_recreates_errors() {
        let h = harness(vec![rich_race("SF1", 60)], paper(), false);
        h.source.fail_product("SF1", "upstream 503");
        h.manager.morning_scan(day(), t0()).await.unwrap();

        h.source.clear_failure("SF1");
        let later = t0() + Duration::minutes(10);
        let summary = h.manager.morning_scan(day(), later).await.unwrap();
        assert_eq!(summary.count("monitoring"), 1);
        let rec = h.store.get_recommendation("2026-10-19-SF1").await.unwrap().unwrap();
        assert_eq!(rec.status, RecommendationStatus::Monitoring);
        assert_eq!(rec.created_at, t0());

        let again = h.manager.morning_scan(day(), later).await.unwrap();
        assert_eq!(again.count("unchanged"), 1);
        assert_eq!(h.store.list_for_date(day()).await.unwrap().len(), 1);
    }
}
