//! Live Monitor.
//!
//! Re-plans every live recommendation against a fresh race snapshot and
//! decides between `ready`, `monitoring`, `hold` and `skipped`. Each
//! evaluation appends one `LiveCheck`, whatever the outcome, before the
//! recommendation itself is written; a record whose check could not be
//! stored keeps its previous state.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::LifecycleManager;
use crate::config::LiveConfig;
use crate::types::{
    minutes_between, LiveCheck, PlannerError, ProductStatus, RaceContext, Recommendation,
    RecommendationStatus, Stage, StageSummary, StakingPlan,
};

/// Where a freshly planned recommendation goes next.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveDecision {
    pub status: RecommendationStatus,
    pub threshold_met: bool,
    pub reason: Option<String>,
}

/// Decision rule for one evaluation. The post-time cutoff is applied by the
/// caller before planning, so `minutes_to_post` here is never past it.
pub fn decide(
    plan: &StakingPlan,
    product_status: ProductStatus,
    minutes_to_post: f64,
    live: &LiveConfig,
) -> LiveDecision {
    let threshold_met = !plan.is_empty()
        && plan.expected_profit >= live.min_expected_profit
        && plan.roi() >= live.min_roi;

    let (status, reason) = if !product_status.is_open_for_betting() {
        (RecommendationStatus::Hold, Some(format!("status:{product_status}")))
    } else if !threshold_met {
        (RecommendationStatus::Hold, Some("threshold-not-met".to_string()))
    } else if minutes_to_post > live.decision_window_minutes {
        (RecommendationStatus::Monitoring, Some("awaiting-window".to_string()))
    } else {
        (RecommendationStatus::Ready, None)
    };

    LiveDecision {
        status,
        threshold_met,
        reason,
    }
}

/// True once post time is further behind `now` than the cancel cutoff.
pub fn past_cutoff(minutes_to_post: f64, live: &LiveConfig) -> bool {
    minutes_to_post < -live.auto_cancel_minutes
}

impl LifecycleManager {
    /// One Live Monitor pass over every actionable recommendation.
    pub async fn live_monitor(&self, now: DateTime<Utc>) -> Result<StageSummary, PlannerError> {
        let recs = self
            .store
            .list_by_status(&[
                RecommendationStatus::Monitoring,
                RecommendationStatus::Hold,
                RecommendationStatus::Ready,
                RecommendationStatus::Error,
            ])
            .await?;
        let items: Vec<(String, ())> = recs
            .into_iter()
            .filter(Recommendation::is_actionable)
            .map(|r| (r.id, ()))
            .collect();
        info!(count = items.len(), "Starting live monitor");

        Ok(self
            .run_stage(Stage::LiveMonitor, items, |id, ()| self.monitor_one(id, now))
            .await)
    }

    async fn monitor_one(&self, id: String, now: DateTime<Utc>) -> Result<&'static str, PlannerError> {
        let _guard = self.locks.acquire(&id).await;

        // Re-read under the lock; an Execute pass may have moved it on.
        let mut rec = self.load(&id).await?;
        if !rec.is_actionable() {
            return Ok("unchanged");
        }
        if rec.placement_in_flight() {
            debug!(id = %rec.id, claimed_at = ?rec.placement_started_at, "Placement in flight, not re-evaluating");
            return Ok("unchanged");
        }

        let fetched = self.source.race_context(&rec.product_id).await;
        let mut check = LiveCheck {
            check_id: uuid::Uuid::new_v4().to_string(),
            recommendation_id: rec.id.clone(),
            product_id: rec.product_id.clone(),
            check_ts: now,
            minutes_to_post: minutes_between(now, rec.start_time),
            pool_gross: None,
            rollover: None,
            total_stake: None,
            hit_rate: None,
            expected_return: None,
            expected_profit: None,
            roi: None,
            threshold_met: false,
            status: rec.status,
            notes: None,
        };

        match fetched {
            Ok(race) => self.evaluate_race(&mut rec, &mut check, &race, now)?,
            Err(e) => {
                if past_cutoff(check.minutes_to_post, &self.config.live) {
                    rec.transition(
                        RecommendationStatus::Skipped,
                        Some("post-time-expired".to_string()),
                        now,
                    )?;
                } else {
                    rec.fail(e.to_string(), e.is_transient(), now)?;
                }
                check.notes = Some(e.to_string());
            }
        }

        rec.minutes_to_post = Some(check.minutes_to_post);
        check.status = rec.status;

        self.store.append_live_check(&check).await?;
        if !self.save(&mut rec).await? {
            return Ok("stale");
        }
        debug!(id = %rec.id, status = %rec.status, mtp = format!("{:.1}", check.minutes_to_post), "Live check recorded");
        Ok(rec.status.as_str())
    }

    fn evaluate_race(
        &self,
        rec: &mut Recommendation,
        check: &mut LiveCheck,
        race: &RaceContext,
        now: DateTime<Utc>,
    ) -> Result<(), PlannerError> {
        let live = &self.config.live;
        rec.start_time = race.start_time;
        check.minutes_to_post = race.minutes_to_post(now);
        check.pool_gross = Some(race.pool.gross_total);
        check.rollover = Some(race.pool.rollover);

        if past_cutoff(check.minutes_to_post, live) {
            info!(id = %rec.id, mtp = format!("{:.1}", check.minutes_to_post), "Post time passed, skipping");
            rec.transition(
                RecommendationStatus::Skipped,
                Some("post-time-expired".to_string()),
                now,
            )?;
            check.notes = Some("post-time-expired".to_string());
            return Ok(());
        }

        let plan = match self.planner.plan(race, &rec.preset, self.config.tote_bank) {
            Ok(plan) => plan,
            Err(e) => {
                rec.fail(e.to_string(), e.is_transient(), now)?;
                check.notes = Some(e.to_string());
                return Ok(());
            }
        };

        let decision = decide(&plan, race.product_status, check.minutes_to_post, live);
        check.total_stake = Some(plan.total_stake);
        check.hit_rate = Some(plan.hit_rate);
        check.expected_return = Some(plan.expected_return);
        check.expected_profit = Some(plan.expected_profit);
        check.roi = Some(plan.roi());
        check.threshold_met = decision.threshold_met;
        check.notes = decision.reason.clone();

        if decision.status == RecommendationStatus::Ready && rec.status != RecommendationStatus::Ready {
            info!(id = %rec.id, plan = %plan, "Ready to place");
        }
        rec.plan = Some(plan);
        rec.transition(decision.status, decision.reason, now)
    }
}
