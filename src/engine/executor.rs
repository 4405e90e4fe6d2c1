//! Execute.
//!
//! Places every `ready` recommendation, re-checking everything that may
//! have gone stale since the Live Monitor decided. A recommendation that
//! already carries a bet id is never submitted again. Failures move it to
//! `error`; nothing is retried within this stage.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::monitor::past_cutoff;
use super::LifecycleManager;
use crate::platforms::{BetRequest, PlacementOutcome};
use crate::types::{
    minutes_between, PlannerError, ProductStatus, RecommendationStatus, Stage, StageSummary,
};

impl LifecycleManager {
    /// One Execute pass over every `ready` recommendation.
    pub async fn execute_ready(&self, now: DateTime<Utc>) -> Result<StageSummary, PlannerError> {
        let ready = self
            .store
            .list_by_status(&[RecommendationStatus::Ready])
            .await?;
        let items: Vec<(String, ())> = ready.into_iter().map(|r| (r.id, ())).collect();
        info!(
            count = items.len(),
            auto_place = self.config.auto_place,
            mode = %self.config.mode,
            "Starting execute"
        );

        Ok(self
            .run_stage(Stage::Execute, items, |id, ()| self.execute_one(id, now))
            .await)
    }

    async fn execute_one(&self, id: String, now: DateTime<Utc>) -> Result<&'static str, PlannerError> {
        let _guard = self.locks.acquire(&id).await;

        let mut rec = self.load(&id).await?;
        if rec.bet_id.is_some() {
            warn!(id = %id, bet_id = ?rec.bet_id, "Bet already placed, not resubmitting");
            return Ok("duplicate");
        }
        if rec.status != RecommendationStatus::Ready {
            return Ok("unchanged");
        }
        if let Some(claimed_at) = rec.placement_started_at {
            // An earlier pass died between claiming and recording. The ticket
            // id is the recommendation id, so the tote dedupes a resend.
            warn!(id = %id, claimed_at = %claimed_at, "Unfinished placement claim, resending same ticket");
        }

        let plan = match rec.plan.clone() {
            Some(plan) if !plan.is_empty() && plan.total_stake > 0.0 => plan,
            _ => {
                rec.transition(RecommendationStatus::Skipped, Some("no-lines".to_string()), now)?;
                return self.finish(&mut rec).await;
            }
        };

        // Never trust the monitor's snapshot, or a cached one, for time and
        // product status.
        let race = match self.source.fresh_race_context(&rec.product_id).await {
            Ok(race) => race,
            Err(e) => {
                if past_cutoff(minutes_between(now, rec.start_time), &self.config.live) {
                    rec.transition(
                        RecommendationStatus::Skipped,
                        Some("post-time-expired".to_string()),
                        now,
                    )?;
                } else {
                    rec.fail(e.to_string(), e.is_transient(), now)?;
                }
                return self.finish(&mut rec).await;
            }
        };
        rec.start_time = race.start_time;
        let mtp = race.minutes_to_post(now);
        rec.minutes_to_post = Some(mtp);

        if past_cutoff(mtp, &self.config.live) {
            rec.transition(
                RecommendationStatus::Skipped,
                Some("post-time-expired".to_string()),
                now,
            )?;
            return self.finish(&mut rec).await;
        }
        if !race.product_status.is_open_for_betting() {
            // A closed pool never reopens; anything else goes back to the monitor.
            let next = if race.product_status == ProductStatus::Closed {
                RecommendationStatus::Skipped
            } else {
                RecommendationStatus::Hold
            };
            rec.transition(next, Some(format!("status:{}", race.product_status)), now)?;
            return self.finish(&mut rec).await;
        }

        if !self.config.auto_place {
            rec.decision_reason = Some("auto-place-disabled".to_string());
            rec.updated_at = now;
            if !self.save(&mut rec).await? {
                return Ok("stale");
            }
            info!(id = %id, plan = %plan, "Auto-place disabled, left ready for manual placement");
            return Ok("auto-place-disabled");
        }

        let request = BetRequest::from_plan(
            &rec.id,
            &rec.product_id,
            &rec.currency,
            &plan,
            self.config.mode,
        )?;
        if request.lines.is_empty() {
            rec.transition(RecommendationStatus::Skipped, Some("no-lines".to_string()), now)?;
            return self.finish(&mut rec).await;
        }

        // Claim before sending: if a monitor in another process rewrote the
        // record since it was read, this write fails and nothing is sent.
        rec.placement_started_at = Some(now);
        rec.updated_at = now;
        if !self.save(&mut rec).await? {
            return Ok("stale");
        }

        let outcome = match self.wagering.place_bet(&request).await {
            Ok(PlacementOutcome::Accepted { bet_id }) => {
                info!(
                    id = %id,
                    bet_id = %bet_id,
                    mode = %request.mode,
                    stake = %request.total_stake,
                    lines = request.lines.len(),
                    "Bet placed"
                );
                rec.bet_id = Some(bet_id);
                rec.transition(
                    RecommendationStatus::Placed,
                    Some(format!("placed:{}", request.mode)),
                    now,
                )?;
                "placed"
            }
            Ok(PlacementOutcome::Rejected { reason }) => {
                warn!(id = %id, reason = %reason, "Bet rejected");
                rec.fail(reason, false, now)?;
                "rejected"
            }
            Ok(PlacementOutcome::Unknown { raw }) => {
                warn!(id = %id, raw = %raw, "Placement outcome unknown");
                rec.fail(format!("unknown-outcome: {raw}"), false, now)?;
                "unknown"
            }
            Err(e) => {
                warn!(id = %id, error = %e, "Placement failed");
                rec.fail(e.to_string(), e.confirms_not_accepted(), now)?;
                "error"
            }
        };
        if rec.bet_id.is_none() {
            rec.placement_started_at = None;
        }

        // The claim holds the record, so nobody else may have written it.
        if !self.save(&mut rec).await? {
            return Err(PlannerError::Storage(format!(
                "{id}: placement outcome {outcome} could not be recorded, claim lost"
            )));
        }
        Ok(outcome)
    }
}
