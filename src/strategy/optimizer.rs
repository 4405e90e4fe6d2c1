//! Staking plan optimizer.
//!
//! Scans every coverage level `m = 1..C` over the probability-sorted lines.
//! At each level the bankroll is spread across the top `m` lines in
//! proportion to `p^gamma`, competing money is estimated per line from a
//! crowd score built on runner odds, and the scenario's expected profit is
//! summed line by line. The best-EV level and the smallest level that meets
//! the preset's profit target are both reported; the plan is built at the
//! latter.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info};

use super::permutations::enumerate_lines;
use super::presets::RiskPreset;
use super::strength::{apply_adjustment, normalized, rate_runners, StrengthAdjustment};
use super::viability::{f_share, net_pool, PoolParams};
use crate::types::{
    ParameterAdjustment, PermutationLine, PlanLine, PlannerError, PoolContext, RatedRunner,
    Runner, StakingPlan,
};

/// Odds assumed for a runner the market has not priced.
const MIN_FAIR_ODDS: f64 = 1.05;
/// Step applied to concentration on the single adjusted retry.
const ADJUST_CONCENTRATION_STEP: f64 = 0.25;
/// Step applied to market inefficiency on the single adjusted retry.
const ADJUST_INEFFICIENCY_STEP: f64 = 0.10;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Bet arity K (4 = superfecta).
    pub bet_arity: usize,
    /// Runners considered, strongest first.
    pub top_n: usize,
    /// Whether our stake joins the pool before payout.
    pub self_in_pool: bool,
    /// Fixed F-share instead of the per-line stake split.
    pub f_share_override: Option<f64>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            bet_arity: 4,
            top_n: 10,
            self_in_pool: true,
            f_share_override: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Totals for covering the top `lines_covered` lines.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoverageScenario {
    pub lines_covered: usize,
    pub hit_rate: f64,
    pub expected_return: f64,
    pub expected_profit: f64,
    /// Probability-weighted F-share.
    pub f_share: f64,
}

#[derive(Debug, Clone)]
pub struct Optimization {
    pub plan: StakingPlan,
    /// Coverage level with the highest expected profit.
    pub optimal: Option<CoverageScenario>,
    /// Smallest coverage level meeting the profit target (or `optimal`).
    pub base: Option<CoverageScenario>,
    /// Every scanned level, ascending coverage.
    pub ev_grid: Vec<CoverageScenario>,
}

struct Scan {
    grid: Vec<CoverageScenario>,
    optimal: Option<CoverageScenario>,
    base: Option<CoverageScenario>,
}

// ---------------------------------------------------------------------------
// Pricing
// ---------------------------------------------------------------------------

/// Per-line stake weights and crowd scores for one parameter set.
struct Pricing<'a> {
    lines: &'a [PermutationLine],
    weights: Vec<f64>,
    crowd: Vec<f64>,
    bankroll: f64,
    net_pool: f64,
    others_effective: f64,
    f_fixed: Option<f64>,
}

impl<'a> Pricing<'a> {
    fn new(
        lines: &'a [PermutationLine],
        odds: &HashMap<&str, f64>,
        params: &PoolParams,
        bankroll: f64,
        concentration: f64,
        market_inefficiency: f64,
    ) -> Self {
        let gamma = 1.0 + 2.0 * concentration;
        let beta = (1.0 - 0.6 * market_inefficiency).max(0.1);
        let weights = lines
            .iter()
            .map(|l| l.probability.max(0.0).powf(gamma))
            .collect();
        let crowd = lines
            .iter()
            .map(|l| {
                l.runner_ids
                    .iter()
                    .map(|id| match odds.get(id.as_str()) {
                        Some(&o) if o > 0.0 => (1.0 / o).powf(beta),
                        _ => 0.0,
                    })
                    .product()
            })
            .collect();
        Self {
            lines,
            weights,
            crowd,
            bankroll,
            net_pool: net_pool(params, bankroll),
            others_effective: params.others_pool * (1.0 - market_inefficiency),
            f_fixed: params.f_share_override,
        }
    }

    /// Price a set of lines staked together. When `sink` is given, the
    /// per-line detail is pushed to it.
    fn price(&self, indices: &[usize], mut sink: Option<&mut Vec<PlanLine>>) -> CoverageScenario {
        let w_sum: f64 = indices.iter().map(|&i| self.weights[i]).sum();
        let w_sum = if w_sum > 0.0 { w_sum } else { 1.0 };
        let q_sum: f64 = indices.iter().map(|&i| self.crowd[i]).sum();
        let q_sum = if q_sum > 0.0 { q_sum } else { 1.0 };

        let mut hit_rate = 0.0;
        let mut expected_return = 0.0;
        let mut staked = 0.0;
        let mut weighted_share = 0.0;
        for &i in indices {
            let p = self.lines[i].probability.max(0.0);
            let stake = self.bankroll * self.weights[i] / w_sum;
            let others = self.others_effective * self.crowd[i] / q_sum;
            let f = f_share(stake, others, self.f_fixed);
            let er = p * f * self.net_pool;

            hit_rate += p;
            expected_return += er;
            staked += stake;
            weighted_share += p * f;

            if let Some(lines) = sink.as_deref_mut() {
                lines.push(PlanLine {
                    line: self.lines[i].clone(),
                    stake,
                    others_estimate: others,
                    f_share: f,
                    expected_return: er,
                });
            }
        }

        CoverageScenario {
            lines_covered: indices.len(),
            hit_rate,
            expected_return,
            expected_profit: expected_return - staked,
            f_share: if hit_rate > 0.0 {
                weighted_share / hit_rate
            } else {
                0.0
            },
        }
    }

    fn scan(&self, target_profit: f64) -> Scan {
        let all: Vec<usize> = (0..self.lines.len()).collect();
        let mut grid = Vec::with_capacity(all.len());
        let mut optimal: Option<CoverageScenario> = None;
        for m in 1..=all.len() {
            let scenario = self.price(&all[..m], None);
            if optimal.map_or(true, |best| scenario.expected_profit > best.expected_profit) {
                optimal = Some(scenario);
            }
            grid.push(scenario);
        }
        let base = if target_profit > 0.0 {
            grid.iter()
                .find(|s| s.expected_profit >= target_profit)
                .copied()
                .or(optimal)
        } else {
            optimal
        };
        Scan {
            grid,
            optimal,
            base,
        }
    }
}

fn round_cents(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Optimizer
// ---------------------------------------------------------------------------

pub struct StakingOptimizer {
    config: OptimizerConfig,
}

impl StakingOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Input problems that make any plan meaningless.
    fn validate(&self, pool: &PoolContext, bankroll: f64) -> Vec<PlannerError> {
        let mut errors = Vec::new();
        if !(bankroll.is_finite() && bankroll > 0.0) {
            errors.push(PlannerError::Validation(format!(
                "bankroll must be positive, got {bankroll}"
            )));
        }
        if !(0.0..1.0).contains(&pool.takeout) {
            errors.push(PlannerError::Validation(format!(
                "takeout must be in [0, 1), got {}",
                pool.takeout
            )));
        }
        if pool.rollover < 0.0 {
            errors.push(PlannerError::Validation(format!(
                "rollover must be >= 0, got {}",
                pool.rollover
            )));
        }
        if pool.multiplier < 0.0 {
            errors.push(PlannerError::Validation(format!(
                "dividend multiplier must be >= 0, got {}",
                pool.multiplier
            )));
        }
        if self.config.bet_arity == 0 {
            errors.push(PlannerError::Validation(
                "bet arity must be at least 1".to_string(),
            ));
        }
        errors
    }

    /// Build a staking plan for one race under `preset`.
    ///
    /// Fails with every input problem found; never returns a partial plan.
    /// A plan with non-positive expected profit is still returned, acting on
    /// it is the caller's decision.
    pub fn optimize(
        &self,
        runners: &[Runner],
        pool: &PoolContext,
        preset_name: &str,
        preset: &RiskPreset,
        bankroll: f64,
    ) -> Result<Optimization, PlannerError> {
        let k = self.config.bet_arity;
        let mut errors = self.validate(pool, bankroll);
        let rated = match rate_runners(runners, k) {
            Ok(rated) => Some(rated),
            Err(e) => {
                errors.push(e);
                None
            }
        };
        let mut rated = match rated {
            Some(rated) if errors.is_empty() => rated,
            _ => return Err(PlannerError::InvalidInputs(errors)),
        };

        apply_adjustment(&mut rated, &StrengthAdjustment::from(preset));
        let top_n = preset.top_n.unwrap_or(self.config.top_n);
        let lines = enumerate_lines(&rated, k, top_n)?;

        let params =
            PoolParams::from_pool(pool, self.config.self_in_pool, self.config.f_share_override);
        let odds = crowd_odds(&rated);
        let target_profit = bankroll * preset.target_profit_pct / 100.0;

        let mut concentration = preset.concentration;
        let mut inefficiency = preset.market_inefficiency;
        let mut scan = Pricing::new(&lines, &odds, &params, bankroll, concentration, inefficiency)
            .scan(target_profit);
        let mut adjustment = None;

        let base_profit = scan.base.map(|b| b.expected_profit);
        if let Some(before) = base_profit.filter(|ep| *ep <= 0.0) {
            let next_concentration = (concentration + ADJUST_CONCENTRATION_STEP).min(1.0);
            let next_inefficiency = (inefficiency + ADJUST_INEFFICIENCY_STEP).min(1.0);
            if next_concentration != concentration || next_inefficiency != inefficiency {
                let retry = Pricing::new(
                    &lines,
                    &odds,
                    &params,
                    bankroll,
                    next_concentration,
                    next_inefficiency,
                )
                .scan(target_profit);
                let after = retry.base.map_or(f64::NEG_INFINITY, |b| b.expected_profit);
                let adopted = after > before;
                info!(
                    preset = preset_name,
                    concentration_before = concentration,
                    concentration_after = next_concentration,
                    market_inefficiency_before = inefficiency,
                    market_inefficiency_after = next_inefficiency,
                    base_profit_before = format!("{before:.2}"),
                    base_profit_after = format!("{after:.2}"),
                    adopted,
                    "Non-positive base scenario, retried once with adjusted parameters"
                );
                adjustment = Some(ParameterAdjustment {
                    concentration_before: concentration,
                    concentration_after: next_concentration,
                    market_inefficiency_before: inefficiency,
                    market_inefficiency_after: next_inefficiency,
                    adopted,
                });
                if adopted {
                    concentration = next_concentration;
                    inefficiency = next_inefficiency;
                    scan = retry;
                }
            }
        }

        let pricing = Pricing::new(&lines, &odds, &params, bankroll, concentration, inefficiency);
        let covered = scan.base.map_or(0, |b| b.lines_covered);
        let kept = self.apply_stake_floor(&pricing, covered, preset.min_stake_per_line);

        let mut plan_lines = Vec::with_capacity(kept.len());
        let totals = pricing.price(&kept, Some(&mut plan_lines));
        let total_stake: f64 = plan_lines.iter().map(|l| l.stake).sum();

        let plan = StakingPlan {
            preset: preset_name.to_string(),
            total_stake,
            hit_rate: totals.hit_rate,
            expected_return: totals.expected_return,
            expected_profit: totals.expected_return - total_stake,
            f_share: totals.f_share,
            net_pool: pricing.net_pool,
            bankroll,
            lines_available: lines.len(),
            adjustment,
            lines: plan_lines,
        };

        debug!(
            preset = preset_name,
            lines = plan.lines.len(),
            available = plan.lines_available,
            stake = format!("{:.2}", plan.total_stake),
            expected_profit = format!("{:.2}", plan.expected_profit),
            "Staking plan optimised"
        );

        Ok(Optimization {
            plan,
            optimal: scan.optimal,
            base: scan.base,
            ev_grid: scan.grid,
        })
    }

    /// Indices of the top `covered` lines whose stake survives the floor.
    ///
    /// Lines whose stake rounds below `floor` (or to zero) are dropped and the
    /// bankroll is re-spread over the survivors once. Re-spreading only
    /// raises stakes, so survivors stay above the floor.
    fn apply_stake_floor(&self, pricing: &Pricing<'_>, covered: usize, floor: f64) -> Vec<usize> {
        let candidates: Vec<usize> = (0..covered).collect();
        let w_sum: f64 = candidates.iter().map(|&i| pricing.weights[i]).sum();
        if w_sum <= 0.0 {
            return Vec::new();
        }
        let kept: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&i| {
                let rounded = round_cents(pricing.bankroll * pricing.weights[i] / w_sum);
                rounded > 0.0 && rounded >= floor
            })
            .collect();
        if kept.len() < covered {
            debug!(
                covered,
                kept = kept.len(),
                floor,
                "Lines below minimum stake dropped"
            );
        }
        kept
    }
}

/// Odds per runner id for the crowd heuristic; unpriced runners get fair
/// odds from their normalised strength.
fn crowd_odds(rated: &[RatedRunner]) -> HashMap<&str, f64> {
    let probs = normalized(rated);
    rated
        .iter()
        .zip(probs)
        .map(|(r, p)| {
            let odds = r.odds.unwrap_or_else(|| {
                if p > 0.0 {
                    (1.0 / p).max(MIN_FAIR_ODDS)
                } else {
                    f64::INFINITY
                }
            });
            (r.id.as_str(), odds)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
