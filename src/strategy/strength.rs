//! Runner strength provider.
//!
//! Turns a race's runner list into positive, probability-proportional
//! strengths. A trained model's win probability is preferred; runners the
//! model did not cover fall back to the reciprocal of their decimal odds.
//! Strengths are not normalised here, callers normalise when they need to.

use tracing::debug;

use super::presets::RiskPreset;
use crate::types::{PlannerError, RatedRunner, Runner};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Caller-level key/poor weighting applied on top of base strengths.
#[derive(Debug, Clone)]
pub struct StrengthAdjustment {
    /// Strongest N runners flagged as key.
    pub key_count: usize,
    /// Weakest N runners flagged as poor.
    pub poor_count: usize,
    /// Boost for key runners (> 1).
    pub key_multiplier: f64,
    /// Penalty for poor runners (< 1).
    pub poor_multiplier: f64,
}

impl Default for StrengthAdjustment {
    fn default() -> Self {
        Self {
            key_count: 0,
            poor_count: 0,
            key_multiplier: 1.2,
            poor_multiplier: 0.85,
        }
    }
}

impl From<&RiskPreset> for StrengthAdjustment {
    fn from(preset: &RiskPreset) -> Self {
        Self {
            key_count: preset.key_runners,
            poor_count: preset.poor_runners,
            key_multiplier: preset.key_multiplier,
            poor_multiplier: preset.poor_multiplier,
        }
    }
}

// ---------------------------------------------------------------------------
// Base strengths
// ---------------------------------------------------------------------------

fn usable_probability(p: Option<f64>) -> Option<f64> {
    p.filter(|p| p.is_finite() && *p > 0.0)
}

/// Compute a strength for every usable runner, preserving input order.
///
/// Model probabilities are used only when every runner has one; otherwise
/// the whole field is rated 1/odds and runners without odds are dropped.
/// Any runner quoted at odds <= 1.0 fails the whole race. If fewer than `k`
/// runners remain the race cannot be priced.
pub fn rate_runners(runners: &[Runner], k: usize) -> Result<Vec<RatedRunner>, PlannerError> {
    for runner in runners {
        if let Some(odds) = runner.odds {
            if !odds.is_finite() || odds <= 1.0 {
                return Err(PlannerError::InvalidOdds {
                    runner: runner.id.clone(),
                    odds,
                });
            }
        }
    }

    let model_complete = !runners.is_empty()
        && runners
            .iter()
            .all(|r| usable_probability(r.model_probability).is_some());

    let mut rated = Vec::with_capacity(runners.len());
    for runner in runners {
        // Model and odds scales never mix within one race.
        let strength = if model_complete {
            usable_probability(runner.model_probability)
        } else {
            runner.odds.map(|odds| 1.0 / odds)
        };
        let Some(strength) = strength else {
            debug!(runner = %runner.id, "No usable strength, runner dropped");
            continue;
        };
        rated.push(RatedRunner {
            id: runner.id.clone(),
            name: runner.name.clone(),
            number: runner.number,
            strength,
            odds: runner.odds,
            is_key: runner.is_key,
            is_poor: runner.is_poor,
        });
    }

    if rated.len() < k {
        return Err(PlannerError::InsufficientRunners {
            required: k,
            available: rated.len(),
        });
    }

    debug!(
        runners = rated.len(),
        source = if model_complete { "model" } else { "odds-fallback" },
        "Runner strengths computed"
    );

    Ok(rated)
}

// ---------------------------------------------------------------------------
// Preset weighting
// ---------------------------------------------------------------------------

/// Flag the strongest/weakest runners and apply key/poor multipliers.
///
/// Flags already set on input are kept. A runner flagged both ways is
/// treated as key.
pub fn apply_adjustment(rated: &mut [RatedRunner], adjustment: &StrengthAdjustment) {
    let mut order: Vec<usize> = (0..rated.len()).collect();
    order.sort_by(|&a, &b| rated[b].strength.total_cmp(&rated[a].strength));

    for &i in order.iter().take(adjustment.key_count) {
        rated[i].is_key = true;
    }
    for &i in order.iter().rev().take(adjustment.poor_count) {
        if !rated[i].is_key {
            rated[i].is_poor = true;
        }
    }

    for runner in rated.iter_mut() {
        if runner.is_key {
            runner.is_poor = false;
            runner.strength *= adjustment.key_multiplier;
        } else if runner.is_poor {
            runner.strength *= adjustment.poor_multiplier;
        }
    }
}

/// Strengths scaled to sum to 1.
pub fn normalized(rated: &[RatedRunner]) -> Vec<f64> {
    let total: f64 = rated.iter().map(|r| r.strength).sum();
    if total <= 0.0 {
        return vec![0.0; rated.len()];
    }
    rated.iter().map(|r| r.strength / total).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
