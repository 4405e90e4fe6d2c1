//! Strategy engine: runner strengths, permutation pricing, pool viability
//! and staking optimisation.

pub mod optimizer;
pub mod permutations;
pub mod presets;
pub mod strength;
pub mod viability;

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::types::{PlannerError, RaceContext, StakingPlan};
use optimizer::{Optimization, StakingOptimizer};
use presets::RiskPreset;

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

/// Turns a race snapshot into a staking plan under a named risk preset.
///
/// Holds the preset table and the optimizer; cheap to share behind an `Arc`
/// since planning never mutates it.
pub struct Planner {
    optimizer: StakingOptimizer,
    presets: BTreeMap<String, RiskPreset>,
    default_preset: String,
}

impl Planner {
    pub fn new(
        optimizer: StakingOptimizer,
        presets: BTreeMap<String, RiskPreset>,
        default_preset: impl Into<String>,
    ) -> Self {
        Self {
            optimizer,
            presets,
            default_preset: default_preset.into(),
        }
    }

    pub fn default_preset(&self) -> &str {
        &self.default_preset
    }

    pub fn optimizer(&self) -> &StakingOptimizer {
        &self.optimizer
    }

    /// Look up a preset, falling back to the default for unknown keys.
    pub fn resolve_preset<'a>(&'a self, key: &'a str) -> Result<(&'a str, &'a RiskPreset), PlannerError> {
        if let Some(preset) = self.presets.get(key) {
            return Ok((key, preset));
        }
        warn!(
            requested = key,
            fallback = %self.default_preset,
            "Unknown risk preset, using default"
        );
        self.presets
            .get(&self.default_preset)
            .map(|p| (self.default_preset.as_str(), p))
            .ok_or_else(|| {
                PlannerError::Validation(format!(
                    "default preset {} is not configured",
                    self.default_preset
                ))
            })
    }

    /// Full optimisation output, including the coverage grid.
    pub fn optimize(
        &self,
        race: &RaceContext,
        preset_key: &str,
        tote_bank: f64,
    ) -> Result<Optimization, PlannerError> {
        let (name, preset) = self.resolve_preset(preset_key)?;
        let bankroll = tote_bank * preset.bankroll_pct;
        debug!(
            product_id = %race.product_id,
            preset = name,
            bankroll = format!("{bankroll:.2}"),
            runners = race.runners.len(),
            "Planning race"
        );
        self.optimizer
            .optimize(&race.runners, &race.pool, name, preset, bankroll)
    }

    pub fn plan(
        &self,
        race: &RaceContext,
        preset_key: &str,
        tote_bank: f64,
    ) -> Result<StakingPlan, PlannerError> {
        self.optimize(race, preset_key, tote_bank).map(|o| o.plan)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
