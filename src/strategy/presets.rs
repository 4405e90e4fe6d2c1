//! Risk presets.
//!
//! A preset bundles everything that shapes a staking plan other than the
//! race itself: how much of the bank to commit, how hard to concentrate
//! stakes on the most probable lines, how much the crowd is assumed to
//! misprice the pool, and which runners to boost or fade.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_key_multiplier() -> f64 {
    1.2
}

fn default_poor_multiplier() -> f64 {
    0.85
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskPreset {
    /// Fraction of the tote bank committed to one race.
    pub bankroll_pct: f64,
    /// Desired profit as a percent of the committed bankroll.
    pub target_profit_pct: f64,
    /// 0 = flat stakes, 1 = heavily favour the top lines.
    pub concentration: f64,
    /// 0 = crowd prices lines like we do, 1 = crowd badly misprices.
    pub market_inefficiency: f64,
    /// Strongest N runners flagged as key.
    #[serde(default)]
    pub key_runners: usize,
    /// Weakest N runners flagged as poor.
    #[serde(default)]
    pub poor_runners: usize,
    #[serde(default = "default_key_multiplier")]
    pub key_multiplier: f64,
    #[serde(default = "default_poor_multiplier")]
    pub poor_multiplier: f64,
    /// Lines whose rounded stake falls below this are dropped.
    #[serde(default)]
    pub min_stake_per_line: f64,
    /// Overrides the engine-wide top-N runner restriction.
    #[serde(default)]
    pub top_n: Option<usize>,
}

impl RiskPreset {
    pub fn conservative() -> Self {
        Self {
            bankroll_pct: 0.02,
            target_profit_pct: 12.0,
            concentration: 0.15,
            market_inefficiency: 0.05,
            key_runners: 1,
            poor_runners: 1,
            key_multiplier: default_key_multiplier(),
            poor_multiplier: default_poor_multiplier(),
            min_stake_per_line: 0.10,
            top_n: None,
        }
    }

    pub fn balanced() -> Self {
        Self {
            bankroll_pct: 0.03,
            target_profit_pct: 25.0,
            concentration: 0.25,
            market_inefficiency: 0.08,
            key_runners: 2,
            poor_runners: 1,
            key_multiplier: default_key_multiplier(),
            poor_multiplier: default_poor_multiplier(),
            min_stake_per_line: 0.10,
            top_n: None,
        }
    }

    pub fn aggressive() -> Self {
        Self {
            bankroll_pct: 0.05,
            target_profit_pct: 40.0,
            concentration: 0.40,
            market_inefficiency: 0.12,
            key_runners: 3,
            poor_runners: 0,
            key_multiplier: default_key_multiplier(),
            poor_multiplier: default_poor_multiplier(),
            min_stake_per_line: 0.0,
            top_n: None,
        }
    }

    /// Range problems with this preset, empty when valid.
    pub fn problems(&self, name: &str) -> Vec<String> {
        let mut out = Vec::new();
        if !(self.bankroll_pct > 0.0 && self.bankroll_pct <= 1.0) {
            out.push(format!("preset {name}: bankroll_pct must be in (0, 1]"));
        }
        if self.target_profit_pct < 0.0 {
            out.push(format!("preset {name}: target_profit_pct must be >= 0"));
        }
        if !(0.0..=1.0).contains(&self.concentration) {
            out.push(format!("preset {name}: concentration must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.market_inefficiency) {
            out.push(format!(
                "preset {name}: market_inefficiency must be in [0, 1]"
            ));
        }
        if self.key_multiplier <= 1.0 {
            out.push(format!("preset {name}: key_multiplier must be > 1"));
        }
        if !(self.poor_multiplier > 0.0 && self.poor_multiplier <= 1.0) {
            out.push(format!("preset {name}: poor_multiplier must be in (0, 1]"));
        }
        if self.min_stake_per_line < 0.0 {
            out.push(format!("preset {name}: min_stake_per_line must be >= 0"));
        }
        out
    }
}

/// The three presets every deployment starts with.
pub fn builtin_presets() -> BTreeMap<String, RiskPreset> {
    let mut presets = BTreeMap::new();
    presets.insert("conservative".to_string(), RiskPreset::conservative());
    presets.insert("balanced".to_string(), RiskPreset::balanced());
    presets.insert("aggressive".to_string(), RiskPreset::aggressive());
    presets
}
