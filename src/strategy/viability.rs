//! Pool viability and expected-value arithmetic.
//!
//! Pure functions over scalars. Nothing here rounds; presentation code
//! rounds at the edge.
//!
//! ```text
//! NetPool        = m * ((1 - t) * (O + (self ? S : 0)) + R)
//! FShare         = S / (S + O)            (unless fixed)
//! ExpectedReturn = HitRate * FShare * NetPool
//! ExpectedProfit = ExpectedReturn - S
//! ```

use serde::Serialize;

use crate::types::{PlannerError, PoolContext};

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Pool economics held fixed while stake or coverage varies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolParams {
    /// Money in the pool that is not ours.
    pub others_pool: f64,
    pub takeout: f64,
    pub rollover: f64,
    pub multiplier: f64,
    /// Add our own stake back into the pool before payout.
    pub self_in_pool: bool,
    /// Fixed F-share instead of `S / (S + O)`.
    pub f_share_override: Option<f64>,
}

impl PoolParams {
    pub fn from_pool(pool: &PoolContext, self_in_pool: bool, f_share_override: Option<f64>) -> Self {
        Self {
            others_pool: pool.others_pool(),
            takeout: pool.takeout,
            rollover: pool.rollover,
            multiplier: pool.multiplier,
            self_in_pool,
            f_share_override,
        }
    }

    pub fn with_others_pool(self, others_pool: f64) -> Self {
        Self {
            others_pool,
            ..self
        }
    }

    /// F-share at this stake under these params.
    pub fn f_share_at(&self, stake: f64) -> f64 {
        f_share(stake, self.others_pool, self.f_share_override)
    }
}

// ---------------------------------------------------------------------------
// Primitive formulas
// ---------------------------------------------------------------------------

/// Ordered K-permutations of N runners; 0 when N < K.
pub fn total_lines(n: usize, k: usize) -> u64 {
    if n < k {
        return 0;
    }
    (n - k + 1..=n).map(|x| x as u64).product()
}

/// Stake for `lines` covered lines, coverage clamped to `[0, total]`.
pub fn stake_for_coverage(lines: u64, total: u64, stake_per_line: f64) -> f64 {
    lines.min(total) as f64 * stake_per_line
}

pub fn net_pool(params: &PoolParams, stake: f64) -> f64 {
    let own = if params.self_in_pool { stake } else { 0.0 };
    params.multiplier * ((1.0 - params.takeout) * (params.others_pool + own) + params.rollover)
}

/// Our fraction of the pool on a winning line. Zero when nobody has staked.
pub fn f_share(stake: f64, others: f64, fixed: Option<f64>) -> f64 {
    if let Some(f) = fixed {
        return f;
    }
    let denom = stake + others;
    if denom > 0.0 {
        stake / denom
    } else {
        0.0
    }
}

pub fn expected_return(hit_rate: f64, f_share: f64, net_pool: f64) -> f64 {
    hit_rate * f_share * net_pool
}

// ---------------------------------------------------------------------------
// Scenario evaluation
// ---------------------------------------------------------------------------

/// Economics of one stake / hit-rate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Economics {
    pub stake: f64,
    pub hit_rate: f64,
    pub net_pool: f64,
    pub f_share: f64,
    pub expected_return: f64,
    pub expected_profit: f64,
}

impl Economics {
    pub fn is_positive_ev(&self) -> bool {
        self.expected_profit > 0.0
    }

    pub fn roi(&self) -> f64 {
        if self.stake > 0.0 {
            self.expected_profit / self.stake
        } else {
            0.0
        }
    }
}

pub fn evaluate(params: &PoolParams, stake: f64, hit_rate: f64) -> Economics {
    let np = net_pool(params, stake);
    let f = params.f_share_at(stake);
    let er = expected_return(hit_rate, f, np);
    Economics {
        stake,
        hit_rate,
        net_pool: np,
        f_share: f,
        expected_return: er,
        expected_profit: er - stake,
    }
}

/// Viability of covering `lines_covered` of the N-choose-K ordered lines.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ViabilityReport {
    pub lines_covered: u64,
    pub total_lines: u64,
    /// Fraction of all lines covered.
    pub coverage: f64,
    pub economics: Economics,
}

pub fn evaluate_coverage(
    params: &PoolParams,
    n: usize,
    k: usize,
    lines_covered: u64,
    stake_per_line: f64,
    hit_rate: f64,
) -> ViabilityReport {
    let total = total_lines(n, k);
    let covered = lines_covered.min(total);
    let stake = stake_for_coverage(covered, total, stake_per_line);
    ViabilityReport {
        lines_covered: covered,
        total_lines: total,
        coverage: if total > 0 {
            covered as f64 / total as f64
        } else {
            0.0
        },
        economics: evaluate(params, stake, hit_rate),
    }
}

/// Viability at `steps` evenly spaced coverage levels, assuming every line is
/// equally likely (hit rate = covered / total).
pub fn coverage_grid(
    params: &PoolParams,
    n: usize,
    k: usize,
    stake_per_line: f64,
    steps: usize,
) -> Vec<ViabilityReport> {
    let total = total_lines(n, k);
    if total == 0 || steps == 0 {
        return Vec::new();
    }
    let mut grid: Vec<ViabilityReport> = Vec::with_capacity(steps);
    for step in 1..=steps {
        let lines = ((total as f64) * step as f64 / steps as f64).round() as u64;
        let lines = lines.clamp(1, total);
        if grid.last().is_some_and(|r| r.lines_covered == lines) {
            continue;
        }
        let hit_rate = lines as f64 / total as f64;
        grid.push(evaluate_coverage(params, n, k, lines, stake_per_line, hit_rate));
    }
    grid
}

// ---------------------------------------------------------------------------
// Break-even solutions
// ---------------------------------------------------------------------------

/// Others-pool size at which expected profit is exactly zero, holding the
/// F-share fixed at `f_share`.
///
/// A negative result means the stake is profitable even with no competing
/// money.
pub fn break_even_others_pool(
    params: &PoolParams,
    stake: f64,
    hit_rate: f64,
    f_share: f64,
) -> Result<f64, PlannerError> {
    let keep = 1.0 - params.takeout;
    let undefined = |what: &str| {
        Err(PlannerError::Computation(format!(
            "break-even pool undefined: {what} is zero"
        )))
    };
    if f_share == 0.0 {
        return undefined("f-share");
    }
    if keep == 0.0 {
        return undefined("1 - takeout");
    }
    if stake == 0.0 {
        return undefined("stake");
    }
    if hit_rate == 0.0 {
        return undefined("hit rate");
    }
    if params.multiplier == 0.0 {
        return undefined("multiplier");
    }
    let own = if params.self_in_pool { stake } else { 0.0 };
    Ok((stake / (hit_rate * f_share * params.multiplier) - params.rollover) / keep - own)
}

/// Minimum coverage fraction for positive EV.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum AlphaThreshold {
    /// Coverage above this fraction is positive EV. Values <= 0 mean any
    /// coverage is; values > 1 mean none is.
    Fraction(f64),
    /// Without our stake in the pool, EV sign does not depend on coverage.
    AllOrNothing { positive: bool },
}

impl AlphaThreshold {
    pub fn is_attainable(&self) -> bool {
        match *self {
            AlphaThreshold::Fraction(a) => a < 1.0,
            AlphaThreshold::AllOrNothing { positive } => positive,
        }
    }
}

/// Solve for the coverage fraction at which EV crosses zero, assuming
/// uniform line probabilities and an F-share held fixed at `f_share`.
pub fn alpha_min(
    params: &PoolParams,
    total_lines: u64,
    stake_per_line: f64,
    f_share: f64,
) -> Result<AlphaThreshold, PlannerError> {
    let full_stake = total_lines as f64 * stake_per_line;
    let keep = 1.0 - params.takeout;

    if !params.self_in_pool {
        let np = params.multiplier * (keep * params.others_pool + params.rollover);
        return Ok(AlphaThreshold::AllOrNothing {
            positive: f_share * np > full_stake,
        });
    }

    let denom = f_share * params.multiplier * keep * full_stake;
    if denom == 0.0 {
        return Err(PlannerError::Computation(
            "alpha_min undefined: f-share, multiplier, 1 - takeout or full stake is zero"
                .to_string(),
        ));
    }
    let fixed_part = f_share * params.multiplier * (keep * params.others_pool + params.rollover);
    Ok(AlphaThreshold::Fraction((full_stake - fixed_part) / denom))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
