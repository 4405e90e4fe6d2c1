//! Shared types for the superfecta decision engine.
//!
//! These types form the data model used across all modules. The strategy
//! layer produces plans from them, the engine layer moves recommendations
//! through their lifecycle, and the storage and platform layers persist or
//! transmit them without depending on each other.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Runners
// ---------------------------------------------------------------------------

/// A runner as supplied by the race data source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Runner {
    /// Stable identifier, unique within the race.
    pub id: String,
    pub name: String,
    /// Program / cloth number used on the bet slip.
    pub number: u32,
    /// Model win-probability estimate, when the trained model covered this runner.
    #[serde(default)]
    pub model_probability: Option<f64>,
    /// Best available decimal odds.
    #[serde(default)]
    pub odds: Option<f64>,
    #[serde(default)]
    pub is_key: bool,
    #[serde(default)]
    pub is_poor: bool,
}

impl Runner {
    /// Helper to build a test runner with odds only.
    #[cfg(test)]
    pub fn sample(number: u32, odds: f64) -> Self {
        Runner {
            id: format!("r{number}"),
            name: format!("Runner {number}"),
            number,
            model_probability: None,
            odds: Some(odds),
            is_key: false,
            is_poor: false,
        }
    }
}

/// A runner with a computed, probability-proportional strength.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatedRunner {
    pub id: String,
    pub name: String,
    pub number: u32,
    /// Positive weight; not normalised.
    pub strength: f64,
    pub odds: Option<f64>,
    pub is_key: bool,
    pub is_poor: bool,
}

impl fmt::Display for RatedRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} (s={:.4}", self.number, self.name, self.strength)?;
        if let Some(odds) = self.odds {
            write!(f, ", odds={odds:.2}")?;
        }
        if self.is_key {
            write!(f, ", key")?;
        }
        if self.is_poor {
            write!(f, ", poor")?;
        }
        write!(f, ")")
    }
}

// ---------------------------------------------------------------------------
// Permutation lines
// ---------------------------------------------------------------------------

/// One ordered finishing combination and its Plackett-Luce probability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PermutationLine {
    /// Runner ids in finishing order (1st, 2nd, ...).
    pub runner_ids: Vec<String>,
    /// Cloth numbers in finishing order.
    pub numbers: Vec<u32>,
    pub probability: f64,
    /// 1 = most probable line.
    pub rank: usize,
}

impl PermutationLine {
    /// Bet-slip style selection, e.g. `3-1-7-2`.
    pub fn selection(&self) -> String {
        self.numbers
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join("-")
    }
}

impl fmt::Display for PermutationLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} (p={:.5})",
            self.rank,
            self.selection(),
            self.probability
        )
    }
}

// ---------------------------------------------------------------------------
// Pool & race context
// ---------------------------------------------------------------------------

fn default_multiplier() -> f64 {
    1.0
}

/// Pari-mutuel pool snapshot for one product.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolContext {
    /// Gross money in the pool, before takeout.
    pub gross_total: f64,
    /// Net pool as reported by the operator (informational).
    #[serde(default)]
    pub net_total: f64,
    /// Takeout rate t in [0, 1).
    pub takeout: f64,
    /// Net rollover carried into this pool.
    #[serde(default)]
    pub rollover: f64,
    /// Dividend multiplier (payout scaling).
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    pub currency: String,
    /// Money of our own already sitting in the gross pool.
    #[serde(default)]
    pub own_stake: f64,
}

impl PoolContext {
    /// Portion of the gross pool not attributable to us.
    pub fn others_pool(&self) -> f64 {
        (self.gross_total - self.own_stake).max(0.0)
    }
}

/// Wagering status of a pool product.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProductStatus {
    Open,
    Suspended,
    Closed,
    #[serde(other)]
    Unknown,
}

impl ProductStatus {
    pub fn is_open_for_betting(&self) -> bool {
        matches!(self, ProductStatus::Open)
    }
}

impl fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProductStatus::Open => "OPEN",
            ProductStatus::Suspended => "SUSPENDED",
            ProductStatus::Closed => "CLOSED",
            ProductStatus::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

/// Everything the planner needs to price one race's product.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RaceContext {
    pub race_id: String,
    pub product_id: String,
    pub event_name: String,
    pub start_time: DateTime<Utc>,
    pub product_status: ProductStatus,
    pub runners: Vec<Runner>,
    pub pool: PoolContext,
}

impl RaceContext {
    /// Minutes until post time; negative once the race is off.
    pub fn minutes_to_post(&self, now: DateTime<Utc>) -> f64 {
        minutes_between(now, self.start_time)
    }
}

/// Fractional minutes from `from` to `to`.
pub fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 60_000.0
}

/// A product listed for the scan day, before full context is fetched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RaceCandidate {
    pub product_id: String,
    pub race_id: String,
    pub event_name: String,
    pub start_time: DateTime<Utc>,
    pub n_competitors: usize,
    #[serde(default)]
    pub rollover: f64,
    /// Operator-published pool ROI, when available.
    #[serde(default)]
    pub roi_current: Option<f64>,
    pub currency: String,
}

// ---------------------------------------------------------------------------
// Staking plans
// ---------------------------------------------------------------------------

/// A covered line with its stake and the pool economics used to price it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanLine {
    pub line: PermutationLine,
    pub stake: f64,
    /// Estimated competing money on this exact line.
    pub others_estimate: f64,
    pub f_share: f64,
    pub expected_return: f64,
}

/// The single bounded parameter retry the optimizer may take.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParameterAdjustment {
    pub concentration_before: f64,
    pub concentration_after: f64,
    pub market_inefficiency_before: f64,
    pub market_inefficiency_after: f64,
    /// Whether the adjusted scenario replaced the original one.
    pub adopted: bool,
}

/// Immutable result of one optimizer evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StakingPlan {
    pub preset: String,
    pub lines: Vec<PlanLine>,
    pub total_stake: f64,
    /// Sum of covered line probabilities.
    pub hit_rate: f64,
    pub expected_return: f64,
    pub expected_profit: f64,
    /// Probability-weighted F-share across covered lines.
    pub f_share: f64,
    pub net_pool: f64,
    pub bankroll: f64,
    /// Lines enumerated before coverage selection.
    pub lines_available: usize,
    #[serde(default)]
    pub adjustment: Option<ParameterAdjustment>,
}

impl StakingPlan {
    pub fn roi(&self) -> f64 {
        if self.total_stake > 0.0 {
            self.expected_profit / self.total_stake
        } else {
            0.0
        }
    }

    pub fn is_positive_ev(&self) -> bool {
        self.expected_profit > 0.0
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl fmt::Display for StakingPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} lines | stake {:.2} | hit {:.1}% | ER {:.2} | EP {:.2} | ROI {:.1}%",
            self.preset,
            self.lines.len(),
            self.total_stake,
            self.hit_rate * 100.0,
            self.expected_return,
            self.expected_profit,
            self.roi() * 100.0,
        )
    }
}

// ---------------------------------------------------------------------------
// Recommendation lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationStatus {
    Filtered,
    Error,
    Monitoring,
    Hold,
    Ready,
    Placed,
    Skipped,
}

impl RecommendationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationStatus::Filtered => "filtered",
            RecommendationStatus::Error => "error",
            RecommendationStatus::Monitoring => "monitoring",
            RecommendationStatus::Hold => "hold",
            RecommendationStatus::Ready => "ready",
            RecommendationStatus::Placed => "placed",
            RecommendationStatus::Skipped => "skipped",
        }
    }

    /// No exits at all.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecommendationStatus::Placed | RecommendationStatus::Skipped
        )
    }

    /// Statuses the Live Monitor re-evaluates.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            RecommendationStatus::Monitoring
                | RecommendationStatus::Hold
                | RecommendationStatus::Ready
        )
    }

    /// State machine edges. `filtered` is only ever assigned at creation and
    /// `placed` is only reachable from `ready`.
    pub fn can_transition_to(&self, next: RecommendationStatus) -> bool {
        use RecommendationStatus::*;
        match (*self, next) {
            (Placed, _) | (Skipped, _) | (Filtered, _) => false,
            (_, Filtered) => false,
            (from, Placed) => from == Ready,
            _ => true,
        }
    }
}

impl fmt::Display for RecommendationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RecommendationStatus {
    type Err = PlannerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "filtered" => Ok(RecommendationStatus::Filtered),
            "error" => Ok(RecommendationStatus::Error),
            "monitoring" => Ok(RecommendationStatus::Monitoring),
            "hold" => Ok(RecommendationStatus::Hold),
            "ready" => Ok(RecommendationStatus::Ready),
            "placed" => Ok(RecommendationStatus::Placed),
            "skipped" => Ok(RecommendationStatus::Skipped),
            other => Err(PlannerError::Validation(format!(
                "unknown recommendation status: {other}"
            ))),
        }
    }
}

/// One recommendation per (race, product) for a run date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    /// `<run_date>-<product_id>`
    pub id: String,
    pub run_date: NaiveDate,
    pub product_id: String,
    pub race_id: String,
    pub event_name: String,
    pub start_time: DateTime<Utc>,
    pub currency: String,
    pub preset: String,
    pub status: RecommendationStatus,
    pub plan: Option<StakingPlan>,
    pub decision_reason: Option<String>,
    /// Set when an `error` came from a transient provider failure that the
    /// next Live Monitor pass may re-evaluate.
    #[serde(default)]
    pub retryable: bool,
    pub bet_id: Option<String>,
    pub minutes_to_post: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ready_at: Option<DateTime<Utc>>,
    pub finalized_at: Option<DateTime<Utc>>,
    /// Set by Execute just before it submits the ticket. Live Monitor
    /// leaves a claimed `ready` record alone.
    #[serde(default)]
    pub placement_started_at: Option<DateTime<Utc>>,
    /// Successful writes so far. A store only accepts a write made against
    /// the version it currently holds.
    #[serde(default)]
    pub version: u64,
}

impl Recommendation {
    pub fn make_id(run_date: NaiveDate, product_id: &str) -> String {
        format!("{}-{}", run_date.format("%Y-%m-%d"), product_id)
    }

    /// Fresh recommendation for a scanned candidate.
    pub fn new(
        run_date: NaiveDate,
        candidate: &RaceCandidate,
        preset: &str,
        status: RecommendationStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Recommendation {
            id: Self::make_id(run_date, &candidate.product_id),
            run_date,
            product_id: candidate.product_id.clone(),
            race_id: candidate.race_id.clone(),
            event_name: candidate.event_name.clone(),
            start_time: candidate.start_time,
            currency: candidate.currency.clone(),
            preset: preset.to_string(),
            status,
            plan: None,
            decision_reason: None,
            retryable: false,
            bet_id: None,
            minutes_to_post: Some(minutes_between(now, candidate.start_time)),
            created_at: now,
            updated_at: now,
            ready_at: None,
            finalized_at: None,
            placement_started_at: None,
            version: 0,
        }
    }

    /// Whether a stage may still act on this recommendation.
    pub fn is_actionable(&self) -> bool {
        self.status.is_live() || (self.status == RecommendationStatus::Error && self.retryable)
    }

    /// `ready` and claimed by an Execute pass that has not recorded an outcome.
    pub fn placement_in_flight(&self) -> bool {
        self.status == RecommendationStatus::Ready && self.placement_started_at.is_some()
    }

    /// Move to `to`, enforcing the state machine and stamping timestamps.
    pub fn transition(
        &mut self,
        to: RecommendationStatus,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), PlannerError> {
        let allowed = self.status.can_transition_to(to)
            && (self.status != RecommendationStatus::Error || self.retryable);
        if !allowed {
            return Err(PlannerError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        let was = self.status;
        self.status = to;
        self.decision_reason = reason;
        self.retryable = false;
        self.updated_at = now;
        if to == RecommendationStatus::Ready && was != RecommendationStatus::Ready {
            self.ready_at = Some(now);
        }
        if to.is_terminal() {
            self.finalized_at = Some(now);
        }
        Ok(())
    }

    /// Move to `error`, recording whether a later pass may re-attempt.
    pub fn fail(
        &mut self,
        reason: String,
        retryable: bool,
        now: DateTime<Utc>,
    ) -> Result<(), PlannerError> {
        self.transition(RecommendationStatus::Error, Some(reason), now)?;
        self.retryable = retryable;
        Ok(())
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.id, self.status, self.event_name)?;
        if let Some(ref plan) = self.plan {
            write!(f, " | EP {:.2}", plan.expected_profit)?;
        }
        if let Some(ref reason) = self.decision_reason {
            write!(f, " | {reason}")?;
        }
        Ok(())
    }
}

/// Append-only audit record of one Live Monitor evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LiveCheck {
    pub check_id: String,
    pub recommendation_id: String,
    pub product_id: String,
    pub check_ts: DateTime<Utc>,
    pub minutes_to_post: f64,
    pub pool_gross: Option<f64>,
    pub rollover: Option<f64>,
    pub total_stake: Option<f64>,
    pub hit_rate: Option<f64>,
    pub expected_return: Option<f64>,
    pub expected_profit: Option<f64>,
    pub roi: Option<f64>,
    pub threshold_met: bool,
    /// Status after this evaluation.
    pub status: RecommendationStatus,
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// Stage summaries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    MorningScan,
    LiveMonitor,
    Execute,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::MorningScan => write!(f, "morning-scan"),
            Stage::LiveMonitor => write!(f, "live-monitor"),
            Stage::Execute => write!(f, "execute"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemFailure {
    pub id: String,
    pub message: String,
}

/// Per-invocation outcome counts; one item never aborts the batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageSummary {
    pub stage: Stage,
    pub considered: usize,
    pub outcomes: BTreeMap<String, usize>,
    pub failures: Vec<ItemFailure>,
}

impl StageSummary {
    pub fn new(stage: Stage) -> Self {
        StageSummary {
            stage,
            considered: 0,
            outcomes: BTreeMap::new(),
            failures: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: &str) {
        *self.outcomes.entry(outcome.to_string()).or_insert(0) += 1;
    }

    pub fn record_failure(&mut self, id: &str, message: impl Into<String>) {
        self.failures.push(ItemFailure {
            id: id.to_string(),
            message: message.into(),
        });
    }

    pub fn count(&self, outcome: &str) -> usize {
        self.outcomes.get(outcome).copied().unwrap_or(0)
    }
}

impl fmt::Display for StageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: considered={}", self.stage, self.considered)?;
        for (outcome, n) in &self.outcomes {
            write!(f, " {outcome}={n}")?;
        }
        if !self.failures.is_empty() {
            write!(f, " failures={}", self.failures.len())?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Coarse error classes that drive propagation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Computation,
    Transient,
    Placement,
    Storage,
}

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Insufficient runners: need {required}, have {available}")]
    InsufficientRunners { required: usize, available: usize },

    #[error("Invalid odds for runner {runner}: {odds}")]
    InvalidOdds { runner: String, odds: f64 },

    #[error("Invalid plan inputs: {}", join_errors(.0))]
    InvalidInputs(Vec<PlannerError>),

    #[error("Computation error: {0}")]
    Computation(String),

    #[error("Transient provider error ({provider}): {message}")]
    Transient {
        provider: String,
        message: String,
        /// The provider confirmed the request was not accepted.
        not_accepted: bool,
    },

    #[error("Placement rejected: {0}")]
    Placement(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: RecommendationStatus,
        to: RecommendationStatus,
    },

    #[error("Storage error: {0}")]
    Storage(String),
}

fn join_errors(errors: &[PlannerError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl PlannerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlannerError::Validation(_)
            | PlannerError::InsufficientRunners { .. }
            | PlannerError::InvalidOdds { .. }
            | PlannerError::InvalidInputs(_)
            | PlannerError::NotFound(_)
            | PlannerError::InvalidTransition { .. } => ErrorKind::Validation,
            PlannerError::Computation(_) => ErrorKind::Computation,
            PlannerError::Transient { .. } => ErrorKind::Transient,
            PlannerError::Placement(_) => ErrorKind::Placement,
            PlannerError::Storage(_) => ErrorKind::Storage,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Safe to resend a placement after this error.
    pub fn confirms_not_accepted(&self) -> bool {
        matches!(
            self,
            PlannerError::Transient {
                not_accepted: true,
                ..
            }
        )
    }

    pub fn transient(provider: &str, message: impl Into<String>, not_accepted: bool) -> Self {
        PlannerError::Transient {
            provider: provider.to_string(),
            message: message.into(),
            not_accepted,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
