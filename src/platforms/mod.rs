//! Wagering integrations.
//!
//! Defines the `WageringProvider` trait and the bet request / outcome types
//! that cross it. Implementations:
//! - Tote GraphQL (`tote`): audit or live placement over HTTP
//! - Paper (`paper`): in-memory, never commits money

pub mod paper;
pub mod tote;

use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{PlannerError, StakingPlan};

// ---------------------------------------------------------------------------
// Request / outcome
// ---------------------------------------------------------------------------

/// Whether a placement commits money.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WagerMode {
    /// Non-committing; exercised end to end without financial effect.
    #[default]
    Audit,
    Live,
}

impl fmt::Display for WagerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WagerMode::Audit => write!(f, "audit"),
            WagerMode::Live => write!(f, "live"),
        }
    }
}

/// One covered permutation on the ticket.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BetLine {
    /// Cloth numbers in finishing order.
    pub selection: Vec<u32>,
    pub stake: Decimal,
}

/// A full ticket for one recommendation.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BetRequest {
    /// Also the idempotency key sent to the provider.
    pub recommendation_id: String,
    pub product_id: String,
    pub currency: String,
    pub mode: WagerMode,
    pub lines: Vec<BetLine>,
    pub total_stake: Decimal,
}

impl BetRequest {
    /// Build a ticket from a plan, rounding each stake to pennies.
    pub fn from_plan(
        recommendation_id: &str,
        product_id: &str,
        currency: &str,
        plan: &StakingPlan,
        mode: WagerMode,
    ) -> Result<Self, PlannerError> {
        let mut lines = Vec::with_capacity(plan.lines.len());
        for line in &plan.lines {
            let stake = Decimal::from_f64(line.stake)
                .ok_or_else(|| {
                    PlannerError::Computation(format!("stake {} is not representable", line.stake))
                })?
                .round_dp(2);
            if stake <= Decimal::ZERO {
                continue;
            }
            lines.push(BetLine {
                selection: line.line.numbers.clone(),
                stake,
            });
        }
        let total_stake = lines.iter().map(|l| l.stake).sum();
        Ok(Self {
            recommendation_id: recommendation_id.to_string(),
            product_id: product_id.to_string(),
            currency: currency.to_string(),
            mode,
            lines,
            total_stake,
        })
    }
}

/// What the provider said about a placement.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlacementOutcome {
    Accepted { bet_id: String },
    Rejected { reason: String },
    /// The response could not be classified; the bet may or may not exist.
    Unknown { raw: String },
}

impl fmt::Display for PlacementOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementOutcome::Accepted { bet_id } => write!(f, "accepted ({bet_id})"),
            PlacementOutcome::Rejected { reason } => write!(f, "rejected: {reason}"),
            PlacementOutcome::Unknown { raw } => write!(f, "unknown: {raw}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Abstraction over pool-betting operators.
///
/// Audit and live mode go through the same call; only `request.mode`
/// differs. Errors are reserved for transport problems: a provider that
/// answered with a refusal returns `Ok(PlacementOutcome::Rejected)`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WageringProvider: Send + Sync {
    async fn place_bet(&self, request: &BetRequest) -> Result<PlacementOutcome, PlannerError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
