//! Paper wagering.
//!
//! Records every ticket in memory and accepts it with a synthetic id.
//! Used when no operator credentials are configured, and in tests.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use super::{BetRequest, PlacementOutcome, WageringProvider};
use crate::types::PlannerError;

#[derive(Default)]
pub struct PaperWagering {
    placed: Mutex<Vec<BetRequest>>,
}

impl PaperWagering {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every ticket received so far, in arrival order.
    pub async fn requests(&self) -> Vec<BetRequest> {
        self.placed.lock().await.clone()
    }
}

#[async_trait]
impl WageringProvider for PaperWagering {
    async fn place_bet(&self, request: &BetRequest) -> Result<PlacementOutcome, PlannerError> {
        let bet_id = format!("paper-{}", uuid::Uuid::new_v4());
        info!(
            recommendation_id = %request.recommendation_id,
            product_id = %request.product_id,
            mode = %request.mode,
            lines = request.lines.len(),
            stake = %request.total_stake,
            bet_id = %bet_id,
            "[PAPER] Ticket recorded"
        );
        self.placed.lock().await.push(request.clone());
        Ok(PlacementOutcome::Accepted { bet_id })
    }
}
