//! Scriptable tote for integration testing.
//!
//! Accepts every ticket unless told otherwise, and records each request it
//! sees. Failures can be queued ahead of time to exercise the placement
//! retry rules.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use superfecta::platforms::{BetRequest, PlacementOutcome, WageringProvider};
use superfecta::types::PlannerError;

/// One scripted response, consumed per `place_bet` call.
#[derive(Debug, Clone)]
pub enum Script {
    /// Provider says the ticket never reached the book.
    NotAccepted(String),
    /// Connection dropped after sending; the ticket may or may not exist.
    Ambiguous(String),
    Reject(String),
}

#[derive(Default)]
pub struct MockTote {
    script: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<BetRequest>>,
}

impl MockTote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue responses ahead of the default acceptance.
    pub fn script(&self, steps: impl IntoIterator<Item = Script>) {
        self.script.lock().unwrap().extend(steps);
    }

    /// Every request seen, including failed attempts.
    pub fn requests(&self) -> Vec<BetRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl WageringProvider for MockTote {
    async fn place_bet(&self, request: &BetRequest) -> Result<PlacementOutcome, PlannerError> {
        let attempt = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };

        match self.script.lock().unwrap().pop_front() {
            Some(Script::NotAccepted(msg)) => Err(PlannerError::transient("mock", msg, true)),
            Some(Script::Ambiguous(msg)) => Err(PlannerError::transient("mock", msg, false)),
            Some(Script::Reject(reason)) => Ok(PlacementOutcome::Rejected { reason }),
            None => Ok(PlacementOutcome::Accepted {
                bet_id: format!("MOCK-{}-{attempt}", request.product_id),
            }),
        }
    }
}
