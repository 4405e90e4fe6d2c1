//! Tote pool-betting integration.
//!
//! Places superfecta tickets through the operator's GraphQL gateway. Audit
//! and live placements use separate endpoints; the payload is identical.
//! The API key is held as a `SecretString` and only exposed when building
//! the `Authorization` header.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{BetRequest, PlacementOutcome, WagerMode, WageringProvider};
use crate::types::PlannerError;

const PROVIDER_NAME: &str = "tote";

const PLACE_BETS_MUTATION: &str = "mutation PlaceBets($input: PlaceBetsInput!) { \
placeBets(input: $input) { results { toteBetId status failureReason } } }";

// ---------------------------------------------------------------------------
// Response shape
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<PlaceBetsData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaceBetsData {
    place_bets: Option<PlaceBetsPayload>,
}

#[derive(Debug, Deserialize)]
struct PlaceBetsPayload {
    #[serde(default)]
    results: Vec<BetResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BetResult {
    tote_bet_id: Option<String>,
    status: Option<String>,
    failure_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

/// Classify a raw `placeBets` response body.
pub fn interpret_response(raw: &str) -> PlacementOutcome {
    let unknown = || PlacementOutcome::Unknown {
        raw: raw.to_string(),
    };
    let Ok(parsed) = serde_json::from_str::<GraphQlResponse>(raw) else {
        return unknown();
    };

    let results = parsed
        .data
        .and_then(|d| d.place_bets)
        .map(|p| p.results)
        .unwrap_or_default();

    if results.is_empty() {
        if parsed.errors.is_empty() {
            return unknown();
        }
        let reason = parsed
            .errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        return PlacementOutcome::Rejected { reason };
    }

    let mut bet_ids = Vec::with_capacity(results.len());
    for result in &results {
        let status = result.status.as_deref().unwrap_or("").to_uppercase();
        if let Some(reason) = result.failure_reason.as_ref().filter(|r| !r.is_empty()) {
            return PlacementOutcome::Rejected {
                reason: reason.clone(),
            };
        }
        match status.as_str() {
            "REJECTED" | "FAILED" | "ERROR" | "CANCELLED" => {
                return PlacementOutcome::Rejected { reason: status };
            }
            "ACCEPTED" | "PLACED" | "SUCCESS" | "OK" | "PENDING" => {}
            _ => return unknown(),
        }
        match result.tote_bet_id.as_ref().filter(|id| !id.is_empty()) {
            Some(id) => bet_ids.push(id.clone()),
            None => return unknown(),
        }
    }

    PlacementOutcome::Accepted {
        bet_id: bet_ids.join(","),
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct ToteClient {
    http: Client,
    audit_url: String,
    live_url: String,
    auth_scheme: String,
    api_key: SecretString,
}

impl ToteClient {
    pub fn new(
        audit_url: String,
        live_url: String,
        auth_scheme: String,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, PlannerError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("superfecta/0.1")
            .build()
            .map_err(|e| PlannerError::Validation(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            audit_url,
            live_url,
            auth_scheme,
            api_key,
        })
    }

    fn endpoint(&self, mode: WagerMode) -> Result<&str, PlannerError> {
        let url = match mode {
            WagerMode::Audit => &self.audit_url,
            WagerMode::Live => &self.live_url,
        };
        if url.is_empty() {
            return Err(PlannerError::Validation(format!(
                "no {mode} wagering endpoint configured"
            )));
        }
        Ok(url)
    }

    /// GraphQL variables for one ticket: one bet per covered line, each
    /// with one leg whose selections carry finishing positions.
    pub fn build_variables(request: &BetRequest) -> serde_json::Value {
        let bets: Vec<serde_json::Value> = request
            .lines
            .iter()
            .map(|line| {
                let selections: Vec<serde_json::Value> = line
                    .selection
                    .iter()
                    .enumerate()
                    .map(|(i, number)| json!({ "number": number, "finishingPosition": i + 1 }))
                    .collect();
                json!({
                    "bet": {
                        "productId": request.product_id,
                        "stake": {
                            "amount": { "decimalAmount": line.stake },
                            "currency": request.currency,
                        },
                        "legs": [{ "selections": selections }],
                    }
                })
            })
            .collect();
        json!({
            "input": {
                "ticketId": request.recommendation_id,
                "bets": bets,
            }
        })
    }
}

fn transport_error(e: &reqwest::Error) -> PlannerError {
    // A connect failure means nothing reached the operator.
    let not_accepted = e.is_connect() || e.is_builder();
    PlannerError::transient(PROVIDER_NAME, e.to_string(), not_accepted)
}

#[async_trait]
impl WageringProvider for ToteClient {
    async fn place_bet(&self, request: &BetRequest) -> Result<PlacementOutcome, PlannerError> {
        let url = self.endpoint(request.mode)?;
        let body = json!({
            "query": PLACE_BETS_MUTATION,
            "variables": Self::build_variables(request),
        });

        debug!(
            recommendation_id = %request.recommendation_id,
            mode = %request.mode,
            lines = request.lines.len(),
            "Sending placeBets"
        );

        let resp = self
            .http
            .post(url)
            .header(
                "Authorization",
                format!("{} {}", self.auth_scheme, self.api_key.expose_secret()),
            )
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| transport_error(&e))?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(status = %status, "Tote rate limited placement");
            return Err(PlannerError::transient(PROVIDER_NAME, "HTTP 429", true));
        }
        if status.is_server_error() {
            warn!(status = %status, body = %text, "Tote server error on placement");
            return Err(PlannerError::transient(
                PROVIDER_NAME,
                format!("HTTP {status}: {text}"),
                false,
            ));
        }
        if !status.is_success() {
            return Ok(PlacementOutcome::Rejected {
                reason: format!("HTTP {status}: {text}"),
            });
        }

        let outcome = interpret_response(&text);
        info!(
            recommendation_id = %request.recommendation_id,
            product_id = %request.product_id,
            mode = %request.mode,
            stake = %request.total_stake,
            outcome = %outcome,
            "Tote placement answered"
        );
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
