//! Snapshot race source.
//!
//! Serves candidates and race contexts from a JSON document:
//!
//! ```json
//! { "races": [ { "race_id": "...", "product_id": "...", "runners": [...], "pool": {...} } ],
//!   "candidates": [ ... ] }
//! ```
//!
//! `candidates` is optional; when absent it is derived from `races`. The
//! source is mutable in place so tests and replays can move a race forward
//! between stage runs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

use super::RaceDataSource;
use crate::types::{PlannerError, RaceCandidate, RaceContext};

#[derive(Debug, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    races: Vec<RaceContext>,
    #[serde(default)]
    candidates: Vec<RaceCandidate>,
}

#[derive(Default)]
pub struct SnapshotSource {
    races: DashMap<String, RaceContext>,
    candidates: DashMap<String, RaceCandidate>,
    /// Injected transient failures keyed by product id.
    failures: DashMap<String, String>,
}

/// Candidate summary of a full race context.
pub fn candidate_for(race: &RaceContext) -> RaceCandidate {
    RaceCandidate {
        product_id: race.product_id.clone(),
        race_id: race.race_id.clone(),
        event_name: race.event_name.clone(),
        start_time: race.start_time,
        n_competitors: race.runners.len(),
        rollover: race.pool.rollover,
        roi_current: None,
        currency: race.pool.currency.clone(),
    }
}

impl SnapshotSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_races(races: impl IntoIterator<Item = RaceContext>) -> Self {
        let source = Self::new();
        for race in races {
            source.upsert_race(race);
        }
        source
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: SnapshotFile = serde_json::from_str(json).context("Failed to parse race snapshot")?;
        let source = Self::from_races(file.races);
        for candidate in file.candidates {
            source
                .candidates
                .insert(candidate.product_id.clone(), candidate);
        }
        Ok(source)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        let source = Self::from_json(&json)?;
        info!(
            path = %path.display(),
            races = source.races.len(),
            candidates = source.candidates.len(),
            "Race snapshot loaded"
        );
        Ok(source)
    }

    /// Insert or replace a race; keeps its candidate entry in step.
    pub fn upsert_race(&self, race: RaceContext) {
        let candidate = match self.candidates.get(&race.product_id) {
            Some(existing) => RaceCandidate {
                start_time: race.start_time,
                n_competitors: race.runners.len(),
                rollover: race.pool.rollover,
                ..existing.clone()
            },
            None => candidate_for(&race),
        };
        self.candidates.insert(race.product_id.clone(), candidate);
        self.races.insert(race.product_id.clone(), race);
    }

    pub fn upsert_candidate(&self, candidate: RaceCandidate) {
        self.candidates.insert(candidate.product_id.clone(), candidate);
    }

    /// Make every fetch of `product_id` fail transiently until cleared.
    pub fn fail_product(&self, product_id: &str, message: &str) {
        self.failures.insert(product_id.to_string(), message.to_string());
    }

    pub fn clear_failure(&self, product_id: &str) {
        self.failures.remove(product_id);
    }
}

#[async_trait]
impl RaceDataSource for SnapshotSource {
    async fn list_candidates(&self, date: NaiveDate) -> Result<Vec<RaceCandidate>, PlannerError> {
        let mut out: Vec<RaceCandidate> = self
            .candidates
            .iter()
            .filter(|c| c.start_time.date_naive() == date)
            .map(|c| c.value().clone())
            .collect();
        out.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.product_id.cmp(&b.product_id))
        });
        Ok(out)
    }

    async fn race_context(&self, product_id: &str) -> Result<RaceContext, PlannerError> {
        if let Some(message) = self.failures.get(product_id) {
            return Err(PlannerError::transient("snapshot", message.value().clone(), true));
        }
        self.races
            .get(product_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| PlannerError::NotFound(format!("race context for product {product_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const SNAPSHOT: &str = r#"{
        "races": [
            {
                "race_id": "R2",
                "product_id": "SF2",
                "event_name": "Ascot 15:10",
                "start_time": "2026-10-19T15:10:00Z",
                "product_status": "OPEN",
                "runners": [
                    { "id": "a", "name": "Alpha", "number": 1, "odds": 3.0 },
                    { "id": "b", "name": "Bravo", "number": 2, "odds": 4.5 }
                ],
                "pool": { "gross_total": 900.0, "takeout": 0.3, "currency": "GBP" }
            },
            {
                "race_id": "R1",
                "product_id": "SF1",
                "event_name": "Ascot 14:30",
                "start_time": "2026-10-19T14:30:00Z",
                "product_status": "SUSPENDED",
                "runners": [],
                "pool": { "gross_total": 100.0, "takeout": 0.3, "rollover": 50.0, "currency": "GBP" }
            },
            {
                "race_id": "R9",
                "product_id": "SF9",
                "event_name": "Tomorrow",
                "start_time": "2026-10-20T12:00:00Z",
                "product_status": "OPEN",
                "runners": [],
                "pool": { "gross_total": 0.0, "takeout": 0.3, "currency": "GBP" }
            }
        ],
        "candidates": [
            {
                "product_id": "SF2", "race_id": "R2", "event_name": "Ascot 15:10",
                "start_time": "2026-10-19T15:10:00Z", "n_competitors": 2,
                "roi_current": 0.12, "currency": "GBP"
            }
        ]
    }"#;

    #[tokio::test]
    async fn test_candidates_for_date_in_post_order() {
        let source = SnapshotSource::from_json(SNAPSHOT).unwrap();
        let day = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let cands = source.list_candidates(day).await.unwrap();
        let ids: Vec<_> = cands.iter().map(|c| c.product_id.as_str()).collect();
        assert_eq!(ids, vec!["SF1", "SF2"]);
        // Explicit candidate entries win over derived ones.
        assert_eq!(cands[1].roi_current, Some(0.12));
        assert_eq!(cands[0].rollover, 50.0);
    }

    #[tokio::test]
    async fn test_race_context_defaults_and_missing() {
        let source = SnapshotSource::from_json(SNAPSHOT).unwrap();
        let race = source.race_context("SF2").await.unwrap();
        assert_eq!(race.pool.multiplier, 1.0);
        assert_eq!(race.runners[1].odds, Some(4.5));
        assert!(matches!(
            source.race_context("SF404").await,
            Err(PlannerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_failure_is_transient() {
        let source = SnapshotSource::from_json(SNAPSHOT).unwrap();
        source.fail_product("SF2", "upstream 503");
        let err = source.race_context("SF2").await.unwrap_err();
        assert!(err.is_transient());
        source.clear_failure("SF2");
        assert!(source.race_context("SF2").await.is_ok());
    }

    #[tokio::test]
    async fn test_upsert_moves_race_forward() {
        let source = SnapshotSource::from_json(SNAPSHOT).unwrap();
        let mut race = source.race_context("SF2").await.unwrap();
        race.pool.gross_total = 5000.0;
        race.start_time = Utc.with_ymd_and_hms(2026, 10, 19, 15, 20, 0).unwrap();
        source.upsert_race(race);

        let updated = source.race_context("SF2").await.unwrap();
        assert_eq!(updated.pool.gross_total, 5000.0);
        let day = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let cands = source.list_candidates(day).await.unwrap();
        let sf2 = cands.iter().find(|c| c.product_id == "SF2").unwrap();
        assert_eq!(sf2.start_time, updated.start_time);
        assert_eq!(sf2.roi_current, Some(0.12));
    }
}
