//! SQLite store.
//!
//! Each row keeps the indexed columns the queries filter on plus the full
//! record as a JSON payload, so schema changes to `Recommendation` never
//! need a migration. `version` and `bet_id` are also columns so the
//! conditional upsert can check them without decoding the payload. Timestamps are stored as fixed-width RFC 3339 text,
//! which sorts chronologically.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::fmt::Display;
use tracing::info;

use super::RecommendationStore;
use crate::types::{LiveCheck, PlannerError, Recommendation, RecommendationStatus};

fn storage_err(e: impl Display) -> PlannerError {
    PlannerError::Storage(e.to_string())
}

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and create tables if needed. In-memory databases get a
    /// single connection, since each connection would otherwise see its
    /// own empty database.
    pub async fn connect(database_url: &str) -> Result<Self, PlannerError> {
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(storage_err)?;

        let store = Self { pool };
        store.init().await?;
        info!(database_url, "Recommendation store ready");
        Ok(store)
    }

    async fn init(&self) -> Result<(), PlannerError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS recommendations (
                id TEXT PRIMARY KEY,
                run_date TEXT NOT NULL,
                product_id TEXT NOT NULL,
                status TEXT NOT NULL,
                start_time TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                version INTEGER NOT NULL,
                bet_id TEXT,
                payload TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_recommendations_status ON recommendations (status)")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS live_checks (
                check_id TEXT PRIMARY KEY,
                recommendation_id TEXT NOT NULL,
                check_ts TEXT NOT NULL,
                status TEXT NOT NULL,
                payload TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_live_checks_rec ON live_checks (recommendation_id, check_ts)",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    fn decode_all<T: serde::de::DeserializeOwned>(rows: Vec<(String,)>) -> Result<Vec<T>, PlannerError> {
        rows.into_iter()
            .map(|(payload,)| serde_json::from_str(&payload).map_err(storage_err))
            .collect()
    }
}

#[async_trait]
impl RecommendationStore for SqliteStore {
    async fn upsert_recommendation(&self, rec: &mut Recommendation) -> Result<bool, PlannerError> {
        let expected = rec.version;
        rec.version = expected + 1;
        let payload = serde_json::to_string(rec).map_err(storage_err);
        let result = match payload {
            Ok(payload) => sqlx::query(
                r#"
                INSERT INTO recommendations
                    (id, run_date, product_id, status, start_time, updated_at, version, bet_id, payload)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (id) DO UPDATE SET
                    status = excluded.status,
                    start_time = excluded.start_time,
                    updated_at = excluded.updated_at,
                    version = excluded.version,
                    bet_id = excluded.bet_id,
                    payload = excluded.payload
                WHERE recommendations.version = ?
                    AND recommendations.status NOT IN ('placed', 'skipped')
                    AND recommendations.bet_id IS NULL
                "#,
            )
            .bind(&rec.id)
            .bind(rec.run_date.format("%Y-%m-%d").to_string())
            .bind(&rec.product_id)
            .bind(rec.status.as_str())
            .bind(ts(rec.start_time))
            .bind(ts(rec.updated_at))
            .bind(rec.version as i64)
            .bind(rec.bet_id.as_deref())
            .bind(payload)
            .bind(expected as i64)
            .execute(&self.pool)
            .await
            .map_err(storage_err),
            Err(e) => Err(e),
        };

        match result {
            Ok(done) if done.rows_affected() == 1 => Ok(true),
            other => {
                rec.version = expected;
                other.map(|_| false)
            }
        }
    }

    async fn get_recommendation(&self, id: &str) -> Result<Option<Recommendation>, PlannerError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT payload FROM recommendations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.map(|(payload,)| serde_json::from_str(&payload).map_err(storage_err))
            .transpose()
    }

    async fn list_by_status(
        &self,
        statuses: &[RecommendationStatus],
    ) -> Result<Vec<Recommendation>, PlannerError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT payload FROM recommendations WHERE status IN ({placeholders}) ORDER BY start_time, id"
        );
        let mut query = sqlx::query_as::<_, (String,)>(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let rows = query.fetch_all(&self.pool).await.map_err(storage_err)?;
        Self::decode_all(rows)
    }

    async fn list_for_date(&self, run_date: NaiveDate) -> Result<Vec<Recommendation>, PlannerError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT payload FROM recommendations WHERE run_date = ? ORDER BY start_time, id",
        )
        .bind(run_date.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        Self::decode_all(rows)
    }

    async fn append_live_check(&self, check: &LiveCheck) -> Result<bool, PlannerError> {
        let payload = serde_json::to_string(check).map_err(storage_err)?;
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO live_checks (check_id, recommendation_id, check_ts, status, payload)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&check.check_id)
        .bind(&check.recommendation_id)
        .bind(ts(check.check_ts))
        .bind(check.status.as_str())
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn live_checks(&self, recommendation_id: &str) -> Result<Vec<LiveCheck>, PlannerError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT payload FROM live_checks WHERE recommendation_id = ? ORDER BY check_ts, check_id",
        )
        .bind(recommendation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        Self::decode_all(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RaceCandidate;
    use chrono::{Duration, TimeZone};

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    fn rec(pid: &str, minutes: i64) -> Recommendation {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap();
        let cand = RaceCandidate {
            product_id: pid.into(),
            race_id: format!("R-{pid}"),
            event_name: "Test".into(),
            start_time: now + Duration::minutes(minutes),
            n_competitors: 8,
            rollover: 0.0,
            roi_current: Some(0.1),
            currency: "GBP".into(),
        };
        Recommendation::new(
            now.date_naive(),
            &cand,
            "balanced",
            RecommendationStatus::Monitoring,
            now,
        )
    }

    #[tokio::test]
    async fn test_recommendation_survives_round_trip_and_update() {
        let store = store().await;
        let mut r = rec("SF1", 45);
        assert!(store.upsert_recommendation(&mut r).await.unwrap());

        let later = r.updated_at + Duration::minutes(30);
        r.transition(RecommendationStatus::Hold, Some("threshold-not-met".into()), later)
            .unwrap();
        assert!(store.upsert_recommendation(&mut r).await.unwrap());

        let got = store.get_recommendation(&r.id).await.unwrap().unwrap();
        assert_eq!(got, r);
        assert_eq!(got.version, 2);
        assert!(store.get_recommendation("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conditional_upsert_rejects_stale_and_final_rows() {
        let store = store().await;
        let mut r = rec("SF1", 45);
        r.status = RecommendationStatus::Ready;
        store.upsert_recommendation(&mut r).await.unwrap();

        let mut monitor = store.get_recommendation(&r.id).await.unwrap().unwrap();
        let mut placer = monitor.clone();
        placer.bet_id = Some("TB-9".into());
        placer
            .transition(RecommendationStatus::Placed, None, placer.updated_at)
            .unwrap();
        assert!(store.upsert_recommendation(&mut placer).await.unwrap());

        // Same version as the placer read, but the row has moved on.
        monitor.status = RecommendationStatus::Hold;
        assert!(!store.upsert_recommendation(&mut monitor).await.unwrap());
        assert_eq!(monitor.version, 1);

        // A copy of the current version still cannot reopen a placed row.
        let mut reopened = store.get_recommendation(&r.id).await.unwrap().unwrap();
        reopened.status = RecommendationStatus::Ready;
        reopened.bet_id = None;
        assert!(!store.upsert_recommendation(&mut reopened).await.unwrap());

        let got = store.get_recommendation(&r.id).await.unwrap().unwrap();
        assert_eq!(got.status, RecommendationStatus::Placed);
        assert_eq!(got.bet_id.as_deref(), Some("TB-9"));
        assert_eq!(got.version, 2);
    }

    #[tokio::test]
    async fn test_status_filter_and_order() {
        let store = store().await;
        let mut filtered = rec("SF0", 10);
        filtered.status = RecommendationStatus::Filtered;
        for mut r in [rec("SF2", 90), rec("SF1", 30), filtered] {
            store.upsert_recommendation(&mut r).await.unwrap();
        }
        let live = store
            .list_by_status(&[RecommendationStatus::Monitoring])
            .await
            .unwrap();
        let ids: Vec<_> = live.iter().map(|r| r.product_id.as_str()).collect();
        assert_eq!(ids, vec!["SF1", "SF2"]);
        assert!(store.list_by_status(&[]).await.unwrap().is_empty());

        let day = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert_eq!(store.list_for_date(day).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_check_id_ignored() {
        let store = store().await;
        let check = LiveCheck {
            check_id: "c1".into(),
            recommendation_id: "2026-10-19-SF1".into(),
            product_id: "SF1".into(),
            check_ts: Utc.with_ymd_and_hms(2026, 10, 19, 11, 0, 0).unwrap(),
            minutes_to_post: 4.0,
            pool_gross: Some(1200.0),
            rollover: Some(0.0),
            total_stake: Some(30.0),
            hit_rate: Some(0.2),
            expected_return: Some(40.0),
            expected_profit: Some(10.0),
            roi: Some(0.33),
            threshold_met: true,
            status: RecommendationStatus::Ready,
            notes: None,
        };
        assert!(store.append_live_check(&check).await.unwrap());
        assert!(!store.append_live_check(&check).await.unwrap());
        let checks = store.live_checks("2026-10-19-SF1").await.unwrap();
        assert_eq!(checks, vec![check]);
    }
}
