use std::sync::Arc;

use crate::{Database, Row, SqlValue, StoreError};

pub const MAX_HISTORY_ENTRIES: u32 = 50;

const ENTRY_COLUMNS: &str = r#"
    id, city, latitude, longitude, recorded_at,
    storm_probability, rain_confidence, atmospheric_chaos, forecast_reliability,
    dominant_state, quantum_summary, top_states_json,
    volatility, cyclone_index, flood_risk, final_risk_score,
    chaos_velocity, chaos_acceleration, cyclone_momentum, state_drift
"#;

/// One stored analysis snapshot. Rows are append-only.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisLogRecord {
    pub id: String,
    pub city: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub storm_probability: f64,
    pub rain_confidence: f64,
    pub atmospheric_chaos: f64,
    pub forecast_reliability: f64,
    pub dominant_state: String,
    pub quantum_summary: String,
    pub top_states_json: String,
    pub volatility: Option<f64>,
    pub cyclone_index: Option<f64>,
    pub flood_risk: Option<f64>,
    pub final_risk_score: Option<f64>,
    pub chaos_velocity: Option<f64>,
    pub chaos_acceleration: Option<f64>,
    pub cyclone_momentum: Option<f64>,
    pub state_drift: Option<f64>,
}

impl AnalysisLogRecord {
    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            id: row.text("id")?,
            city: row.text("city")?,
            latitude: row.opt_f64("latitude")?,
            longitude: row.opt_f64("longitude")?,
            timestamp: row.i64("recorded_at")?,
            storm_probability: row.f64("storm_probability")?,
            rain_confidence: row.f64("rain_confidence")?,
            atmospheric_chaos: row.f64("atmospheric_chaos")?,
            forecast_reliability: row.f64("forecast_reliability")?,
            dominant_state: row.text("dominant_state")?,
            quantum_summary: row.text("quantum_summary")?,
            top_states_json: row
                .opt_text("top_states_json")?
                .unwrap_or_else(|| "[]".to_owned()),
            volatility: row.opt_f64("volatility")?,
            cyclone_index: row.opt_f64("cyclone_index")?,
            flood_risk: row.opt_f64("flood_risk")?,
            final_risk_score: row.opt_f64("final_risk_score")?,
            chaos_velocity: row.opt_f64("chaos_velocity")?,
            chaos_acceleration: row.opt_f64("chaos_acceleration")?,
            cyclone_momentum: row.opt_f64("cyclone_momentum")?,
            state_drift: row.opt_f64("state_drift")?,
        })
    }

    fn to_params(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::from(self.id.as_str()),
            SqlValue::from(self.city.as_str()),
            SqlValue::from(self.latitude),
            SqlValue::from(self.longitude),
            SqlValue::from(self.timestamp),
            SqlValue::from(self.storm_probability),
            SqlValue::from(self.rain_confidence),
            SqlValue::from(self.atmospheric_chaos),
            SqlValue::from(self.forecast_reliability),
            SqlValue::from(self.dominant_state.as_str()),
            SqlValue::from(self.quantum_summary.as_str()),
            SqlValue::from(self.top_states_json.as_str()),
            SqlValue::from(self.volatility),
            SqlValue::from(self.cyclone_index),
            SqlValue::from(self.flood_risk),
            SqlValue::from(self.final_risk_score),
            SqlValue::from(self.chaos_velocity),
            SqlValue::from(self.chaos_acceleration),
            SqlValue::from(self.cyclone_momentum),
            SqlValue::from(self.state_drift),
        ]
    }
}

/// Append-only analysis log. It is both the historical record and the
/// short-lived response cache.
#[derive(Clone)]
pub struct AnalysisLogStore {
    db: Arc<dyn Database>,
}

impl AnalysisLogStore {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    pub async fn append(&self, record: &AnalysisLogRecord) -> Result<(), StoreError> {
        let sql = format!(
            r#"
            INSERT INTO analysis_logs ({ENTRY_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            "#
        );
        self.db.query(&sql, &record.to_params()).await?;
        Ok(())
    }

    /// Newest entry for exactly `city` recorded strictly after `since_ms`.
    pub async fn latest_since(
        &self,
        city: &str,
        since_ms: i64,
    ) -> Result<Option<AnalysisLogRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM analysis_logs
            WHERE city = $1 AND recorded_at > $2
            ORDER BY recorded_at DESC, seq DESC
            LIMIT 1
            "#
        );
        let result = self
            .db
            .query(&sql, &[SqlValue::from(city), SqlValue::from(since_ms)])
            .await?;

        result
            .rows
            .first()
            .map(AnalysisLogRecord::from_row)
            .transpose()
    }

    /// Most recent entries for exactly `city`, newest first.
    pub async fn recent_for_city(
        &self,
        city: &str,
        limit: u32,
    ) -> Result<Vec<AnalysisLogRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM analysis_logs
            WHERE city = $1
            ORDER BY recorded_at DESC, seq DESC
            LIMIT $2
            "#
        );
        let result = self
            .db
            .query(&sql, &[SqlValue::from(city), SqlValue::from(i64::from(limit))])
            .await?;

        result.rows.iter().map(AnalysisLogRecord::from_row).collect()
    }

    /// Case-insensitive substring match on the city name, newest first,
    /// never more than [`MAX_HISTORY_ENTRIES`] rows.
    pub async fn history(
        &self,
        city_query: &str,
        limit: u32,
    ) -> Result<Vec<AnalysisLogRecord>, StoreError> {
        let city_query = city_query.trim();
        if city_query.is_empty() {
            return Ok(Vec::new());
        }

        let capped_limit = i64::from(limit.clamp(1, MAX_HISTORY_ENTRIES));
        let pattern = format!("%{}%", escape_like(city_query));
        let sql = format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM analysis_logs
            WHERE LOWER(city) LIKE LOWER($1) ESCAPE '\'
            ORDER BY recorded_at DESC, seq DESC
            LIMIT $2
            "#
        );
        let result = self
            .db
            .query(&sql, &[SqlValue::from(pattern), SqlValue::from(capped_limit)])
            .await?;

        result.rows.iter().map(AnalysisLogRecord::from_row).collect()
    }

    pub async fn count_for_city(&self, city: &str) -> Result<u64, StoreError> {
        let result = self
            .db
            .query(
                "SELECT COUNT(*) AS total FROM analysis_logs WHERE city = $1",
                &[SqlValue::from(city)],
            )
            .await?;

        let total = result
            .rows
            .first()
            .map(|row| row.i64("total"))
            .transpose()?
            .unwrap_or(0);
        Ok(total.max(0) as u64)
    }
}

fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
