#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mosaic_analysis::{AnalysisResult, TopState, WeatherObservation};
use mosaic_config::StorageBackend;
use mosaic_gateway::{AnalysisGateway, GatewayError};
use mosaic_store::{
    AnalysisLogRecord, AnalysisLogStore, Database, QueryResult, SqlValue, SqliteDatabase,
    StoreError,
};
use mosaicd::AnalysisService;
use serde_json::Map;

pub const TEN_MINUTES: Duration = Duration::from_secs(10 * 60);
pub const MINUTE_MS: i64 = 60 * 1000;

/// Answers every call with the same result (or failure) and counts calls.
/// Observations with negative pressure always fail.
pub struct StubGateway {
    result: Option<AnalysisResult>,
    calls: AtomicUsize,
}

impl StubGateway {
    pub fn answering(result: AnalysisResult) -> Arc<Self> {
        Arc::new(Self {
            result: Some(result),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn offline() -> Arc<Self> {
        Arc::new(Self {
            result: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisGateway for StubGateway {
    async fn analyze(
        &self,
        observation: &WeatherObservation,
    ) -> Result<AnalysisResult, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.result {
            Some(result) if observation.pressure >= 0.0 => Ok(result.clone()),
            _ => Err(GatewayError::Status(503)),
        }
    }
}

/// Every query fails as if the database were unreachable.
pub struct FailingDatabase;

#[async_trait]
impl Database for FailingDatabase {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Postgres
    }

    async fn query(&self, _sql: &str, _params: &[SqlValue]) -> Result<QueryResult, StoreError> {
        Err(StoreError::Connection("database offline".to_owned()))
    }
}

pub fn sqlite_store() -> (Arc<SqliteDatabase>, AnalysisLogStore) {
    let db = Arc::new(SqliteDatabase::open_in_memory().expect("open in-memory sqlite"));
    let store = AnalysisLogStore::new(db.clone());
    (db, store)
}

pub fn failing_store() -> AnalysisLogStore {
    AnalysisLogStore::new(Arc::new(FailingDatabase))
}

pub fn service(gateway: Arc<StubGateway>, store: AnalysisLogStore) -> AnalysisService {
    AnalysisService::new(gateway, store, TEN_MINUTES)
}

pub async fn total_rows(db: &SqliteDatabase) -> i64 {
    let result = db
        .query("SELECT COUNT(*) AS total FROM analysis_logs", &[])
        .await
        .expect("count rows");
    result.rows[0].i64("total").expect("total column")
}

pub fn state(label: &str, probability: f64) -> TopState {
    TopState {
        state: label.to_owned(),
        probability,
        meaning: String::new(),
    }
}

pub fn upstream_result(chaos: f64, top_states: Vec<TopState>) -> AnalysisResult {
    AnalysisResult {
        storm_probability: 0.6,
        rain_confidence: 0.5,
        atmospheric_chaos: chaos,
        forecast_reliability: 0.7,
        quantum_summary: "Windy & Overcast".to_owned(),
        top_states,
        volatility: Some(0.3),
        cyclone_index: Some(0.2),
        flood_risk: None,
        extra: Map::new(),
    }
}

pub fn observation() -> WeatherObservation {
    WeatherObservation {
        temperature: 29.0,
        humidity: 82.0,
        pressure: 1004.0,
        wind: 7.5,
        clouds: 75.0,
        rain: Some(0.8),
    }
}

pub fn prior_record(id: &str, city: &str, timestamp: i64, chaos: f64) -> AnalysisLogRecord {
    AnalysisLogRecord {
        id: id.to_owned(),
        city: city.to_owned(),
        latitude: Some(14.6),
        longitude: Some(121.0),
        timestamp,
        storm_probability: 0.4,
        rain_confidence: 0.4,
        atmospheric_chaos: chaos,
        forecast_reliability: 0.8,
        dominant_state: "00011".to_owned(),
        quantum_summary: "Earlier snapshot".to_owned(),
        top_states_json: r#"[{"state":"00011","probability":0.3,"meaning":""}]"#.to_owned(),
        volatility: Some(0.1),
        cyclone_index: Some(0.1),
        flood_risk: Some(0.0),
        final_risk_score: Some(0.25),
        chaos_velocity: Some(0.0),
        chaos_acceleration: Some(0.0),
        cyclone_momentum: Some(0.0),
        state_drift: Some(0.0),
    }
}
