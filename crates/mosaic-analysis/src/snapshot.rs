use mosaic_store::AnalysisLogRecord;
use serde::{Deserialize, Serialize};

use crate::model::{AnalysisResult, AugmentedAnalysis, Location, TopState};

pub const UNKNOWN_STATE: &str = "Unknown";

/// Decodes a stored `top_states` column. Malformed JSON reads as an empty list.
pub fn parse_top_states(raw: &str) -> Vec<TopState> {
    match serde_json::from_str::<Vec<TopState>>(raw) {
        Ok(states) => states,
        Err(err) => {
            tracing::warn!(error = %err, "ignoring malformed stored top_states");
            Vec::new()
        }
    }
}

fn encode_top_states(states: &[TopState]) -> String {
    serde_json::to_string(states).unwrap_or_else(|_| "[]".to_owned())
}

fn dominant_label(analysis: &AnalysisResult) -> String {
    analysis
        .dominant_state()
        .map(|state| state.state.clone())
        .unwrap_or_else(|| UNKNOWN_STATE.to_owned())
}

fn new_record(
    location: &Location,
    city: &str,
    timestamp: i64,
    analysis: &AnalysisResult,
) -> AnalysisLogRecord {
    AnalysisLogRecord {
        id: uuid::Uuid::new_v4().to_string(),
        city: city.to_owned(),
        latitude: location.lat,
        longitude: location.lon,
        timestamp,
        storm_probability: analysis.storm_probability,
        rain_confidence: analysis.rain_confidence,
        atmospheric_chaos: analysis.atmospheric_chaos,
        forecast_reliability: analysis.forecast_reliability,
        dominant_state: dominant_label(analysis),
        quantum_summary: analysis.quantum_summary.clone(),
        top_states_json: encode_top_states(&analysis.top_states),
        volatility: None,
        cyclone_index: None,
        flood_risk: None,
        final_risk_score: None,
        chaos_velocity: None,
        chaos_acceleration: None,
        cyclone_momentum: None,
        state_drift: None,
    }
}

/// Row written after a live single analysis. Missing optional indexes are
/// stored as 0 and every derivative is recorded.
pub fn live_log_record(
    location: &Location,
    city: &str,
    timestamp: i64,
    augmented: &AugmentedAnalysis,
) -> AnalysisLogRecord {
    let analysis = &augmented.analysis;
    let derivatives = &augmented.derivatives;
    AnalysisLogRecord {
        volatility: Some(analysis.volatility.unwrap_or(0.0)),
        cyclone_index: Some(analysis.cyclone_index.unwrap_or(0.0)),
        flood_risk: Some(analysis.flood_risk.unwrap_or(0.0)),
        final_risk_score: Some(augmented.final_risk_score),
        chaos_velocity: Some(derivatives.chaos_velocity),
        chaos_acceleration: Some(derivatives.chaos_acceleration),
        cyclone_momentum: Some(derivatives.cyclone_momentum),
        state_drift: Some(derivatives.state_drift),
        ..new_record(location, city, timestamp, analysis)
    }
}

/// Row written for a batch item: raw upstream fields only.
pub fn batch_log_record(
    location: &Location,
    city: &str,
    timestamp: i64,
    analysis: &AnalysisResult,
) -> AnalysisLogRecord {
    AnalysisLogRecord {
        volatility: analysis.volatility,
        cyclone_index: analysis.cyclone_index,
        flood_risk: analysis.flood_risk,
        ..new_record(location, city, timestamp, analysis)
    }
}

/// Response body served from a fresh log row instead of calling upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAnalysis {
    pub storm_probability: f64,
    pub rain_confidence: f64,
    pub atmospheric_chaos: f64,
    pub forecast_reliability: f64,
    pub quantum_summary: String,
    pub top_states: Vec<TopState>,
    pub volatility: f64,
    pub cyclone_index: f64,
    pub flood_risk: f64,
    pub final_risk_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chaos_velocity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chaos_acceleration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cyclone_momentum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_drift: Option<f64>,
    pub cached: bool,
}

impl CachedAnalysis {
    pub fn from_record(record: &AnalysisLogRecord) -> Self {
        Self {
            storm_probability: record.storm_probability,
            rain_confidence: record.rain_confidence,
            atmospheric_chaos: record.atmospheric_chaos,
            forecast_reliability: record.forecast_reliability,
            quantum_summary: record.quantum_summary.clone(),
            top_states: parse_top_states(&record.top_states_json),
            volatility: record.volatility.unwrap_or(0.0),
            cyclone_index: record.cyclone_index.unwrap_or(0.0),
            flood_risk: record.flood_risk.unwrap_or(0.0),
            final_risk_score: record.final_risk_score.unwrap_or(0.0),
            chaos_velocity: record.chaos_velocity,
            chaos_acceleration: record.chaos_acceleration,
            cyclone_momentum: record.cyclone_momentum,
            state_drift: record.state_drift,
            cached: true,
        }
    }
}

/// One row of the history timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
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
    pub top_states: Vec<TopState>,
    pub volatility: Option<f64>,
    pub cyclone_index: Option<f64>,
    pub flood_risk: Option<f64>,
    pub final_risk_score: Option<f64>,
    pub chaos_velocity: Option<f64>,
    pub chaos_acceleration: Option<f64>,
    pub cyclone_momentum: Option<f64>,
    pub state_drift: Option<f64>,
}

impl HistoryEntry {
    pub fn from_record(record: AnalysisLogRecord) -> Self {
        let top_states = parse_top_states(&record.top_states_json);
        Self {
            id: record.id,
            city: record.city,
            latitude: record.latitude,
            longitude: record.longitude,
            timestamp: record.timestamp,
            storm_probability: record.storm_probability,
            rain_confidence: record.rain_confidence,
            atmospheric_chaos: record.atmospheric_chaos,
            forecast_reliability: record.forecast_reliability,
            dominant_state: record.dominant_state,
            quantum_summary: record.quantum_summary,
            top_states,
            volatility: record.volatility,
            cyclone_index: record.cyclone_index,
            flood_risk: record.flood_risk,
            final_risk_score: record.final_risk_score,
            chaos_velocity: record.chaos_velocity,
            chaos_acceleration: record.chaos_acceleration,
            cyclone_momentum: record.cyclone_momentum,
            state_drift: record.state_drift,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, json};

    use super::*;
    use crate::derivatives::augment;

    fn location() -> Location {
        Location {
            name: "Cebu".to_owned(),
            lat: Some(10.3),
            lon: Some(123.9),
        }
    }

    fn upstream(top_states: Vec<TopState>) -> AnalysisResult {
        AnalysisResult {
            storm_probability: 0.6,
            rain_confidence: 0.4,
            atmospheric_chaos: 0.5,
            forecast_reliability: 0.8,
            quantum_summary: "Unsettled".to_owned(),
            top_states,
            volatility: None,
            cyclone_index: Some(0.3),
            flood_risk: None,
            extra: Map::new(),
        }
    }

    #[test]
    fn live_record_defaults_missing_indexes_to_zero() {
        let augmented = augment(upstream(Vec::new()), &[]);

        let record = live_log_record(&location(), "Cebu", 42, &augmented);

        assert_eq!(record.city, "Cebu");
        assert_eq!(record.timestamp, 42);
        assert_eq!(record.dominant_state, UNKNOWN_STATE);
        assert_eq!(record.top_states_json, "[]");
        assert_eq!(record.volatility, Some(0.0));
        assert_eq!(record.cyclone_index, Some(0.3));
        assert_eq!(record.flood_risk, Some(0.0));
        assert_eq!(record.final_risk_score, Some(augmented.final_risk_score));
        assert_eq!(record.chaos_velocity, Some(0.0));
        assert_eq!(record.state_drift, Some(0.0));
        assert!(uuid::Uuid::parse_str(&record.id).is_ok());
    }

    #[test]
    fn batch_record_leaves_derivatives_empty() {
        let states = vec![TopState {
            state: "10101".to_owned(),
            probability: 0.4,
            meaning: "Storm front".to_owned(),
        }];

        let record = batch_log_record(&location(), "Cebu", 7, &upstream(states.clone()));

        assert_eq!(record.dominant_state, "10101");
        assert_eq!(parse_top_states(&record.top_states_json), states);
        assert_eq!(record.volatility, None);
        assert_eq!(record.cyclone_index, Some(0.3));
        assert_eq!(record.final_risk_score, None);
        assert_eq!(record.chaos_velocity, None);
        assert_eq!(record.cyclone_momentum, None);
    }

    #[test]
    fn records_get_distinct_ids() {
        let analysis = upstream(Vec::new());
        let first = batch_log_record(&location(), "Cebu", 1, &analysis);
        let second = batch_log_record(&location(), "Cebu", 1, &analysis);
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn cached_response_marks_itself_and_zeroes_missing_scores() {
        let record = batch_log_record(&location(), "Cebu", 1, &upstream(Vec::new()));

        let cached = CachedAnalysis::from_record(&record);
        let value = serde_json::to_value(&cached).expect("serialize cached");

        assert_eq!(value["cached"], json!(true));
        assert_eq!(value["volatility"], json!(0.0));
        assert_eq!(value["final_risk_score"], json!(0.0));
        assert!(value.get("risk_level").is_none());
        assert_eq!(value["top_states"], json!([]));
        assert!(value.get("chaos_velocity").is_none());
        assert!(value.get("state_lock_in").is_none());
    }

    #[test]
    fn history_entry_decodes_top_states() {
        let mut record = batch_log_record(&location(), "Cebu", 9, &upstream(Vec::new()));
        record.top_states_json =
            r#"[{"state":"00110","probability":0.25,"meaning":"Clear"}]"#.to_owned();

        let entry = HistoryEntry::from_record(record);

        assert_eq!(entry.top_states.len(), 1);
        assert_eq!(entry.top_states[0].meaning, "Clear");
        let value = serde_json::to_value(&entry).expect("serialize entry");
        assert!(value.get("top_states_json").is_none());
        assert_eq!(value["timestamp"], json!(9));
    }

    #[test]
    fn malformed_stored_states_read_as_empty() {
        assert!(parse_top_states("not json").is_empty());
        assert!(parse_top_states("").is_empty());
    }
}
