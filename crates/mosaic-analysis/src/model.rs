use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::derivatives::DerivativeMetrics;

pub const OFFLINE_SUMMARY: &str = "Quantum Link Offline. Classic models only.";

/// Observation forwarded to the upstream analysis service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub wind: f64,
    pub clouds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rain: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
}

impl Location {
    /// The cache/log key, or `None` when the name is blank.
    pub fn city(&self) -> Option<&str> {
        (!self.name.trim().is_empty()).then_some(self.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopState {
    pub state: String,
    pub probability: f64,
    #[serde(default)]
    pub meaning: String,
}

/// Upstream response. Fields the service does not know about are kept in
/// `extra` and echoed back to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub storm_probability: f64,
    pub rain_confidence: f64,
    pub atmospheric_chaos: f64,
    pub forecast_reliability: f64,
    #[serde(default)]
    pub quantum_summary: String,
    #[serde(default)]
    pub top_states: Vec<TopState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volatility: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cyclone_index: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flood_risk: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AnalysisResult {
    pub fn dominant_state(&self) -> Option<&TopState> {
        self.top_states.first()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AugmentedAnalysis {
    #[serde(flatten)]
    pub analysis: AnalysisResult,
    pub final_risk_score: f64,
    #[serde(flatten)]
    pub derivatives: DerivativeMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackAnalysis {
    pub storm_probability: f64,
    pub rain_confidence: f64,
    pub atmospheric_chaos: f64,
    pub forecast_reliability: f64,
    pub final_risk_score: f64,
    pub quantum_summary: String,
    pub top_states: Vec<TopState>,
}

impl Default for FallbackAnalysis {
    fn default() -> Self {
        Self {
            storm_probability: 0.0,
            rain_confidence: 0.0,
            atmospheric_chaos: 0.0,
            forecast_reliability: 0.0,
            final_risk_score: 0.0,
            quantum_summary: OFFLINE_SUMMARY.to_owned(),
            top_states: Vec::new(),
        }
    }
}
