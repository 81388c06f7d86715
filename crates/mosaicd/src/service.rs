use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use mosaic_analysis::{
    AnalysisResult, AugmentedAnalysis, CachedAnalysis, HistoryEntry, Location,
    WeatherObservation, augment, batch_log_record, live_log_record,
};
use mosaic_gateway::{AnalysisGateway, GatewayError, analyze_batch};
use mosaic_store::{AnalysisLogStore, MAX_HISTORY_ENTRIES, StoreError};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Prior snapshots the derivative engine looks at.
const DERIVATIVE_HISTORY_DEPTH: u32 = 2;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnalyzeRequest {
    pub weather: WeatherObservation,
    #[serde(default)]
    pub location: Option<Location>,
}

impl AnalyzeRequest {
    /// Accepts `{weather, location}` or, from older callers, a bare
    /// observation at the top level.
    pub fn from_body(body: Value) -> Result<Self, serde_json::Error> {
        if body.get("weather").is_some_and(|weather| !weather.is_null()) {
            return serde_json::from_value(body);
        }

        let location = match body.get("location") {
            Some(value) => serde_json::from_value(value.clone())?,
            None => None,
        };
        Ok(Self {
            weather: serde_json::from_value(body)?,
            location,
        })
    }

    fn city(&self) -> Option<&str> {
        self.location.as_ref().and_then(Location::city)
    }
}

#[derive(Debug)]
pub enum AnalyzeOutcome {
    Live(AugmentedAnalysis),
    Cached(CachedAnalysis),
    Offline(GatewayError),
}

pub struct AnalysisService {
    gateway: Arc<dyn AnalysisGateway>,
    store: AnalysisLogStore,
    cache_window: Duration,
}

impl AnalysisService {
    pub fn new(
        gateway: Arc<dyn AnalysisGateway>,
        store: AnalysisLogStore,
        cache_window: Duration,
    ) -> Self {
        Self {
            gateway,
            store,
            cache_window,
        }
    }

    pub async fn analyze(&self, request: &AnalyzeRequest) -> AnalyzeOutcome {
        let city = request.city();

        if let Some(city) = city {
            if let Some(cached) = self.cached(city).await {
                tracing::info!(city, "serving cached analysis");
                return AnalyzeOutcome::Cached(cached);
            }
        }

        let current = match self.gateway.analyze(&request.weather).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(error = %err, "analysis service unavailable");
                return AnalyzeOutcome::Offline(err);
            }
        };

        let (Some(city), Some(location)) = (city, request.location.as_ref()) else {
            return AnalyzeOutcome::Live(augment(current, &[]));
        };

        let recent = match self
            .store
            .recent_for_city(city, DERIVATIVE_HISTORY_DEPTH)
            .await
        {
            Ok(recent) => recent,
            Err(err) => {
                tracing::warn!(error = %err, city, "history read failed, computing without priors");
                Vec::new()
            }
        };

        let augmented = augment(current, &recent);

        let record = live_log_record(location, city, now_millis(), &augmented);
        if let Err(err) = self.store.append(&record).await {
            tracing::error!(error = %err, city, "failed to log analysis");
        }

        AnalyzeOutcome::Live(augmented)
    }

    async fn cached(&self, city: &str) -> Option<CachedAnalysis> {
        if self.cache_window.is_zero() {
            return None;
        }

        let window_ms = i64::try_from(self.cache_window.as_millis()).unwrap_or(i64::MAX);
        let since = now_millis().saturating_sub(window_ms);
        match self.store.latest_since(city, since).await {
            Ok(hit) => hit.as_ref().map(CachedAnalysis::from_record),
            Err(err) => {
                tracing::warn!(error = %err, city, "cache lookup failed, treating as miss");
                None
            }
        }
    }

    pub async fn history(&self, city_query: &str) -> Result<Vec<HistoryEntry>, ServiceError> {
        let records = self.store.history(city_query, MAX_HISTORY_ENTRIES).await?;
        Ok(records.into_iter().map(HistoryEntry::from_record).collect())
    }

    /// Items that failed to parse keep their error; the rest go upstream
    /// together. Output order matches input order.
    pub async fn batch(
        &self,
        items: Vec<Result<AnalyzeRequest, String>>,
    ) -> Vec<Result<AnalysisResult, String>> {
        let requests = items
            .iter()
            .filter_map(|item| item.as_ref().ok())
            .collect::<Vec<_>>();
        let observations = requests
            .iter()
            .map(|request| request.weather.clone())
            .collect::<Vec<_>>();

        let mut responses = analyze_batch(self.gateway.as_ref(), &observations)
            .await
            .into_iter();

        let mut results = Vec::with_capacity(items.len());
        for item in &items {
            let result = match item {
                Err(message) => Err(message.clone()),
                Ok(request) => match responses.next() {
                    Some(Ok(analysis)) => {
                        self.log_batch_item(request, &analysis).await;
                        Ok(analysis)
                    }
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "batch item failed");
                        Err(err.to_string())
                    }
                    None => Err("missing batch response".to_owned()),
                },
            };
            results.push(result);
        }
        results
    }

    async fn log_batch_item(&self, request: &AnalyzeRequest, analysis: &AnalysisResult) {
        let (Some(city), Some(location)) = (request.city(), request.location.as_ref()) else {
            return;
        };

        let record = batch_log_record(location, city, now_millis(), analysis);
        if let Err(err) = self.store.append(&record).await {
            tracing::error!(error = %err, city, "failed to log batch analysis");
        }
    }
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_body_with_weather_key_parses_location() {
        let body = json!({
            "weather": {"temperature": 30.1, "humidity": 77, "pressure": 1006,
                        "wind": 5.5, "clouds": 80, "rain": 1.2},
            "location": {"name": "Davao", "lat": 7.07, "lon": 125.6}
        });

        let request = AnalyzeRequest::from_body(body).expect("parse request");

        assert_eq!(request.weather.rain, Some(1.2));
        assert_eq!(request.city(), Some("Davao"));
    }

    #[test]
    fn bare_observation_body_is_accepted() {
        let body = json!({"temperature": 12.0, "humidity": 40, "pressure": 1020,
                          "wind": 2, "clouds": 10});

        let request = AnalyzeRequest::from_body(body).expect("parse legacy body");

        assert_eq!(request.weather.pressure, 1020.0);
        assert!(request.location.is_none());
        assert_eq!(request.city(), None);
    }

    #[test]
    fn null_weather_falls_back_to_top_level_observation() {
        let body = json!({
            "weather": null,
            "temperature": 18.5, "humidity": 60, "pressure": 1011,
            "wind": 4, "clouds": 35,
            "location": {"name": "Iloilo"}
        });

        let request = AnalyzeRequest::from_body(body).expect("parse fallback body");

        assert_eq!(request.weather.pressure, 1011.0);
        assert_eq!(request.city(), Some("Iloilo"));
    }

    #[test]
    fn null_location_means_no_location() {
        let body = json!({
            "weather": {"temperature": 12.0, "humidity": 40, "pressure": 1020,
                        "wind": 2, "clouds": 10},
            "location": null
        });

        let request = AnalyzeRequest::from_body(body).expect("parse request");
        assert!(request.location.is_none());
    }

    #[test]
    fn missing_observation_fields_are_rejected() {
        let body = json!({"weather": {"temperature": 12.0}});
        assert!(AnalyzeRequest::from_body(body).is_err());

        assert!(AnalyzeRequest::from_body(json!("not an object")).is_err());
    }

    #[test]
    fn now_millis_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }
}
