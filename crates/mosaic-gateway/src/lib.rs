use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use mosaic_analysis::{AnalysisResult, TopState, WeatherObservation};
use mosaic_config::{AnalysisConfig, GatewayKind};
use serde_json::Map;
use thiserror::Error;

pub const ANALYZE_PATH: &str = "/quantum/analyze";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid analysis response: {0}")]
    InvalidResponse(#[from] serde_json::Error),
    #[error("analysis service returned status {0}")]
    Status(u16),
}

#[async_trait]
pub trait AnalysisGateway: Send + Sync {
    async fn analyze(
        &self,
        observation: &WeatherObservation,
    ) -> Result<AnalysisResult, GatewayError>;
}

pub struct LoadedGateway {
    pub gateway: Box<dyn AnalysisGateway>,
    pub provider_name: String,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpAnalysisGateway {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAnalysisGateway {
    pub fn new(service_url: &str, timeout: Option<Duration>) -> Result<Self, GatewayError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            endpoint: format!("{}{ANALYZE_PATH}", service_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AnalysisGateway for HttpAnalysisGateway {
    async fn analyze(
        &self,
        observation: &WeatherObservation,
    ) -> Result<AnalysisResult, GatewayError> {
        tracing::debug!(endpoint = %self.endpoint, "forwarding observation");

        let response = self
            .client
            .post(&self.endpoint)
            .json(observation)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Offline stand-in for the analysis service. Output depends only on the
/// observation.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockAnalysisGateway;

#[async_trait]
impl AnalysisGateway for MockAnalysisGateway {
    async fn analyze(
        &self,
        observation: &WeatherObservation,
    ) -> Result<AnalysisResult, GatewayError> {
        Ok(mock_analysis(observation))
    }
}

fn unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn mock_analysis(observation: &WeatherObservation) -> AnalysisResult {
    let humidity = unit(observation.humidity / 100.0);
    let clouds = unit(observation.clouds / 100.0);
    let low_pressure = unit((1013.0 - observation.pressure) / 40.0);
    let wind = unit(observation.wind / 25.0);
    let rain = unit(observation.rain.unwrap_or(0.0) / 10.0);

    let storm_probability = unit(0.4 * low_pressure + 0.3 * wind + 0.3 * clouds);
    let rain_confidence = unit(0.5 * humidity + 0.3 * clouds + 0.2 * rain);
    let atmospheric_chaos = unit((wind + low_pressure + (humidity - clouds).abs()) / 3.0);

    let stormy = TopState {
        state: "11011".to_owned(),
        probability: storm_probability / 2.0,
        meaning: "Low pressure, wind and cloud building".to_owned(),
    };
    let calm = TopState {
        state: "00100".to_owned(),
        probability: (1.0 - storm_probability) / 2.0,
        meaning: "Stable and clear".to_owned(),
    };
    let mut top_states = vec![stormy, calm];
    top_states.sort_by(|a, b| b.probability.total_cmp(&a.probability));

    AnalysisResult {
        storm_probability,
        rain_confidence,
        atmospheric_chaos,
        forecast_reliability: 1.0 - atmospheric_chaos,
        quantum_summary: if storm_probability >= 0.5 {
            "Mock analysis: unsettled".to_owned()
        } else {
            "Mock analysis: settled".to_owned()
        },
        top_states,
        volatility: Some(unit((wind + rain) / 2.0)),
        cyclone_index: Some(unit(low_pressure * wind)),
        flood_risk: Some(unit(rain * humidity)),
        extra: Map::new(),
    }
}

/// Runs every observation concurrently. Results keep input order and one
/// failure never cancels the others.
pub async fn analyze_batch(
    gateway: &dyn AnalysisGateway,
    observations: &[WeatherObservation],
) -> Vec<Result<AnalysisResult, GatewayError>> {
    join_all(
        observations
            .iter()
            .map(|observation| gateway.analyze(observation)),
    )
    .await
}

pub fn load_gateway(config: &AnalysisConfig) -> Result<LoadedGateway, GatewayError> {
    match config.provider {
        GatewayKind::Http => {
            let timeout = config
                .request_timeout_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis);
            let gateway = HttpAnalysisGateway::new(&config.service_url, timeout)?;
            let endpoint = gateway.endpoint().to_owned();
            Ok(LoadedGateway {
                gateway: Box::new(gateway),
                provider_name: GatewayKind::Http.as_str().to_owned(),
                endpoint: Some(endpoint),
            })
        }
        GatewayKind::Mock => Ok(LoadedGateway {
            gateway: Box::new(MockAnalysisGateway),
            provider_name: GatewayKind::Mock.as_str().to_owned(),
            endpoint: None,
        }),
    }
}
