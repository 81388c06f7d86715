use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::request::Parts;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use mosaic_analysis::FallbackAnalysis;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::service::{AnalysisService, AnalyzeOutcome, AnalyzeRequest};

pub const ROOT_MESSAGE: &str = "Climate Mosaic API Service is running.";
pub const UNAVAILABLE_ERROR: &str = "Quantum Service Unavailable";
pub const UNAVAILABLE_DETAILS: &str = "Please ensure the Python Quantum Service is running";

#[derive(Clone)]
pub struct AppState {
    service: Arc<AnalysisService>,
}

#[derive(Debug, Serialize)]
pub struct UnavailableBody {
    pub error: &'static str,
    pub details: &'static str,
    pub fallback_data: FallbackAnalysis,
}

impl Default for UnavailableBody {
    fn default() -> Self {
        Self {
            error: UNAVAILABLE_ERROR,
            details: UNAVAILABLE_DETAILS,
            fallback_data: FallbackAnalysis::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    #[serde(default)]
    pub city: Option<String>,
}

pub fn router(service: Arc<AnalysisService>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/weather/quantum-analyze", post(quantum_analyze))
        .route("/weather/quantum-history", get(quantum_history))
        .route("/weather/quantum-batch", post(quantum_batch))
        .with_state(AppState { service })
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
}

/// Browsers on the dev server or the local network only. Requests without an
/// `Origin` header never reach the predicate.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            |origin: &HeaderValue, _parts: &Parts| origin_allowed(origin),
        ))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
}

fn origin_allowed(origin: &HeaderValue) -> bool {
    origin
        .to_str()
        .map(|origin| {
            origin.starts_with("http://localhost:") || origin.starts_with("http://192.168.")
        })
        .unwrap_or(false)
}

fn error_body(status: StatusCode, error: &str) -> Response {
    (status, Json(json!({ "error": error }))).into_response()
}

async fn root() -> &'static str {
    ROOT_MESSAGE
}

async fn quantum_analyze(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "rejecting unreadable analyze body");
            return (
                rejection.status(),
                Json(json!({
                    "error": "Invalid weather observation",
                    "details": rejection.body_text(),
                })),
            )
                .into_response();
        }
    };

    let request = match serde_json::from_slice::<Value>(&body)
        .and_then(AnalyzeRequest::from_body)
    {
        Ok(request) => request,
        Err(err) => {
            tracing::debug!(error = %err, "rejecting analyze request");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "Invalid weather observation",
                    "details": err.to_string(),
                })),
            )
                .into_response();
        }
    };

    match state.service.analyze(&request).await {
        AnalyzeOutcome::Live(analysis) => Json(analysis).into_response(),
        AnalyzeOutcome::Cached(cached) => Json(cached).into_response(),
        AnalyzeOutcome::Offline(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, Json(UnavailableBody::default())).into_response()
        }
    }
}

async fn quantum_history(
    State(state): State<AppState>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> Response {
    let Some(city) = params
        .ok()
        .and_then(|Query(params)| params.city)
        .filter(|city| !city.trim().is_empty())
    else {
        return error_body(StatusCode::BAD_REQUEST, "City required");
    };

    match state.service.history(&city).await {
        Ok(entries) => Json(entries).into_response(),
        Err(err) => {
            tracing::error!(error = %err, city = %city, "history fetch failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch history")
        }
    }
}

async fn quantum_batch(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "rejecting unreadable batch body");
            return error_body(rejection.status(), "Invalid batch request");
        }
    };

    let Some(items) = serde_json::from_slice::<Value>(&body)
        .ok()
        .and_then(|mut body| match body.get_mut("requests").map(Value::take) {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        })
    else {
        return error_body(StatusCode::BAD_REQUEST, "Invalid batch request");
    };

    let locations = items
        .iter()
        .map(|item| item.get("location").cloned().unwrap_or(Value::Null))
        .collect::<Vec<_>>();
    let requests = items
        .into_iter()
        .map(|item| AnalyzeRequest::from_body(item).map_err(|err| err.to_string()))
        .collect::<Vec<_>>();

    let results = state.service.batch(requests).await;

    let body = locations
        .into_iter()
        .zip(results)
        .map(|(location, result)| match result {
            Ok(analysis) => json!({ "location": location, "analysis": analysis }),
            Err(error) => json!({ "location": location, "error": error }),
        })
        .collect::<Vec<_>>();

    Json(body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_allows_dev_and_lan_origins_only() {
        for allowed in [
            "http://localhost:5173",
            "http://localhost:8082",
            "http://192.168.1.20:5173",
        ] {
            assert!(origin_allowed(&HeaderValue::from_static(allowed)), "{allowed}");
        }

        for denied in [
            "https://localhost:5173",
            "http://localhost.evil.com",
            "http://10.0.0.4:5173",
            "https://example.com",
        ] {
            assert!(!origin_allowed(&HeaderValue::from_static(denied)), "{denied}");
        }
    }

    #[test]
    fn unavailable_body_matches_offline_contract() {
        let value = serde_json::to_value(UnavailableBody::default()).expect("serialize");

        assert_eq!(value["error"], json!(UNAVAILABLE_ERROR));
        assert_eq!(value["details"], json!(UNAVAILABLE_DETAILS));
        assert_eq!(value["fallback_data"]["storm_probability"], json!(0.0));
        assert_eq!(value["fallback_data"]["top_states"], json!([]));
        assert_eq!(
            value["fallback_data"]["quantum_summary"],
            json!("Quantum Link Offline. Classic models only.")
        );
    }
}
