use std::time::Duration;

use axum::Router;
use axum::extract::Json;
use axum::http::StatusCode;
use axum::routing::post;
use mosaic_analysis::WeatherObservation;
use mosaic_gateway::{AnalysisGateway, GatewayError, HttpAnalysisGateway, analyze_batch};
use serde_json::{Value, json};
use tokio::net::TcpListener;

async fn echo_analysis(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let pressure = body["pressure"].as_f64().unwrap_or_default();
    if pressure < 0.0 {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": "simulator failed"})),
        );
    }

    (
        StatusCode::OK,
        Json(json!({
            "storm_probability": 0.62,
            "rain_confidence": 0.48,
            "atmospheric_chaos": 0.31,
            "forecast_reliability": 0.74,
            "quantum_summary": "Humid & Windy",
            "top_states": [
                {"state": "01011", "probability": 0.4, "meaning": "Humid & Windy"}
            ],
            "volatility": 0.2,
            "echo_pressure": pressure
        })),
    )
}

async fn spawn_upstream(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind upstream");
    let addr = listener.local_addr().expect("upstream addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve upstream");
    });
    format!("http://{addr}")
}

fn observation(pressure: f64) -> WeatherObservation {
    WeatherObservation {
        temperature: 24.0,
        humidity: 70.0,
        pressure,
        wind: 6.0,
        clouds: 55.0,
        rain: None,
    }
}

#[tokio::test]
async fn posts_observation_and_decodes_result() {
    let base = spawn_upstream(Router::new().route("/quantum/analyze", post(echo_analysis))).await;
    let gateway = HttpAnalysisGateway::new(&base, None).expect("gateway");

    let result = gateway
        .analyze(&observation(1008.0))
        .await
        .expect("upstream analysis");

    assert_eq!(result.storm_probability, 0.62);
    assert_eq!(result.top_states[0].state, "01011");
    assert_eq!(result.volatility, Some(0.2));
    assert_eq!(result.extra.get("echo_pressure"), Some(&json!(1008.0)));
}

#[tokio::test]
async fn non_success_status_is_an_error() {
    let base = spawn_upstream(Router::new().route("/quantum/analyze", post(echo_analysis))).await;
    let gateway = HttpAnalysisGateway::new(&base, None).expect("gateway");

    let err = gateway
        .analyze(&observation(-1.0))
        .await
        .expect_err("upstream 500");

    assert!(matches!(err, GatewayError::Status(500)));
}

#[tokio::test]
async fn malformed_body_is_an_invalid_response() {
    let router = Router::new().route(
        "/quantum/analyze",
        post(|| async { Json(json!({"storm_probability": "high"})) }),
    );
    let base = spawn_upstream(router).await;
    let gateway = HttpAnalysisGateway::new(&base, None).expect("gateway");

    let err = gateway
        .analyze(&observation(1000.0))
        .await
        .expect_err("bad body");

    assert!(matches!(err, GatewayError::InvalidResponse(_)));
}

#[tokio::test]
async fn unreachable_service_is_a_request_error() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind probe");
    let addr = listener.local_addr().expect("probe addr");
    drop(listener);

    let gateway =
        HttpAnalysisGateway::new(&format!("http://{addr}"), Some(Duration::from_secs(2)))
            .expect("gateway");

    let err = gateway
        .analyze(&observation(1000.0))
        .await
        .expect_err("connection refused");

    assert!(matches!(err, GatewayError::Request(_)));
}

#[tokio::test]
async fn batch_keeps_input_order_and_isolates_failures() {
    let base = spawn_upstream(Router::new().route("/quantum/analyze", post(echo_analysis))).await;
    let gateway = HttpAnalysisGateway::new(&base, None).expect("gateway");

    let inputs = vec![observation(1001.0), observation(-5.0), observation(1003.0)];
    let results = analyze_batch(&gateway, &inputs).await;

    assert_eq!(results.len(), 3);
    let first = results[0].as_ref().expect("first succeeds");
    assert_eq!(first.extra.get("echo_pressure"), Some(&json!(1001.0)));
    assert!(results[1].is_err());
    let third = results[2].as_ref().expect("third succeeds");
    assert_eq!(third.extra.get("echo_pressure"), Some(&json!(1003.0)));
}
