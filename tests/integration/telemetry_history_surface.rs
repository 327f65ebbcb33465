//! Telemetry logged straight into the sqlite sidecar is surfaced
//! correctly through the REST router's history/call endpoints.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::Request;
use tower::ServiceExt;

use besim_engine::Engine;
use besim_shadow::Shadow;
use besim_telemetry::Sidecar;
use besimd::rest::{self, RestState};
use besimd::weather::WeatherState;

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn rest_state(telemetry: Arc<Sidecar>) -> Arc<RestState> {
    let shadow = Arc::new(Shadow::new());
    let engine = Arc::new(Engine::bind("127.0.0.1:0", shadow.clone(), telemetry.clone(), None).unwrap());
    let weather = Arc::new(WeatherState::new(None, telemetry.clone()));
    Arc::new(RestState { shadow, engine, telemetry, weather })
}

#[tokio::test]
async fn room_history_surfaces_logged_temperature_readings() {
    let dir = tempfile::tempdir().unwrap();
    let telemetry = Arc::new(Sidecar::open(dir.path().join("t.sqlite").to_str().unwrap()).unwrap());
    telemetry.log_temperature("4:2", 21.5, 20.0, true);
    telemetry.log_temperature("4:2", 22.0, 20.0, false);
    telemetry.log_temperature("9:9", 15.0, 14.0, false);

    let app = rest::router(rest_state(telemetry));
    let req = Request::builder().uri("/api/v1.0/devices/4/rooms/2/history").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), axum::http::StatusCode::OK);

    let rows = body_json(resp).await;
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["temp"], 21.5);
    assert_eq!(rows[1]["temp"], 22.0);
}

#[tokio::test]
async fn weather_history_surfaces_logged_outside_temperatures() {
    let dir = tempfile::tempdir().unwrap();
    let telemetry = Arc::new(Sidecar::open(dir.path().join("t.sqlite").to_str().unwrap()).unwrap());
    telemetry.log_outside_temperature(9.5);

    let app = rest::router(rest_state(telemetry));
    let req = Request::builder().uri("/api/v1.0/weather/history").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let rows = body_json(resp).await;
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(rows[0]["temp"], 9.5);
}

#[tokio::test]
async fn call_history_surfaces_logged_web_traces() {
    let dir = tempfile::tempdir().unwrap();
    let telemetry = Arc::new(Sidecar::open(dir.path().join("t.sqlite").to_str().unwrap()).unwrap());
    telemetry.log_trace("UDP", "1.2.3.4", "map", "/STATUS", 7, "OK");

    let app = rest::router(rest_state(telemetry));
    let req = Request::builder().uri("/api/v1.0/call/history").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let rows = body_json(resp).await;
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["uri"], "/STATUS");
    assert_eq!(rows[0]["response_status"], "OK");
}

#[tokio::test]
async fn call_unknown_udp_and_api_surface_independently() {
    let dir = tempfile::tempdir().unwrap();
    let telemetry = Arc::new(Sidecar::open(dir.path().join("t.sqlite").to_str().unwrap()).unwrap());
    telemetry.log_unknown_udp("1.2.3.4", "UNKNOWN_ID", -1, &[1, 2, 3], &[4, 5], &[]);
    telemetry.log_unknown_api("1.2.3.4", "api.besmart-home.com", "POST", "/weird", "{}", b"body", "200", "ok");

    let app = rest::router(rest_state(telemetry));

    let udp_req = Request::builder().uri("/api/v1.0/call/unknown/udp").body(Body::empty()).unwrap();
    let udp_rows = body_json(app.clone().oneshot(udp_req).await.unwrap()).await;
    assert_eq!(udp_rows.as_array().unwrap().len(), 1);
    assert_eq!(udp_rows[0]["type"], "UNKNOWN_ID");

    let api_req = Request::builder().uri("/api/v1.0/call/unknown/api").body(Body::empty()).unwrap();
    let api_rows = body_json(app.oneshot(api_req).await.unwrap()).await;
    assert_eq!(api_rows.as_array().unwrap().len(), 1);
    assert_eq!(api_rows[0]["uri"], "/weird");
}
