//! The HTTP proxy's routing policy, exercised end to end against the
//! real `besimd` REST router rather than a throwaway test router.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;

use besim_engine::Engine;
use besim_proxy::{default_rules, proxy, ProxyState};
use besim_shadow::Shadow;
use besim_telemetry::Sidecar;
use besimd::rest::{self, RestState};
use besimd::weather::WeatherState;

fn proxy_state() -> Arc<ProxyState> {
    let dir = tempfile::tempdir().unwrap();
    let telemetry = Arc::new(Sidecar::open(dir.path().join("t.sqlite").to_str().unwrap()).unwrap());
    std::mem::forget(dir);

    let shadow = Arc::new(Shadow::new());
    let engine = Arc::new(Engine::bind("127.0.0.1:0", shadow.clone(), telemetry.clone(), None).unwrap());
    let weather = Arc::new(WeatherState::new(None, telemetry.clone()));
    let rest_state = Arc::new(RestState { shadow, engine, telemetry: telemetry.clone(), weather });
    let local_router = rest::router(rest_state);

    // Nothing listens here; any attempted remote forward fails fast
    // with a connection refusal rather than hanging.
    let upstream_base = reqwest::Url::parse("http://127.0.0.1:1").unwrap();

    Arc::new(ProxyState::new(default_rules(false), upstream_base, local_router, telemetry))
}

#[tokio::test]
async fn api_path_is_served_locally_even_with_a_non_local_host_header() {
    let state = proxy_state();
    let req = Request::builder()
        .uri("/api/v1.0/weather")
        .header("host", "cloud.vendor.example.com")
        .body(Body::empty())
        .unwrap();
    let resp = proxy(State(state), req).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn unmatched_path_falls_back_to_remote_and_fails_with_bad_gateway() {
    let state = proxy_state();
    let req = Request::builder()
        .uri("/totally/unmapped/path")
        .header("host", "cloud.vendor.example.com")
        .body(Body::empty())
        .unwrap();
    let resp = proxy(State(state), req).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn local_hostname_bypasses_policy_and_reaches_the_real_rest_router() {
    let state = proxy_state();
    let req = Request::builder().uri("/healthz").header("host", "my-besim").body(Body::empty()).unwrap();
    let resp = proxy(State(state), req).await;
    assert_eq!(resp.status(), StatusCode::OK);
}
