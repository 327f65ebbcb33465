//! The proxy's request entry point: decides [`crate::policy::Behaviour`]
//! for each request, serves it from the local router and/or the real
//! vendor cloud, and logs divergence between the two.
//!
//! Grounded on `proxyMiddleware.py`'s `ProxyMiddleware.__call__`: one
//! WSGI-style call wrapping the local Flask app, reached for every
//! inbound HTTP request regardless of host.

use std::sync::Arc;
use std::time::Instant;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;

use besim_telemetry::Sidecar;

use crate::policy::{self, Behaviour, Rule};

/// Request bodies larger than this are refused outright rather than
/// buffered in memory, matching a conventional REST body-size guard.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

pub struct ProxyState {
    pub rules: Vec<Rule>,
    pub client: reqwest::Client,
    pub upstream_base: reqwest::Url,
    pub local_router: Router,
    pub telemetry: Arc<Sidecar>,
}

impl ProxyState {
    pub fn new(rules: Vec<Rule>, upstream_base: reqwest::Url, local_router: Router, telemetry: Arc<Sidecar>) -> Self {
        ProxyState {
            rules,
            client: reqwest::Client::new(),
            upstream_base,
            local_router,
            telemetry,
        }
    }
}

/// Entry point wired as the fallback of the outer router (or the
/// whole server, if the local REST surface is itself nested under
/// it). Host-based local bypass happens first; path-based policy
/// resolution happens for everything else.
pub async fn proxy(State(state): State<Arc<ProxyState>>, req: Request) -> Response {
    let host = req
        .headers()
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_owned();

    if policy::is_local_host(&host) {
        return serve_local(&state, req).await;
    }

    let path = req.uri().path().to_owned();
    let method = req.method().clone();
    let started = Instant::now();

    let (parts, body) = req.into_parts();
    let body_bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
    };

    let mut behaviour = policy::check_behaviour(&state.rules, &path);
    let mut missing_api = false;

    if behaviour == Behaviour::RemoteIfMissing {
        let probe = rebuild_request(&parts, Body::from(body_bytes.clone()));
        let exists = path_exists_locally(&state, probe).await;
        if exists {
            behaviour = Behaviour::LocalFirst;
        } else {
            missing_api = true;
            behaviour = Behaviour::OnlyRemote;
        }
    }

    let local_response = if behaviour != Behaviour::OnlyRemote {
        let local_req = rebuild_request(&parts, Body::from(body_bytes.clone()));
        Some(buffer_response(serve_local(&state, local_req).await).await)
    } else {
        None
    };

    let remote_response = if behaviour != Behaviour::OnlyLocal {
        Some(buffer_response(forward_remote(&state, &parts, body_bytes.clone()).await).await)
    } else {
        None
    };

    let elapsed_ms = started.elapsed().as_millis() as i64;

    if matches!(behaviour, Behaviour::LocalFirst | Behaviour::RemoteFirst) {
        if let (Some((_, local_body)), Some((_, remote_body))) = (&local_response, &remote_response) {
            if local_body != remote_body {
                tracing::warn!(
                    host = %host,
                    path = %path,
                    local = %String::from_utf8_lossy(local_body),
                    remote = %String::from_utf8_lossy(remote_body),
                    "local and remote responses differ",
                );
            }
        }
    }

    let local_response = local_response.map(|(resp, _)| resp);
    let remote_response = remote_response.map(|(resp, _)| resp);

    let chosen = match (behaviour, local_response, remote_response) {
        (Behaviour::OnlyLocal, Some(local), _) => local,
        (Behaviour::OnlyRemote, _, Some(remote)) | (Behaviour::RemoteFirst, _, Some(remote)) => remote,
        (Behaviour::LocalFirst, Some(local), _) => local,
        (_, Some(local), None) => local,
        (_, None, Some(remote)) => remote,
        _ => StatusCode::BAD_GATEWAY.into_response(),
    };

    if missing_api {
        state.telemetry.log_unknown_api(
            &host,
            &host,
            method.as_str(),
            &path,
            "",
            &body_bytes,
            &chosen.status().as_u16().to_string(),
            "",
        );
    }

    state.telemetry.log_trace(
        &host,
        &host,
        &format!("{behaviour:?}"),
        &path,
        elapsed_ms,
        &chosen.status().as_u16().to_string(),
    );

    chosen
}

/// Rebuilds a request from its already-consumed `Parts` plus a fresh
/// body, since `http::request::Parts` carries a non-`Clone`
/// `Extensions` map and can't simply be cloned wholesale.
fn rebuild_request(parts: &axum::http::request::Parts, body: Body) -> Request {
    let mut builder = Request::builder().method(parts.method.clone()).uri(parts.uri.clone()).version(parts.version);
    if let Some(headers) = builder.headers_mut() {
        *headers = parts.headers.clone();
    }
    builder.body(body).expect("rebuilding a request from valid parts cannot fail")
}

/// Drains a response's body into memory, returning a fresh response
/// carrying the same status/headers plus the buffered bytes alongside
/// for comparison — a response's body can only be read once.
async fn buffer_response(resp: Response) -> (Response, Bytes) {
    let (parts, body) = resp.into_parts();
    let bytes = to_bytes(body, MAX_BODY_BYTES).await.unwrap_or_default();
    (Response::from_parts(parts, Body::from(bytes.clone())), bytes)
}

async fn serve_local(state: &Arc<ProxyState>, req: Request) -> Response {
    use tower::ServiceExt;
    match state.local_router.clone().oneshot(req).await {
        Ok(resp) => resp,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// A `RemoteIfMissing` pre-flight: whether the local router would
/// serve this path at all, without fully executing the handler for
/// side effects. Runs the same request through the router and treats
/// a `404` as "missing", mirroring the original's `check_path_exists`
/// URL-adapter probe.
async fn path_exists_locally(state: &Arc<ProxyState>, req: Request) -> bool {
    serve_local(state, req).await.status() != StatusCode::NOT_FOUND
}

async fn forward_remote(state: &Arc<ProxyState>, parts: &axum::http::request::Parts, body: Bytes) -> Response {
    let Ok(url) = state.upstream_base.join(parts.uri.path()) else {
        return StatusCode::BAD_GATEWAY.into_response();
    };

    let mut headers = HeaderMap::new();
    for (name, value) in &parts.headers {
        if name != axum::http::header::HOST {
            headers.insert(name.clone(), value.clone());
        }
    }

    let req = state
        .client
        .request(parts.method.clone(), url)
        .headers(headers)
        .body(body);

    match req.send().await {
        Ok(resp) => {
            let status = resp.status();
            let headers = resp.headers().clone();
            let body = resp.bytes().await.unwrap_or_default();
            let mut builder = Response::builder().status(status);
            for (name, value) in &headers {
                builder = builder.header(name, value);
            }
            builder.body(Body::from(body)).unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
        }
        Err(e) => {
            tracing::warn!(error = %e, "upstream request failed");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}
