//! The local REST surface: translates HTTP verbs into shadow reads and
//! engine-mediated writes.
//!
//! Grounded on `services/forwarder/src/status_http.rs` for the
//! `/healthz` shape and on an `Arc<AppState>`-extractor axum router
//! for everything else; the vendor-compatible `/api/v1.0/...` surface
//! mirrors the read/write shape of
//! `original_source/besim/rootfs/opt/BeSIM/statusServer.py`.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use besim_engine::{downlink, fakeboost, Engine};
use besim_proto::msg::MsgId;
use besim_shadow::{CseqValue, Device, Room, Shadow};
use besim_telemetry::Sidecar;

use crate::weather::WeatherState;

const REST_SET_TIMEOUT: Duration = Duration::from_secs(1);

pub struct RestState {
    pub shadow: Arc<Shadow>,
    pub engine: Arc<Engine>,
    pub telemetry: Arc<Sidecar>,
    pub weather: Arc<WeatherState>,
}

pub fn router(state: Arc<RestState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1.0/devices", get(list_devices))
        .route("/api/v1.0/devices/:id", get(get_device))
        .route("/api/v1.0/devices/:id/rooms", get(list_rooms))
        .route("/api/v1.0/devices/:id/rooms/:rid", get(get_room))
        .route("/api/v1.0/devices/:id/rooms/:rid/days", get(list_days))
        .route("/api/v1.0/devices/:id/rooms/:rid/days/:day", get(get_day).put(put_day))
        .route("/api/v1.0/devices/:id/rooms/:rid/history", get(room_history))
        .route("/api/v1.0/devices/:id/rooms/:rid/:param", get(get_param).put(put_param))
        .route("/api/v1.0/devices/:id/time", get(get_time).put(put_time))
        .route("/api/v1.0/devices/:id/outsidetemp", put(put_outsidetemp))
        .route("/api/v1.0/weather", get(get_weather))
        .route("/api/v1.0/weather/history", get(weather_history))
        .route("/api/v1.0/call/history", get(call_history))
        .route("/api/v1.0/call/unknown/udp", get(call_unknown_udp))
        .route("/api/v1.0/call/unknown/api", get(call_unknown_api))
        .route("/fwUpgrade/PR06549/version.txt", get(fw_version))
        .route("/WifiBoxInterface_vokera/getWebTemperature.php", get(get_web_temperature))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn list_devices(State(state): State<Arc<RestState>>) -> Json<Vec<u32>> {
    Json(state.shadow.lock().device_ids())
}

fn device_json(device: &Device) -> Value {
    json!({
        "addr": device.addr.map(|a| a.to_string()),
        "version": device.version,
        "boilerOn": device.boiler_on,
        "dhwMode": device.dhw_mode,
        "tFLO": device.t_flo,
        "tdH": device.t_dh,
        "tESt": device.t_est,
        "wifisignal": device.wifisignal,
        "lastseen": device.lastseen,
    })
}

async fn get_device(State(state): State<Arc<RestState>>, Path(id): Path<u32>) -> Response {
    let guard = state.shadow.lock();
    match guard.get_device(id) {
        Some(device) => Json(device_json(device)).into_response(),
        None => not_found(),
    }
}

async fn list_rooms(State(state): State<Arc<RestState>>, Path(id): Path<u32>) -> Response {
    let guard = state.shadow.lock();
    let Some(device) = guard.get_device(id) else { return not_found() };
    let now = besim_shadow::room::now_secs();
    let live: Vec<u32> = device.rooms.iter().filter(|(_, r)| r.is_live(now)).map(|(id, _)| *id).collect();
    Json(live).into_response()
}

fn room_json(room: &Room) -> Value {
    json!({
        "temp": room.temp,
        "settemp": room.settemp,
        "t1": room.t1,
        "t2": room.t2,
        "t3": room.t3,
        "minsetp": room.minsetp,
        "maxsetp": room.maxsetp,
        "mode": room.mode,
        "tempcurve": room.tempcurve,
        "heatingsetp": room.heatingsetp,
        "sensorinfluence": room.sensorinfluence,
        "units": room.units,
        "advance": room.advance,
        "boost": room.boost,
        "cmdissued": room.cmdissued,
        "winter": room.winter,
        "heating": room.heating,
        "fakeboost": room.fakeboost != 0,
        "lastseen": room.lastseen,
    })
}

async fn get_room(State(state): State<Arc<RestState>>, Path((id, rid)): Path<(u32, u32)>) -> Response {
    let guard = state.shadow.lock();
    let Some(device) = guard.get_device(id) else { return not_found() };
    match device.rooms.get(&rid) {
        Some(room) => Json(room_json(room)).into_response(),
        None => not_found(),
    }
}

/// Read-only or device-level fields not reachable through a room SET.
fn device_param_json(device: &Device, param: &str) -> Option<Value> {
    match param {
        "boilerOn" => Some(json!(device.boiler_on)),
        "dhwMode" => Some(json!(device.dhw_mode)),
        "tFLO" => Some(json!(device.t_flo)),
        "tdH" => Some(json!(device.t_dh)),
        "tESt" => Some(json!(device.t_est)),
        // Not represented in the shadow's data model; always reported
        // null rather than rejected.
        "trEt" | "tFLU" | "MOdU" | "FLOr" | "HOUr" | "PrES" | "tFL2" => Some(Value::Null),
        _ => None,
    }
}

fn room_param_json(room: &Room, param: &str) -> Option<Value> {
    match param {
        "t1" => Some(json!(room.t1)),
        "t2" => Some(json!(room.t2)),
        "t3" => Some(json!(room.t3)),
        "tempcurve" => Some(json!(room.tempcurve)),
        "minsetp" => Some(json!(room.minsetp)),
        "maxsetp" => Some(json!(room.maxsetp)),
        "units" => Some(json!(room.units)),
        "winter" => Some(json!(room.winter)),
        "sensorinfluence" => Some(json!(room.sensorinfluence)),
        "advance" => Some(json!(room.advance)),
        "mode" => Some(json!(room.mode)),
        "fakeboost" => Some(json!(room.fakeboost != 0)),
        "boost" => Some(json!(room.boost)),
        "temp" => Some(json!(room.temp)),
        "settemp" => Some(json!(room.settemp)),
        "cmdissued" => Some(json!(room.cmdissued)),
        _ => None,
    }
}

async fn get_param(State(state): State<Arc<RestState>>, Path((id, rid, param)): Path<(u32, u32, String)>) -> Response {
    let guard = state.shadow.lock();
    let Some(device) = guard.get_device(id) else { return not_found() };
    if let Some(v) = device_param_json(device, &param) {
        return Json(v).into_response();
    }
    let Some(room) = device.rooms.get(&rid) else { return not_found() };
    match room_param_json(room, &param) {
        Some(v) => Json(v).into_response(),
        None => not_found(),
    }
}

/// Maps a writable room param name to the `SET_*` message it rides on
/// and the value parsed from the PUT body.
fn writable_set(param: &str, body: &Value) -> Option<(MsgId, CseqValue)> {
    let i16_body = || body.as_i64().map(|v| v as i16);
    let u8_body = || body.as_u64().map(|v| v as u8);
    match param {
        "t1" => i16_body().map(|v| (MsgId::SetT1, CseqValue::I16(v))),
        "t2" => i16_body().map(|v| (MsgId::SetT2, CseqValue::I16(v))),
        "t3" => i16_body().map(|v| (MsgId::SetT3, CseqValue::I16(v))),
        "minsetp" => i16_body().map(|v| (MsgId::SetMinHeatSetp, CseqValue::I16(v))),
        "maxsetp" => i16_body().map(|v| (MsgId::SetMaxHeatSetp, CseqValue::I16(v))),
        "units" => u8_body().map(|v| (MsgId::SetUnits, CseqValue::U8(v))),
        "winter" => u8_body().map(|v| (MsgId::SetSeason, CseqValue::U8(v))),
        "sensorinfluence" => u8_body().map(|v| (MsgId::SetSensorInfluence, CseqValue::U8(v))),
        "advance" => u8_body().map(|v| (MsgId::SetAdvance, CseqValue::U8(v))),
        "mode" => u8_body().map(|v| (MsgId::SetMode, CseqValue::U8(v))),
        "tempcurve" => u8_body().map(|v| (MsgId::SetCurve, CseqValue::U8(v))),
        _ => None,
    }
}

fn cseq_value_json(v: &CseqValue) -> Value {
    match v {
        CseqValue::U8(n) => json!(n),
        CseqValue::U16(n) => json!(n),
        CseqValue::U32(n) => json!(n),
        CseqValue::I16(n) => json!(n),
        CseqValue::Str(s) => json!(s),
    }
}

async fn put_param(
    State(state): State<Arc<RestState>>,
    Path((id, rid, param)): Path<(u32, u32, String)>,
    Json(body): Json<Value>,
) -> Response {
    let addr = {
        let guard = state.shadow.lock();
        guard.get_device(id).and_then(|d| d.addr)
    };
    let Some(addr) = addr else { return not_found() };

    if param == "fakeboost" {
        let Some(want_enabled) = body.as_bool() else { return bad_request() };
        let ok = if want_enabled {
            fakeboost::enable(&state.engine, addr, id, rid)
        } else {
            fakeboost::disable(&state.engine, addr, id, rid)
        };
        return if ok { Json(json!({ "fakeboost": want_enabled })).into_response() } else { device_error() };
    }

    let Some((msg_type, value)) = writable_set(&param, &body) else { return not_found() };

    match downlink::send_set(&state.engine, addr, id, rid, msg_type, value.clone(), REST_SET_TIMEOUT) {
        Some(echoed) if echoed == value => Json(cseq_value_json(&echoed)).into_response(),
        _ => device_error(),
    }
}

async fn list_days(State(state): State<Arc<RestState>>, Path((id, rid)): Path<(u32, u32)>) -> Response {
    let guard = state.shadow.lock();
    let Some(device) = guard.get_device(id) else { return not_found() };
    let Some(room) = device.rooms.get(&rid) else { return not_found() };
    let mut days: Vec<u8> = room.days.keys().copied().collect();
    days.sort_unstable();
    Json(days).into_response()
}

async fn get_day(State(state): State<Arc<RestState>>, Path((id, rid, day)): Path<(u32, u32, u8)>) -> Response {
    let guard = state.shadow.lock();
    let Some(device) = guard.get_device(id) else { return not_found() };
    let Some(room) = device.rooms.get(&rid) else { return not_found() };
    match room.days.get(&day) {
        Some(prog) => Json(prog.to_vec()).into_response(),
        None => not_found(),
    }
}

/// Overwrites a day's stored program locally. Unlike room-parameter
/// PUTs, this does not round-trip to the device: `PROGRAM` is
/// device-authoritative and arrives over the uplink (`handle_program`);
/// this endpoint only edits the REST-visible shadow copy, matching the
/// original's local program-editor UI writing straight to `status.py`'s
/// dict ahead of the next device sync.
async fn put_day(
    State(state): State<Arc<RestState>>,
    Path((id, rid, day)): Path<(u32, u32, u8)>,
    Json(body): Json<Vec<u8>>,
) -> Response {
    let Ok(prog): Result<[u8; 24], _> = body.try_into() else { return bad_request() };
    let mut guard = state.shadow.lock();
    guard.device(id).room_mut(rid).days.insert(day, prog);
    Json(prog.to_vec()).into_response()
}

async fn get_time(State(state): State<Arc<RestState>>, Path(id): Path<u32>) -> Response {
    let guard = state.shadow.lock();
    match guard.get_device(id) {
        Some(device) => Json(json!({ "lastseen": device.lastseen })).into_response(),
        None => not_found(),
    }
}

#[derive(Deserialize)]
struct TimeBody {
    value: u8,
}

async fn put_time(State(state): State<Arc<RestState>>, Path(id): Path<u32>, Json(body): Json<TimeBody>) -> Response {
    let addr = {
        let guard = state.shadow.lock();
        guard.get_device(id).and_then(|d| d.addr)
    };
    let Some(addr) = addr else { return not_found() };
    match downlink::send_device_time(&state.engine, addr, id, body.value, REST_SET_TIMEOUT) {
        Some(CseqValue::U8(v)) if v == body.value => Json(json!({ "value": v })).into_response(),
        _ => device_error(),
    }
}

#[derive(Deserialize)]
struct OutsideTempBody {
    value: u8,
}

async fn put_outsidetemp(
    State(state): State<Arc<RestState>>,
    Path(id): Path<u32>,
    Json(body): Json<OutsideTempBody>,
) -> Response {
    let addr = {
        let guard = state.shadow.lock();
        guard.get_device(id).and_then(|d| d.addr)
    };
    let Some(addr) = addr else { return not_found() };
    match downlink::send_outside_temp(&state.engine, addr, id, body.value, REST_SET_TIMEOUT) {
        Some(CseqValue::U8(v)) if v == body.value => {
            state.telemetry.log_outside_temperature(f64::from(v));
            Json(json!({ "value": v })).into_response()
        }
        _ => device_error(),
    }
}

async fn get_weather(State(state): State<Arc<RestState>>) -> Response {
    Json(json!({ "temp": state.weather.current_celsius() })).into_response()
}

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Option<String>,
}

impl HistoryQuery {
    fn bounds(&self) -> (String, String) {
        (
            self.from.clone().unwrap_or_else(|| "0000-01-01T00:00:00Z".to_owned()),
            self.to.clone().unwrap_or_else(|| "9999-01-01T00:00:00Z".to_owned()),
        )
    }
}

async fn weather_history(State(state): State<Arc<RestState>>, Query(q): Query<HistoryQuery>) -> Response {
    let (from, to) = q.bounds();
    Json(state.telemetry.query_outside_temperature_history(&from, &to)).into_response()
}

async fn room_history(
    State(state): State<Arc<RestState>>,
    Path((id, rid)): Path<(u32, u32)>,
    Query(q): Query<HistoryQuery>,
) -> Response {
    let (from, to) = q.bounds();
    let thermostat = format!("{id}:{rid}");
    Json(state.telemetry.query_temperature_history(&thermostat, &from, &to)).into_response()
}

async fn call_history(State(state): State<Arc<RestState>>) -> Response {
    Json(state.telemetry.query_web_traces(200)).into_response()
}

async fn call_unknown_udp(State(state): State<Arc<RestState>>) -> Response {
    Json(state.telemetry.query_unknown_udp(200)).into_response()
}

async fn call_unknown_api(State(state): State<Arc<RestState>>) -> Response {
    Json(state.telemetry.query_unknown_api(200)).into_response()
}

/// Fixed firmware-descriptor string served locally so devices never
/// need the real cloud for a version check.
async fn fw_version() -> &'static str {
    "PR06549"
}

async fn get_web_temperature(State(state): State<Arc<RestState>>) -> String {
    state.weather.web_temperature_page()
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "message": "NOT_FOUND" }))).into_response()
}

fn bad_request() -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "message": "BAD_REQUEST" }))).into_response()
}

fn device_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "message": "ERROR" }))).into_response()
}
