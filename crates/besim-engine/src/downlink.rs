//! Engine-initiated request bodies shared by more than one call site.
//!
//! Grounded on `udpserver.py`'s `send_GET_PROG`: a fire-and-forget
//! solicitation, no reply rendezvous — the device answers later with
//! its own uplink `PROGRAM` messages.

use std::net::SocketAddr;
use std::time::Duration;

use besim_proto::msg::MsgId;
use besim_shadow::CseqValue;

use crate::consts::GET_PROG_UNK3;
use crate::engine::Engine;

/// Sends one `GET_PROG` request for `room_id` on `device_id`.
pub fn send_get_prog(engine: &Engine, addr: SocketAddr, device_id: u32, room_id: u32) {
    let mut guard = engine.shadow.lock();
    let (cseq, _waiter) = guard.device(device_id).next_cseq(false);
    drop(guard);

    let mut body = Vec::with_capacity(14);
    body.push(cseq);
    body.push(0x02);
    body.extend_from_slice(&1u16.to_le_bytes());
    body.extend_from_slice(&device_id.to_le_bytes());
    body.extend_from_slice(&room_id.to_le_bytes());
    body.extend_from_slice(&GET_PROG_UNK3.to_le_bytes());

    engine.send_downlink(addr, MsgId::GetProg, false, false, &body);
}

/// Performs one generic room-parameter SET round trip for the REST
/// surface: allocates a cseq, sends `msg_type` carrying `value`, and
/// blocks up to `timeout` for the device's echoed acknowledgement.
/// Body layout mirrors `handle_set`'s own SET header.
pub fn send_set(
    engine: &Engine,
    addr: SocketAddr,
    device_id: u32,
    room_id: u32,
    msg_type: MsgId,
    value: CseqValue,
    timeout: Duration,
) -> Option<CseqValue> {
    engine.send_and_wait(
        addr,
        device_id,
        msg_type,
        true,
        |cseq| {
            let mut body = Vec::with_capacity(12);
            body.push(cseq);
            body.push(0x02);
            body.extend_from_slice(&1u16.to_le_bytes());
            body.extend_from_slice(&device_id.to_le_bytes());
            body.extend_from_slice(&room_id.to_le_bytes());
            match value {
                CseqValue::I16(v) => body.extend_from_slice(&v.to_le_bytes()),
                CseqValue::U8(v) => body.push(v),
                _ => tracing::warn!("send_set called with a non-room-parameter value width"),
            }
            body
        },
        true,
        timeout,
    )
}

/// `DEVICE_TIME` round trip. Body layout mirrors `handle_device_time`'s
/// read side (header, value byte, three reserved fields left zeroed).
pub fn send_device_time(engine: &Engine, addr: SocketAddr, device_id: u32, value: u8, timeout: Duration) -> Option<CseqValue> {
    engine.send_and_wait(
        addr,
        device_id,
        MsgId::DeviceTime,
        true,
        |cseq| {
            let mut body = Vec::with_capacity(16);
            body.push(cseq);
            body.push(0x02);
            body.extend_from_slice(&0u16.to_le_bytes());
            body.extend_from_slice(&device_id.to_le_bytes());
            body.push(value);
            body.push(0);
            body.extend_from_slice(&0u16.to_le_bytes());
            body.extend_from_slice(&0u32.to_le_bytes());
            body
        },
        true,
        timeout,
    )
}

/// `OUTSIDE_TEMP` round trip. Body layout mirrors `handle_outside_temp`'s
/// read side (header plus a single value byte).
pub fn send_outside_temp(engine: &Engine, addr: SocketAddr, device_id: u32, value: u8, timeout: Duration) -> Option<CseqValue> {
    engine.send_and_wait(
        addr,
        device_id,
        MsgId::OutsideTemp,
        true,
        |cseq| {
            let mut body = Vec::with_capacity(9);
            body.push(cseq);
            body.push(0x02);
            body.extend_from_slice(&0u16.to_le_bytes());
            body.extend_from_slice(&device_id.to_le_bytes());
            body.push(value);
            body
        },
        true,
        timeout,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use besim_shadow::Shadow;
    use besim_telemetry::Sidecar;
    use std::sync::Arc;

    fn test_engine() -> (Engine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("t.sqlite");
        let telemetry = Arc::new(Sidecar::open(db_path.to_str().unwrap()).unwrap());
        let shadow = Arc::new(Shadow::new());
        let engine = Engine::bind("127.0.0.1:0", shadow, telemetry, None).unwrap();
        (engine, dir)
    }

    #[test]
    fn send_set_times_out_when_nothing_answers() {
        let (engine, _dir) = test_engine();
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let result = send_set(&engine, addr, 1, 2, MsgId::SetT3, CseqValue::I16(210), Duration::from_millis(50));
        assert!(result.is_none());
    }
}
