//! A simulated device acknowledges a room-parameter write, end to end:
//! REST-style `send_set` → wire `SET_T3` downlink → fake device echo →
//! cseq rendezvous → shadow update.

use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

use besim_engine::downlink;
use besim_engine::{run, Engine};
use besim_proto::msg::MsgId;
use besim_shadow::{CseqValue, Shadow};
use besim_telemetry::Sidecar;

/// Builds an uplink-style wrapper (not a downlink — `downlink` bit 0)
/// carrying `body` unchanged, with the response bit set.
fn ack_frame(msg_type: MsgId, write: bool, body: &[u8]) -> Vec<u8> {
    let flags = 0x01 | ((write as u8) << 1) | (1 << 2);
    let inner_len_minus_8 = (body.len() as i64 - 8).max(0) as u16;
    let mut wrapper = vec![msg_type.to_u8(), flags];
    wrapper.extend_from_slice(&inner_len_minus_8.to_le_bytes());
    wrapper.extend_from_slice(body);
    besim_proto::encode_frame(&wrapper, besim_proto::frame::NO_SEQ)
}

#[test]
fn set_t3_round_trip_updates_the_shadow_and_echoes_the_value() {
    let dir = tempfile::tempdir().unwrap();
    let telemetry = Arc::new(Sidecar::open(dir.path().join("t.sqlite").to_str().unwrap()).unwrap());
    let shadow = Arc::new(Shadow::new());
    let engine = Arc::new(Engine::bind("127.0.0.1:0", shadow, telemetry, None).unwrap());

    let device = UdpSocket::bind("127.0.0.1:0").unwrap();
    let device_addr = device.local_addr().unwrap();
    device.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    {
        let mut guard = engine.shadow.lock();
        guard.device(11).touch(device_addr);
    }

    {
        let engine = engine.clone();
        std::thread::spawn(move || run(&engine));
    }

    let device_thread = std::thread::spawn(move || {
        let mut buf = [0u8; 4096];
        let (n, from) = device.recv_from(&mut buf).unwrap();
        let decoded = besim_proto::decode_frame(&buf[..n]).unwrap();
        let wrapper = besim_proto::wrapper::Wrapper::decode(&decoded.payload, false).unwrap();
        assert_eq!(wrapper.msg_type, MsgId::SetT3);
        assert!(!wrapper.response);
        let reply = ack_frame(wrapper.msg_type, wrapper.write, &wrapper.body);
        device.send_to(&reply, from).unwrap();
    });

    let echoed = downlink::send_set(&engine, device_addr, 11, 3, MsgId::SetT3, CseqValue::I16(215), Duration::from_secs(2));
    assert_eq!(echoed, Some(CseqValue::I16(215)));

    device_thread.join().unwrap();

    let guard = engine.shadow.lock();
    assert_eq!(guard.get_device(11).unwrap().rooms.get(&3).unwrap().t3, 215);
}
