//! The cloud relay mirrors device traffic to the cloud verbatim, and
//! relays cloud traffic back down to whichever device is registered in
//! the shadow.

use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

use besim_engine::{Engine, Relay};
use besim_proto::{frame, msg::MsgId, wrapper::Wrapper};
use besim_shadow::Shadow;
use besim_telemetry::Sidecar;

fn test_engine() -> (Arc<Engine>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let telemetry = Arc::new(Sidecar::open(dir.path().join("t.sqlite").to_str().unwrap()).unwrap());
    let shadow = Arc::new(Shadow::new());
    let engine = Arc::new(Engine::bind("127.0.0.1:0", shadow, telemetry, None).unwrap());
    (engine, dir)
}

#[test]
fn device_traffic_is_mirrored_verbatim_to_the_cloud() {
    let (engine, _dir) = test_engine();
    let engine_addr = engine.socket.local_addr().unwrap();

    let cloud = UdpSocket::bind("127.0.0.1:0").unwrap();
    let cloud_addr = cloud.local_addr().unwrap();
    cloud.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let relay = Arc::new(Relay::new(engine.clone(), cloud_addr));
    {
        let relay = relay.clone();
        std::thread::spawn(move || relay.run());
    }

    let device = UdpSocket::bind("127.0.0.1:0").unwrap();
    let status_frame = frame::encode(&Wrapper::encode_downlink(MsgId::Status, false, false, &[0u8; 4]), frame::NO_SEQ);
    device.send_to(&status_frame, engine_addr).unwrap();

    let mut buf = [0u8; 4096];
    let (n, from) = cloud.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..n], status_frame.as_slice());
    assert_eq!(from, engine_addr);
}

#[test]
fn cloud_traffic_is_relayed_down_to_the_registered_device() {
    let (engine, _dir) = test_engine();
    let engine_addr = engine.socket.local_addr().unwrap();

    let cloud = UdpSocket::bind("127.0.0.1:0").unwrap();
    let cloud_addr = cloud.local_addr().unwrap();

    let device = UdpSocket::bind("127.0.0.1:0").unwrap();
    let device_addr = device.local_addr().unwrap();
    device.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    {
        let mut guard = engine.shadow.lock();
        guard.device(7).touch(device_addr);
    }

    let relay = Arc::new(Relay::new(engine.clone(), cloud_addr));
    {
        let relay = relay.clone();
        std::thread::spawn(move || relay.run());
    }

    let downlink_frame = frame::encode(&Wrapper::encode_downlink(MsgId::SetT3, false, true, &[0u8; 12]), frame::NO_SEQ);
    cloud.send_to(&downlink_frame, engine_addr).unwrap();

    let mut buf = [0u8; 4096];
    let (n, _) = device.recv_from(&mut buf).unwrap();
    let decoded = frame::decode(&buf[..n]).unwrap();
    let wrapper = Wrapper::decode(&decoded.payload, false).unwrap();
    // The relay re-tags every cloud-forwarded frame as DeviceTime,
    // regardless of the original message type.
    assert_eq!(wrapper.msg_type, MsgId::DeviceTime);
}

#[test]
fn three_knocks_then_a_packet_is_not_mirrored_to_the_cloud() {
    let (engine, _dir) = test_engine();
    let engine_addr = engine.socket.local_addr().unwrap();

    let cloud = UdpSocket::bind("127.0.0.1:0").unwrap();
    let cloud_addr = cloud.local_addr().unwrap();
    cloud.set_read_timeout(Some(Duration::from_millis(300))).unwrap();

    {
        let mut guard = engine.shadow.lock();
        guard.device(9).touch("127.0.0.1:1".parse().unwrap());
    }

    let relay = Arc::new(Relay::new(engine.clone(), cloud_addr));
    {
        let relay = relay.clone();
        std::thread::spawn(move || relay.run());
    }

    let device = UdpSocket::bind("127.0.0.1:0").unwrap();
    for _ in 0..3 {
        device.send_to(&[0x58], engine_addr).unwrap();
        std::thread::sleep(Duration::from_millis(50));
    }
    let armed_frame = frame::encode(&[0, 0, 0, 0], frame::NO_SEQ);
    device.send_to(&armed_frame, engine_addr).unwrap();

    let mut buf = [0u8; 4096];
    assert!(cloud.recv_from(&mut buf).is_err());
}
