//! The UDP engine: owns the socket, dispatches uplink messages, and
//! exposes `send_*` downlink operations.
//!
//! Grounded on `original_source/besim/rootfs/opt/BeSIM/udpserver.py`'s
//! `UdpServer` class: a single receive thread, blocking `recvfrom`,
//! per-message-type `send_*` helpers that frame+wrap+transmit and
//! optionally wait for an acknowledgement.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use besim_proto::{decode_frame, frame, msg::MsgId, wrapper::Wrapper};
use besim_shadow::{CseqValue, Shadow};
use besim_telemetry::Sidecar;

use crate::capture::Capture;

pub const MAX_DATAGRAM: usize = 4096;
/// Crude backpressure after an unexpected handler failure, matching
/// the original's `time.sleep(1)` in its top-level exception handler.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(1);
/// Conventional REST-layer round-trip timeout.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

pub struct Engine {
    pub socket: UdpSocket,
    pub shadow: Arc<Shadow>,
    pub telemetry: Arc<Sidecar>,
    pub capture: Option<Capture>,
    running: AtomicBool,
}

impl Engine {
    pub fn bind(addr: &str, shadow: Arc<Shadow>, telemetry: Arc<Sidecar>, capture: Option<Capture>) -> std::io::Result<Engine> {
        let socket = UdpSocket::bind(addr)?;
        Ok(Engine { socket, shadow, telemetry, capture, running: AtomicBool::new(true) })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn send_raw(&self, addr: SocketAddr, bytes: &[u8]) {
        if let Some(capture) = &self.capture {
            capture.log_outbound(&addr.to_string(), bytes);
        }
        if let Err(e) = self.socket.send_to(bytes, addr) {
            tracing::warn!(%addr, error = %e, "sendto failed");
        }
    }

    /// Frames and transmits a downlink wrapper body.
    pub fn send_downlink(&self, addr: SocketAddr, msg_type: MsgId, response: bool, write: bool, body: &[u8]) {
        let wrapped = Wrapper::encode_downlink(msg_type, response, write, body);
        let framed = frame::encode(&wrapped, frame::NO_SEQ);
        self.send_raw(addr, &framed);
    }

    /// Allocates a cseq for `device_id`, sends `body` wrapped as
    /// `msg_type`, and — if `wait` — blocks up to `timeout` for the
    /// matching reply. Mirrors the original's `send_X(..., wait=1)`
    /// pattern shared by every engine-initiated request.
    pub fn send_and_wait(
        &self,
        addr: SocketAddr,
        device_id: u32,
        msg_type: MsgId,
        write: bool,
        body_tail: impl FnOnce(u8) -> Vec<u8>,
        wait: bool,
        timeout: Duration,
    ) -> Option<CseqValue> {
        let waiter = {
            let mut guard = self.shadow.lock();
            let device = guard.device(device_id);
            let (cseq, waiter) = device.next_cseq(wait);
            let body = body_tail(cseq);
            drop(guard);
            self.send_downlink(addr, msg_type, false, write, &body);
            waiter
        };
        waiter.and_then(|w| w.wait(timeout))
    }
}

/// The blocking receive loop. Intended to run on a dedicated OS
/// thread — it must never run on a tokio worker, since
/// `wait_for`-style rendezvous inside handlers blocks the thread.
///
/// A free function (not a method) taking `&Arc<Engine>` explicitly:
/// fake-boost disable sequences need to clone that `Arc` to spawn
/// their own thread, which a plain `&self` receiver can't produce.
pub fn run(engine: &Arc<Engine>) {
    let mut buf = [0u8; MAX_DATAGRAM];
    while engine.running.load(Ordering::SeqCst) {
        let (n, addr) = match engine.socket.recv_from(&mut buf) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "recv_from failed");
                std::thread::sleep(ERROR_BACKOFF);
                continue;
            }
        };
        handle_datagram(engine, &buf[..n], addr, false);
    }
}

/// Handles one datagram. `from_cloud` lets the cloud-relay variant
/// (`crate::relay`) reuse this for both directions while recording
/// the correct arrival-direction expectation in the wrapper decode.
pub fn handle_datagram(engine: &Arc<Engine>, data: &[u8], addr: SocketAddr, from_cloud: bool) {
    if let Some(capture) = &engine.capture {
        capture.log_inbound(&addr.to_string(), data);
    }

    {
        let mut guard = engine.shadow.lock();
        guard.peer(addr);
    }

    let decoded = match decode_frame(data) {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(%addr, error = %e, "dropping malformed frame");
            return;
        }
    };

    let wrapper = match Wrapper::decode(&decoded.payload, from_cloud) {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!(%addr, error = %e, "dropping malformed wrapper");
            return;
        }
    };

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        crate::handlers::dispatch(engine, &wrapper, addr);
    }));
    if result.is_err() {
        tracing::error!(%addr, "handler panicked; backing off");
        std::thread::sleep(ERROR_BACKOFF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use besim_shadow::Shadow;
    use besim_telemetry::Sidecar;

    fn test_engine() -> (Arc<Engine>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("t.sqlite");
        let telemetry = Arc::new(Sidecar::open(db_path.to_str().unwrap()).unwrap());
        let shadow = Arc::new(Shadow::new());
        let engine = Arc::new(Engine::bind("127.0.0.1:0", shadow, telemetry, None).unwrap());
        (engine, dir)
    }

    #[test]
    fn malformed_frame_is_dropped_without_panicking() {
        let (engine, _dir) = test_engine();
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        handle_datagram(&engine, &[0x00, 0x01], addr, false);
    }

    #[test]
    fn receiving_any_valid_frame_registers_the_source_as_a_peer() {
        let (engine, _dir) = test_engine();
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let framed = frame::encode(&[0, 0, 0, 0], frame::NO_SEQ);
        handle_datagram(&engine, &framed, addr, false);
        let mut guard = engine.shadow.lock();
        assert!(guard.peer(addr).devices.is_empty());
    }
}
