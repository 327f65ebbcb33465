//! Synthetic BOOST: the device firmware has no native boost command
//! reachable over this link, so a boost request is faked by raising
//! `t3` and forcing PARTY mode for a fixed duration, then reverting
//! both. Grounded on `original_source/besim/rootfs/opt/BeSIM/status.py`'s
//! `fakeBoost`/`checkFakeBoost` pair, including its precondition guards
//! and its recomputing `t3` from live room state rather than a cached
//! snapshot.
//!
//! Both `enable` and `disable` block on acknowledgements
//! (`Engine::send_and_wait`); the REST PUT handler calls them inline,
//! the same as every other room-parameter write. Only the
//! STATUS-triggered auto-expiry path (`handlers::handle_status`) needs
//! [`spawn_disable`], since that one fires from the UDP receive thread,
//! which must stay free to keep servicing other devices' traffic.

use std::net::SocketAddr;
use std::sync::Arc;

use besim_proto::msg::MsgId;
use besim_shadow::{HeatingMode, Room};

use crate::consts::{FAKEBOOST_DURATION_SECS, FAKEBOOST_TEMPERATURE_RISE};
use crate::engine::{Engine, DEFAULT_WAIT_TIMEOUT};

/// Reverts an already-engaged fake-boost for `room_id` off the
/// caller's thread. Spawns its own thread; returns immediately.
pub fn spawn_disable(engine: &Arc<Engine>, addr: SocketAddr, device_id: u32, room_id: u32) {
    let engine = Arc::clone(engine);
    std::thread::spawn(move || {
        disable(&engine, addr, device_id, room_id);
    });
}

fn enable_preconditions_met(room: &Room) -> bool {
    room.fakeboost == 0
        && room.mode == Some(HeatingMode::Auto.to_u8())
        && room.boost == 0
        && room.advance == 0
        && room.settemp >= room.t1
}

fn disable_preconditions_met(room: &Room) -> bool {
    room.fakeboost != 0 && room.mode == Some(HeatingMode::Party.to_u8()) && room.settemp >= room.t1
}

/// Engages a fake-boost for `room_id`: `SET_T3 = t3+6`, then, once
/// acknowledged, `SET_MODE = PARTY`. Returns `false` without sending
/// anything if the preconditions aren't met, or if either send isn't
/// acknowledged.
pub fn enable(engine: &Engine, addr: SocketAddr, device_id: u32, room_id: u32) -> bool {
    let t3 = {
        let mut guard = engine.shadow.lock();
        let room = guard.device(device_id).room_mut(room_id);
        if !enable_preconditions_met(room) {
            return false;
        }
        room.t3
    };
    let boosted_t3 = t3 + FAKEBOOST_TEMPERATURE_RISE;

    let t3_ack = engine.send_and_wait(
        addr,
        device_id,
        MsgId::SetT3,
        true,
        |cseq| {
            let mut body = Vec::with_capacity(10);
            body.push(cseq);
            body.push(0x02);
            body.extend_from_slice(&1u16.to_le_bytes());
            body.extend_from_slice(&device_id.to_le_bytes());
            body.extend_from_slice(&room_id.to_le_bytes());
            body.extend_from_slice(&boosted_t3.to_le_bytes());
            body
        },
        true,
        DEFAULT_WAIT_TIMEOUT,
    );
    if t3_ack.is_none() {
        tracing::warn!(device_id, room_id, "fake-boost SET_T3 was not acknowledged");
        return false;
    }

    let mode_ack = engine.send_and_wait(
        addr,
        device_id,
        MsgId::SetMode,
        true,
        |cseq| {
            let mut body = Vec::with_capacity(9);
            body.push(cseq);
            body.push(0x02);
            body.extend_from_slice(&1u16.to_le_bytes());
            body.extend_from_slice(&device_id.to_le_bytes());
            body.extend_from_slice(&room_id.to_le_bytes());
            body.push(HeatingMode::Party.to_u8());
            body
        },
        true,
        DEFAULT_WAIT_TIMEOUT,
    );
    if mode_ack.is_none() {
        tracing::warn!(device_id, room_id, "fake-boost SET_MODE(party) was not acknowledged");
        return false;
    }

    let mut guard = engine.shadow.lock();
    let room = guard.device(device_id).room_mut(room_id);
    room.fakeboost = besim_shadow::room::now_secs() + FAKEBOOST_DURATION_SECS;
    true
}

/// Reverts a fake-boost: `SET_T3 = t3−6` (recomputed from the room's
/// *current* `t3`, not the value at enable time), then, once
/// acknowledged, `SET_MODE = AUTO`. Returns `false` without sending
/// anything if the preconditions aren't met, or if either send isn't
/// acknowledged.
pub fn disable(engine: &Engine, addr: SocketAddr, device_id: u32, room_id: u32) -> bool {
    let t3 = {
        let mut guard = engine.shadow.lock();
        let room = guard.device(device_id).room_mut(room_id);
        if !disable_preconditions_met(room) {
            room.fakeboost_in_flight = false;
            return false;
        }
        room.t3
    };
    let reverted_t3 = t3 - FAKEBOOST_TEMPERATURE_RISE;

    let t3_ack = engine.send_and_wait(
        addr,
        device_id,
        MsgId::SetT3,
        true,
        |cseq| {
            let mut body = Vec::with_capacity(10);
            body.push(cseq);
            body.push(0x02);
            body.extend_from_slice(&1u16.to_le_bytes());
            body.extend_from_slice(&device_id.to_le_bytes());
            body.extend_from_slice(&room_id.to_le_bytes());
            body.extend_from_slice(&reverted_t3.to_le_bytes());
            body
        },
        true,
        DEFAULT_WAIT_TIMEOUT,
    );
    if t3_ack.is_none() {
        tracing::warn!(device_id, room_id, "fake-boost restore SET_T3 was not acknowledged");
        let mut guard = engine.shadow.lock();
        guard.device(device_id).room_mut(room_id).fakeboost_in_flight = false;
        return false;
    }

    let mode_ack = engine.send_and_wait(
        addr,
        device_id,
        MsgId::SetMode,
        true,
        |cseq| {
            let mut body = Vec::with_capacity(9);
            body.push(cseq);
            body.push(0x02);
            body.extend_from_slice(&1u16.to_le_bytes());
            body.extend_from_slice(&device_id.to_le_bytes());
            body.extend_from_slice(&room_id.to_le_bytes());
            body.push(HeatingMode::Auto.to_u8());
            body
        },
        true,
        DEFAULT_WAIT_TIMEOUT,
    );
    if mode_ack.is_none() {
        tracing::warn!(device_id, room_id, "fake-boost restore SET_MODE was not acknowledged");
        let mut guard = engine.shadow.lock();
        guard.device(device_id).room_mut(room_id).fakeboost_in_flight = false;
        return false;
    }

    let mut guard = engine.shadow.lock();
    let room = guard.device(device_id).room_mut(room_id);
    room.fakeboost = 0;
    room.fakeboost_in_flight = false;
    true
}
