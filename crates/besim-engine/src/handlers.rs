//! Per-message-type uplink handlers, statically dispatched by
//! [`dispatch`] on `wrapper.msg_type`. Grounded field-for-field on
//! `original_source/besim/rootfs/opt/BeSIM/udpserver.py`'s
//! `handleMsg` conditional chain, turned into one named, independently
//! testable function per message type.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use besim_proto::msg::MsgId;
use besim_proto::wrapper::Wrapper;
use besim_shadow::{CseqValue, Heating};

use crate::consts::*;
use crate::engine::Engine;
use crate::unpack::Unpacker;

/// Decodes the common `[cseq][unk1][unk2][device_id]` header every
/// body begins with.
fn common_header(u: &mut Unpacker) -> Result<(u8, u8, u16, u32), ()> {
    let cseq = u.u8().map_err(|_| ())?;
    let unk1 = u.u8().map_err(|_| ())?;
    let unk2 = u.u16().map_err(|_| ())?;
    let device_id = u.u32().map_err(|_| ())?;
    Ok((cseq, unk1, unk2, device_id))
}

fn warn_if_unexpected_common(unk1: u8, unk2: u16) {
    if unk1 != COMMON_UNK1 {
        tracing::warn!(unk1, expected = COMMON_UNK1, "unexpected unk1");
    }
    if unk2 != COMMON_UNK2 {
        tracing::warn!(unk2, expected = COMMON_UNK2, "unexpected unk2");
    }
}

/// Top-level handler dispatch. Returns the message-type name, for
/// trace logging by the caller.
pub fn dispatch(engine: &Arc<Engine>, wrapper: &Wrapper, addr: SocketAddr) -> &'static str {
    let mut u = Unpacker::new(&wrapper.body);

    let name = match wrapper.msg_type {
        MsgId::Status => {
            handle_status(engine, &mut u, wrapper, addr);
            "STATUS"
        }
        MsgId::GetProg => {
            handle_get_prog(engine, &mut u, wrapper);
            "GET_PROG"
        }
        MsgId::Ping => {
            handle_ping(engine, &mut u, addr);
            "PING"
        }
        MsgId::Refresh => {
            handle_refresh(engine, &mut u, wrapper);
            "REFRESH"
        }
        MsgId::DeviceTime => {
            handle_device_time(engine, &mut u, wrapper);
            "DEVICE_TIME"
        }
        MsgId::OutsideTemp => {
            handle_outside_temp(engine, &mut u, wrapper);
            "OUTSIDE_TEMP"
        }
        MsgId::ProgEnd => {
            handle_prog_end(engine, &mut u, wrapper, addr);
            "PROG_END"
        }
        MsgId::SwVersion => {
            handle_swversion(engine, &mut u, wrapper, addr);
            "SWVERSION"
        }
        MsgId::Program => {
            handle_program(engine, &mut u, wrapper, addr);
            "PROGRAM"
        }
        other if other.set_payload_size().is_some() => {
            handle_set(engine, &mut u, wrapper, addr);
            "SET"
        }
        MsgId::Unknown => {
            tracing::warn!(raw = wrapper.raw_msg_type, "unhandled message");
            engine.telemetry.log_unknown_udp(
                &addr.to_string(),
                "UNKNOWN_ID",
                wrapper.raw_msg_type as i64,
                &wrapper.body,
                &wrapper.body,
                u.tail(),
            );
            "UNKNOWN"
        }
        _ => {
            tracing::warn!(raw = wrapper.raw_msg_type, "unhandled message");
            "UNHANDLED"
        }
    };

    if u.offset() != wrapper.msg_len {
        tracing::warn!(
            offset = u.offset(),
            msg_len = wrapper.msg_len,
            "internal error: handler did not consume the whole body"
        );
        engine.telemetry.log_unknown_udp(
            &addr.to_string(),
            name,
            wrapper.raw_msg_type as i64,
            &wrapper.body,
            &wrapper.body,
            u.tail(),
        );
    }

    name
}

fn handle_status(engine: &Arc<Engine>, u: &mut Unpacker, wrapper: &Wrapper, addr: SocketAddr) {
    let Ok((cseq, unk1, unk2, device_id)) = common_header(u) else { return };
    warn_if_unexpected_common(unk1, unk2);

    let mut rooms_needing_prog = Vec::new();
    let mut rooms_needing_fakeboost_disable = Vec::new();

    {
        let mut guard = engine.shadow.lock();
        guard.assign_device_to_peer(device_id, addr);
        let device = guard.device(device_id);
        device.touch(addr);

        for _ in 0..8 {
            let (room_id, byte1, byte2, temp, settemp, t3, t2, t1, maxsetp, minsetp, byte3, byte4, _unk, tempcurve, heatingsetp) = match parse_room_block(u) {
                Ok(v) => v,
                Err(_) => break,
            };

            if room_id == 0 || room_id == 0xFFFF_FFFF || byte1 == 0 {
                continue; // unoccupied slot
            }

            let room = device.room_mut(room_id);
            room.temp = temp;
            room.settemp = settemp;
            room.t3 = t3;
            room.t2 = t2;
            room.t1 = t1;
            room.maxsetp = maxsetp;
            // Matches the original firmware-observed behavior: minsetp
            // is clobbered by maxsetp during STATUS ingestion.
            room.minsetp = maxsetp;
            let _ = minsetp; // the device-reported value is discarded, per the above
            room.mode = Some(byte2 >> 4);
            room.sensorinfluence = (byte3 >> 3) & 0x0F;
            room.units = (byte3 >> 2) & 1;
            room.advance = (byte3 >> 1) & 1;
            room.boost = (byte4 >> 2) & 1;
            room.cmdissued = (byte4 >> 1) & 1;
            room.winter = byte4 & 1;
            room.tempcurve = tempcurve;
            room.heatingsetp = heatingsetp;
            room.heating = match Heating::from(byte1) {
                Heating::On => Some(true),
                Heating::Off => Some(false),
                Heating::Unknown(v) => {
                    tracing::warn!(byte1 = v, "unrecognized room byte1, heating state unknown");
                    None
                }
            };
            room.touch();

            engine.telemetry.log_temperature(
                &device_id.to_string(),
                f64::from(room.temp),
                f64::from(room.settemp),
                room.heating.unwrap_or(false),
            );

            let needs_prog = !room.has_complete_program() || wrapper.cloudsynclost;
            if needs_prog {
                rooms_needing_prog.push(room_id);
            }

            if room.fakeboost != 0 && room.fakeboost < besim_shadow::room::now_secs() && !room.fakeboost_in_flight {
                room.fakeboost_in_flight = true;
                rooms_needing_fakeboost_disable.push(room_id);
            }
        }

        let (ot_flags1, ot_flags2, ot_params, wifisignal) = match parse_ot_and_radio_block(u) {
            Ok(v) => v,
            Err(_) => return,
        };
        let _ = ot_flags2;
        device.boiler_on = Some((ot_flags1 >> 5) & 1 == 1);
        device.dhw_mode = Some((ot_flags1 >> 6) & 1 == 1);
        device.t_flo = Some(ot_params[2]);
        device.t_dh = Some(ot_params[4]);
        device.t_est = Some(ot_params[5]);
        device.wifisignal = Some(wifisignal);
    }

    // Echo an unsolicited STATUS acknowledgement.
    engine.send_downlink(addr, MsgId::Status, true, true, &[cseq, 0, 0, 0]);

    // Matches the original's inline, blocking GET_PROG solicitation:
    // one second apart, on the receive thread.
    for room_id in rooms_needing_prog {
        std::thread::sleep(Duration::from_secs(1));
        crate::downlink::send_get_prog(engine, addr, device_id, room_id);
    }

    // The disable sequence blocks on acks, so it always runs off the
    // receive thread, never inline here.
    for room_id in rooms_needing_fakeboost_disable {
        crate::fakeboost::spawn_disable(engine, addr, device_id, room_id);
    }
}

#[allow(clippy::type_complexity)]
fn parse_room_block(u: &mut Unpacker) -> Result<(u32, u8, u8, i16, i16, i16, i16, i16, i16, i16, u8, u8, u16, u8, u8), ()> {
    let room = u.u32().map_err(|_| ())?;
    let byte1 = u.u8().map_err(|_| ())?;
    let byte2 = u.u8().map_err(|_| ())?;
    let temp = u.i16().map_err(|_| ())?;
    let settemp = u.i16().map_err(|_| ())?;
    let t3 = u.i16().map_err(|_| ())?;
    let t2 = u.i16().map_err(|_| ())?;
    let t1 = u.i16().map_err(|_| ())?;
    let maxsetp = u.i16().map_err(|_| ())?;
    let minsetp = u.i16().map_err(|_| ())?;
    let byte3 = u.u8().map_err(|_| ())?;
    let byte4 = u.u8().map_err(|_| ())?;
    let unk = u.u16().map_err(|_| ())?;
    let tempcurve = u.u8().map_err(|_| ())?;
    let heatingsetp = u.u8().map_err(|_| ())?;
    Ok((room, byte1, byte2, temp, settemp, t3, t2, t1, maxsetp, minsetp, byte3, byte4, unk, tempcurve, heatingsetp))
}

fn parse_ot_and_radio_block(u: &mut Unpacker) -> Result<(u8, u8, [i16; 10], u8), ()> {
    let ot_flags1 = u.u8().map_err(|_| ())?;
    let ot_flags2 = u.u8().map_err(|_| ())?;
    let mut ot_params = [0i16; 10];
    for p in ot_params.iter_mut() {
        *p = u.i16().map_err(|_| ())?;
    }
    let wifisignal = u.u8().map_err(|_| ())?;
    let _unk = u.u8().map_err(|_| ())?;
    for _ in 0..4 {
        u.u16().map_err(|_| ())?;
    }
    Ok((ot_flags1, ot_flags2, ot_params, wifisignal))
}

fn handle_get_prog(engine: &Engine, u: &mut Unpacker, wrapper: &Wrapper) {
    let Ok((cseq, unk1, unk2, device_id)) = common_header(u) else { return };
    warn_if_unexpected_common(unk1, unk2);
    let Ok(_room) = u.u32() else { return };
    let Ok(unk3) = u.u32() else { return };
    if unk3 != GET_PROG_UNK3 {
        tracing::warn!(unk3, expected = GET_PROG_UNK3, "unexpected GET_PROG unk3");
    }
    if wrapper.response {
        let mut guard = engine.shadow.lock();
        guard.device(device_id).signal(cseq, CseqValue::U32(unk3));
    }
}

fn handle_ping(engine: &Engine, u: &mut Unpacker, addr: SocketAddr) {
    let Ok((cseq, unk1, unk2, device_id)) = common_header(u) else { return };
    if cseq != besim_shadow::sequencer::UNUSED_CSEQ {
        tracing::warn!(cseq, "PING request carried a non-wildcard cseq");
    }
    if unk1 != COMMON_UNK1 {
        tracing::warn!(unk1, "unexpected PING unk1");
    }
    if unk2 != 4 && unk2 != 0 {
        tracing::warn!(unk2, "unexpected PING unk2");
    }
    let Ok(unk3) = u.u16() else { return };
    if unk3 != PING_REQUEST_UNK3 {
        tracing::warn!(unk3, "unexpected PING unk3");
    }

    let mut body = Vec::with_capacity(8);
    body.push(cseq);
    body.push(0);
    body.extend_from_slice(&0u16.to_le_bytes());
    body.extend_from_slice(&device_id.to_le_bytes());
    body.extend_from_slice(&PING_RESPONSE_UNK3.to_le_bytes());
    engine.send_downlink(addr, MsgId::Ping, true, true, &body);
}

fn handle_refresh(engine: &Engine, u: &mut Unpacker, wrapper: &Wrapper) {
    let Ok((cseq, unk1, unk2, device_id)) = common_header(u) else { return };
    if unk1 != COMMON_UNK1 {
        tracing::warn!(unk1, "unexpected REFRESH unk1");
    }
    if unk2 != COMMON_UNK2 {
        tracing::warn!(unk2, "unexpected REFRESH unk2");
    }
    if wrapper.response {
        let mut guard = engine.shadow.lock();
        guard.device(device_id).signal(cseq, CseqValue::U16(unk2));
    }
}

fn handle_device_time(engine: &Engine, u: &mut Unpacker, wrapper: &Wrapper) {
    let Ok((cseq, _unk1, _unk2, device_id)) = common_header(u) else { return };
    let Ok(val) = u.u8() else { return };
    let Ok(_unk3) = u.u8() else { return };
    let Ok(_unk4) = u.u16() else { return };
    let Ok(_unk5) = u.u32() else { return };
    if wrapper.response {
        let mut guard = engine.shadow.lock();
        guard.device(device_id).signal(cseq, CseqValue::U8(val));
    }
}

fn handle_outside_temp(engine: &Engine, u: &mut Unpacker, wrapper: &Wrapper) {
    let Ok((cseq, _unk1, _unk2, device_id)) = common_header(u) else { return };
    let Ok(val) = u.u8() else { return };
    if wrapper.response {
        let mut guard = engine.shadow.lock();
        guard.device(device_id).signal(cseq, CseqValue::U8(val));
    }
}

fn handle_prog_end(engine: &Engine, u: &mut Unpacker, wrapper: &Wrapper, addr: SocketAddr) {
    let Ok((_cseq, _unk1, _unk2, _device_id)) = common_header(u) else { return };
    let Ok(_room) = u.u32() else { return };
    let Ok(unk3) = u.u16() else { return };
    if unk3 != PROG_END_UNK3 {
        tracing::warn!(unk3, expected = PROG_END_UNK3, "unexpected PROG_END unk3");
    }
    if !wrapper.response {
        engine.send_downlink(addr, MsgId::ProgEnd, true, wrapper.write, &wrapper.body);
    }
}

fn handle_swversion(engine: &Engine, u: &mut Unpacker, wrapper: &Wrapper, addr: SocketAddr) {
    let Ok((cseq, _unk1, _unk2, device_id)) = common_header(u) else { return };
    let Ok(raw_version) = u.bytes(13) else { return };
    let version = String::from_utf8_lossy(raw_version).trim_end_matches('\0').to_string();

    {
        let mut guard = engine.shadow.lock();
        guard.device(device_id).version = Some(version.clone());
    }

    if !wrapper.response {
        engine.send_downlink(addr, MsgId::SwVersion, true, wrapper.write, &wrapper.body);
    } else {
        let mut guard = engine.shadow.lock();
        guard.device(device_id).signal(cseq, CseqValue::Str(version));
    }
}

fn handle_program(engine: &Engine, u: &mut Unpacker, wrapper: &Wrapper, addr: SocketAddr) {
    let Ok((_cseq, _unk1, _unk2, device_id)) = common_header(u) else { return };
    let Ok(room_id) = u.u32() else { return };
    let Ok(day) = u.u16() else { return };
    let Ok(prog) = u.array24() else { return };

    {
        let mut guard = engine.shadow.lock();
        guard.device(device_id).room_mut(room_id).days.insert(day as u8, prog);
    }

    if !wrapper.response {
        engine.send_downlink(addr, MsgId::Program, true, wrapper.write, &wrapper.body);
    }
}

fn handle_set(engine: &Engine, u: &mut Unpacker, wrapper: &Wrapper, addr: SocketAddr) {
    let Ok((cseq, flags, unk2, device_id)) = common_header(u) else { return };
    if unk2 != COMMON_UNK2 {
        tracing::warn!(unk2, "unexpected SET unk2");
    }
    let expected_ok = if wrapper.downlink { flags == 0x00 } else { flags == 0x00 || flags == 0x02 };
    if !expected_ok {
        tracing::warn!(flags, downlink = wrapper.downlink, "unexpected SET flags");
    }

    let Ok(room_id) = u.u32() else { return };

    let value = match wrapper.msg_type.set_payload_size() {
        Some(2) => u.i16().ok().map(SetValue::I16),
        Some(1) => u.u8().ok().map(SetValue::U8),
        _ => None,
    };
    let Some(value) = value else { return };

    {
        let mut guard = engine.shadow.lock();
        let room = guard.device(device_id).room_mut(room_id);
        apply_set_value(room, wrapper.msg_type, value);
    }

    if !wrapper.response {
        engine.send_downlink(addr, wrapper.msg_type, true, wrapper.write, &wrapper.body);
    } else {
        let mut guard = engine.shadow.lock();
        let cseq_value = match value {
            SetValue::I16(v) => CseqValue::I16(v),
            SetValue::U8(v) => CseqValue::U8(v),
        };
        guard.device(device_id).signal(cseq, cseq_value);
    }
}

#[derive(Clone, Copy)]
enum SetValue {
    I16(i16),
    U8(u8),
}

fn apply_set_value(room: &mut besim_shadow::Room, msg_type: MsgId, value: SetValue) {
    use SetValue::{I16, U8};
    match (msg_type, value) {
        (MsgId::SetT1, I16(v)) => room.t1 = v,
        (MsgId::SetT2, I16(v)) => room.t2 = v,
        (MsgId::SetT3, I16(v)) => room.t3 = v,
        (MsgId::SetMinHeatSetp, I16(v)) => room.minsetp = v,
        (MsgId::SetMaxHeatSetp, I16(v)) => room.maxsetp = v,
        (MsgId::SetUnits, U8(v)) => room.units = v,
        (MsgId::SetSeason, U8(v)) => room.winter = v,
        (MsgId::SetAdvance, U8(v)) => room.advance = v,
        (MsgId::SetMode, U8(v)) => room.mode = Some(v),
        (MsgId::SetSensorInfluence, U8(v)) => room.sensorinfluence = v,
        (MsgId::SetCurve, U8(v)) => room.tempcurve = v,
        _ => tracing::warn!("SET value width did not match its message type"),
    }
}
