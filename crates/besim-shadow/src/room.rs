//! Per-room thermostat state.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// A room is considered live if seen within this many seconds.
pub const ROOM_LIVE_WINDOW_SECS: u64 = 600;

/// `byte2 >> 4` in a STATUS room-block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HeatingMode {
    Auto = 0,
    Manual = 1,
    Holiday = 2,
    Party = 3,
    Off = 4,
    Dhw = 5,
}

impl HeatingMode {
    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

impl From<u8> for HeatingMode {
    fn from(raw: u8) -> Self {
        match raw & 0x0F {
            0 => HeatingMode::Auto,
            1 => HeatingMode::Manual,
            2 => HeatingMode::Holiday,
            3 => HeatingMode::Party,
            4 => HeatingMode::Off,
            5 => HeatingMode::Dhw,
            other => {
                tracing::warn!(raw = other, "unrecognized heating mode nibble, defaulting to Auto");
                HeatingMode::Auto
            }
        }
    }
}

/// Whether the boiler is firing for a room, decoded from `byte1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heating {
    On,
    Off,
    Unknown(u8),
}

impl From<u8> for Heating {
    fn from(byte1: u8) -> Self {
        match byte1 {
            0x8F => Heating::On,
            0x83 => Heating::Off,
            other => Heating::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Room {
    pub temp: i16,
    pub settemp: i16,
    pub t1: i16,
    pub t2: i16,
    pub t3: i16,
    pub minsetp: i16,
    pub maxsetp: i16,
    pub mode: Option<u8>,
    pub tempcurve: u8,
    pub heatingsetp: u8,
    pub sensorinfluence: u8,
    pub units: u8,
    pub advance: u8,
    pub boost: u8,
    pub cmdissued: u8,
    pub winter: u8,
    pub heating: Option<bool>,
    pub lastseen: u64,
    /// 0 = disabled; otherwise the unix-epoch second the fake-boost
    /// should revert.
    pub fakeboost: u64,
    /// One in-flight fake-boost transition (enable or disable) at a
    /// time.
    pub fakeboost_in_flight: bool,
    pub days: HashMap<u8, [u8; 24]>,
}

impl Room {
    pub fn is_live(&self, now: u64) -> bool {
        now.saturating_sub(self.lastseen) < ROOM_LIVE_WINDOW_SECS
    }

    pub fn touch(&mut self) {
        self.lastseen = now_secs();
    }

    pub fn has_complete_program(&self) -> bool {
        self.days.len() == 7
    }
}

pub fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heating_mode_decodes_top_nibble() {
        assert_eq!(HeatingMode::from(0x30), HeatingMode::Party);
        assert_eq!(HeatingMode::from(3), HeatingMode::Party);
    }

    #[test]
    fn heating_decodes_known_byte1_values() {
        assert_eq!(Heating::from(0x8F), Heating::On);
        assert_eq!(Heating::from(0x83), Heating::Off);
        assert_eq!(Heating::from(0x01), Heating::Unknown(0x01));
    }

    #[test]
    fn room_is_live_within_window_only() {
        let mut room = Room::default();
        let now = 10_000;
        room.lastseen = now - 599;
        assert!(room.is_live(now));
        room.lastseen = now - 600;
        assert!(!room.is_live(now));
    }
}
