//! Per-device shadow state.

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::room::{now_secs, Room};
use crate::sequencer::{Sequencer, Waiter};

#[derive(Debug, Default)]
pub struct Device {
    pub addr: Option<SocketAddr>,
    pub rooms: HashMap<u32, Room>,
    pub version: Option<String>,
    pub boiler_on: Option<bool>,
    pub dhw_mode: Option<bool>,
    pub t_flo: Option<i16>,
    pub t_dh: Option<i16>,
    pub t_est: Option<i16>,
    pub wifisignal: Option<u8>,
    pub lastseen: u64,
    sequencer: Sequencer,
}

impl Device {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch(&mut self, addr: SocketAddr) {
        self.addr = Some(addr);
        self.lastseen = now_secs();
    }

    pub fn room_mut(&mut self, room_id: u32) -> &mut Room {
        self.rooms.entry(room_id).or_default()
    }

    /// See [`Sequencer::next_cseq`].
    pub fn next_cseq(&mut self, wait: bool) -> (u8, Option<Waiter>) {
        self.sequencer.next_cseq(wait)
    }

    pub fn last_cseq(&self) -> u8 {
        self.sequencer.last_cseq()
    }

    pub fn signal(&mut self, cseq: u8, value: crate::sequencer::CseqValue) {
        self.sequencer.signal(cseq, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_mut_creates_lazily_and_is_idempotent() {
        let mut device = Device::new();
        assert!(device.rooms.is_empty());
        device.room_mut(5).temp = 200;
        assert_eq!(device.room_mut(5).temp, 200);
        assert_eq!(device.rooms.len(), 1);
    }
}
