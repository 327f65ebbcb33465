//! The process-wide shadow: peers, devices, and the opaque run token.
//!
//! Grounded on `original_source/besim/rootfs/opt/BeSIM/status.py`'s
//! `Status` dict and its `getPeerStatus`/`getDeviceStatus`/`getRoomStatus`/
//! `getPeerFromDeviceId` get-or-create helpers, translated into an
//! explicitly owned handle rather than a module-level global.

use std::collections::HashMap;
use std::net::SocketAddr;

use parking_lot::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::device::Device;
use crate::peer::Peer;

#[derive(Default)]
struct Inner {
    peers: HashMap<SocketAddr, Peer>,
    devices: HashMap<u32, Device>,
}

/// Shared, lockable device/peer state. Cheap to clone (an `Arc`
/// internally would be the caller's choice — this type itself holds
/// the lock directly, matching the single-shared-instance shape of
/// the original's module-level `Status`).
pub struct Shadow {
    inner: Mutex<Inner>,
    pub token: String,
}

/// An exclusive view over the shadow, held for the duration of a
/// single logical operation (e.g. ingesting one STATUS message).
/// Mirrors the original's implicit "one dict, reads and writes just
/// happen" model, made explicit as a critical section.
pub struct ShadowGuard<'a> {
    guard: MutexGuard<'a, Inner>,
}

impl Shadow {
    pub fn new() -> Self {
        Shadow {
            inner: Mutex::new(Inner::default()),
            token: Uuid::new_v4().to_string(),
        }
    }

    pub fn lock(&self) -> ShadowGuard<'_> {
        ShadowGuard { guard: self.inner.lock() }
    }
}

impl Default for Shadow {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> ShadowGuard<'a> {
    pub fn peer(&mut self, addr: SocketAddr) -> &mut Peer {
        self.guard.peers.entry(addr).or_insert_with(Peer::new)
    }

    pub fn device(&mut self, id: u32) -> &mut Device {
        self.guard.devices.entry(id).or_insert_with(Device::new)
    }

    pub fn device_ids(&self) -> Vec<u32> {
        self.guard.devices.keys().copied().collect()
    }

    pub fn get_device(&self, id: u32) -> Option<&Device> {
        self.guard.devices.get(&id)
    }

    /// Reverse lookup: the peer address whose device set contains
    /// `device_id`, if any. The original returns the *first* match
    /// found by dict-filter iteration order; since exactly one peer
    /// owns a device id at a time there is at most one candidate in
    /// practice.
    pub fn peer_of(&self, device_id: u32) -> Option<SocketAddr> {
        self.guard
            .peers
            .iter()
            .find(|(_, peer)| peer.devices.contains(&device_id))
            .map(|(addr, _)| *addr)
    }

    /// Records `device_id` as reachable via `addr`, updating the
    /// reverse-lookup invariant that exactly one peer owns a device at
    /// a time by removing it from any other peer's set first.
    pub fn assign_device_to_peer(&mut self, device_id: u32, addr: SocketAddr) {
        for (other_addr, peer) in self.guard.peers.iter_mut() {
            if *other_addr != addr {
                peer.devices.remove(&device_id);
            }
        }
        self.peer(addr).devices.insert(device_id);
    }
}
