//! Control-plane sequence-number rendezvous.
//!
//! Models each pending-reply slot as a one-shot value cell: the
//! thread that sent a request blocks on [`Waiter::wait`] until either
//! the matching reply arrives (via [`Waiter::signal`], called from the
//! UDP receive thread) or its timeout elapses. Grounded on the
//! original's per-`cseq` `{ev: threading.Event(), val: None}` record;
//! expressed here as a `Mutex`+`Condvar` pair so waiting never holds
//! the shadow store's own lock.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// The value signalled back to a waiter: every `SignalCSeq` call site
/// in the original protocol hands back either a device's echoed field
/// value, so this covers the widths actually used by the handler table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CseqValue {
    U8(u8),
    U16(u16),
    U32(u32),
    I16(i16),
    Str(String),
}

/// `0xFF` — unsolicited acknowledgements never register a waiter.
pub const UNUSED_CSEQ: u8 = 0xFF;
/// The highest real control-plane sequence value; the counter wraps
/// to 0 immediately after this.
pub const MAX_CSEQ: u8 = 0xFD;

#[derive(Debug, Default)]
struct WaiterInner {
    value: Mutex<Option<CseqValue>>,
    ready: Condvar,
}

/// A single-shot rendezvous handle for one outstanding `cseq`.
#[derive(Debug, Clone)]
pub struct Waiter(Arc<WaiterInner>);

impl Waiter {
    fn new() -> Self {
        Waiter(Arc::new(WaiterInner::default()))
    }

    /// Stores `value` and wakes anyone blocked in [`Waiter::wait`].
    /// A no-op if the slot was already signalled.
    pub fn signal(&self, value: CseqValue) {
        let mut slot = self.0.value.lock().unwrap();
        if slot.is_none() {
            *slot = Some(value);
            self.0.ready.notify_all();
        }
    }

    /// Blocks the calling thread up to `timeout` for a signalled
    /// value. Returns `None` on timeout, matching the original's
    /// `WaitCSeq` returning `None` when the event never fires.
    pub fn wait(&self, timeout: Duration) -> Option<CseqValue> {
        let slot = self.0.value.lock().unwrap();
        if slot.is_some() {
            return slot.clone();
        }
        let (slot, _timed_out) = self.0.ready.wait_timeout(slot, timeout).unwrap();
        slot.clone()
    }
}

/// Per-device sequence counter plus the map of outstanding waiters,
/// exactly the `{cseq: 0x0, results: {}}` shape from the original's
/// `getDeviceStatus`. Lives embedded inside [`crate::device::Device`]
/// and is always mutated while the shadow store's lock is held; the
/// returned [`Waiter`] is then awaited *outside* that lock.
#[derive(Debug, Default)]
pub struct Sequencer {
    cseq: u8,
    pending: std::collections::HashMap<u8, Waiter>,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next control-plane sequence number. Returns the
    /// *pre-increment* value (the cseq to place in the outbound
    /// message) and, if `wait` is true, a [`Waiter`] registered for it.
    pub fn next_cseq(&mut self, wait: bool) -> (u8, Option<Waiter>) {
        let current = self.cseq;
        self.cseq = if current < MAX_CSEQ { current + 1 } else { 0 };

        // Drop any dangling waiter left at this key by an earlier,
        // already-timed-out allocation cycle.
        self.pending.remove(&current);

        let waiter = if wait {
            let w = Waiter::new();
            self.pending.insert(current, w.clone());
            Some(w)
        } else {
            None
        };

        (current, waiter)
    }

    /// `c - 1 mod 0xFE`, for interpreting a reply that must match the
    /// most recently issued request.
    pub fn last_cseq(&self) -> u8 {
        if self.cseq == 0 {
            MAX_CSEQ
        } else {
            self.cseq - 1
        }
    }

    /// Signals the waiter registered at `cseq`, if any, and removes it
    /// from the pending map. A no-op for unregistered or wildcard
    /// cseqs, matching the original's "no-op otherwise" rule.
    pub fn signal(&mut self, cseq: u8, value: CseqValue) {
        if let Some(waiter) = self.pending.remove(&cseq) {
            waiter.signal(value);
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_wraps_from_0xfd_to_zero() {
        let mut seq = Sequencer { cseq: MAX_CSEQ, pending: Default::default() };
        let (first, _) = seq.next_cseq(true);
        assert_eq!(first, MAX_CSEQ);
        assert_eq!(seq.cseq, 0);
        let (second, _) = seq.next_cseq(true);
        assert_eq!(second, 0);
        assert_eq!(seq.cseq, 1);
    }

    #[test]
    fn signal_before_wait_is_observed() {
        let mut seq = Sequencer::new();
        let (cseq, waiter) = seq.next_cseq(true);
        let waiter = waiter.unwrap();
        seq.signal(cseq, CseqValue::U8(7));
        assert_eq!(waiter.wait(Duration::from_millis(50)), Some(CseqValue::U8(7)));
    }

    #[test]
    fn wait_times_out_without_a_signal() {
        let mut seq = Sequencer::new();
        let (_, waiter) = seq.next_cseq(true);
        let waiter = waiter.unwrap();
        assert_eq!(waiter.wait(Duration::from_millis(10)), None);
    }

    #[test]
    fn signal_on_unregistered_cseq_is_a_no_op() {
        let mut seq = Sequencer::new();
        seq.signal(UNUSED_CSEQ, CseqValue::U8(1));
        assert_eq!(seq.pending_len(), 0);
    }

    #[test]
    fn reallocating_a_cseq_drops_the_old_dangling_waiter() {
        let mut seq = Sequencer { cseq: MAX_CSEQ, pending: Default::default() };
        let (c1, _old_waiter) = seq.next_cseq(true);
        assert_eq!(seq.pending_len(), 1);
        // Full wrap back around to c1 drops the stale entry on arrival.
        for _ in 0..(MAX_CSEQ as usize + 1) {
            seq.next_cseq(false);
        }
        let (c2, _) = seq.next_cseq(false);
        assert_eq!(c1, c2);
        assert_eq!(seq.pending_len(), 0);
    }
}
