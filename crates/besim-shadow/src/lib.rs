//! The in-memory device shadow: peers, devices, rooms, and the
//! per-device control-plane sequencer, shared between the UDP engine
//! and the HTTP/REST surface.

pub mod device;
pub mod peer;
pub mod room;
pub mod sequencer;
pub mod store;

pub use device::Device;
pub use peer::Peer;
pub use room::{Heating, HeatingMode, Room};
pub use sequencer::{CseqValue, Sequencer, Waiter};
pub use store::{Shadow, ShadowGuard};
