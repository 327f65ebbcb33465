//! The UDP control-plane engine: frame/wrapper dispatch, the
//! per-message handlers, fake-boost, and the cloud-relay variant.
//!
//! Grounded on `original_source/besim/rootfs/opt/BeSIM/udpserver.py`
//! and `proxyUdpServer.py`.

pub mod capture;
pub mod consts;
pub mod downlink;
pub mod engine;
pub mod fakeboost;
pub mod handlers;
pub mod relay;
pub mod unpack;

pub use capture::Capture;
pub use engine::{handle_datagram, run, Engine};
pub use relay::Relay;
pub use unpack::{Unpacker, UnpackError};
