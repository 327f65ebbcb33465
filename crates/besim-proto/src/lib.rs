//! Binary wire protocol for the thermostat UDP link: the outer frame
//! envelope (CRC-guarded, [`frame`]) and the inner message wrapper
//! (type + flags + length, [`wrapper`]), plus the [`msg`] message-id
//! enumeration and SET payload sizing table.

pub mod frame;
pub mod msg;
pub mod wrapper;

pub use frame::{decode as decode_frame, encode as encode_frame, FrameError};
pub use msg::MsgId;
pub use wrapper::{Wrapper, WrapperError};
