//! Known-good constant values observed in the wire protocol. Handlers
//! warn (never abort) when a peer's value disagrees with these.

/// `unk3` in a DL PING reply — fixed regardless of what the device sent.
pub const PING_RESPONSE_UNK3: u16 = 0xF43C;
/// `unk3` expected on an uplink PING request body.
pub const PING_REQUEST_UNK3: u16 = 0x0001;

/// `unk3` expected in a GET_PROG body.
pub const GET_PROG_UNK3: u32 = 0x800F_E0;
/// `unk3` expected in a PROG_END body.
pub const PROG_END_UNK3: u16 = 0x0A14;

/// `unk2` expected on most request bodies.
pub const COMMON_UNK2: u16 = 0x0001;
/// `unk1` expected on most request bodies.
pub const COMMON_UNK1: u8 = 0x02;

pub const FAKEBOOST_TEMPERATURE_RISE: i16 = 6;
pub const FAKEBOOST_DURATION_SECS: u64 = 1800;
