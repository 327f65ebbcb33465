//! The outer datagram envelope.
//!
//! ```text
//! [u16 magic=0xFAD4][u16 payload_len][u32 seq][payload_len bytes payload][u16 crc][u16 magic=0x2DDF]
//! ```
//!
//! All integers are little-endian. `crc` is CRC-16/XMODEM over the
//! payload bytes only.

use crc::{Crc, CRC_16_XMODEM};

const MAGIC_HEADER: u16 = 0xFAD4;
const MAGIC_FOOTER: u16 = 0x2DDF;
const OVERHEAD: usize = 12;
/// `seq` value meaning "no frame-level sequence assigned".
pub const NO_SEQ: u32 = 0xFFFF_FFFF;

const XMODEM: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    TooShort,
    BadMagicHeader(u16),
    BadMagicFooter(u16),
    LengthMismatch { declared: usize, actual: usize },
    CrcMismatch { expected: u16, computed: u16 },
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::TooShort => write!(f, "frame shorter than the 12-byte envelope overhead"),
            FrameError::BadMagicHeader(v) => write!(f, "bad header magic: {v:#06x}"),
            FrameError::BadMagicFooter(v) => write!(f, "bad footer magic: {v:#06x}"),
            FrameError::LengthMismatch { declared, actual } => {
                write!(f, "length field {declared} does not match {actual} received payload bytes")
            }
            FrameError::CrcMismatch { expected, computed } => {
                write!(f, "CRC mismatch: frame says {expected:#06x}, computed {computed:#06x}")
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// Serializes `payload` into a framed datagram, tagging it with `seq`
/// (pass [`NO_SEQ`] when no frame-level sequence has been assigned).
pub fn encode(payload: &[u8], seq: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + OVERHEAD);
    out.extend_from_slice(&MAGIC_HEADER.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(&seq.to_le_bytes());
    out.extend_from_slice(payload);
    let crc = XMODEM.checksum(payload);
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&MAGIC_FOOTER.to_le_bytes());
    out
}

/// A successfully decoded frame: its payload and the carried sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub payload: Vec<u8>,
    pub seq: u32,
}

/// Validates and unwraps a framed datagram. Any structural problem
/// (bad magic, length mismatch, bad CRC) is reported, never panics —
/// callers log and drop on `Err`, per the wire protocol's "invalid
/// frames are dropped silently, no reply" rule.
pub fn decode(data: &[u8]) -> Result<DecodedFrame, FrameError> {
    if data.len() < OVERHEAD {
        return Err(FrameError::TooShort);
    }
    let header = u16::from_le_bytes([data[0], data[1]]);
    if header != MAGIC_HEADER {
        return Err(FrameError::BadMagicHeader(header));
    }
    let declared_len = u16::from_le_bytes([data[2], data[3]]) as usize;
    let seq = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);

    let actual_payload_len = data.len().saturating_sub(OVERHEAD);
    if declared_len != actual_payload_len {
        return Err(FrameError::LengthMismatch {
            declared: declared_len,
            actual: actual_payload_len,
        });
    }

    let payload = &data[8..8 + declared_len];
    let crc_bytes_at = 8 + declared_len;
    let expected_crc = u16::from_le_bytes([data[crc_bytes_at], data[crc_bytes_at + 1]]);
    let footer = u16::from_le_bytes([data[crc_bytes_at + 2], data[crc_bytes_at + 3]]);
    if footer != MAGIC_FOOTER {
        return Err(FrameError::BadMagicFooter(footer));
    }

    let computed_crc = XMODEM.checksum(payload);
    if computed_crc != expected_crc {
        return Err(FrameError::CrcMismatch {
            expected: expected_crc,
            computed: computed_crc,
        });
    }

    Ok(DecodedFrame {
        payload: payload.to_vec(),
        seq,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_zero_byte_round_trips_to_the_documented_bytes() {
        let encoded = encode(&[0x00], NO_SEQ);
        assert_eq!(
            encoded,
            vec![0xFA, 0xD4, 0x01, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x2D, 0xDF]
        );
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.payload, vec![0x00]);
        assert_eq!(decoded.seq, NO_SEQ);
    }

    #[test]
    fn round_trip_preserves_payload_for_arbitrary_seq() {
        let payload = vec![1, 2, 3, 4, 5, 0xAB, 0xCD];
        let encoded = encode(&payload, 42);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.payload, payload);
        assert_eq!(decoded.seq, 42);
    }

    #[test]
    fn rejects_short_length_field() {
        let mut encoded = encode(&[1, 2, 3], NO_SEQ);
        encoded[2] = 2; // declare 2 bytes instead of 3
        assert_eq!(
            decode(&encoded),
            Err(FrameError::LengthMismatch { declared: 2, actual: 3 })
        );
    }

    #[test]
    fn rejects_long_length_field() {
        let mut encoded = encode(&[1, 2, 3], NO_SEQ);
        encoded[2] = 4; // declare 4 bytes instead of 3
        assert_eq!(
            decode(&encoded),
            Err(FrameError::LengthMismatch { declared: 4, actual: 3 })
        );
    }

    #[test]
    fn rejects_crc_off_by_one_bit() {
        let mut encoded = encode(&[1, 2, 3], NO_SEQ);
        let crc_offset = 8 + 3;
        encoded[crc_offset] ^= 0x01;
        assert!(matches!(decode(&encoded), Err(FrameError::CrcMismatch { .. })));
    }

    #[test]
    fn rejects_bad_header_magic() {
        let mut encoded = encode(&[1], NO_SEQ);
        encoded[0] = 0x00;
        assert!(matches!(decode(&encoded), Err(FrameError::BadMagicHeader(_))));
    }

    #[test]
    fn rejects_bad_footer_magic() {
        let mut encoded = encode(&[1], NO_SEQ);
        let last = encoded.len() - 1;
        encoded[last] = 0x00;
        assert!(matches!(decode(&encoded), Err(FrameError::BadMagicFooter(_))));
    }

    #[test]
    fn rejects_too_short_buffers() {
        assert_eq!(decode(&[0xFA, 0xD4]), Err(FrameError::TooShort));
    }
}
