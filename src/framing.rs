//! Frame codec for the application link.
//!
//! On the wire every message is:
//!
//! ```text
//! [control:1][msg_id:1][len:1][data_id:1][crc:2 LE][payload:len]
//! ```
//!
//! The CRC-16 (CCITT-FALSE) covers the 5 byte header with the `crc` field
//! zeroed, followed by the payload. `msg_id` increments on every send and is
//! informational only.

use crate::error::LinkError;

/// Nothing received yet. Also the value the receive buffer is reset to.
pub const CONTROL_IDLE: u8 = 0xff;
/// Link reset request; the peer answers with a ready edge.
pub const CONTROL_RESET: u8 = 0x01;
/// A data frame follows.
pub const CONTROL_DATA: u8 = 0x02;
/// The peer asks whether the host is ready.
pub const CONTROL_QUERY_READY: u8 = 0x03;

pub const HEADER_LEN: usize = 5;
pub const MAX_DATA_LEN: usize = 128;
/// Control byte, header and the largest payload.
pub const MAX_FRAME_LEN: usize = 1 + HEADER_LEN + MAX_DATA_LEN;

// CRC-16 ======================================================================

/// Incremental CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc16(u16);

impl Default for Crc16 {
    fn default() -> Self {
        Crc16::new()
    }
}

impl Crc16 {
    pub const fn new() -> Self {
        Crc16(0xffff)
    }

    pub fn update(&mut self, bytes: &[u8]) {
        let mut crc = self.0;
        for &b in bytes {
            crc ^= (b as u16) << 8;
            for _ in 0..8 {
                if (crc & 0x8000) != 0 {
                    crc = (crc << 1) ^ 0x1021;
                } else {
                    crc <<= 1;
                }
            }
        }
        self.0 = crc;
    }

    pub fn finish(self) -> u16 {
        self.0
    }
}

pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update(bytes);
    crc.finish()
}

// FrameHeader =================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub msg_id: u8,
    pub len: u8,
    pub data_id: u8,
    pub crc: u16,
}

impl FrameHeader {
    /// Build the header for `payload`, computing its CRC.
    pub fn new(msg_id: u8, data_id: u8, payload: &[u8]) -> Result<Self, LinkError> {
        if payload.len() > MAX_DATA_LEN {
            return Err(LinkError::PayloadTooLarge(payload.len()));
        }
        let mut header = FrameHeader {
            msg_id,
            len: payload.len() as u8,
            data_id,
            crc: 0,
        };
        header.crc = header.compute_crc(payload);
        Ok(header)
    }

    /// CRC over this header with its `crc` field zeroed, then `payload`.
    pub fn compute_crc(&self, payload: &[u8]) -> u16 {
        let zeroed = FrameHeader { crc: 0, ..*self };
        let mut crc = Crc16::new();
        crc.update(&zeroed.to_bytes());
        crc.update(payload);
        crc.finish()
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let crc = self.crc.to_le_bytes();
        [self.msg_id, self.len, self.data_id, crc[0], crc[1]]
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LinkError> {
        if bytes.len() < HEADER_LEN {
            return Err(LinkError::Truncated {
                needed: HEADER_LEN,
                got: bytes.len(),
            });
        }
        Ok(FrameHeader {
            msg_id: bytes[0],
            len: bytes[1],
            data_id: bytes[2],
            crc: u16::from_le_bytes([bytes[3], bytes[4]]),
        })
    }
}

/// Encode header and payload (without the control byte) into `out`.
pub fn encode_frame(
    msg_id: u8,
    data_id: u8,
    payload: &[u8],
    out: &mut [u8],
) -> Result<usize, LinkError> {
    let header = FrameHeader::new(msg_id, data_id, payload)?;
    let total = HEADER_LEN + payload.len();
    if out.len() < total {
        return Err(LinkError::Truncated {
            needed: total,
            got: out.len(),
        });
    }
    out[..HEADER_LEN].copy_from_slice(&header.to_bytes());
    out[HEADER_LEN..total].copy_from_slice(payload);
    Ok(total)
}

/// Decode a frame (without the control byte) and verify its CRC.
pub fn decode_frame(bytes: &[u8]) -> Result<(FrameHeader, &[u8]), LinkError> {
    let header = FrameHeader::from_bytes(bytes)?;
    let len = header.len as usize;
    if len > MAX_DATA_LEN {
        return Err(LinkError::PayloadTooLarge(len));
    }
    let total = HEADER_LEN + len;
    if bytes.len() < total {
        return Err(LinkError::Truncated {
            needed: total,
            got: bytes.len(),
        });
    }
    let payload = &bytes[HEADER_LEN..total];
    let computed = header.compute_crc(payload);
    if computed != header.crc {
        return Err(LinkError::CrcMismatch {
            expected: header.crc,
            computed,
        });
    }
    Ok((header, payload))
}

// =============================================================================
// Unit Tests
// =============================================================================
