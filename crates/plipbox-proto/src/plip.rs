//! PLIP packet descriptor for the push-style downlink.
//!
//! A PLIP transfer announces the packet size and CRC mode up front, then clocks the payload over
//! the parallel lines one byte per handshake.

use crate::DecodeError;

/// Magic byte that opens every PLIP packet on the wire.
pub const PLIP_MAGIC: u8 = 0x42;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrcType {
    #[default]
    None,
    Crc16,
}

impl CrcType {
    pub fn to_u8(self) -> u8 {
        match self {
            CrcType::Crc16 => 0x01,
            CrcType::None => 0x02,
        }
    }

    pub fn from_u8(v: u8) -> Result<Self, DecodeError> {
        match v {
            0x01 => Ok(CrcType::Crc16),
            0x02 => Ok(CrcType::None),
            other => Err(DecodeError::UnknownCrcType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlipPacket {
    pub size: u16,
    pub crc_type: CrcType,
    pub crc: u16,
}

impl PlipPacket {
    pub fn new(size: u16) -> Self {
        Self {
            size,
            crc_type: CrcType::None,
            crc: 0,
        }
    }

    /// The header bytes that precede the payload: magic, CRC type, size (BE), CRC (BE).
    pub fn header_bytes(&self) -> [u8; 6] {
        let [s0, s1] = self.size.to_be_bytes();
        let [c0, c1] = self.crc.to_be_bytes();
        [PLIP_MAGIC, self.crc_type.to_u8(), s0, s1, c0, c1]
    }
}

/// Outcome of a low-level PLIP send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlipStatus {
    Ok,
    /// The peer never raised its select line.
    Idle,
    /// The peer answered with an unexpected magic/header byte.
    InvalidMagic,
    /// A handshake stalled; the byte records the protocol phase that timed out.
    Timeout(u8),
    /// The peer started a transfer of its own at the same time.
    LostSelect,
}

impl PlipStatus {
    pub fn to_u8(self) -> u8 {
        match self {
            PlipStatus::Ok => 0x00,
            PlipStatus::Idle => 0x01,
            PlipStatus::InvalidMagic => 0x11,
            PlipStatus::LostSelect => 0x12,
            PlipStatus::Timeout(phase) => 0x80 | (phase & 0x7f),
        }
    }

    pub fn is_ok(self) -> bool {
        self == PlipStatus::Ok
    }
}
