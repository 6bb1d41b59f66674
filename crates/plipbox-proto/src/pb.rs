//! Bridge transfer protocol ("pb proto") command and status bytes.
//!
//! The peer (the Amiga) drives every exchange: it either pulls a staged packet with
//! [`PbCommand::Recv`] or pushes one with [`PbCommand::Send`]. Each exchange is concluded with a
//! single [`PbStatus`] byte.

use crate::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PbCommand {
    /// Peer pulls the packet the bridge has staged for it.
    Recv,
    /// Peer pushes a packet to the bridge.
    Send,
}

impl PbCommand {
    pub const RECV_BYTE: u8 = 0x11;
    pub const SEND_BYTE: u8 = 0x22;

    pub fn to_u8(self) -> u8 {
        match self {
            PbCommand::Recv => Self::RECV_BYTE,
            PbCommand::Send => Self::SEND_BYTE,
        }
    }

    pub fn from_u8(v: u8) -> Result<Self, DecodeError> {
        match v {
            Self::RECV_BYTE => Ok(PbCommand::Recv),
            Self::SEND_BYTE => Ok(PbCommand::Send),
            other => Err(DecodeError::UnknownCommand(other)),
        }
    }
}

/// Result of an exchange, reported to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PbStatus {
    Ok,
    Idle,
    InvalidCommand,
    /// A receive was requested but the bridge had nothing staged.
    NotReady,
    Timeout,
    LinkFault,
    PacketTooLarge,
}

impl PbStatus {
    pub fn to_u8(self) -> u8 {
        match self {
            PbStatus::Ok => 0x00,
            PbStatus::Idle => 0x01,
            PbStatus::InvalidCommand => 0x02,
            PbStatus::NotReady => 0x03,
            PbStatus::Timeout => 0x10,
            PbStatus::LinkFault => 0x20,
            PbStatus::PacketTooLarge => 0x30,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x00 => PbStatus::Ok,
            0x01 => PbStatus::Idle,
            0x02 => PbStatus::InvalidCommand,
            0x03 => PbStatus::NotReady,
            0x10 => PbStatus::Timeout,
            0x20 => PbStatus::LinkFault,
            0x30 => PbStatus::PacketTooLarge,
            _ => return None,
        })
    }

    pub fn is_ok(self) -> bool {
        self == PbStatus::Ok
    }
}
