//! Wire-level vocabulary shared by the plipbox bridge firmware model and the host driver.
//!
//! Everything here is plain data: Ethernet header helpers, the bridge transfer protocol's command
//! and status bytes, and the PLIP packet descriptor used by the push-style downlink. None of it
//! performs I/O.
#![forbid(unsafe_code)]

pub mod eth;
pub mod pb;
pub mod plip;

pub use eth::{MacAddr, ParseMacError};
pub use pb::{PbCommand, PbStatus};
pub use plip::{CrcType, PlipPacket, PlipStatus};

use thiserror::Error;

/// Errors produced when decoding a protocol byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown bridge protocol command byte {0:#04x}")]
    UnknownCommand(u8),

    #[error("unknown PLIP CRC type {0:#04x}")]
    UnknownCrcType(u8),
}
