use thiserror::Error;

use crate::sana2::WireErr;

/// Reasons an `OpenDevice` call is refused. Every variant maps to `IOERR_OPENFAIL` on the request.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("promiscuous mode is not supported")]
    Promiscuous,

    #[error("invalid unit {0} (PLIP has units 0 and 1)")]
    InvalidUnit(u32),

    #[error("device is already opened exclusively")]
    HeldExclusively,

    #[error("exclusive access requested while the device has other openers")]
    ExclusiveWhileShared,

    #[error("unit {requested} requested while unit {active} is open")]
    UnitMismatch { requested: u32, active: u32 },

    #[error("failed to spawn server task: {0}")]
    ServerSpawn(#[source] std::io::Error),

    #[error("server task failed to start: {0}")]
    ServerStartup(#[source] LinkError),

    #[error("server task exited before acknowledging startup")]
    ServerVanished,

    #[error("device has been expunged")]
    Expunged,
}

/// Failures reported by a [`crate::PlipLink`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("handshake timed out")]
    Timeout,

    #[error("collision: peer started a transfer at the same time")]
    Collision,

    #[error("frame of {len} bytes exceeds link maximum of {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("link is offline")]
    Offline,

    #[error("peer disconnected")]
    Disconnected,

    #[error("hardware unavailable: {0}")]
    Hardware(String),
}

impl LinkError {
    /// Wire error reported to the client whose request failed on this error.
    pub fn wire_err(&self) -> WireErr {
        match self {
            LinkError::Timeout | LinkError::Collision => WireErr::TooManyRetries,
            LinkError::FrameTooLarge { .. } => WireErr::GenericError,
            LinkError::Offline | LinkError::Disconnected => WireErr::UnitOffline,
            LinkError::Hardware(_) => WireErr::HardwareError,
        }
    }

    /// Whether another attempt of the same transfer may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LinkError::Timeout | LinkError::Collision)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackError {
    #[error("packet type {0:#06x} is already tracked")]
    AlreadyTracked(u32),

    #[error("packet type {0:#06x} is not tracked")]
    NotTracked(u32),

    #[error("type tracking table is full ({capacity} entries)")]
    NoResources { capacity: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown configuration keyword {0:?}")]
    UnknownKey(String),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("{key} must be between {min} and {max}, got {value}")]
    OutOfRange {
        key: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
}
