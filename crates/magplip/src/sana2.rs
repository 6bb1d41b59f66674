//! SANA-II device vocabulary: command codes, error codes, flags and query layouts.
//!
//! Numeric values follow the SANA-II network device standard so that the codes observed by a
//! protocol stack (and in logs) match what any other SANA-II driver would report.

use bitflags::bitflags;

/// Hardware type reported by `S2_DEVICEQUERY` for PLIP links.
pub const S2_WIRETYPE_PLIP: u32 = 420;

/// Station addresses are Ethernet sized.
pub const PLIP_ADDR_FIELD_BITS: u16 = (plipbox_proto::eth::ETH_ADDR_LEN * 8) as u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Invalid,
    Reset,
    Read,
    Write,
    Update,
    Clear,
    Stop,
    Start,
    Flush,
    DeviceQuery,
    GetStationAddress,
    ConfigInterface,
    AddMulticastAddress,
    DelMulticastAddress,
    Multicast,
    Broadcast,
    TrackType,
    UntrackType,
    GetTypeStats,
    GetSpecialStats,
    GetGlobalStats,
    OnEvent,
    ReadOrphan,
    Online,
    Offline,
    Unknown(u16),
}

impl Command {
    pub fn code(self) -> u16 {
        match self {
            Command::Invalid => 0,
            Command::Reset => 1,
            Command::Read => 2,
            Command::Write => 3,
            Command::Update => 4,
            Command::Clear => 5,
            Command::Stop => 6,
            Command::Start => 7,
            Command::Flush => 8,
            Command::DeviceQuery => 9,
            Command::GetStationAddress => 10,
            Command::ConfigInterface => 11,
            Command::AddMulticastAddress => 14,
            Command::DelMulticastAddress => 15,
            Command::Multicast => 16,
            Command::Broadcast => 17,
            Command::TrackType => 18,
            Command::UntrackType => 19,
            Command::GetTypeStats => 20,
            Command::GetSpecialStats => 21,
            Command::GetGlobalStats => 22,
            Command::OnEvent => 23,
            Command::ReadOrphan => 24,
            Command::Online => 25,
            Command::Offline => 26,
            Command::Unknown(code) => code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            0 => Command::Invalid,
            1 => Command::Reset,
            2 => Command::Read,
            3 => Command::Write,
            4 => Command::Update,
            5 => Command::Clear,
            6 => Command::Stop,
            7 => Command::Start,
            8 => Command::Flush,
            9 => Command::DeviceQuery,
            10 => Command::GetStationAddress,
            11 => Command::ConfigInterface,
            14 => Command::AddMulticastAddress,
            15 => Command::DelMulticastAddress,
            16 => Command::Multicast,
            17 => Command::Broadcast,
            18 => Command::TrackType,
            19 => Command::UntrackType,
            20 => Command::GetTypeStats,
            21 => Command::GetSpecialStats,
            22 => Command::GetGlobalStats,
            23 => Command::OnEvent,
            24 => Command::ReadOrphan,
            25 => Command::Online,
            26 => Command::Offline,
            other => Command::Unknown(other),
        }
    }
}

/// Generic request error (`io_Error`).
///
/// The exec-level errors are negative, the SANA-II specific ones positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoErr {
    #[default]
    NoError,
    OpenFail,
    Aborted,
    NoCmd,
    BadLength,
    NoResources,
    BadArgument,
    BadState,
    BadAddress,
    MtuExceeded,
    NotSupported,
    Software,
    OutOfService,
    TxFailure,
}

impl IoErr {
    pub fn code(self) -> i8 {
        match self {
            IoErr::NoError => 0,
            IoErr::OpenFail => -1,
            IoErr::Aborted => -2,
            IoErr::NoCmd => -3,
            IoErr::BadLength => -4,
            IoErr::NoResources => 1,
            IoErr::BadArgument => 3,
            IoErr::BadState => 4,
            IoErr::BadAddress => 5,
            IoErr::MtuExceeded => 6,
            IoErr::NotSupported => 8,
            IoErr::Software => 9,
            IoErr::OutOfService => 10,
            IoErr::TxFailure => 11,
        }
    }

    pub fn is_ok(self) -> bool {
        self == IoErr::NoError
    }
}

/// Link specific error detail (`ios2_WireError`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireErr {
    #[default]
    GenericError,
    NotConfigured,
    UnitOnline,
    UnitOffline,
    AlreadyTracked,
    NotTracked,
    BuffError,
    SrcAddress,
    DstAddress,
    BadBroadcast,
    BadMulticast,
    MulticastFull,
    BadEvent,
    BadStatData,
    IsConfigured,
    NullPointer,
    TooManyRetries,
    HardwareError,
}

impl WireErr {
    pub fn code(self) -> u32 {
        match self {
            WireErr::GenericError => 0,
            WireErr::NotConfigured => 1,
            WireErr::UnitOnline => 2,
            WireErr::UnitOffline => 3,
            WireErr::AlreadyTracked => 4,
            WireErr::NotTracked => 5,
            WireErr::BuffError => 6,
            WireErr::SrcAddress => 7,
            WireErr::DstAddress => 8,
            WireErr::BadBroadcast => 9,
            WireErr::BadMulticast => 10,
            WireErr::MulticastFull => 11,
            WireErr::BadEvent => 12,
            WireErr::BadStatData => 13,
            WireErr::IsConfigured => 15,
            WireErr::NullPointer => 16,
            WireErr::TooManyRetries => 17,
            WireErr::HardwareError => 18,
        }
    }
}

bitflags! {
    /// `S2_ONEVENT` event mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Sana2Events: u32 {
        const ERROR = 1 << 0;
        const TX = 1 << 1;
        const RX = 1 << 2;
        const ONLINE = 1 << 3;
        const OFFLINE = 1 << 4;
        const BUFF = 1 << 5;
        const HARDWARE = 1 << 6;
        const SOFTWARE = 1 << 7;
    }
}

bitflags! {
    /// Per-request flags (`io_Flags`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct IoFlags: u8 {
        const QUICK = 0x01;
        const MCAST = 0x20;
        const BCAST = 0x40;
        const RAW = 0x80;
    }
}

bitflags! {
    /// Flags passed to [`crate::Device::open`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OpenFlags: u32 {
        /// Exclusive access.
        const MINE = 1 << 0;
        /// Promiscuous mode. PLIP has no use for it and refuses the open.
        const PROM = 1 << 1;
    }
}

/// `Sana2DeviceQuery`, size negotiated by the caller.
///
/// Only the fields whose end offset fits into `size_available` are filled in; the others stay
/// `None` exactly as a short caller buffer would leave them untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceQuery {
    pub size_available: u32,
    pub size_supplied: u32,
    pub format: u32,
    pub device_level: u32,
    pub addr_field_size: Option<u16>,
    pub mtu: Option<u32>,
    pub bps: Option<u32>,
    pub hardware_type: Option<u32>,
}

impl DeviceQuery {
    /// Byte size of the structure up to and including `AddrFieldSize`.
    pub const END_ADDR_FIELD_SIZE: u32 = 18;
    pub const END_MTU: u32 = 22;
    pub const END_BPS: u32 = 26;
    pub const END_HARDWARE_TYPE: u32 = 30;
    pub const FULL_SIZE: u32 = Self::END_HARDWARE_TYPE;

    pub fn with_size(size_available: u32) -> Self {
        Self {
            size_available,
            ..Default::default()
        }
    }

    /// Answer the query for a PLIP unit with the given MTU and reported bit rate.
    pub fn fill(&mut self, mtu: u32, bps: u32) {
        self.format = 0;
        self.device_level = 0;
        let size = self.size_available;
        if size >= Self::END_ADDR_FIELD_SIZE {
            self.addr_field_size = Some(PLIP_ADDR_FIELD_BITS);
        }
        if size >= Self::END_MTU {
            self.mtu = Some(mtu);
        }
        if size >= Self::END_BPS {
            self.bps = Some(bps);
        }
        if size >= Self::END_HARDWARE_TYPE {
            self.hardware_type = Some(S2_WIRETYPE_PLIP);
        }
        self.size_supplied = size.min(Self::FULL_SIZE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_codes_match_sana2() {
        assert_eq!(Command::Read.code(), 2);
        assert_eq!(Command::Broadcast.code(), 17);
        assert_eq!(Command::Offline.code(), 26);
        for code in 0..40u16 {
            assert_eq!(Command::from_code(code).code(), code);
        }
        assert_eq!(Command::from_code(12), Command::Unknown(12));
    }

    #[test]
    fn exec_errors_are_negative() {
        assert!(IoErr::Aborted.code() < 0);
        assert!(IoErr::OpenFail.code() < 0);
        assert_eq!(IoErr::OutOfService.code(), 10);
        assert_eq!(WireErr::TooManyRetries.code(), 17);
    }
}
