//! Ethernet II header layout and the EtherType values used on the link.

use core::fmt;
use core::str::FromStr;

use thiserror::Error;

pub const ETH_ADDR_LEN: usize = 6;
pub const ETH_HDR_SIZE: usize = 14;

pub const ETH_OFF_DST_MAC: usize = 0;
pub const ETH_OFF_SRC_MAC: usize = 6;
pub const ETH_OFF_TYPE: usize = 12;

pub const ETH_TYPE_IPV4: u16 = 0x0800;
pub const ETH_TYPE_ARP: u16 = 0x0806;

/// Reserved EtherType announcing that the peer went online.
pub const ETH_TYPE_MAGIC_ONLINE: u16 = 0xffff;
/// Reserved EtherType announcing that the peer went offline.
pub const ETH_TYPE_MAGIC_OFFLINE: u16 = 0xfffe;
/// Reserved EtherType marking frames that belong to the internal loopback test.
///
/// Real traffic never carries this value, so a frame coming back from the peer with it set is
/// known to be a test frame that went around the loop.
pub const ETH_TYPE_MAGIC_LOOPBACK: u16 = 0xfffd;

/// Largest frame the bridge ever stages (header + 1500 byte payload + slack for VLAN/FCS).
pub const MAX_FRAME_SIZE: usize = 1536;

/// Read a big-endian word at `off`. Returns `None` when the buffer is too short.
pub fn get_word(buf: &[u8], off: usize) -> Option<u16> {
    let bytes = buf.get(off..off + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Write a big-endian word at `off`. Returns `false` when the buffer is too short.
pub fn put_word(buf: &mut [u8], off: usize, value: u16) -> bool {
    match buf.get_mut(off..off + 2) {
        Some(bytes) => {
            bytes.copy_from_slice(&value.to_be_bytes());
            true
        }
        None => false,
    }
}

pub fn frame_type(frame: &[u8]) -> Option<u16> {
    get_word(frame, ETH_OFF_TYPE)
}

pub fn set_frame_type(frame: &mut [u8], ty: u16) -> bool {
    put_word(frame, ETH_OFF_TYPE, ty)
}

pub fn dst_mac(frame: &[u8]) -> Option<MacAddr> {
    MacAddr::from_slice(frame.get(ETH_OFF_DST_MAC..ETH_OFF_DST_MAC + ETH_ADDR_LEN)?)
}

pub fn src_mac(frame: &[u8]) -> Option<MacAddr> {
    MacAddr::from_slice(frame.get(ETH_OFF_SRC_MAC..ETH_OFF_SRC_MAC + ETH_ADDR_LEN)?)
}

/// Write an Ethernet II header into the first [`ETH_HDR_SIZE`] bytes of `frame`.
pub fn write_header(frame: &mut [u8], dst: MacAddr, src: MacAddr, ty: u16) -> bool {
    if frame.len() < ETH_HDR_SIZE {
        return false;
    }
    frame[ETH_OFF_DST_MAC..ETH_OFF_DST_MAC + ETH_ADDR_LEN].copy_from_slice(&dst.0);
    frame[ETH_OFF_SRC_MAC..ETH_OFF_SRC_MAC + ETH_ADDR_LEN].copy_from_slice(&src.0);
    put_word(frame, ETH_OFF_TYPE, ty)
}

/// A 48-bit hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; ETH_ADDR_LEN]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; ETH_ADDR_LEN]);
    pub const ZERO: MacAddr = MacAddr([0; ETH_ADDR_LEN]);

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; ETH_ADDR_LEN] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn octets(&self) -> [u8; ETH_ADDR_LEN] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid MAC address {input:?} (expected six ':'-separated hex octets)")]
pub struct ParseMacError {
    pub input: String,
}

impl FromStr for MacAddr {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseMacError {
            input: s.to_string(),
        };

        let mut out = [0u8; ETH_ADDR_LEN];
        let mut parts = s.trim().split(':');
        for slot in out.iter_mut() {
            let part = parts.next().ok_or_else(err)?;
            if part.is_empty() || part.len() > 2 {
                return Err(err());
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| err())?;
        }
        if parts.next().is_some() {
            return Err(err());
        }
        Ok(Self(out))
    }
}
