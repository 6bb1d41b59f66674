//! Frame dumps for the bridge console.

use std::fmt::Write as _;
use std::str::FromStr;

use bitflags::bitflags;
use plipbox_proto::eth::{self, ETH_HDR_SIZE};

use crate::param::ParamError;

bitflags! {
    /// Traffic directions whose frames are dumped.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DumpDirs: u8 {
        const ETH_RX = 1 << 0;
        const ETH_TX = 1 << 1;
        const PLIP_RX = 1 << 2;
        const PLIP_TX = 1 << 3;
    }
}

impl DumpDirs {
    pub fn label(self) -> &'static str {
        if self == DumpDirs::ETH_RX {
            "eth(rx)"
        } else if self == DumpDirs::ETH_TX {
            "eth(tx)"
        } else if self == DumpDirs::PLIP_RX {
            "plip(rx)"
        } else if self == DumpDirs::PLIP_TX {
            "plip(tx)"
        } else {
            "mixed"
        }
    }
}

impl FromStr for DumpDirs {
    type Err = ParamError;

    /// Comma separated list of `eth_rx`, `eth_tx`, `plip_rx`, `plip_tx`, or `all` / `none`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut dirs = DumpDirs::empty();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            dirs |= match part.to_ascii_lowercase().as_str() {
                "all" => DumpDirs::all(),
                "none" => DumpDirs::empty(),
                "eth_rx" => DumpDirs::ETH_RX,
                "eth_tx" => DumpDirs::ETH_TX,
                "plip_rx" => DumpDirs::PLIP_RX,
                "plip_tx" => DumpDirs::PLIP_TX,
                _ => {
                    return Err(ParamError::Invalid {
                        key: "dump",
                        value: s.to_string(),
                    })
                }
            };
        }
        Ok(dirs)
    }
}

/// One-line summary of a frame: addresses, type and length.
pub fn summarize(frame: &[u8]) -> String {
    let mut line = String::new();
    match (eth::src_mac(frame), eth::dst_mac(frame), eth::frame_type(frame)) {
        (Some(src), Some(dst), Some(ty)) => {
            let _ = write!(line, "{src} > {dst} type={ty:04x}");
        }
        _ => line.push_str("runt"),
    }
    let _ = write!(line, " len={}", frame.len());
    line
}

pub fn dump_frame(dir: DumpDirs, frame: &[u8]) {
    tracing::debug!(dir = dir.label(), "{}", summarize(frame));
    if tracing::enabled!(tracing::Level::TRACE) {
        let payload = frame.get(ETH_HDR_SIZE..).unwrap_or_default();
        let hex: String = payload
            .iter()
            .take(64)
            .map(|b| format!("{b:02x}"))
            .collect();
        tracing::trace!(dir = dir.label(), payload = %hex);
    }
}
