//! Handshake line assignment and hardware addresses per unit.
//!
//! PLIP cables wire POUT to POUT and BUSY to BUSY. Instead of a client/server split, the driver
//! crosses the two lines in software: unit 0 and unit 1 use mirrored assignments, so two machines
//! opened on opposite units see a symmetric link.

use plipbox_proto::MacAddr;

/// CIA-B printer status bits used for the handshake.
pub const CIAB_PRTRBUSY: u8 = 0;
pub const CIAB_PRTRPOUT: u8 = 1;
pub const CIAB_PRTRSEL: u8 = 2;

pub const CIAF_PRTRBUSY: u8 = 1 << CIAB_PRTRBUSY;
pub const CIAF_PRTRPOUT: u8 = 1 << CIAB_PRTRPOUT;
pub const CIAF_PRTRSEL: u8 = 1 << CIAB_PRTRSEL;

/// Address byte that distinguishes the two ends of the cable.
pub const PLIP_UNIT1_ADDR: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeLine {
    pub mask: u8,
    pub bit: u8,
}

impl HandshakeLine {
    const fn new(bit: u8) -> Self {
        Self {
            mask: 1 << bit,
            bit,
        }
    }
}

/// Which status line carries the data strobe ("line") and which requests a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub line: HandshakeLine,
    pub request: HandshakeLine,
}

impl Handshake {
    pub fn for_unit(unit: u32) -> Self {
        if unit != 0 {
            Self {
                line: HandshakeLine::new(CIAB_PRTRPOUT),
                request: HandshakeLine::new(CIAB_PRTRBUSY),
            }
        } else {
            Self {
                line: HandshakeLine::new(CIAB_PRTRBUSY),
                request: HandshakeLine::new(CIAB_PRTRPOUT),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StationAddrs {
    pub src: MacAddr,
    pub dst: MacAddr,
}

impl StationAddrs {
    pub fn for_unit(unit: u32) -> Self {
        let mut src = MacAddr::ZERO;
        let mut dst = MacAddr::ZERO;
        if unit != 0 {
            src.0[0] = PLIP_UNIT1_ADDR;
        } else {
            dst.0[0] = PLIP_UNIT1_ADDR;
        }
        Self { src, dst }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn units_are_mirror_images() {
        let u0 = Handshake::for_unit(0);
        let u1 = Handshake::for_unit(1);
        assert_eq!(u0.line, u1.request);
        assert_eq!(u0.request, u1.line);
        assert_eq!(u0.line.mask, CIAF_PRTRBUSY);
        assert_eq!(u1.line.mask, CIAF_PRTRPOUT);

        let a0 = StationAddrs::for_unit(0);
        let a1 = StationAddrs::for_unit(1);
        assert_eq!(a0.src, a1.dst);
        assert_eq!(a0.dst, a1.src);
        assert_eq!(a1.src.0[0], PLIP_UNIT1_ADDR);
    }
}
