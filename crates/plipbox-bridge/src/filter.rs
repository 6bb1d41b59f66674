//! Decide what happens to a frame received from Ethernet.
//!
//! Filters only look at the first [`FILTER_PEEK`] bytes, which is what the push loop reads into
//! the packet buffer before deciding.

use std::net::Ipv4Addr;

use plipbox_proto::eth::{self, ETH_HDR_SIZE, ETH_TYPE_ARP, ETH_TYPE_IPV4};

/// Ethernet + minimal IPv4 + UDP header.
pub const FILTER_PEEK: usize = ETH_HDR_SIZE + 20 + 8;

const IP_PROTO_UDP: u8 = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Hand the frame to the Amiga.
    Forward,
    /// Handled on the bridge itself.
    Consume,
    Drop,
}

pub trait FrameFilter {
    fn classify(&self, frame: &[u8]) -> Verdict;
}

impl<F: FrameFilter + ?Sized> FrameFilter for &F {
    fn classify(&self, frame: &[u8]) -> Verdict {
        (**self).classify(frame)
    }
}

impl<F: FrameFilter + ?Sized> FrameFilter for Box<F> {
    fn classify(&self, frame: &[u8]) -> Verdict {
        (**self).classify(frame)
    }
}

/// Production bridging: ARP stays local, everything else goes to the Amiga.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardAll;

impl FrameFilter for ForwardAll {
    fn classify(&self, frame: &[u8]) -> Verdict {
        match eth::frame_type(frame) {
            None => Verdict::Drop,
            Some(ETH_TYPE_ARP) => Verdict::Consume,
            Some(_) => Verdict::Forward,
        }
    }
}

/// Only UDP test datagrams addressed to `ip:port` are forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpTestFilter {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl UdpTestFilter {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    fn matches(&self, frame: &[u8]) -> bool {
        let Some(ip) = frame.get(ETH_HDR_SIZE..) else {
            return false;
        };
        if ip.len() < 20 || ip[0] >> 4 != 4 || ip[9] != IP_PROTO_UDP {
            return false;
        }
        let ihl = usize::from(ip[0] & 0x0f) * 4;
        if ihl < 20 || Ipv4Addr::new(ip[16], ip[17], ip[18], ip[19]) != self.ip {
            return false;
        }
        eth::get_word(ip, ihl + 2) == Some(self.port)
    }
}

impl FrameFilter for UdpTestFilter {
    fn classify(&self, frame: &[u8]) -> Verdict {
        match eth::frame_type(frame) {
            Some(ETH_TYPE_ARP) => Verdict::Consume,
            Some(ETH_TYPE_IPV4) if self.matches(frame) => Verdict::Forward,
            _ => Verdict::Drop,
        }
    }
}

/// Build an Ethernet/IPv4/UDP frame; used by the simulator and tests.
pub fn udp_frame(
    dst: plipbox_proto::MacAddr,
    src: plipbox_proto::MacAddr,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    let udp_len = 8 + payload.len();
    let ip_len = 20 + udp_len;
    let mut frame = vec![0u8; ETH_HDR_SIZE + ip_len];
    eth::write_header(&mut frame, dst, src, ETH_TYPE_IPV4);

    let ip = &mut frame[ETH_HDR_SIZE..];
    ip[0] = 0x45;
    eth::put_word(ip, 2, ip_len as u16);
    ip[8] = 64;
    ip[9] = IP_PROTO_UDP;
    ip[12..16].copy_from_slice(&src_ip.octets());
    ip[16..20].copy_from_slice(&dst_ip.octets());
    let mut sum: u32 = ip[..20]
        .chunks(2)
        .map(|w| u32::from(u16::from_be_bytes([w[0], w[1]])))
        .sum();
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    eth::put_word(ip, 10, !(sum as u16));

    let udp = &mut ip[20..];
    eth::put_word(udp, 0, dst_port);
    eth::put_word(udp, 2, dst_port);
    eth::put_word(udp, 4, udp_len as u16);
    udp[8..].copy_from_slice(payload);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use plipbox_proto::MacAddr;

    fn test_filter() -> UdpTestFilter {
        UdpTestFilter::new(Ipv4Addr::new(192, 168, 2, 20), 6800)
    }

    fn frame_to(ip: Ipv4Addr, port: u16) -> Vec<u8> {
        udp_frame(
            MacAddr::BROADCAST,
            MacAddr([2, 0, 0, 0, 0, 1]),
            Ipv4Addr::new(192, 168, 2, 1),
            ip,
            port,
            b"hello",
        )
    }

    #[test]
    fn udp_test_traffic_is_forwarded() {
        let filter = test_filter();
        assert_eq!(
            filter.classify(&frame_to(Ipv4Addr::new(192, 168, 2, 20), 6800)),
            Verdict::Forward
        );
        assert_eq!(
            filter.classify(&frame_to(Ipv4Addr::new(192, 168, 2, 21), 6800)),
            Verdict::Drop
        );
        assert_eq!(
            filter.classify(&frame_to(Ipv4Addr::new(192, 168, 2, 20), 6801)),
            Verdict::Drop
        );
    }

    #[test]
    fn peek_is_enough_to_classify() {
        let frame = frame_to(Ipv4Addr::new(192, 168, 2, 20), 6800);
        assert_eq!(test_filter().classify(&frame[..FILTER_PEEK]), Verdict::Forward);
        assert_eq!(test_filter().classify(&frame[..FILTER_PEEK - 1]), Verdict::Drop);
    }

    #[test]
    fn arp_is_consumed_by_both_filters() {
        let mut frame = vec![0u8; 42];
        eth::write_header(&mut frame, MacAddr::BROADCAST, MacAddr([2, 0, 0, 0, 0, 1]), ETH_TYPE_ARP);
        assert_eq!(test_filter().classify(&frame), Verdict::Consume);
        assert_eq!(ForwardAll.classify(&frame), Verdict::Consume);
        assert_eq!(ForwardAll.classify(&frame[..10]), Verdict::Drop);
    }

    #[test]
    fn udp_frame_checksum_verifies() {
        let frame = frame_to(Ipv4Addr::new(10, 0, 0, 1), 9);
        let mut sum: u32 = frame[ETH_HDR_SIZE..ETH_HDR_SIZE + 20]
            .chunks(2)
            .map(|w| u32::from(u16::from_be_bytes([w[0], w[1]])))
            .sum();
        while sum > 0xffff {
            sum = (sum & 0xffff) + (sum >> 16);
        }
        assert_eq!(sum, 0xffff);
    }
}
