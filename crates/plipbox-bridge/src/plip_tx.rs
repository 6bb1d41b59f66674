//! PLIP send worker for the push-style downlink.
//!
//! A frame is sent as a PLIP packet whose first bytes come from the packet buffer (the header the
//! bridge already inspected) and whose remainder is clocked straight out of the Ethernet
//! controller. A failed send keeps the frame in the controller and is retried from the main loop.

use plipbox_proto::{PlipPacket, PlipStatus};
use tracing::{debug, warn};

use crate::dump::{dump_frame, DumpDirs};
use crate::eth::EthernetController;

/// Retries granted to a frame after its first send fails.
pub const PLIP_TX_RETRIES: u8 = 5;

/// Supplies payload bytes to a [`PlipSender`] one handshake at a time.
pub trait ByteSource {
    fn next_byte(&mut self) -> u8;
}

/// Line level PLIP transmitter.
pub trait PlipSender {
    fn send(&mut self, pkt: &PlipPacket, source: &mut dyn ByteSource) -> PlipStatus;
}

impl<T: PlipSender + ?Sized> PlipSender for &mut T {
    fn send(&mut self, pkt: &PlipPacket, source: &mut dyn ByteSource) -> PlipStatus {
        <T as PlipSender>::send(&mut **self, pkt, source)
    }
}

impl<T: PlipSender + ?Sized> PlipSender for Box<T> {
    fn send(&mut self, pkt: &PlipPacket, source: &mut dyn ByteSource) -> PlipStatus {
        <T as PlipSender>::send(&mut **self, pkt, source)
    }
}

/// Buffer bytes first, then the controller's receive buffer.
pub struct FrameSource<'a, C: ?Sized> {
    head: &'a [u8],
    pos: usize,
    controller: &'a mut C,
}

impl<'a, C: EthernetController + ?Sized> FrameSource<'a, C> {
    pub fn new(head: &'a [u8], controller: &'a mut C) -> Self {
        Self {
            head,
            pos: 0,
            controller,
        }
    }
}

impl<C: EthernetController + ?Sized> ByteSource for FrameSource<'_, C> {
    fn next_byte(&mut self) -> u8 {
        match self.head.get(self.pos) {
            Some(&b) => {
                self.pos += 1;
                b
            }
            None => self.controller.receive_byte(),
        }
    }
}

/// Sender that accepts every packet and keeps its payload.
///
/// Failures can be scripted with [`CapturingSender::fail_next`].
#[derive(Debug, Default, Clone)]
pub struct CapturingSender {
    packets: Vec<(PlipPacket, Vec<u8>)>,
    failures: Vec<PlipStatus>,
    attempts: usize,
}

impl CapturingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next sends with `statuses`, in order.
    pub fn fail_next(&mut self, statuses: impl IntoIterator<Item = PlipStatus>) {
        let mut statuses: Vec<_> = statuses.into_iter().collect();
        statuses.reverse();
        statuses.append(&mut self.failures);
        self.failures = statuses;
    }

    pub fn packets(&self) -> &[(PlipPacket, Vec<u8>)] {
        &self.packets
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }
}

impl PlipSender for CapturingSender {
    fn send(&mut self, pkt: &PlipPacket, source: &mut dyn ByteSource) -> PlipStatus {
        self.attempts += 1;
        if let Some(status) = self.failures.pop() {
            // A failed attempt still clocks out the header byte.
            source.next_byte();
            return status;
        }
        let payload = (0..pkt.size).map(|_| source.next_byte()).collect();
        self.packets.push((*pkt, payload));
        PlipStatus::Ok
    }
}

#[derive(Debug, Clone, Default)]
pub struct SendWorker {
    retry: u8,
    pkt: PlipPacket,
    offset: usize,
    length: usize,
    dump: DumpDirs,
    dump_plip: bool,
}

impl SendWorker {
    pub fn new(dump: DumpDirs, dump_plip: bool) -> Self {
        Self {
            dump,
            dump_plip,
            ..Self::default()
        }
    }

    pub fn retries_left(&self) -> u8 {
        self.retry
    }

    pub fn is_pending(&self) -> bool {
        self.retry > 0
    }

    /// Drop any outstanding retry.
    pub fn cancel(&mut self) {
        self.retry = 0;
    }

    /// Send a frame of `total` bytes whose first `length` bytes sit in `buf[offset..]`.
    pub fn send<S, C>(
        &mut self,
        sender: &mut S,
        buf: &[u8],
        controller: &mut C,
        offset: usize,
        length: usize,
        total: u16,
    ) -> PlipStatus
    where
        S: PlipSender + ?Sized,
        C: EthernetController + ?Sized,
    {
        self.pkt = PlipPacket::new(total);
        self.offset = offset;
        self.length = length;

        let status = self.attempt(sender, buf, controller);
        if status.is_ok() {
            self.retry = 0;
        } else {
            warn!(status = status.to_u8(), "plip tx: first attempt failed");
            self.retry = PLIP_TX_RETRIES;
        }
        status
    }

    /// Re-send the last frame when the link is up and retries remain.
    pub fn retry_worker<S, C>(
        &mut self,
        link_up: bool,
        sender: &mut S,
        buf: &[u8],
        controller: &mut C,
    ) -> Option<PlipStatus>
    where
        S: PlipSender + ?Sized,
        C: EthernetController + ?Sized,
    {
        if !link_up || self.retry == 0 {
            return None;
        }

        controller.rewind_receive(self.length as u16);
        let status = self.attempt(sender, buf, controller);
        if status.is_ok() {
            debug!(size = self.pkt.size, "plip tx: retry ok");
            self.retry = 0;
        } else {
            self.retry -= 1;
            warn!(
                status = status.to_u8(),
                left = self.retry,
                "plip tx: retry failed"
            );
        }
        Some(status)
    }

    fn attempt<S, C>(&self, sender: &mut S, buf: &[u8], controller: &mut C) -> PlipStatus
    where
        S: PlipSender + ?Sized,
        C: EthernetController + ?Sized,
    {
        let end = (self.offset + self.length).min(buf.len());
        let head = &buf[self.offset.min(end)..end];
        if self.dump.contains(DumpDirs::PLIP_TX) {
            dump_frame(DumpDirs::PLIP_TX, head);
        }
        let mut source = FrameSource::new(head, controller);
        let status = sender.send(&self.pkt, &mut source);
        if self.dump_plip && self.dump.contains(DumpDirs::PLIP_TX) {
            debug!(
                size = self.pkt.size,
                crc_type = self.pkt.crc_type.to_u8(),
                status = status.to_u8(),
                "plip(tx) done"
            );
        }
        status
    }
}
