//! The I/O request passed between clients, the dispatcher and the server task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use plipbox_proto::MacAddr;

use crate::buffer::BufferManagement;
use crate::sana2::{Command, DeviceQuery, IoErr, IoFlags, Sana2Events, WireErr};
use crate::stats::{DeviceStats, SpecialStatsReply};
use crate::track::PacketTypeStats;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Correlation handle a client keeps once its request has been handed to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Statistics payload (`ios2_StatData`). The caller picks the variant matching the command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StatData {
    #[default]
    None,
    DeviceQuery(DeviceQuery),
    GlobalStats(DeviceStats),
    SpecialStats(SpecialStatsReply),
    TypeStats(PacketTypeStats),
}

/// `IOSana2Req`.
///
/// Handing a request to [`crate::Device::begin_io`] moves it. It comes back through its reply
/// port (or in place, for quick I/O) once the device is done with it.
#[derive(Debug)]
pub struct IoRequest {
    id: RequestId,
    pub command: Command,
    pub flags: IoFlags,
    pub error: IoErr,
    pub wire_error: WireErr,
    /// Event mask for `S2_ONEVENT`: the wanted events on entry, the events that fired on return.
    pub events: Sana2Events,
    pub packet_type: u32,
    pub src_addr: MacAddr,
    pub dst_addr: MacAddr,
    /// Payload for writes; filled in by reads.
    pub data: Vec<u8>,
    pub stat_data: StatData,
    pub(crate) buffer_management: Option<Arc<BufferManagement>>,
    pub(crate) unit: Option<u32>,
    pub reply_port: Option<Sender<IoRequest>>,
    done: bool,
}

impl IoRequest {
    pub fn new(command: Command) -> Self {
        Self {
            id: RequestId::next(),
            command,
            flags: IoFlags::empty(),
            error: IoErr::NoError,
            wire_error: WireErr::GenericError,
            events: Sana2Events::empty(),
            packet_type: 0,
            src_addr: MacAddr::ZERO,
            dst_addr: MacAddr::ZERO,
            data: Vec::new(),
            stat_data: StatData::None,
            buffer_management: None,
            unit: None,
            reply_port: None,
            done: false,
        }
    }

    /// A fresh request bound to the same open instance as `opened`, like duplicating the request
    /// that was passed to `OpenDevice`.
    pub fn new_like(opened: &IoRequest, command: Command) -> Self {
        Self {
            buffer_management: opened.buffer_management.clone(),
            unit: opened.unit,
            reply_port: opened.reply_port.clone(),
            ..Self::new(command)
        }
    }

    pub fn with_reply_port(mut self, port: Sender<IoRequest>) -> Self {
        self.reply_port = Some(port);
        self
    }

    pub fn with_flags(mut self, flags: IoFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_data(mut self, packet_type: u32, dst_addr: MacAddr, data: Vec<u8>) -> Self {
        self.packet_type = packet_type;
        self.dst_addr = dst_addr;
        self.data = data;
        self
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn unit(&self) -> Option<u32> {
        self.unit
    }

    pub fn is_open(&self) -> bool {
        self.unit.is_some()
    }

    pub fn buffer_management(&self) -> Option<&Arc<BufferManagement>> {
        self.buffer_management.as_ref()
    }

    /// Whether the request was completed without a reply (quick I/O).
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub(crate) fn fail(&mut self, error: IoErr, wire_error: WireErr) {
        self.error = error;
        self.wire_error = wire_error;
    }

    /// Reset the result fields as `BeginIO` does on entry.
    pub(crate) fn activate(&mut self) {
        self.done = false;
        self.error = IoErr::NoError;
        self.wire_error = WireErr::GenericError;
    }

    pub(crate) fn mark_done(&mut self) {
        self.done = true;
    }
}

/// Complete a request that left the dispatcher. Requests without a reply port, or whose owner
/// has gone away, are dropped.
pub(crate) fn reply(mut req: IoRequest) {
    req.mark_done();
    let Some(port) = req.reply_port.clone() else {
        tracing::debug!(id = req.id.get(), command = ?req.command, "request has no reply port, dropping");
        return;
    };
    if let Err(err) = port.send(req) {
        tracing::debug!(id = err.0.id.get(), "reply port closed, dropping request");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = IoRequest::new(Command::Read);
        let b = IoRequest::new(Command::Read);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn new_like_shares_the_open_binding_only() {
        let (tx, _rx) = mpsc::channel();
        let mut opened = IoRequest::new(Command::Invalid).with_reply_port(tx);
        opened.unit = Some(1);
        opened.data = vec![1, 2, 3];

        let req = IoRequest::new_like(&opened, Command::Write);
        assert_eq!(req.unit(), Some(1));
        assert!(req.reply_port.is_some());
        assert!(req.data.is_empty());
        assert_ne!(req.id(), opened.id());
    }

    #[test]
    fn reply_sends_to_port() {
        let (tx, rx) = mpsc::channel();
        let req = IoRequest::new(Command::Write).with_reply_port(tx);
        let id = req.id();
        reply(req);

        let back = rx.try_recv().unwrap();
        assert_eq!(back.id(), id);
        assert!(back.is_done());
    }
}
