//! The device: open/close bookkeeping and the first level command dispatcher.
//!
//! `begin_io` decides per command whether the request can be answered immediately (quick I/O),
//! must wait in one of the pending queues, or has to be handed to the server task. Once a request
//! has been queued or forwarded the dispatcher no longer owns it.

use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard};

use bitflags::bitflags;
use plipbox_proto::eth::ETH_HDR_SIZE;
use tracing::{debug, info, warn};

use crate::buffer::{BufferId, BufferManagement, BufferTags};
use crate::config::DeviceConfig;
use crate::error::{OpenError, TrackError};
use crate::link::{LinkFactory, LinkParams};
use crate::queue::{QueueKind, RequestQueues};
use crate::request::{self, IoRequest, RequestId, StatData};
use crate::sana2::{Command, IoErr, IoFlags, OpenFlags, Sana2Events, WireErr};
use crate::server::{self, ServerHandle, ServerMsg};
use crate::stats::{DeviceStats, SpecialStats, S2SS_COUNT};
use crate::track::TypeTracker;
use crate::wiring::{Handshake, StationAddrs};

/// Units a PLIP device offers: one per end of the cable.
pub const PLIP_UNITS: u32 = 2;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeviceFlags: u32 {
        const OFFLINE = 1 << 0;
        const NOTCONFIGURED = 1 << 1;
        const EXCLUSIVE = 1 << 2;
        const SERVERSTOPPED = 1 << 3;
    }
}

/// Events a client may wait for with `S2_ONEVENT`.
const SUPPORTED_EVENTS: Sana2Events = Sana2Events::all();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortOutcome {
    Aborted,
    /// The request was not queued. It may already have completed, or the server task may be
    /// transferring it right now.
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    /// The last opener closed while an expunge was pending; the device is gone.
    Expunged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpungeStatus {
    /// Openers remain; the expunge happens when the last one closes.
    Deferred,
    Expunged,
}

/// State touched by both the dispatcher and the server task.
#[derive(Debug)]
pub(crate) struct UnitState {
    pub flags: DeviceFlags,
    pub unit: u32,
    pub handshake: Handshake,
    pub addrs: StationAddrs,
    pub stats: DeviceStats,
    pub tracker: TypeTracker,
}

/// Serialized by the open/close lock.
#[derive(Debug, Default)]
struct OpenState {
    open_count: u32,
    buffers: Vec<Arc<BufferManagement>>,
    next_buffer_id: u32,
    server: Option<ServerHandle>,
    expunge_deferred: bool,
    expunged: bool,
}

pub(crate) struct Shared {
    pub config: DeviceConfig,
    link_factory: LinkFactory,
    open: Mutex<OpenState>,
    unit: Mutex<UnitState>,
    pub queues: RequestQueues,
    pub special: SpecialStats,
    server_tx: Mutex<Option<Sender<ServerMsg>>>,
}

impl Shared {
    fn lock_open(&self) -> MutexGuard<'_, OpenState> {
        self.open
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn lock_unit(&self) -> MutexGuard<'_, UnitState> {
        self.unit
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn server_tx(&self) -> Option<Sender<ServerMsg>> {
        self.server_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_server_tx(&self, tx: Option<Sender<ServerMsg>>) {
        *self
            .server_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = tx;
    }

    pub fn flags(&self) -> DeviceFlags {
        self.lock_unit().flags
    }

    pub fn max_frame(&self) -> usize {
        self.config.mtu + ETH_HDR_SIZE
    }
}

/// A loaded PLIP device.
///
/// Dropping the device stops its server task.
pub struct Device {
    shared: Arc<Shared>,
}

impl Device {
    /// Load the device. Nothing touches the link until the first `open`.
    pub fn new(config: DeviceConfig, link_factory: LinkFactory) -> Self {
        info!(mtu = config.mtu, retries = config.retries, "initialising PLIP device");
        let unit = UnitState {
            flags: DeviceFlags::NOTCONFIGURED | DeviceFlags::OFFLINE,
            unit: 0,
            handshake: Handshake::for_unit(0),
            addrs: StationAddrs::default(),
            stats: DeviceStats::default(),
            tracker: TypeTracker::default(),
        };
        Self {
            shared: Arc::new(Shared {
                config,
                link_factory,
                open: Mutex::new(OpenState::default()),
                unit: Mutex::new(unit),
                queues: RequestQueues::default(),
                special: SpecialStats::default(),
                server_tx: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.shared.config
    }

    pub fn open(
        &self,
        req: &mut IoRequest,
        unit: u32,
        flags: OpenFlags,
        tags: BufferTags,
    ) -> Result<(), OpenError> {
        let mut open = self.shared.lock_open();
        match self.try_open(&mut open, unit, flags, tags) {
            Ok(bm) => {
                debug!(unit, buffer = bm.id().get(), openers = open.open_count, "opened");
                req.buffer_management = Some(bm);
                req.unit = Some(unit);
                req.error = IoErr::NoError;
                Ok(())
            }
            Err(err) => {
                warn!(unit, %err, "open failed");
                req.error = IoErr::OpenFail;
                req.unit = None;
                req.buffer_management = None;
                Err(err)
            }
        }
    }

    fn try_open(
        &self,
        open: &mut OpenState,
        unit: u32,
        flags: OpenFlags,
        tags: BufferTags,
    ) -> Result<Arc<BufferManagement>, OpenError> {
        if open.expunged {
            return Err(OpenError::Expunged);
        }
        if flags.contains(OpenFlags::PROM) {
            return Err(OpenError::Promiscuous);
        }
        if unit >= PLIP_UNITS {
            return Err(OpenError::InvalidUnit(unit));
        }

        let (active, exclusive) = {
            let state = self.shared.lock_unit();
            (state.unit, state.flags.contains(DeviceFlags::EXCLUSIVE))
        };
        if open.open_count > 0 {
            if flags.contains(OpenFlags::MINE) {
                return Err(OpenError::ExclusiveWhileShared);
            }
            if exclusive {
                return Err(OpenError::HeldExclusively);
            }
        }
        if open.open_count > 0 && unit != active {
            return Err(OpenError::UnitMismatch {
                requested: unit,
                active,
            });
        }
        // An idle server is wired for the last unit; rewire it for this one.
        if unit != active {
            if let Some(server) = open.server.take() {
                info!(from = active, to = unit, "rewiring link for new unit");
                self.shared.set_server_tx(None);
                server.stop(&self.shared);
                self.shared
                    .lock_unit()
                    .flags
                    .insert(DeviceFlags::NOTCONFIGURED);
            }
        }

        if open.server.is_none() {
            let handshake = Handshake::for_unit(unit);
            let params = LinkParams {
                unit,
                handshake,
                timeout: self.shared.config.timeout,
                max_frame: self.shared.max_frame(),
            };
            let handle = server::spawn(
                Arc::clone(&self.shared),
                Arc::clone(&self.shared.link_factory),
                params,
            )?;
            self.shared.set_server_tx(Some(handle.sender()));
            open.server = Some(handle);

            let mut state = self.shared.lock_unit();
            state.unit = unit;
            state.handshake = handshake;
            state.addrs = StationAddrs::for_unit(unit);
        }

        self.shared
            .lock_unit()
            .flags
            .set(DeviceFlags::EXCLUSIVE, flags.contains(OpenFlags::MINE));

        let bm = Arc::new(BufferManagement::new(BufferId(open.next_buffer_id), tags));
        open.next_buffer_id = open.next_buffer_id.wrapping_add(1);
        open.buffers.push(Arc::clone(&bm));
        open.open_count += 1;
        open.expunge_deferred = false;
        Ok(bm)
    }

    pub fn close(&self, req: &mut IoRequest) -> CloseOutcome {
        let mut open = self.shared.lock_open();
        if req.unit.take().is_none() {
            return CloseOutcome::Closed;
        }
        if let Some(bm) = req.buffer_management.take() {
            open.buffers.retain(|b| b.id() != bm.id());
        }
        open.open_count = open.open_count.saturating_sub(1);
        debug!(openers = open.open_count, "closed");

        if open.open_count == 0 {
            self.shared.lock_unit().flags.remove(DeviceFlags::EXCLUSIVE);
            if open.expunge_deferred {
                self.expunge_locked(&mut open);
                return CloseOutcome::Expunged;
            }
        }
        CloseOutcome::Closed
    }

    pub fn expunge(&self) -> ExpungeStatus {
        let mut open = self.shared.lock_open();
        if open.open_count > 0 {
            debug!(openers = open.open_count, "expunge deferred");
            open.expunge_deferred = true;
            return ExpungeStatus::Deferred;
        }
        self.expunge_locked(&mut open);
        ExpungeStatus::Expunged
    }

    fn expunge_locked(&self, open: &mut OpenState) {
        self.shared.set_server_tx(None);
        if let Some(server) = open.server.take() {
            server.stop(&self.shared);
        }
        self.shared.lock_unit().tracker.clear();
        open.expunge_deferred = false;
        open.expunged = true;
        info!("device expunged");
    }

    pub fn open_instances(&self) -> u32 {
        self.shared.lock_open().open_count
    }

    pub fn buffer_management_count(&self) -> usize {
        self.shared.lock_open().buffers.len()
    }

    pub fn flags(&self) -> DeviceFlags {
        self.shared.flags()
    }

    pub fn is_online(&self) -> bool {
        !self.flags().contains(DeviceFlags::OFFLINE)
    }

    pub fn station_address(&self) -> StationAddrs {
        self.shared.lock_unit().addrs
    }

    pub fn special_stats(&self) -> &SpecialStats {
        &self.shared.special
    }

    pub fn queued(&self, kind: QueueKind) -> usize {
        self.shared.queues.get(kind).len()
    }

    /// Start a request. Returns the request if it completed as quick I/O; everything else comes
    /// back through the request's reply port.
    pub fn begin_io(&self, mut req: IoRequest) -> Option<IoRequest> {
        req.activate();
        debug!(id = req.id().get(), command = ?req.command, "begin_io");

        match req.command {
            Command::Read | Command::ReadOrphan => {
                let kind = if req.command == Command::Read {
                    QueueKind::Read
                } else {
                    QueueKind::Orphan
                };
                if self
                    .flags()
                    .intersects(DeviceFlags::OFFLINE | DeviceFlags::NOTCONFIGURED)
                {
                    req.fail(IoErr::OutOfService, WireErr::UnitOffline);
                } else if !req.buffer_management.as_ref().is_some_and(|bm| bm.can_receive()) {
                    req.fail(IoErr::BadArgument, WireErr::BuffError);
                } else {
                    req.flags.remove(IoFlags::QUICK);
                    self.shared.queues.get(kind).push(req);
                    return None;
                }
            }

            Command::Write | Command::Broadcast => {
                if req.flags.contains(IoFlags::RAW) {
                    req.fail(IoErr::NotSupported, WireErr::GenericError);
                } else if req.data.len() > self.shared.config.mtu {
                    req.error = IoErr::MtuExceeded;
                } else if !req.buffer_management.as_ref().is_some_and(|bm| bm.can_send()) {
                    req.fail(IoErr::BadArgument, WireErr::BuffError);
                } else if self
                    .flags()
                    .intersects(DeviceFlags::OFFLINE | DeviceFlags::NOTCONFIGURED)
                {
                    req.fail(IoErr::OutOfService, WireErr::UnitOffline);
                } else {
                    req.flags.remove(IoFlags::QUICK);
                    self.shared.queues.write.push(req);
                    self.wake_server();
                    return None;
                }
            }

            Command::Online | Command::Offline | Command::ConfigInterface => {
                return self.forward(req);
            }

            Command::GetStationAddress => {
                let addrs = self.station_address();
                req.src_addr = addrs.src;
                req.dst_addr = addrs.dst;
            }

            Command::DeviceQuery => match &mut req.stat_data {
                StatData::DeviceQuery(query) => {
                    query.fill(self.shared.config.mtu as u32, self.shared.config.bps)
                }
                _ => req.fail(IoErr::BadArgument, WireErr::BadStatData),
            },

            Command::OnEvent => return self.on_event(req),

            Command::TrackType => {
                if let Err(err) = self.shared.lock_unit().tracker.track(req.packet_type) {
                    debug!(%err, "track type refused");
                    let wire = match err {
                        TrackError::AlreadyTracked(_) => WireErr::AlreadyTracked,
                        _ => WireErr::GenericError,
                    };
                    req.fail(IoErr::NoResources, wire);
                }
            }

            Command::UntrackType => {
                if self
                    .shared
                    .lock_unit()
                    .tracker
                    .untrack(req.packet_type)
                    .is_err()
                {
                    req.fail(IoErr::BadState, WireErr::NotTracked);
                }
            }

            Command::GetTypeStats => {
                let stats = self.shared.lock_unit().tracker.stats(req.packet_type);
                match stats {
                    Ok(stats) => req.stat_data = StatData::TypeStats(stats),
                    Err(_) => req.fail(IoErr::BadState, WireErr::NotTracked),
                }
            }

            Command::GetGlobalStats => {
                req.stat_data = StatData::GlobalStats(self.shared.lock_unit().stats);
            }

            Command::GetSpecialStats => match &mut req.stat_data {
                StatData::SpecialStats(reply) => {
                    reply.records.clear();
                    if self.shared.config.special_stats {
                        let count = (reply.record_count_max as usize).min(S2SS_COUNT);
                        reply
                            .records
                            .extend_from_slice(&self.shared.special.records()[..count]);
                    }
                }
                _ => req.fail(IoErr::BadArgument, WireErr::BadStatData),
            },

            Command::Reset
            | Command::Update
            | Command::Clear
            | Command::Stop
            | Command::Start
            | Command::Flush => req.fail(IoErr::NoCmd, WireErr::GenericError),

            _ => req.fail(IoErr::NotSupported, WireErr::GenericError),
        }

        self.term_io(req)
    }

    fn on_event(&self, mut req: IoRequest) -> Option<IoRequest> {
        let offline = self.flags().contains(DeviceFlags::OFFLINE);
        let wanted = req.events;
        if (wanted.contains(Sana2Events::ONLINE) && !offline)
            || (wanted.contains(Sana2Events::OFFLINE) && offline)
        {
            req.events &= Sana2Events::ONLINE | Sana2Events::OFFLINE;
            req.error = IoErr::NoError;
        } else if !SUPPORTED_EVENTS.contains(wanted) {
            req.fail(IoErr::NotSupported, WireErr::BadEvent);
        } else {
            req.flags.remove(IoFlags::QUICK);
            self.shared.queues.event.push(req);
            return None;
        }
        self.term_io(req)
    }

    fn forward(&self, mut req: IoRequest) -> Option<IoRequest> {
        req.flags.remove(IoFlags::QUICK);
        let Some(tx) = self.shared.server_tx() else {
            req.fail(IoErr::OutOfService, WireErr::UnitOffline);
            return self.term_io(req);
        };
        match tx.send(ServerMsg::Forward(req)) {
            Ok(()) => None,
            Err(err) => {
                let ServerMsg::Forward(mut req) = err.0 else {
                    return None;
                };
                req.fail(IoErr::OutOfService, WireErr::UnitOffline);
                self.term_io(req)
            }
        }
    }

    fn wake_server(&self) {
        if let Some(tx) = self.shared.server_tx() {
            let _ = tx.send(ServerMsg::Wake);
        }
    }

    /// Complete a request. Quick requests are handed back in place; the rest go to their reply
    /// port. A request without a reply port is handed back as well.
    pub fn term_io(&self, mut req: IoRequest) -> Option<IoRequest> {
        debug!(
            id = req.id().get(),
            command = ?req.command,
            error = req.error.code(),
            wire_error = req.wire_error.code(),
            "term_io"
        );
        if req.flags.contains(IoFlags::QUICK) || req.reply_port.is_none() {
            req.mark_done();
            return Some(req);
        }
        request::reply(req);
        None
    }

    /// Abort a queued request. The aborted request is replied with `IOERR_ABORTED`.
    pub fn abort_io(&self, id: RequestId) -> AbortOutcome {
        match self.shared.queues.remove(id) {
            Some((kind, mut req)) => {
                debug!(id = id.get(), queue = ?kind, "aborted");
                req.fail(IoErr::Aborted, WireErr::GenericError);
                request::reply(req);
                AbortOutcome::Aborted
            }
            None => AbortOutcome::NotFound,
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let mut open = self.shared.lock_open();
        self.shared.set_server_tx(None);
        if let Some(server) = open.server.take() {
            server.stop(&self.shared);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{ChannelLink, PlipLink};
    use crate::sana2::DeviceQuery;
    use crate::stats::SpecialStatsReply;

    fn device() -> Device {
        let factory: LinkFactory = Arc::new(|params: &LinkParams| {
            let (link, _peer) = ChannelLink::pair(params.max_frame);
            Ok(Box::new(link) as Box<dyn PlipLink>)
        });
        Device::new(DeviceConfig::default(), factory)
    }

    fn opened(dev: &Device) -> IoRequest {
        let mut req = IoRequest::new(Command::Invalid);
        dev.open(&mut req, 0, OpenFlags::empty(), BufferTags::copying())
            .unwrap();
        req
    }

    fn quick(template: &IoRequest, command: Command) -> IoRequest {
        IoRequest::new_like(template, command).with_flags(IoFlags::QUICK)
    }

    #[test]
    fn device_query_fills_only_fitting_fields() {
        let dev = device();
        let handle = opened(&dev);

        let mut req = quick(&handle, Command::DeviceQuery);
        req.stat_data = StatData::DeviceQuery(DeviceQuery::with_size(22));
        let req = dev.begin_io(req).unwrap();
        let StatData::DeviceQuery(q) = req.stat_data else {
            panic!("stat data replaced");
        };
        assert_eq!(q.addr_field_size, Some(48));
        assert_eq!(q.mtu, Some(1500));
        assert_eq!(q.bps, None);
        assert_eq!(q.hardware_type, None);
        assert_eq!(q.size_supplied, 22);
    }

    #[test]
    fn writes_are_refused_while_unconfigured() {
        let dev = device();
        let handle = opened(&dev);

        let peer = StationAddrs::for_unit(0).dst;
        let req = quick(&handle, Command::Write).with_data(0x0800, peer, vec![0; 64]);
        let req = dev.begin_io(req).unwrap();
        assert_eq!(req.error, IoErr::OutOfService);
        assert_eq!(req.wire_error, WireErr::UnitOffline);
        assert_eq!(dev.queued(QueueKind::Write), 0);
    }

    #[test]
    fn legacy_commands_are_nocmd_others_unsupported() {
        let dev = device();
        let handle = opened(&dev);

        let req = dev.begin_io(quick(&handle, Command::Flush)).unwrap();
        assert_eq!(req.error, IoErr::NoCmd);
        let req = dev.begin_io(quick(&handle, Command::Multicast)).unwrap();
        assert_eq!(req.error, IoErr::NotSupported);
        let req = dev.begin_io(quick(&handle, Command::Unknown(99))).unwrap();
        assert_eq!(req.error, IoErr::NotSupported);
        assert!(req.is_done());
    }

    #[test]
    fn special_stats_respect_record_max() {
        let dev = device();
        let handle = opened(&dev);
        dev.special_stats().collision();

        let mut req = quick(&handle, Command::GetSpecialStats);
        req.stat_data = StatData::SpecialStats(SpecialStatsReply::with_capacity(1));
        let req = dev.begin_io(req).unwrap();
        let StatData::SpecialStats(reply) = req.stat_data else {
            panic!("stat data replaced");
        };
        assert_eq!(reply.record_count_supplied(), 1);
        assert_eq!(reply.records[0].name, "TX Errors");
    }
}
