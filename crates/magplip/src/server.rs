//! The server task.
//!
//! One thread per loaded device owns the link. It serves the write queue, executes the commands
//! the dispatcher forwards (online, offline, configure) and hands received frames to waiting
//! readers. Clients only ever talk to it through the queues and its message channel.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use plipbox_proto::eth::{self, ETH_HDR_SIZE};
use tracing::{debug, info, trace, warn};

use crate::device::{DeviceFlags, Shared};
use crate::error::{LinkError, OpenError};
use crate::link::{LinkFactory, LinkParams, PlipLink};
use crate::request::{reply, IoRequest};
use crate::sana2::{Command, IoErr, IoFlags, Sana2Events, WireErr};
use crate::track::TrafficSample;

pub const SERVER_TASK_NAME: &str = "magplip.server";

/// Frames pulled from the link per loop iteration before the queues get another look.
pub const RX_BUDGET: usize = 16;

const STOP_ACK_TIMEOUT: Duration = Duration::from_secs(2);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);
const STOP_POLL_ATTEMPTS: u32 = 100;

#[derive(Debug)]
pub(crate) enum ServerMsg {
    /// New work is queued.
    Wake,
    /// A command the dispatcher does not answer itself.
    Forward(IoRequest),
    Stop,
}

#[derive(Debug)]
pub(crate) struct ServerHandle {
    tx: Sender<ServerMsg>,
    stopped: Receiver<()>,
    join: JoinHandle<()>,
}

impl ServerHandle {
    pub fn sender(&self) -> Sender<ServerMsg> {
        self.tx.clone()
    }

    /// Ask the task to stop and wait for it. If the acknowledgement never arrives, fall back to
    /// polling the server-stopped flag for a bounded time.
    pub fn stop(self, shared: &Shared) {
        let _ = self.tx.send(ServerMsg::Stop);
        let mut stopped = self.stopped.recv_timeout(STOP_ACK_TIMEOUT).is_ok();
        if !stopped {
            for _ in 0..STOP_POLL_ATTEMPTS {
                if shared.flags().contains(DeviceFlags::SERVERSTOPPED) || self.join.is_finished() {
                    stopped = true;
                    break;
                }
                thread::sleep(STOP_POLL_INTERVAL);
            }
        }
        if !stopped {
            warn!("server task did not stop, detaching it");
            return;
        }
        if self.join.join().is_err() {
            warn!("server task panicked");
        }
        debug!("server task has gone");
    }
}

/// Start the server task and block until it has opened the link (or failed to).
pub(crate) fn spawn(
    shared: Arc<Shared>,
    factory: LinkFactory,
    params: LinkParams,
) -> Result<ServerHandle, OpenError> {
    let (tx, rx) = mpsc::channel();
    let (startup_tx, startup_rx) = mpsc::sync_channel(1);
    let (stopped_tx, stopped_rx) = mpsc::sync_channel(1);

    let join = thread::Builder::new()
        .name(SERVER_TASK_NAME.to_string())
        .spawn(move || run(shared, factory, params, rx, startup_tx, stopped_tx))
        .map_err(OpenError::ServerSpawn)?;

    match startup_rx.recv() {
        Ok(Ok(())) => Ok(ServerHandle {
            tx,
            stopped: stopped_rx,
            join,
        }),
        Ok(Err(err)) => {
            let _ = join.join();
            Err(OpenError::ServerStartup(err))
        }
        Err(_) => {
            let _ = join.join();
            Err(OpenError::ServerVanished)
        }
    }
}

fn run(
    shared: Arc<Shared>,
    factory: LinkFactory,
    params: LinkParams,
    rx: Receiver<ServerMsg>,
    startup: SyncSender<Result<(), LinkError>>,
    stopped: SyncSender<()>,
) {
    let link = match factory(&params) {
        Ok(link) => link,
        Err(err) => {
            warn!(unit = params.unit, %err, "could not open link");
            let _ = startup.send(Err(err));
            return;
        }
    };
    shared.lock_unit().flags.remove(DeviceFlags::SERVERSTOPPED);
    info!(unit = params.unit, "server task running");
    let _ = startup.send(Ok(()));

    let poll = shared.config.poll_interval;
    let mut server = Server { shared, link };
    loop {
        match rx.recv_timeout(poll) {
            Ok(ServerMsg::Wake) | Err(RecvTimeoutError::Timeout) => {}
            Ok(ServerMsg::Forward(req)) => server.handle_forwarded(req),
            Ok(ServerMsg::Stop) | Err(RecvTimeoutError::Disconnected) => break,
        }
        server.service();
    }

    // Forwarded requests still in the channel are aborted along with the queues.
    let late: Vec<IoRequest> = rx
        .try_iter()
        .filter_map(|msg| match msg {
            ServerMsg::Forward(req) => Some(req),
            _ => None,
        })
        .collect();
    server.shutdown(late);
    let _ = stopped.send(());
}

struct Server {
    shared: Arc<Shared>,
    link: Box<dyn PlipLink>,
}

impl Server {
    fn handle_forwarded(&mut self, mut req: IoRequest) {
        debug!(id = req.id().get(), command = ?req.command, "server request");
        match req.command {
            Command::Online => {
                if let Err((error, wire)) = self.online() {
                    req.fail(error, wire);
                }
            }
            Command::Offline => self.offline(),
            Command::ConfigInterface => self.configure(&mut req),
            other => {
                warn!(command = ?other, "unexpected command forwarded to server");
                req.fail(IoErr::NotSupported, WireErr::GenericError);
            }
        }
        reply(req);
    }

    fn online(&mut self) -> Result<(), (IoErr, WireErr)> {
        let flags = self.shared.flags();
        if flags.contains(DeviceFlags::NOTCONFIGURED) {
            return Err((IoErr::BadState, WireErr::NotConfigured));
        }
        if !flags.contains(DeviceFlags::OFFLINE) {
            return Ok(());
        }
        if let Err(err) = self.link.go_online() {
            warn!(%err, "could not bring link online");
            self.fire_events(Sana2Events::ERROR | Sana2Events::HARDWARE);
            return Err((IoErr::OutOfService, err.wire_err()));
        }
        {
            let mut state = self.shared.lock_unit();
            state.flags.remove(DeviceFlags::OFFLINE);
            state.stats.last_start = Some(SystemTime::now());
        }
        info!("unit online");
        self.fire_events(Sana2Events::ONLINE);
        Ok(())
    }

    fn offline(&mut self) {
        {
            let mut state = self.shared.lock_unit();
            if state.flags.contains(DeviceFlags::OFFLINE) {
                return;
            }
            state.flags.insert(DeviceFlags::OFFLINE);
        }
        self.link.go_offline();
        info!("unit offline");

        let queues = &self.shared.queues;
        let pending = queues
            .write
            .drain()
            .into_iter()
            .chain(queues.read.drain())
            .chain(queues.orphan.drain());
        for mut req in pending {
            req.fail(IoErr::OutOfService, WireErr::UnitOffline);
            reply(req);
        }
        self.fire_events(Sana2Events::OFFLINE);
    }

    fn configure(&mut self, req: &mut IoRequest) {
        {
            let mut state = self.shared.lock_unit();
            if !state.flags.contains(DeviceFlags::NOTCONFIGURED) {
                req.fail(IoErr::BadState, WireErr::IsConfigured);
                return;
            }
            if !req.src_addr.is_zero() {
                state.addrs.src = req.src_addr;
            }
            req.src_addr = state.addrs.src;
            state.stats.reconfigurations = state.stats.reconfigurations.wrapping_add(1);
            state.flags.remove(DeviceFlags::NOTCONFIGURED);
        }
        info!(addr = %req.src_addr, "interface configured");
        if let Err((error, wire)) = self.online() {
            req.fail(error, wire);
        }
    }

    /// One pass over outgoing and incoming traffic.
    fn service(&mut self) {
        if self.shared.flags().contains(DeviceFlags::OFFLINE) {
            return;
        }
        while let Some(req) = self.shared.queues.write.pop_front() {
            self.write(req);
        }
        for _ in 0..RX_BUDGET {
            match self.link.recv_frame() {
                Ok(Some(frame)) => self.receive(&frame),
                Ok(None) => break,
                Err(err) => {
                    warn!(%err, "link failure while receiving");
                    self.offline();
                    self.fire_events(Sana2Events::ERROR | Sana2Events::HARDWARE);
                    break;
                }
            }
        }
    }

    fn write(&mut self, mut req: IoRequest) {
        let Some(bm) = req.buffer_management().cloned() else {
            req.fail(IoErr::BadArgument, WireErr::BuffError);
            reply(req);
            return;
        };

        let len = req.data.len();
        let src = self.shared.lock_unit().addrs.src;
        let dst = if req.command == Command::Broadcast {
            req.dst_addr = plipbox_proto::MacAddr::BROADCAST;
            plipbox_proto::MacAddr::BROADCAST
        } else {
            req.dst_addr
        };
        req.src_addr = src;

        let mut frame = vec![0u8; ETH_HDR_SIZE + len];
        eth::write_header(&mut frame, dst, src, req.packet_type as u16);
        if !bm.copy_from_buff(&mut frame[ETH_HDR_SIZE..], &req.data) {
            warn!(id = req.id().get(), "copy from buffer failed");
            req.fail(IoErr::NoResources, WireErr::BuffError);
            self.fire_events(Sana2Events::BUFF);
            reply(req);
            return;
        }

        match self.send_with_retries(&frame) {
            Ok(()) => {
                trace!(id = req.id().get(), len = frame.len(), %dst, "frame sent");
                let mut state = self.shared.lock_unit();
                state.stats.packets_sent = state.stats.packets_sent.wrapping_add(1);
                state
                    .tracker
                    .record(req.packet_type, TrafficSample::sent(len));
            }
            Err(err) => {
                warn!(id = req.id().get(), %err, "giving up on frame");
                self.shared.special.tx_error();
                self.shared
                    .lock_unit()
                    .tracker
                    .record(req.packet_type, TrafficSample::dropped());
                req.fail(IoErr::TxFailure, err.wire_err());
                self.fire_events(Sana2Events::ERROR | Sana2Events::TX);
            }
        }
        reply(req);
    }

    fn send_with_retries(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        let attempts = self.shared.config.retries.max(1);
        let mut last = LinkError::Timeout;
        for attempt in 1..=attempts {
            match self.link.send_frame(frame) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    if err == LinkError::Collision {
                        self.shared.special.collision();
                    }
                    debug!(attempt, %err, "send attempt failed");
                    if !err.is_transient() {
                        return Err(err);
                    }
                    last = err;
                }
            }
        }
        Err(last)
    }

    fn receive(&mut self, frame: &[u8]) {
        let (Some(ty), Some(dst), Some(src)) =
            (eth::frame_type(frame), eth::dst_mac(frame), eth::src_mac(frame))
        else {
            debug!(len = frame.len(), "runt frame");
            let mut state = self.shared.lock_unit();
            state.stats.bad_data = state.stats.bad_data.wrapping_add(1);
            return;
        };
        let ty = u32::from(ty);
        let payload_len = frame.len() - ETH_HDR_SIZE;
        {
            let mut state = self.shared.lock_unit();
            state.stats.packets_received = state.stats.packets_received.wrapping_add(1);
        }

        let queues = &self.shared.queues;
        let reader = match queues.read.take_first(|req| req.packet_type == ty) {
            Some(req) => Some(req),
            None => {
                let mut state = self.shared.lock_unit();
                state.stats.unknown_types_received =
                    state.stats.unknown_types_received.wrapping_add(1);
                drop(state);
                queues.orphan.pop_front()
            }
        };
        let Some(mut req) = reader else {
            trace!(ty, len = frame.len(), "no reader, dropping frame");
            self.shared
                .lock_unit()
                .tracker
                .record(ty, TrafficSample::dropped());
            return;
        };

        req.packet_type = ty;
        req.src_addr = src;
        req.dst_addr = dst;
        req.flags.set(IoFlags::BCAST, dst.is_broadcast());
        req.flags
            .set(IoFlags::MCAST, dst.is_multicast() && !dst.is_broadcast());

        let data = if req.flags.contains(IoFlags::RAW) {
            frame
        } else {
            &frame[ETH_HDR_SIZE..]
        };
        let bm = req.buffer_management().cloned();
        let copied = bm.is_some_and(|bm| bm.copy_to_buff(&mut req.data, data));
        if copied {
            trace!(id = req.id().get(), ty, len = data.len(), "frame delivered");
            self.shared
                .lock_unit()
                .tracker
                .record(ty, TrafficSample::received(payload_len));
        } else {
            warn!(id = req.id().get(), "copy to buffer failed");
            req.fail(IoErr::NoResources, WireErr::BuffError);
            self.fire_events(Sana2Events::BUFF);
        }
        reply(req);
    }

    /// Reply every event request waiting for any of `events`.
    fn fire_events(&self, events: Sana2Events) {
        while let Some(mut req) = self
            .shared
            .queues
            .event
            .take_first(|req| req.events.intersects(events))
        {
            req.events &= events;
            req.error = IoErr::NoError;
            reply(req);
        }
    }

    fn shutdown(mut self, late: Vec<IoRequest>) {
        self.shared
            .lock_unit()
            .flags
            .insert(DeviceFlags::SERVERSTOPPED | DeviceFlags::OFFLINE);
        for mut req in self.shared.queues.drain_all().into_iter().chain(late) {
            req.fail(IoErr::Aborted, WireErr::GenericError);
            reply(req);
        }
        self.link.go_offline();
        info!("server task stopped");
    }
}
