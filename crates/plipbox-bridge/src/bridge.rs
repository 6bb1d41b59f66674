//! Main loop for the transfer engine run modes.
//!
//! Frames from Ethernet that pass the filter are staged in the engine's packet buffer and the
//! peer is asked to pull them. Frames the peer pushes are transmitted on Ethernet. In
//! [`RunMode::BridgeTest`] the staged frames are UDP test datagrams and, in test mode 0, travel
//! through the Amiga driver's internal loopback tagged with [`ETH_TYPE_MAGIC_LOOPBACK`].

use plipbox_proto::eth::{self, ETH_TYPE_IPV4, ETH_TYPE_MAGIC_LOOPBACK};
use plipbox_proto::{PbCommand, PbStatus};
use tracing::{debug, info, trace, warn};

use crate::dump::{dump_frame, DumpDirs};
use crate::eth::EthernetController;
use crate::filter::{ForwardAll, FrameFilter, Verdict, FILTER_PEEK};
use crate::param::BridgeParams;
use crate::pbproto::{ExchangeResult, PacketHandler, PeerPort, TransferEngine};
use crate::stats::BridgeStats;
use crate::worker::{CommandWorker, RunMode, WorkerFlags};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    /// A frame waits in the packet buffer for the peer.
    PacketStaged,
    /// The loop has exited and waits for the command worker.
    AwaitingWorkerCommands,
}

pub struct BridgeLoop<C, P, W> {
    mode: RunMode,
    params: BridgeParams,
    controller: C,
    port: P,
    worker: W,
    engine: TransferEngine,
    filter: Box<dyn FrameFilter + Send>,
    staged: usize,
    state: LoopState,
    stats: BridgeStats,
}

impl<C, P, W> BridgeLoop<C, P, W>
where
    C: EthernetController,
    P: PeerPort,
    W: CommandWorker,
{
    /// Loop for [`RunMode::BridgeTest`]: only UDP test traffic is staged.
    pub fn bridge_test(params: BridgeParams, controller: C, port: P, worker: W) -> Self {
        let filter = Box::new(params.udp_test_filter());
        Self::with_mode(RunMode::BridgeTest, params, filter, controller, port, worker)
    }

    /// Loop for [`RunMode::Bridge`]: everything but locally handled frames is staged.
    pub fn bridge(params: BridgeParams, controller: C, port: P, worker: W) -> Self {
        Self::with_mode(RunMode::Bridge, params, Box::new(ForwardAll), controller, port, worker)
    }

    fn with_mode(
        mode: RunMode,
        params: BridgeParams,
        filter: Box<dyn FrameFilter + Send>,
        controller: C,
        port: P,
        worker: W,
    ) -> Self {
        Self {
            mode,
            params,
            controller,
            port,
            worker,
            engine: TransferEngine::default(),
            filter,
            staged: 0,
            state: LoopState::Idle,
            stats: BridgeStats::default(),
        }
    }

    pub fn with_filter(mut self, filter: Box<dyn FrameFilter + Send>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_engine(mut self, engine: TransferEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    /// Size of the frame waiting for the peer, 0 when none.
    pub fn staged_size(&self) -> usize {
        self.staged
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut C {
        &mut self.controller
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn worker(&self) -> &W {
        &self.worker
    }

    pub fn engine(&self) -> &TransferEngine {
        &self.engine
    }

    /// Run until the worker leaves this loop's mode or asks for a reset.
    pub fn run(&mut self) -> WorkerFlags {
        info!(mode = ?self.mode, "bridge loop on");
        self.stats.reset();
        self.state = LoopState::Idle;

        let mut result = WorkerFlags::empty();
        while self.worker.run_mode() == self.mode {
            result = self.worker.poll();
            if result.contains(WorkerFlags::RESET) {
                break;
            }
            self.step();
        }

        self.stats.dump_all();
        self.state = LoopState::AwaitingWorkerCommands;
        info!(mode = ?self.mode, "bridge loop off");
        result
    }

    /// One iteration without the worker poll: serve the peer, then the controller.
    pub fn step(&mut self) {
        let mut handler = LoopHandler {
            mode: self.mode,
            test_mode: self.params.test_mode,
            dump: self.params.dump_dirs,
            staged: &mut self.staged,
            controller: &mut self.controller,
            stats: &mut self.stats,
        };
        if let Some(result) = self.engine.handle(&mut self.port, &mut handler) {
            let streamed_in = result.command == Some(PbCommand::Send)
                && result.size > 0
                && result.status != PbStatus::PacketTooLarge;
            if streamed_in && self.staged != 0 {
                // The peer's frame went through the shared buffer.
                warn!(staged = self.staged, "staged frame overwritten by peer send");
                self.stats.overwrite += 1;
                self.staged = 0;
                self.engine.cancel_recv(&mut self.port);
            }
            self.account(result);
        }

        self.poll_controller();

        self.state = if self.staged != 0 {
            LoopState::PacketStaged
        } else {
            LoopState::Idle
        };
    }

    fn account(&mut self, result: ExchangeResult) {
        match (result.command, result.status) {
            (Some(PbCommand::Recv), PbStatus::Ok) => {
                self.stats.pb_recv += 1;
                self.stats.pb_recv_bytes += result.size as u64;
            }
            (Some(PbCommand::Send), _) if result.size > 0 => {
                self.stats.pb_send += 1;
                self.stats.pb_send_bytes += result.size as u64;
                if !result.status.is_ok() {
                    self.stats.pb_err += 1;
                }
            }
            (command, status) => {
                debug!(?command, status = status.to_u8(), "exchange failed");
                self.stats.pb_err += 1;
            }
        }
    }

    fn poll_controller(&mut self) {
        let Some(size) = self.controller.frame_available() else {
            return;
        };
        // The packet buffer belongs to the active exchange; the frame waits in the controller.
        let Ok(buf) = self.engine.buffer_mut() else {
            return;
        };
        let size = size as usize;
        self.stats.eth_rx += 1;
        self.stats.eth_rx_bytes += size as u64;

        if size > buf.len() {
            warn!(size, capacity = buf.len(), "eth frame too large, dropped");
            self.controller.finish_receive();
            self.stats.eth_dropped += 1;
            return;
        }
        // Classify from the header so a staged frame is only replaced by one that is forwarded.
        let mut head = [0u8; FILTER_PEEK];
        let head = &mut head[..size.min(FILTER_PEEK)];
        self.controller.receive_into(head);
        let verdict = self.filter.classify(head);
        if verdict == Verdict::Forward {
            self.controller.rewind_receive(0);
            self.controller.receive_into(&mut buf[..size]);
        }
        self.controller.finish_receive();
        if self.params.dump_dirs.contains(DumpDirs::ETH_RX) {
            let seen: &[u8] = if verdict == Verdict::Forward { &buf[..size] } else { &*head };
            dump_frame(DumpDirs::ETH_RX, seen);
        }

        match verdict {
            Verdict::Consume => {
                trace!(size, "frame handled locally");
                self.stats.eth_consumed += 1;
            }
            Verdict::Drop => {
                trace!(size, "frame filtered");
                self.stats.eth_dropped += 1;
            }
            Verdict::Forward => {
                if self.staged != 0 {
                    warn!(old = self.staged, new = size, "overwrite of staged frame");
                    self.stats.overwrite += 1;
                }
                self.staged = size;
                self.engine.request_recv(&mut self.port);
            }
        }
    }
}

/// Fill/process callbacks, borrowing the loop state the engine does not own.
struct LoopHandler<'a, C> {
    mode: RunMode,
    test_mode: u8,
    dump: DumpDirs,
    staged: &'a mut usize,
    controller: &'a mut C,
    stats: &'a mut BridgeStats,
}

impl<C: EthernetController> PacketHandler for LoopHandler<'_, C> {
    fn fill_packet(&mut self, buf: &mut [u8]) -> Result<usize, PbStatus> {
        let size = *self.staged;
        if size > buf.len() {
            return Err(PbStatus::PacketTooLarge);
        }
        if self.mode == RunMode::BridgeTest && self.test_mode == 0 {
            eth::set_frame_type(buf, ETH_TYPE_MAGIC_LOOPBACK);
        }
        *self.staged = 0;
        Ok(size)
    }

    fn process_packet(&mut self, buf: &mut [u8]) -> PbStatus {
        if self.mode == RunMode::BridgeTest {
            let ty = eth::frame_type(buf);
            if self.test_mode == 0 {
                if ty != Some(ETH_TYPE_MAGIC_LOOPBACK) {
                    warn!(?ty, "no magic on looped frame");
                    self.stats.no_magic += 1;
                    return PbStatus::Ok;
                }
                eth::set_frame_type(buf, ETH_TYPE_IPV4);
            } else if ty != Some(ETH_TYPE_IPV4) {
                warn!(?ty, "looped frame is not ipv4");
                self.stats.not_ipv4 += 1;
                return PbStatus::Ok;
            }
        }

        if self.dump.contains(DumpDirs::ETH_TX) {
            dump_frame(DumpDirs::ETH_TX, buf);
        }
        match self.controller.transmit(buf) {
            Ok(()) => {
                self.stats.eth_tx += 1;
                self.stats.eth_tx_bytes += buf.len() as u64;
                PbStatus::Ok
            }
            Err(err) => {
                warn!(%err, "eth transmit failed");
                self.stats.eth_tx_err += 1;
                PbStatus::LinkFault
            }
        }
    }
}
