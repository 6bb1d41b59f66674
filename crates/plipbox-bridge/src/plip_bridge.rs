//! Push-style forwarding loop: Ethernet frames are sent to the Amiga as PLIP packets.
//!
//! Only the header is copied into the packet buffer for filtering; the rest of the frame is
//! streamed from the controller during the send. A frame whose send failed stays in the
//! controller until a retry succeeds or the retries run out.

use tracing::{debug, info, trace, warn};

use crate::dump::{dump_frame, DumpDirs};
use crate::eth::EthernetController;
use crate::filter::{ForwardAll, FrameFilter, Verdict, FILTER_PEEK};
use crate::param::BridgeParams;
use crate::plip_tx::{PlipSender, SendWorker};
use crate::stats::BridgeStats;
use crate::worker::{CommandWorker, RunMode, WorkerFlags};

pub struct PlipBridge<C, S> {
    controller: C,
    sender: S,
    worker: SendWorker,
    head: Vec<u8>,
    filter: Box<dyn FrameFilter + Send>,
    dump: DumpDirs,
    link_up: bool,
    stats: BridgeStats,
}

impl<C: EthernetController, S: PlipSender> PlipBridge<C, S> {
    pub fn new(params: &BridgeParams, controller: C, sender: S) -> Self {
        Self {
            controller,
            sender,
            worker: SendWorker::new(params.dump_dirs, params.dump_plip),
            head: Vec::with_capacity(FILTER_PEEK),
            filter: Box::new(ForwardAll),
            dump: params.dump_dirs,
            link_up: true,
            stats: BridgeStats::default(),
        }
    }

    pub fn with_filter(mut self, filter: Box<dyn FrameFilter + Send>) -> Self {
        self.filter = filter;
        self
    }

    /// PLIP link state as reported by the line driver.
    pub fn set_link_up(&mut self, up: bool) {
        if up != self.link_up {
            info!(up, "plip link state changed");
        }
        self.link_up = up;
    }

    pub fn link_up(&self) -> bool {
        self.link_up
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    pub fn send_worker(&self) -> &SendWorker {
        &self.worker
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut C {
        &mut self.controller
    }

    pub fn sender(&self) -> &S {
        &self.sender
    }

    pub fn sender_mut(&mut self) -> &mut S {
        &mut self.sender
    }

    pub fn run<W: CommandWorker>(&mut self, worker: &mut W) -> WorkerFlags {
        info!("plip bridge on");
        self.stats.reset();

        let mut result = WorkerFlags::empty();
        while worker.run_mode() == RunMode::PlipBridge {
            result = worker.poll();
            if result.contains(WorkerFlags::RESET) {
                break;
            }
            self.step();
        }

        self.stats.dump_all();
        info!("plip bridge off");
        result
    }

    pub fn step(&mut self) {
        if let Some(status) =
            self.worker
                .retry_worker(self.link_up, &mut self.sender, &self.head, &mut self.controller)
        {
            if status.is_ok() {
                self.stats.plip_tx += 1;
                self.stats.plip_retry_ok += 1;
                self.controller.finish_receive();
            } else {
                self.stats.plip_tx_err += 1;
                if !self.worker.is_pending() {
                    warn!("plip tx: giving up on frame");
                    self.stats.plip_dropped += 1;
                    self.controller.finish_receive();
                }
            }
            return;
        }
        if self.worker.is_pending() {
            // Link is down; hold the frame for the next retry.
            return;
        }

        let Some(size) = self.controller.frame_available() else {
            return;
        };
        self.stats.eth_rx += 1;
        self.stats.eth_rx_bytes += u64::from(size);

        let peek = usize::from(size).min(FILTER_PEEK);
        self.head.clear();
        self.head.resize(peek, 0);
        self.controller.receive_into(&mut self.head);
        if self.dump.contains(DumpDirs::ETH_RX) {
            dump_frame(DumpDirs::ETH_RX, &self.head);
        }

        match self.filter.classify(&self.head) {
            Verdict::Consume => {
                trace!(size, "frame handled locally");
                self.stats.eth_consumed += 1;
                self.controller.finish_receive();
            }
            Verdict::Drop => {
                trace!(size, "frame filtered");
                self.stats.eth_dropped += 1;
                self.controller.finish_receive();
            }
            Verdict::Forward if !self.link_up => {
                debug!(size, "plip link down, frame dropped");
                self.stats.plip_dropped += 1;
                self.controller.finish_receive();
            }
            Verdict::Forward => {
                let status = self.worker.send(
                    &mut self.sender,
                    &self.head,
                    &mut self.controller,
                    0,
                    peek,
                    size,
                );
                if status.is_ok() {
                    self.stats.plip_tx += 1;
                    self.controller.finish_receive();
                } else {
                    self.stats.plip_tx_err += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eth::MemoryController;
    use crate::plip_tx::{CapturingSender, PLIP_TX_RETRIES};
    use plipbox_proto::PlipStatus;

    fn bridge() -> PlipBridge<MemoryController, CapturingSender> {
        PlipBridge::new(
            &BridgeParams::default(),
            MemoryController::default(),
            CapturingSender::new(),
        )
    }

    fn ipv4_frame(len: usize, fill: u8) -> Vec<u8> {
        let mut frame = vec![fill; len];
        frame[12] = 0x08;
        frame[13] = 0x00;
        frame
    }

    #[test]
    fn frames_are_pushed_whole() {
        let mut pb = bridge();
        let frame = ipv4_frame(100, 0x33);
        pb.controller_mut().inject(frame.clone());
        pb.step();
        assert_eq!(pb.sender().packets()[0].1, frame);
        assert_eq!(pb.controller().pending_rx(), 0);
        assert_eq!(pb.stats().plip_tx, 1);
    }

    #[test]
    fn failed_frame_is_retried_before_the_next_one() {
        let mut pb = bridge();
        let first = ipv4_frame(80, 1);
        let second = ipv4_frame(70, 2);
        pb.controller_mut().inject(first.clone());
        pb.controller_mut().inject(second.clone());
        pb.sender_mut().fail_next([PlipStatus::Timeout(2), PlipStatus::Timeout(2)]);

        pb.step();
        assert_eq!(pb.send_worker().retries_left(), PLIP_TX_RETRIES);
        pb.step();
        assert_eq!(pb.send_worker().retries_left(), PLIP_TX_RETRIES - 1);
        pb.step();
        assert!(!pb.send_worker().is_pending());
        pb.step();

        let payloads: Vec<_> = pb.sender().packets().iter().map(|(_, p)| p.clone()).collect();
        assert_eq!(payloads, vec![first, second]);
        assert_eq!(pb.stats().plip_retry_ok, 1);
        assert_eq!(pb.stats().plip_tx_err, 2);
    }

    #[test]
    fn frame_is_dropped_when_retries_run_out() {
        let mut pb = bridge();
        pb.controller_mut().inject(ipv4_frame(64, 9));
        pb.sender_mut().fail_next([PlipStatus::Idle; 1 + PLIP_TX_RETRIES as usize]);

        for _ in 0..=PLIP_TX_RETRIES {
            pb.step();
        }
        assert_eq!(pb.stats().plip_dropped, 1);
        assert_eq!(pb.controller().pending_rx(), 0);
        assert!(pb.sender().packets().is_empty());
    }

    #[test]
    fn link_down_holds_pending_frame() {
        let mut pb = bridge();
        let frame = ipv4_frame(64, 4);
        pb.controller_mut().inject(frame.clone());
        pb.sender_mut().fail_next([PlipStatus::LostSelect]);
        pb.step();

        pb.set_link_up(false);
        for _ in 0..10 {
            pb.step();
        }
        assert_eq!(pb.send_worker().retries_left(), PLIP_TX_RETRIES);
        assert_eq!(pb.controller().pending_rx(), 1);

        pb.set_link_up(true);
        pb.step();
        assert_eq!(pb.sender().packets()[0].1, frame);
    }

    #[test]
    fn arp_never_reaches_plip() {
        let mut pb = bridge();
        let mut arp = vec![0u8; 42];
        arp[12] = 0x08;
        arp[13] = 0x06;
        pb.controller_mut().inject(arp);
        pb.step();
        assert_eq!(pb.sender().attempts(), 0);
        assert_eq!(pb.stats().eth_consumed, 1);
    }
}
