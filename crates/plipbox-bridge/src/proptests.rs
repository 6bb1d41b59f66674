use plipbox_proto::{PbCommand, PbStatus, PlipStatus};
use proptest::prelude::*;

use crate::eth::{EthernetController, MemoryController};
use crate::pbproto::{PacketHandler, TransferEngine};
use crate::peer::LoopbackPeer;
use crate::plip_tx::{CapturingSender, SendWorker, PLIP_TX_RETRIES};

struct Sink {
    staged: usize,
    processed: Vec<Vec<u8>>,
}

impl PacketHandler for Sink {
    fn fill_packet(&mut self, _buf: &mut [u8]) -> Result<usize, PbStatus> {
        Ok(std::mem::take(&mut self.staged))
    }

    fn process_packet(&mut self, buf: &mut [u8]) -> PbStatus {
        self.processed.push(buf.to_vec());
        PbStatus::Ok
    }
}

fn drive(engine: &mut TransferEngine, peer: &mut LoopbackPeer, sink: &mut Sink) -> PbStatus {
    // Chunked transfers finish well within one poll per byte.
    for _ in 0..=crate::PKT_BUF_SIZE {
        if let Some(result) = engine.handle(peer, sink) {
            return result.status;
        }
    }
    PbStatus::Timeout
}

proptest! {
    #[test]
    fn chunked_recv_delivers_exact_bytes(
        frame in proptest::collection::vec(any::<u8>(), 1..=crate::PKT_BUF_SIZE),
        chunk in 1usize..256,
        stall in 0u32..8,
    ) {
        let mut engine = TransferEngine::default();
        let mut peer = LoopbackPeer::new().with_chunk(chunk);
        let mut sink = Sink { staged: frame.len(), processed: Vec::new() };
        engine.buffer_mut().unwrap()[..frame.len()].copy_from_slice(&frame);
        engine.request_recv(&mut peer);
        peer.stall_for(stall);

        prop_assert_eq!(drive(&mut engine, &mut peer, &mut sink), PbStatus::Ok);
        prop_assert_eq!(peer.received(), &[frame][..]);
        prop_assert!(!engine.is_busy());
        prop_assert!(!engine.recv_requested());
    }

    #[test]
    fn chunked_send_reaches_process_once(
        frame in proptest::collection::vec(any::<u8>(), 1..=crate::PKT_BUF_SIZE),
        chunk in 1usize..256,
    ) {
        let mut engine = TransferEngine::default();
        let mut peer = LoopbackPeer::new().with_chunk(chunk);
        let mut sink = Sink { staged: 0, processed: Vec::new() };
        peer.queue_send(frame.clone());

        prop_assert_eq!(drive(&mut engine, &mut peer, &mut sink), PbStatus::Ok);
        prop_assert_eq!(sink.processed, vec![frame]);
    }

    #[test]
    fn recv_before_request_never_fills(extra in proptest::collection::vec(Just(PbCommand::Recv.to_u8()), 1..8)) {
        let mut engine = TransferEngine::default();
        let mut peer = LoopbackPeer::new();
        let mut sink = Sink { staged: 99, processed: Vec::new() };
        for byte in &extra {
            peer.queue_command(*byte);
        }
        for _ in 0..extra.len() {
            prop_assert_eq!(drive(&mut engine, &mut peer, &mut sink), PbStatus::NotReady);
        }
        prop_assert_eq!(sink.staged, 99);
    }

    #[test]
    fn send_worker_retry_counter(failures in 0usize..10, link in proptest::collection::vec(any::<bool>(), 12)) {
        let frame: Vec<u8> = (0..64).collect();
        let mut eth = MemoryController::default();
        eth.inject(frame.clone());
        let mut head = [0u8; 14];
        eth.receive_into(&mut head);

        let mut sender = CapturingSender::new();
        sender.fail_next(std::iter::repeat(PlipStatus::Timeout(0)).take(failures));
        let mut worker = SendWorker::default();

        let mut expected = if worker.send(&mut sender, &head, &mut eth, 0, 14, 64).is_ok() {
            0
        } else {
            PLIP_TX_RETRIES
        };
        prop_assert_eq!(worker.retries_left(), expected);

        for up in link {
            let status = worker.retry_worker(up, &mut sender, &head, &mut eth);
            if up && expected > 0 {
                let status = status.unwrap();
                expected = if status.is_ok() { 0 } else { expected - 1 };
            } else {
                prop_assert!(status.is_none());
            }
            prop_assert_eq!(worker.retries_left(), expected);
        }

        if let Some((_, payload)) = sender.packets().first() {
            prop_assert_eq!(payload, &frame);
        }
    }
}
