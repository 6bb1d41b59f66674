#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::net::Ipv4Addr;

use anyhow::{ensure, Context};
use clap::{Parser, ValueEnum};
use plipbox_bridge::filter::udp_frame;
use plipbox_bridge::{
    BridgeLoop, BridgeParams, CapturingSender, DumpDirs, EthError, EthernetController,
    LoopbackPeer, MemoryController, PlipBridge, RunMode, ScriptedExit, ScriptedWorker,
    WorkerFlags,
};
use plipbox_proto::eth::{self, ETH_TYPE_ARP};
use plipbox_proto::{MacAddr, PlipStatus};
use tracing_subscriber::EnvFilter;

const HOST_MAC: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
const HOST_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 2, 1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    BridgeTest,
    Bridge,
    Plip,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "plipbox-sim", version, about)]
struct Args {
    /// Loop to run.
    #[arg(long, value_enum, default_value = "bridge-test")]
    mode: Mode,

    /// Number of test frames to feed through the bridge.
    #[arg(long, default_value_t = 16)]
    frames: usize,

    /// Controller polls between two arriving frames.
    #[arg(long, default_value_t = 8)]
    gap: u32,

    /// Largest number of bytes the simulated Amiga moves per data call.
    #[arg(long, default_value_t = 64)]
    chunk: usize,

    /// Worker polls before the loop is reset. Defaults to enough for all frames.
    #[arg(long)]
    polls: Option<u64>,

    /// PLIP sends that fail before the link starts accepting packets (plip mode).
    #[arg(long, default_value_t = 0)]
    plip_failures: usize,

    /// Seed for frame sizes.
    #[arg(long, default_value_t = 0x9e37_79b9_7f4a_7c15)]
    seed: u64,

    /// Bridge MAC address.
    ///
    /// Environment variable: `PLIPBOX_MAC`.
    #[arg(long, env = "PLIPBOX_MAC")]
    mac: Option<MacAddr>,

    /// 0 loops through the driver's internal loopback, anything else expects plain IPv4 back.
    ///
    /// Environment variable: `PLIPBOX_TEST_MODE`.
    #[arg(long, env = "PLIPBOX_TEST_MODE")]
    test_mode: Option<u8>,

    /// Destination address of UDP test traffic.
    ///
    /// Environment variable: `PLIPBOX_TEST_IP`.
    #[arg(long, env = "PLIPBOX_TEST_IP")]
    test_ip: Option<Ipv4Addr>,

    /// Destination port of UDP test traffic.
    ///
    /// Environment variable: `PLIPBOX_TEST_PORT`.
    #[arg(long, env = "PLIPBOX_TEST_PORT")]
    test_port: Option<u16>,

    /// Frame dump directions: `eth_rx`, `eth_tx`, `plip_rx`, `plip_tx`, `all`.
    ///
    /// Environment variable: `PLIPBOX_DUMP`.
    #[arg(long, env = "PLIPBOX_DUMP")]
    dump: Option<DumpDirs>,

    /// Log filter (tracing-subscriber EnvFilter syntax), used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn params(&self) -> anyhow::Result<BridgeParams> {
        let mut params = BridgeParams::from_env().context("invalid PLIPBOX_* environment")?;
        if let Some(mac) = self.mac {
            params.mac = mac;
        }
        if let Some(test_mode) = self.test_mode {
            params.test_mode = test_mode;
        }
        if let Some(ip) = self.test_ip {
            params.test_ip = ip;
        }
        if let Some(port) = self.test_port {
            params.test_port = port;
        }
        if let Some(dump) = self.dump {
            params.dump_dirs = dump;
        }
        Ok(params)
    }
}

/// Releases frames into the controller one at a time, `gap` polls apart.
struct PacedController {
    inner: MemoryController,
    backlog: VecDeque<Vec<u8>>,
    gap: u32,
    idle: u32,
}

impl PacedController {
    fn new(frames: Vec<Vec<u8>>, gap: u32) -> Self {
        Self {
            inner: MemoryController::default(),
            backlog: frames.into(),
            gap,
            idle: gap,
        }
    }
}

impl EthernetController for PacedController {
    fn frame_available(&mut self) -> Option<u16> {
        if self.inner.pending_rx() == 0 {
            self.idle += 1;
            if self.idle >= self.gap {
                if let Some(frame) = self.backlog.pop_front() {
                    self.inner.inject(frame);
                    self.idle = 0;
                }
            }
        }
        self.inner.frame_available()
    }

    fn receive_byte(&mut self) -> u8 {
        self.inner.receive_byte()
    }

    fn rewind_receive(&mut self, offset: u16) {
        self.inner.rewind_receive(offset)
    }

    fn finish_receive(&mut self) {
        self.inner.finish_receive()
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<(), EthError> {
        self.inner.transmit(frame)
    }
}

/// Test datagrams, each preceded by an ARP request the bridge answers itself.
fn traffic(params: &BridgeParams, count: usize, seed: u64) -> (Vec<Vec<u8>>, Vec<Vec<u8>>) {
    let mut state = seed.max(1);
    let mut frames = Vec::with_capacity(count * 2);
    let mut expected = Vec::with_capacity(count);
    for i in 0..count {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let len = 18 + (state % 1400) as usize;
        let payload: Vec<u8> = (0..len).map(|j| (i ^ j) as u8).collect();

        let mut arp = vec![0u8; 42];
        eth::write_header(&mut arp, MacAddr::BROADCAST, HOST_MAC, ETH_TYPE_ARP);
        frames.push(arp);

        let frame = udp_frame(
            params.mac,
            HOST_MAC,
            HOST_IP,
            params.test_ip,
            params.test_port,
            &payload,
        );
        frames.push(frame.clone());
        expected.push(frame);
    }
    (frames, expected)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let params = args.params()?;
    tracing::info!(
        mode = ?args.mode,
        mac = %params.mac,
        test_mode = params.test_mode,
        test_ip = %params.test_ip,
        test_port = params.test_port,
        "plipbox-sim starting"
    );

    let (frames, expected) = traffic(&params, args.frames, args.seed);
    let polls = args
        .polls
        .unwrap_or((frames.len() as u64 + 1) * (u64::from(args.gap) + 4) + 64);
    let controller = PacedController::new(frames, args.gap.max(1));

    match args.mode {
        Mode::BridgeTest | Mode::Bridge => {
            let mode = if args.mode == Mode::Bridge {
                RunMode::Bridge
            } else {
                RunMode::BridgeTest
            };
            let worker = ScriptedWorker::new(mode)
                .exit_after(polls, ScriptedExit::Flags(WorkerFlags::RESET));
            let peer = LoopbackPeer::new().with_echo(true).with_chunk(args.chunk);
            let mut bl = if mode == RunMode::Bridge {
                BridgeLoop::bridge(params, controller, peer, worker)
            } else {
                BridgeLoop::bridge_test(params, controller, peer, worker)
            };

            let flags = bl.run();
            let looped = bl.controller().inner.transmitted();
            tracing::info!(
                ?flags,
                sent = expected.len(),
                looped = looped.len(),
                overwrites = bl.stats().overwrite,
                "loop finished"
            );
            ensure!(
                looped == &expected[..],
                "{} of {} test frames came back intact",
                looped.iter().filter(|f| expected.contains(f)).count(),
                expected.len()
            );
        }
        Mode::Plip => {
            let mut sender = CapturingSender::new();
            sender.fail_next(std::iter::repeat(PlipStatus::Timeout(1)).take(args.plip_failures));
            let mut pb = PlipBridge::new(&params, controller, sender)
                .with_filter(Box::new(params.udp_test_filter()));
            let mut worker = ScriptedWorker::new(RunMode::PlipBridge)
                .exit_after(polls, ScriptedExit::Flags(WorkerFlags::RESET));

            let flags = pb.run(&mut worker);
            let delivered: Vec<&Vec<u8>> = pb.sender().packets().iter().map(|(_, p)| p).collect();
            tracing::info!(
                ?flags,
                sent = expected.len(),
                delivered = delivered.len(),
                retries_ok = pb.stats().plip_retry_ok,
                dropped = pb.stats().plip_dropped,
                "plip bridge finished"
            );
            ensure!(
                delivered.iter().all(|p| expected.contains(*p)),
                "plip bridge delivered a frame that was never sent"
            );
        }
    }

    Ok(())
}
