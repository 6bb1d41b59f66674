//! Model of the plipbox bridge firmware.
//!
//! The bridge sits between an Ethernet controller and the Amiga's parallel port. It runs one of
//! several loops, chosen by the console's run mode:
//!
//! - [`BridgeLoop`]: the Amiga pulls staged frames and pushes its own through the
//!   [`TransferEngine`]; used for production bridging and for the UDP loopback test
//! - [`PlipBridge`]: frames are pushed to the Amiga as PLIP packets by the [`SendWorker`], which
//!   retries failed sends a bounded number of times
//!
//! Hardware is reached through the [`EthernetController`], [`PeerPort`] and [`PlipSender`]
//! traits; in-memory implementations back the tests and the simulator.
#![forbid(unsafe_code)]

pub mod bridge;
pub mod dump;
pub mod eth;
pub mod filter;
pub mod param;
pub mod pbproto;
pub mod peer;
pub mod plip_bridge;
pub mod plip_tx;
pub mod stats;
pub mod worker;

pub use bridge::{BridgeLoop, LoopState};
pub use dump::DumpDirs;
pub use eth::{EthError, EthernetController, MemoryController};
pub use filter::{ForwardAll, FrameFilter, UdpTestFilter, Verdict};
pub use param::{BridgeParams, ParamError};
pub use pbproto::{
    EngineBusy, ExchangeResult, PacketHandler, PeerPort, PortError, TransferEngine, PKT_BUF_SIZE,
};
pub use peer::LoopbackPeer;
pub use plip_bridge::PlipBridge;
pub use plip_tx::{ByteSource, CapturingSender, PlipSender, SendWorker, PLIP_TX_RETRIES};
pub use stats::BridgeStats;
pub use worker::{CommandWorker, RunMode, ScriptedExit, ScriptedWorker, WorkerFlags};

#[cfg(test)]
mod proptests;
