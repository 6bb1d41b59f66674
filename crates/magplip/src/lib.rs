//! Host side of the PLIP link: a SANA-II style network device.
//!
//! Clients open the device, then move [`IoRequest`]s through [`Device::begin_io`]. Cheap
//! commands (queries, statistics, type tracking) are answered immediately; reads, writes and
//! event subscriptions wait in per-kind queues; online/offline/configure are executed by a
//! background server task that owns the [`PlipLink`].
//!
//! - [`Device`]: open/close/expunge and the command dispatcher
//! - [`RequestQueues`]: pending read, write, event and orphan-read requests
//! - [`PlipLink`]: the wire below the server task, with an in-memory [`ChannelLink`]
//! - [`DeviceConfig`]: MTU, retries and timeouts, parsed from a config line
#![forbid(unsafe_code)]

pub mod buffer;
pub mod config;
pub mod device;
pub mod error;
pub mod link;
pub mod queue;
pub mod request;
pub mod sana2;
mod server;
pub mod stats;
pub mod track;
pub mod wiring;

pub use buffer::{BufferId, BufferManagement, BufferTags, CopyFromBuff, CopyToBuff};
pub use config::DeviceConfig;
pub use device::{AbortOutcome, CloseOutcome, Device, DeviceFlags, ExpungeStatus};
pub use error::{ConfigError, LinkError, OpenError, TrackError};
pub use link::{ChannelLink, LinkFactory, LinkParams, PlipLink};
pub use queue::{QueueKind, RequestQueue, RequestQueues};
pub use request::{IoRequest, RequestId, StatData};
pub use sana2::{Command, DeviceQuery, IoErr, IoFlags, OpenFlags, Sana2Events, WireErr};
pub use server::SERVER_TASK_NAME;
pub use stats::{DeviceStats, SpecialStatRecord, SpecialStats, SpecialStatsReply};
pub use track::{PacketTypeStats, TypeTracker};

#[cfg(test)]
mod proptests;
