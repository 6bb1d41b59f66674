use std::sync::atomic::{AtomicU32, Ordering};
use std::time::SystemTime;

use crate::sana2::S2_WIRETYPE_PLIP;

/// `Sana2DeviceStats`: global counters returned by `S2_GETGLOBALSTATS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceStats {
    pub packets_received: u32,
    pub packets_sent: u32,
    pub bad_data: u32,
    pub overruns: u32,
    pub unknown_types_received: u32,
    pub reconfigurations: u32,
    /// Time the unit last went online.
    pub last_start: Option<SystemTime>,
}

/// Special statistic type: frames given up on after all retries.
pub const S2SS_PLIP_TXERRORS: u32 = S2_WIRETYPE_PLIP << 16;
/// Special statistic type: both ends started a transfer at the same time.
pub const S2SS_PLIP_COLLISIONS: u32 = (S2_WIRETYPE_PLIP << 16) | 1;

/// Number of special statistics this driver exports.
pub const S2SS_COUNT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialStatRecord {
    pub stat_type: u32,
    pub count: u32,
    pub name: &'static str,
}

/// Reply payload for `S2_GETSPECIALSTATS`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecialStatsReply {
    /// Number of records the caller has room for.
    pub record_count_max: u32,
    pub records: Vec<SpecialStatRecord>,
}

impl SpecialStatsReply {
    pub fn with_capacity(record_count_max: u32) -> Self {
        Self {
            record_count_max,
            records: Vec::new(),
        }
    }

    pub fn record_count_supplied(&self) -> u32 {
        self.records.len() as u32
    }
}

/// Link level counters updated by the server task without taking the device lock.
#[derive(Debug, Default)]
pub struct SpecialStats {
    tx_errors: AtomicU32,
    collisions: AtomicU32,
}

impl SpecialStats {
    pub fn tx_error(&self) {
        self.tx_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn collision(&self) {
        self.collisions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tx_errors(&self) -> u32 {
        self.tx_errors.load(Ordering::Relaxed)
    }

    pub fn collisions(&self) -> u32 {
        self.collisions.load(Ordering::Relaxed)
    }

    pub fn records(&self) -> [SpecialStatRecord; S2SS_COUNT] {
        [
            SpecialStatRecord {
                stat_type: S2SS_PLIP_TXERRORS,
                count: self.tx_errors(),
                name: "TX Errors",
            },
            SpecialStatRecord {
                stat_type: S2SS_PLIP_COLLISIONS,
                count: self.collisions(),
                name: "Collisions",
            },
        ]
    }
}
