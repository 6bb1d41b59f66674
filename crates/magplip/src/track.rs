//! Per packet-type statistics (`S2_TRACKTYPE` and friends).

use std::collections::HashMap;

use crate::error::TrackError;

/// Upper bound on simultaneously tracked types.
pub const MAX_TRACKED_TYPES: usize = 64;

/// `Sana2PacketTypeStats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketTypeStats {
    pub packets_sent: u32,
    pub packets_received: u32,
    pub bytes_sent: u32,
    pub bytes_received: u32,
    pub packets_dropped: u32,
}

/// A single traffic observation folded into the tracked counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrafficSample {
    pub packets_sent: u32,
    pub packets_received: u32,
    pub bytes_sent: u32,
    pub bytes_received: u32,
    pub packets_dropped: u32,
}

impl TrafficSample {
    pub fn sent(bytes: usize) -> Self {
        Self {
            packets_sent: 1,
            bytes_sent: bytes as u32,
            ..Default::default()
        }
    }

    pub fn received(bytes: usize) -> Self {
        Self {
            packets_received: 1,
            bytes_received: bytes as u32,
            ..Default::default()
        }
    }

    pub fn dropped() -> Self {
        Self {
            packets_dropped: 1,
            ..Default::default()
        }
    }
}

#[derive(Debug)]
pub struct TypeTracker {
    entries: HashMap<u32, PacketTypeStats>,
    capacity: usize,
}

impl Default for TypeTracker {
    fn default() -> Self {
        Self::with_capacity(MAX_TRACKED_TYPES)
    }
}

impl TypeTracker {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
        }
    }

    pub fn track(&mut self, ty: u32) -> Result<(), TrackError> {
        if self.entries.contains_key(&ty) {
            return Err(TrackError::AlreadyTracked(ty));
        }
        if self.entries.len() >= self.capacity {
            return Err(TrackError::NoResources {
                capacity: self.capacity,
            });
        }
        self.entries.insert(ty, PacketTypeStats::default());
        Ok(())
    }

    pub fn untrack(&mut self, ty: u32) -> Result<(), TrackError> {
        self.entries
            .remove(&ty)
            .map(|_| ())
            .ok_or(TrackError::NotTracked(ty))
    }

    pub fn stats(&self, ty: u32) -> Result<PacketTypeStats, TrackError> {
        self.entries
            .get(&ty)
            .copied()
            .ok_or(TrackError::NotTracked(ty))
    }

    /// Fold `sample` into the counters of `ty`. Untracked types are ignored.
    pub fn record(&mut self, ty: u32, sample: TrafficSample) {
        let Some(stats) = self.entries.get_mut(&ty) else {
            return;
        };
        stats.packets_sent = stats.packets_sent.wrapping_add(sample.packets_sent);
        stats.packets_received = stats.packets_received.wrapping_add(sample.packets_received);
        stats.bytes_sent = stats.bytes_sent.wrapping_add(sample.bytes_sent);
        stats.bytes_received = stats.bytes_received.wrapping_add(sample.bytes_received);
        stats.packets_dropped = stats.packets_dropped.wrapping_add(sample.packets_dropped);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entry_reports_zero() {
        let mut tracker = TypeTracker::default();
        tracker.track(0x0800).unwrap();
        assert_eq!(tracker.stats(0x0800), Ok(PacketTypeStats::default()));
    }

    #[test]
    fn duplicate_and_missing_types_are_state_errors() {
        let mut tracker = TypeTracker::default();
        tracker.track(0x0806).unwrap();
        assert_eq!(tracker.track(0x0806), Err(TrackError::AlreadyTracked(0x0806)));
        assert_eq!(tracker.untrack(0x0800), Err(TrackError::NotTracked(0x0800)));
        assert_eq!(tracker.stats(0x0800), Err(TrackError::NotTracked(0x0800)));

        tracker.untrack(0x0806).unwrap();
        assert!(tracker.is_empty());
        assert_eq!(tracker.untrack(0x0806), Err(TrackError::NotTracked(0x0806)));
    }

    #[test]
    fn capacity_is_enforced() {
        let mut tracker = TypeTracker::with_capacity(2);
        tracker.track(1).unwrap();
        tracker.track(2).unwrap();
        assert_eq!(tracker.track(3), Err(TrackError::NoResources { capacity: 2 }));
        tracker.untrack(1).unwrap();
        tracker.track(3).unwrap();
    }

    #[test]
    fn samples_accumulate_only_for_tracked_types() {
        let mut tracker = TypeTracker::default();
        tracker.track(0x0800).unwrap();

        tracker.record(0x0800, TrafficSample::sent(100));
        tracker.record(0x0800, TrafficSample::sent(20));
        tracker.record(0x0800, TrafficSample::received(64));
        tracker.record(0x0800, TrafficSample::dropped());
        tracker.record(0x86dd, TrafficSample::sent(1000));

        assert_eq!(
            tracker.stats(0x0800).unwrap(),
            PacketTypeStats {
                packets_sent: 2,
                packets_received: 1,
                bytes_sent: 120,
                bytes_received: 64,
                packets_dropped: 1,
            }
        );
        assert_eq!(tracker.len(), 1);
    }
}
