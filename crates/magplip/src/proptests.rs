use std::collections::HashSet;

use crate::error::TrackError;
use crate::sana2::{DeviceQuery, S2_WIRETYPE_PLIP};
use crate::track::{PacketTypeStats, TrafficSample, TypeTracker};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum TrackOp {
    Track(u32),
    Untrack(u32),
    Record(u32),
}

fn track_op_strategy() -> impl Strategy<Value = TrackOp> {
    // A small type space makes duplicates and misses common.
    let ty = 0u32..8;
    prop_oneof![
        ty.clone().prop_map(TrackOp::Track),
        ty.clone().prop_map(TrackOp::Untrack),
        ty.prop_map(TrackOp::Record),
    ]
}

proptest! {
    #[test]
    fn device_query_never_writes_past_the_declared_size(size in 0u32..64, mtu in 576u32..=1500, bps in 1u32..10_000_000) {
        let mut query = DeviceQuery::with_size(size);
        query.fill(mtu, bps);

        prop_assert_eq!(query.size_supplied, size.min(DeviceQuery::FULL_SIZE));
        prop_assert_eq!(query.addr_field_size.is_some(), size >= DeviceQuery::END_ADDR_FIELD_SIZE);
        prop_assert_eq!(query.mtu, (size >= DeviceQuery::END_MTU).then_some(mtu));
        prop_assert_eq!(query.bps, (size >= DeviceQuery::END_BPS).then_some(bps));
        prop_assert_eq!(
            query.hardware_type,
            (size >= DeviceQuery::END_HARDWARE_TYPE).then_some(S2_WIRETYPE_PLIP)
        );
    }

    #[test]
    fn tracker_matches_set_model(ops in proptest::collection::vec(track_op_strategy(), 0..128)) {
        const CAPACITY: usize = 4;
        let mut tracker = TypeTracker::with_capacity(CAPACITY);
        let mut model: HashSet<u32> = HashSet::new();

        for op in ops {
            match op {
                TrackOp::Track(ty) => {
                    let expected = if model.contains(&ty) {
                        Err(TrackError::AlreadyTracked(ty))
                    } else if model.len() >= CAPACITY {
                        Err(TrackError::NoResources { capacity: CAPACITY })
                    } else {
                        model.insert(ty);
                        Ok(())
                    };
                    prop_assert_eq!(tracker.track(ty), expected);
                }
                TrackOp::Untrack(ty) => {
                    let expected = if model.remove(&ty) {
                        Ok(())
                    } else {
                        Err(TrackError::NotTracked(ty))
                    };
                    prop_assert_eq!(tracker.untrack(ty), expected);
                }
                TrackOp::Record(ty) => {
                    let before = tracker.stats(ty).ok();
                    tracker.record(ty, TrafficSample::received(10));
                    match before {
                        Some(stats) => prop_assert_eq!(
                            tracker.stats(ty).unwrap(),
                            PacketTypeStats {
                                packets_received: stats.packets_received + 1,
                                bytes_received: stats.bytes_received + 10,
                                ..stats
                            }
                        ),
                        None => prop_assert!(tracker.stats(ty).is_err()),
                    }
                }
            }
            prop_assert_eq!(tracker.len(), model.len());
        }
    }
}
