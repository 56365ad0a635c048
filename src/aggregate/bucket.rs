use std::collections::BTreeMap;

use crate::model::{Approach, CountedEvent, VehicleClass};

/// Per-hour accumulator. Counts are kept per class and approach so the
/// hourly table can break them down; charts read the approach totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HourBucket {
    counts: [[u64; 4]; 4],
}

impl HourBucket {
    pub(crate) fn record(&mut self, class: VehicleClass, approach: Approach) {
        self.counts[class.index()][approach.index()] += 1;
    }

    /// Count for an approach summed over every recorded class.
    pub fn approach(&self, approach: Approach) -> u64 {
        self.counts.iter().map(|row| row[approach.index()]).sum()
    }

    pub fn class_approach(&self, class: VehicleClass, approach: Approach) -> u64 {
        self.counts[class.index()][approach.index()]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }
}

/// Hour-of-day → bucket. Buckets appear on first contribution and are never
/// removed while a scope is bound.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketState {
    hours: BTreeMap<u8, HourBucket>,
}

impl BucketState {
    pub(crate) fn record(&mut self, event: &CountedEvent) {
        self.hours
            .entry(event.hour())
            .or_default()
            .record(event.class, event.approach);
    }

    pub(crate) fn clear(&mut self) {
        self.hours.clear();
    }

    pub fn get(&self, hour: u8) -> Option<&HourBucket> {
        self.hours.get(&hour)
    }

    /// Buckets in ascending hour order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &HourBucket)> + '_ {
        self.hours.iter().map(|(h, b)| (*h, b))
    }

    pub fn is_empty(&self) -> bool {
        self.hours.is_empty()
    }

    /// Number of events recorded across all buckets.
    pub fn total(&self) -> u64 {
        self.hours.values().map(HourBucket::total).sum()
    }
}
