use chrono::{DateTime, FixedOffset, TimeDelta};
use std::collections::HashMap;

use crate::model::CountedEvent;

/// Newest slice of a baseline, kept as a multiset.
///
/// A live event recorded while the historical fetch was running can show up
/// both in the baseline and on the live channel. Matching events consume an
/// entry here instead of being counted a second time.
#[derive(Debug, Clone, Default)]
pub struct OverlapTail {
    newest: Option<DateTime<FixedOffset>>,
    pending: HashMap<CountedEvent, usize>,
}

impl OverlapTail {
    /// Tracks only events within `window` of the newest baseline timestamp.
    pub fn from_baseline(events: &[CountedEvent], window: TimeDelta) -> Self {
        let Some(newest) = newest(events) else {
            return Self::default();
        };
        let cutoff = newest - window;
        Self::collect(newest, events.iter().filter(|e| e.timestamp >= cutoff))
    }

    /// Tracks every baseline event, however old.
    ///
    /// Used for events buffered during Loading: those were all seen after
    /// the fetch started, so any of them may have made it into the response.
    pub fn whole(events: &[CountedEvent]) -> Self {
        match newest(events) {
            Some(newest) => Self::collect(newest, events.iter()),
            None => Self::default(),
        }
    }

    fn collect<'a>(
        newest: DateTime<FixedOffset>,
        events: impl Iterator<Item = &'a CountedEvent>,
    ) -> Self {
        let mut pending = HashMap::new();
        for e in events {
            *pending.entry(e.clone()).or_insert(0) += 1;
        }
        Self {
            newest: Some(newest),
            pending,
        }
    }

    /// Returns `true` if `event` was already part of the baseline.
    pub fn take(&mut self, event: &CountedEvent) -> bool {
        match self.newest {
            Some(newest) if event.timestamp <= newest => {}
            _ => return false,
        }
        match self.pending.get_mut(event) {
            Some(n) if *n > 0 => {
                *n -= 1;
                if *n == 0 {
                    self.pending.remove(event);
                }
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

fn newest(events: &[CountedEvent]) -> Option<DateTime<FixedOffset>> {
    events.iter().map(|e| e.timestamp).max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Approach, VehicleClass};
    use chrono::TimeZone;

    fn ev(minute: u32, second: u32) -> CountedEvent {
        CountedEvent {
            timestamp: FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2024, 1, 1, 8, minute, second)
                .unwrap(),
            sensor_id: 1,
            approach: Approach::NB,
            class: VehicleClass::Car,
        }
    }

    #[test]
    fn test_duplicate_consumed_once() {
        let baseline = vec![ev(0, 0), ev(10, 0), ev(10, 0)];
        let mut tail = OverlapTail::from_baseline(&baseline, TimeDelta::seconds(60));
        assert_eq!(tail.len(), 2);

        assert!(tail.take(&ev(10, 0)));
        assert!(tail.take(&ev(10, 0)));
        assert!(!tail.take(&ev(10, 0)));
        assert!(tail.is_empty());
    }

    #[test]
    fn test_events_newer_than_baseline_pass() {
        let mut tail = OverlapTail::from_baseline(&[ev(10, 0)], TimeDelta::seconds(60));
        assert!(!tail.take(&ev(10, 1)));
        assert_eq!(tail.len(), 1);
    }

    #[test]
    fn test_events_outside_window_are_not_tracked() {
        let baseline = vec![ev(0, 0), ev(10, 0)];
        let mut tail = OverlapTail::from_baseline(&baseline, TimeDelta::seconds(60));
        assert!(!tail.take(&ev(0, 0)));
    }

    #[test]
    fn test_whole_baseline_tracks_old_events() {
        let baseline = vec![ev(0, 0), ev(10, 0)];
        let mut tail = OverlapTail::whole(&baseline);
        assert_eq!(tail.len(), 2);
        assert!(tail.take(&ev(0, 0)));
        assert!(tail.take(&ev(10, 0)));
        assert!(!tail.take(&ev(0, 0)));
    }

    #[test]
    fn test_empty_baseline_tracks_nothing() {
        let mut tail = OverlapTail::from_baseline(&[], TimeDelta::seconds(60));
        assert!(!tail.take(&ev(0, 0)));
    }
}
