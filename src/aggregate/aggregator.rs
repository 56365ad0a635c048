use tracing::{debug, trace};

use crate::aggregate::bucket::BucketState;
use crate::aggregate::series::Series;
use crate::model::{AggregationScope, ClassFilter, CountedEvent};

/// Whether a live event changed the bucket state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Applied,
    /// The event belongs to a different (date, sensor) than the bound scope.
    StaleScope,
    /// Rejected by the active class filter.
    Filtered,
    /// No scope is bound yet.
    Unbound,
}

/// Hour-bucketed counts for exactly one scope at a time.
///
/// The scope is always passed in explicitly; nothing here reads ambient
/// state. All operations are synchronous and linear in their input.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    scope: Option<AggregationScope>,
    class_filter: ClassFilter,
    state: BucketState,
}

impl Aggregator {
    pub fn new(class_filter: ClassFilter) -> Self {
        Self {
            scope: None,
            class_filter,
            state: BucketState::default(),
        }
    }

    pub fn scope(&self) -> Option<AggregationScope> {
        self.scope
    }

    pub fn class_filter(&self) -> ClassFilter {
        self.class_filter
    }

    /// Sets the class filter for the next baseline. Existing buckets are
    /// left alone; callers re-baseline after changing it.
    pub fn set_class_filter(&mut self, class_filter: ClassFilter) {
        self.class_filter = class_filter;
    }

    pub fn state(&self) -> &BucketState {
        &self.state
    }

    /// Rebuilds bucket state for `scope` from `events`.
    ///
    /// Events outside the scope or rejected by the class filter are skipped,
    /// so calling this twice with the same input yields the same state.
    pub fn reset_baseline<'a, I>(&mut self, scope: AggregationScope, events: I) -> &BucketState
    where
        I: IntoIterator<Item = &'a CountedEvent>,
    {
        if self.scope != Some(scope) {
            debug!(%scope, previous = ?self.scope, "Binding aggregator to new scope");
        }
        self.scope = Some(scope);
        self.state.clear();

        let mut skipped = 0usize;
        for event in events {
            if scope.contains(event) && self.class_filter.admits(event.class) {
                self.state.record(event);
            } else {
                skipped += 1;
            }
        }

        debug!(
            %scope,
            counted = self.state.total(),
            skipped,
            "Baseline applied"
        );
        &self.state
    }

    /// Drops all state and unbinds the scope.
    pub fn unbind(&mut self) {
        self.scope = None;
        self.state.clear();
    }

    /// Adds one live event to the bound scope. Anything that does not match
    /// the scope is ignored without touching the state.
    pub fn apply_live_event(&mut self, event: &CountedEvent) -> Disposition {
        let Some(scope) = self.scope else {
            return Disposition::Unbound;
        };
        if !scope.contains(event) {
            trace!(%scope, event_scope = %event.scope(), "Ignoring stale-scope live event");
            return Disposition::StaleScope;
        }
        if !self.class_filter.admits(event.class) {
            return Disposition::Filtered;
        }
        self.state.record(event);
        Disposition::Applied
    }

    pub fn current_series(&self) -> Series<'_> {
        Series::new(&self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Approach, VehicleClass};
    use chrono::{FixedOffset, NaiveDate, TimeZone};
    use proptest::prelude::*;

    fn scope() -> AggregationScope {
        AggregationScope::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 1)
    }

    fn ev(hour: u32, approach: Approach, class: VehicleClass) -> CountedEvent {
        ev_full(1, 1, hour, 0, approach, class)
    }

    fn ev_full(
        sensor_id: i64,
        day: u32,
        hour: u32,
        minute: u32,
        approach: Approach,
        class: VehicleClass,
    ) -> CountedEvent {
        CountedEvent {
            timestamp: FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2024, 1, day, hour, minute, 0)
                .unwrap(),
            sensor_id,
            approach,
            class,
        }
    }

    #[test]
    fn test_baseline_then_live_scenario() {
        let mut agg = Aggregator::new(ClassFilter::All);
        agg.reset_baseline(scope(), &[ev(8, Approach::NB, VehicleClass::Car)]);

        assert_eq!(
            agg.apply_live_event(&ev(8, Approach::NB, VehicleClass::Car)),
            Disposition::Applied
        );
        agg.apply_live_event(&ev(9, Approach::SB, VehicleClass::Pedestrian));

        let points: Vec<_> = agg.current_series().iter().collect();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].hour, 8);
        assert_eq!(points[0].count(Approach::NB), 2);
        assert_eq!(points[1].hour, 9);
        assert_eq!(points[1].count(Approach::SB), 1);
        assert_eq!(points[1].count(Approach::NB), 0);
    }

    #[test]
    fn test_live_event_for_other_sensor_is_ignored() {
        let mut agg = Aggregator::new(ClassFilter::All);
        agg.reset_baseline(scope(), &[ev(8, Approach::NB, VehicleClass::Car)]);
        let before = agg.state().clone();

        let other = ev_full(2, 1, 8, 0, Approach::NB, VehicleClass::Car);
        assert_eq!(agg.apply_live_event(&other), Disposition::StaleScope);
        assert_eq!(agg.state(), &before);
    }

    #[test]
    fn test_live_event_before_any_scope_is_unbound() {
        let mut agg = Aggregator::new(ClassFilter::All);
        assert_eq!(
            agg.apply_live_event(&ev(8, Approach::NB, VehicleClass::Car)),
            Disposition::Unbound
        );
        assert!(agg.state().is_empty());
    }

    #[test]
    fn test_class_filter_pedestrian_only() {
        let mut agg = Aggregator::new(ClassFilter::Only(VehicleClass::Pedestrian));
        let events = vec![
            ev(7, Approach::NB, VehicleClass::Car),
            ev(7, Approach::NB, VehicleClass::Pedestrian),
            ev(7, Approach::EB, VehicleClass::Truck),
            ev(7, Approach::EB, VehicleClass::Pedestrian),
            ev(7, Approach::EB, VehicleClass::Bus),
        ];
        agg.reset_baseline(scope(), &events);
        assert_eq!(agg.state().total(), 2);

        assert_eq!(
            agg.apply_live_event(&ev(7, Approach::WB, VehicleClass::Car)),
            Disposition::Filtered
        );
        assert_eq!(agg.state().total(), 2);
    }

    #[test]
    fn test_reset_baseline_is_idempotent() {
        let events = vec![
            ev(1, Approach::NB, VehicleClass::Car),
            ev(13, Approach::WB, VehicleClass::Bus),
        ];
        let mut agg = Aggregator::new(ClassFilter::All);
        let first = agg.reset_baseline(scope(), &events).clone();
        let second = agg.reset_baseline(scope(), &events).clone();
        assert_eq!(first, second);
    }

    #[test]
    fn test_scope_change_discards_previous_state() {
        let mut agg = Aggregator::new(ClassFilter::All);
        agg.reset_baseline(scope(), &[ev(8, Approach::NB, VehicleClass::Car)]);

        let next = AggregationScope::new(scope().date, 2);
        agg.reset_baseline(next, std::iter::empty());
        assert!(agg.state().is_empty());
        assert_eq!(agg.scope(), Some(next));
    }

    #[test]
    fn test_baseline_skips_events_from_other_days() {
        let mut agg = Aggregator::new(ClassFilter::All);
        let events = vec![
            ev_full(1, 1, 23, 59, Approach::NB, VehicleClass::Car),
            ev_full(1, 2, 0, 1, Approach::NB, VehicleClass::Car),
        ];
        agg.reset_baseline(scope(), &events);
        assert_eq!(agg.state().total(), 1);
        assert!(agg.state().get(23).is_some());
        assert!(agg.state().get(0).is_none());
    }

    fn arb_event() -> impl Strategy<Value = CountedEvent> {
        (
            1i64..=2,
            1u32..=2,
            0u32..24,
            0u32..60,
            0usize..4,
            0usize..4,
        )
            .prop_map(|(sensor, day, hour, minute, a, c)| {
                ev_full(sensor, day, hour, minute, Approach::ALL[a], VehicleClass::ALL[c])
            })
    }

    fn arb_filter() -> impl Strategy<Value = ClassFilter> {
        prop_oneof![
            Just(ClassFilter::All),
            (0usize..4).prop_map(|c| ClassFilter::Only(VehicleClass::ALL[c])),
        ]
    }

    proptest! {
        #[test]
        fn prop_prefix_baseline_plus_live_suffix_matches_full_baseline(
            events in prop::collection::vec(arb_event(), 0..64),
            split in any::<prop::sample::Index>(),
            filter in arb_filter(),
        ) {
            let cut = split.index(events.len() + 1);
            let (head, tail) = events.split_at(cut);

            let mut incremental = Aggregator::new(filter);
            incremental.reset_baseline(scope(), head);
            for e in tail {
                incremental.apply_live_event(e);
            }

            let mut full = Aggregator::new(filter);
            full.reset_baseline(scope(), &events);

            prop_assert_eq!(incremental.state(), full.state());
        }

        #[test]
        fn prop_out_of_scope_events_never_change_series(
            baseline in prop::collection::vec(arb_event(), 0..32),
            foreign in prop::collection::vec(arb_event(), 0..32),
        ) {
            let mut agg = Aggregator::new(ClassFilter::All);
            agg.reset_baseline(scope(), &baseline);
            let before: Vec<_> = agg.current_series().iter().collect();

            for e in foreign.iter().filter(|e| !scope().contains(e)) {
                prop_assert_eq!(agg.apply_live_event(e), Disposition::StaleScope);
            }

            let after: Vec<_> = agg.current_series().iter().collect();
            prop_assert_eq!(before, after);
        }

        #[test]
        fn prop_series_sorted_with_unique_hours(
            events in prop::collection::vec(arb_event(), 0..64),
        ) {
            let mut agg = Aggregator::new(ClassFilter::All);
            agg.reset_baseline(scope(), &events);
            let hours: Vec<u8> = agg.current_series().iter().map(|p| p.hour).collect();
            prop_assert!(hours.windows(2).all(|w| w[0] < w[1]));

            let matching = events
                .iter()
                .filter(|e| scope().contains(e))
                .count() as u64;
            let summed: u64 = agg
                .current_series()
                .iter()
                .map(|p| p.total())
                .sum();
            prop_assert_eq!(summed, matching);
        }
    }
}
