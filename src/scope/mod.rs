//! Scope transition state machine: `Idle → Loading → Live`.
//!
//! Every Loading phase gets a fresh [`Generation`]. Fetch results carry the
//! generation they were started under and anything older than the current
//! one is discarded, so a slow response for a scope the operator has left
//! can never overwrite the newer scope's buckets.

mod reconcile;

pub use reconcile::OverlapTail;

use chrono::TimeDelta;
use tracing::{debug, error, info, trace};

use crate::aggregate::{Aggregator, Disposition, Series};
use crate::error::DashboardError;
use crate::model::{AggregationScope, ClassFilter, CountedEvent, DowntimeInterval, QueryParameters};
use crate::overlay::{OverlayRegion, overlay_regions};

pub type Generation = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Live,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Loading => "loading",
            Phase::Live => "live",
        }
    }
}

/// What the runtime must do after a parameter change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing changed.
    Unchanged,
    /// Only the approach projection changed; re-render from existing state.
    Reproject,
    /// Start fetches under `generation`. `resubscribe` is set when the scope
    /// itself moved and the live subscription must be replaced.
    Rebaseline {
        generation: Generation,
        scope: AggregationScope,
        resubscribe: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveOutcome {
    Applied,
    /// Held until the baseline for the current generation lands.
    Buffered,
    /// Already part of the baseline.
    Duplicate,
    Ignored(Disposition),
}

impl LiveOutcome {
    pub fn changed_state(self) -> bool {
        matches!(self, LiveOutcome::Applied)
    }
}

#[derive(Debug)]
pub struct ScopeDriver {
    params: Option<QueryParameters>,
    phase: Phase,
    generation: Generation,
    aggregator: Aggregator,
    buffer: Vec<CountedEvent>,
    tail: OverlapTail,
    downtime: Vec<DowntimeInterval>,
    overlap_window: TimeDelta,
    degraded: bool,
}

impl ScopeDriver {
    pub fn new(overlap_window: TimeDelta) -> Self {
        Self {
            params: None,
            phase: Phase::Idle,
            generation: 0,
            aggregator: Aggregator::new(ClassFilter::All),
            buffer: Vec::new(),
            tail: OverlapTail::default(),
            downtime: Vec::new(),
            overlap_window,
            degraded: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn params(&self) -> Option<QueryParameters> {
        self.params
    }

    /// Set when the last baseline fetch failed and the series is a
    /// zero-state stand-in.
    pub fn degraded(&self) -> bool {
        self.degraded
    }

    pub fn series(&self) -> Series<'_> {
        self.aggregator.current_series()
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn downtime(&self) -> &[DowntimeInterval] {
        &self.downtime
    }

    pub fn overlay(&self) -> Vec<OverlayRegion> {
        match self.params {
            Some(p) => overlay_regions(&self.downtime, p.date),
            None => Vec::new(),
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Moves to `next`. Scope or class filter changes invalidate the buckets
    /// and start a new Loading phase; an approach change only re-projects.
    pub fn set_params(&mut self, next: QueryParameters) -> Transition {
        let previous = self.params.replace(next);
        let (rebaseline, resubscribe) = match previous {
            None => (true, true),
            Some(prev) if prev == next => return Transition::Unchanged,
            Some(prev) => (prev.needs_rebaseline(&next), prev.scope() != next.scope()),
        };

        if !rebaseline {
            debug!(approach = ?next.approach, "Approach filter changed, re-projecting");
            return Transition::Reproject;
        }

        self.aggregator.unbind();
        self.aggregator.set_class_filter(next.class);
        if resubscribe {
            self.downtime.clear();
        }
        let generation = self.enter_loading();
        info!(
            scope = %next.scope(),
            class = next.class.as_param(),
            generation,
            "Scope transition"
        );

        Transition::Rebaseline {
            generation,
            scope: next.scope(),
            resubscribe,
        }
    }

    /// Re-fetches the current scope. Existing buckets stay visible until the
    /// new baseline replaces them.
    pub fn refresh(&mut self) -> Option<Generation> {
        let params = self.params?;
        let generation = self.enter_loading();
        debug!(scope = %params.scope(), generation, "Refreshing scope");
        Some(generation)
    }

    /// Drops everything and returns to Idle.
    pub fn unbind(&mut self) {
        self.params = None;
        self.phase = Phase::Idle;
        self.generation += 1;
        self.aggregator.unbind();
        self.buffer.clear();
        self.tail = OverlapTail::default();
        self.downtime.clear();
        self.degraded = false;
    }

    fn enter_loading(&mut self) -> Generation {
        self.generation += 1;
        self.phase = Phase::Loading;
        self.buffer.clear();
        self.generation
    }

    fn is_current(&self, generation: Generation, what: &'static str) -> bool {
        if generation != self.generation {
            debug!(
                generation,
                current = self.generation,
                what,
                "Discarding result for abandoned generation"
            );
            return false;
        }
        true
    }

    /// Applies a historical fetch result. Returns `false` when the result was
    /// stale and nothing changed.
    ///
    /// A failed fetch is logged and treated as an empty baseline.
    pub fn on_baseline(
        &mut self,
        generation: Generation,
        result: Result<Vec<CountedEvent>, DashboardError>,
    ) -> bool {
        if !self.is_current(generation, "baseline") || self.phase != Phase::Loading {
            return false;
        }
        let Some(params) = self.params else {
            return false;
        };

        let events = match result {
            Ok(events) => {
                self.degraded = false;
                events
            }
            Err(e) => {
                error!(error = %e, scope = %params.scope(), "Historical fetch failed, showing empty series");
                self.degraded = true;
                Vec::new()
            }
        };

        self.aggregator.reset_baseline(params.scope(), &events);
        self.tail = OverlapTail::from_baseline(&events, self.overlap_window);
        self.phase = Phase::Live;

        // Buffered events can match anywhere in the baseline, not just its tail.
        let mut whole = OverlapTail::whole(&events);
        let buffered = std::mem::take(&mut self.buffer);
        let replayed = buffered.len();
        let mut applied = 0usize;
        for event in &buffered {
            if self.replay(event, &mut whole).changed_state() {
                applied += 1;
            }
        }

        info!(
            scope = %params.scope(),
            generation,
            baseline = events.len(),
            replayed,
            applied,
            "Baseline landed, now live"
        );
        true
    }

    /// Applies a downtime fetch result. Failures leave an empty overlay.
    pub fn on_downtime(
        &mut self,
        generation: Generation,
        result: Result<Vec<DowntimeInterval>, DashboardError>,
    ) -> bool {
        if !self.is_current(generation, "downtime") {
            return false;
        }
        self.downtime = match result {
            Ok(intervals) => intervals,
            Err(e) => {
                error!(error = %e, "Downtime fetch failed, showing no overlay");
                Vec::new()
            }
        };
        true
    }

    pub fn on_live_event(&mut self, event: CountedEvent) -> LiveOutcome {
        let Some(params) = self.params else {
            return LiveOutcome::Ignored(Disposition::Unbound);
        };
        match self.phase {
            Phase::Idle => LiveOutcome::Ignored(Disposition::Unbound),
            Phase::Loading => {
                if !params.scope().contains(&event) {
                    trace!(event_scope = %event.scope(), "Dropping stale-scope event while loading");
                    return LiveOutcome::Ignored(Disposition::StaleScope);
                }
                self.buffer.push(event);
                LiveOutcome::Buffered
            }
            Phase::Live => self.apply(&event),
        }
    }

    fn in_scope(&self, event: &CountedEvent) -> bool {
        self.aggregator.scope().is_some_and(|s| s.contains(event))
    }

    fn apply(&mut self, event: &CountedEvent) -> LiveOutcome {
        if self.in_scope(event) && self.tail.take(event) {
            trace!("Skipping live event already in baseline");
            return LiveOutcome::Duplicate;
        }
        self.record(event)
    }

    fn replay(&mut self, event: &CountedEvent, whole: &mut OverlapTail) -> LiveOutcome {
        if self.in_scope(event) && whole.take(event) {
            // Keep the live tail in step so a redelivery is not absorbed twice.
            self.tail.take(event);
            trace!("Skipping buffered event already in baseline");
            return LiveOutcome::Duplicate;
        }
        self.record(event)
    }

    fn record(&mut self, event: &CountedEvent) -> LiveOutcome {
        match self.aggregator.apply_live_event(event) {
            Disposition::Applied => LiveOutcome::Applied,
            other => LiveOutcome::Ignored(other),
        }
    }
}
