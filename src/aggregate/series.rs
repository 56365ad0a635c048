use crate::aggregate::bucket::{BucketState, HourBucket};
use crate::model::{Approach, ApproachFilter, VehicleClass};

/// Approach counts for one hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesPoint {
    pub hour: u8,
    counts: [u64; 4],
}

impl SeriesPoint {
    fn from_bucket(hour: u8, bucket: &HourBucket) -> Self {
        let mut counts = [0; 4];
        for a in Approach::ALL {
            counts[a.index()] = bucket.approach(a);
        }
        Self { hour, counts }
    }

    pub fn count(&self, approach: Approach) -> u64 {
        self.counts[approach.index()]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Zeroes every approach the filter hides.
    pub fn project(mut self, filter: ApproachFilter) -> Self {
        for a in Approach::ALL {
            if !filter.shows(a) {
                self.counts[a.index()] = 0;
            }
        }
        self
    }

    /// Approaches with a non-zero count that the filter shows.
    pub fn visible(&self, filter: ApproachFilter) -> impl Iterator<Item = (Approach, u64)> + '_ {
        Approach::ALL
            .into_iter()
            .filter(move |a| filter.shows(*a))
            .map(move |a| (a, self.count(a)))
            .filter(|(_, n)| *n > 0)
    }
}

/// One row of the fixed 24-hour grid, with the class breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridRow {
    pub hour: u8,
    counts: [[u64; 4]; 4],
}

impl GridRow {
    pub fn count(&self, class: VehicleClass, approach: Approach) -> u64 {
        self.counts[class.index()][approach.index()]
    }

    /// Zeroes every approach the filter hides.
    pub fn project(mut self, filter: ApproachFilter) -> Self {
        for a in Approach::ALL {
            if !filter.shows(a) {
                for row in &mut self.counts {
                    row[a.index()] = 0;
                }
            }
        }
        self
    }
}

/// Read-only view over a [`BucketState`].
///
/// Each call to [`Series::iter`] or [`Series::grid`] starts from the first
/// hour again. The chart form is sparse; the table form always has 24 rows.
#[derive(Debug, Clone, Copy)]
pub struct Series<'a> {
    state: &'a BucketState,
}

impl<'a> Series<'a> {
    pub(crate) fn new(state: &'a BucketState) -> Self {
        Self { state }
    }

    /// Hours that received at least one contribution, ascending.
    pub fn iter(&self) -> impl Iterator<Item = SeriesPoint> + use<'a> {
        let state = self.state;
        state
            .iter()
            .map(|(hour, bucket)| SeriesPoint::from_bucket(hour, bucket))
    }

    /// All 24 hours, zero-filled where nothing was counted.
    pub fn grid(&self) -> impl Iterator<Item = GridRow> + use<'a> {
        let state = self.state;
        (0u8..24).map(move |hour| {
            let mut counts = [[0; 4]; 4];
            if let Some(bucket) = state.get(hour) {
                for c in VehicleClass::ALL {
                    for a in Approach::ALL {
                        counts[c.index()][a.index()] = bucket.class_approach(c, a);
                    }
                }
            }
            GridRow { hour, counts }
        })
    }

    /// Chart form as seen through an approach filter. Hours stay put even
    /// when every visible approach is zero.
    pub fn project(&self, filter: ApproachFilter) -> impl Iterator<Item = SeriesPoint> + use<'a> {
        self.iter().map(move |p| p.project(filter))
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }
}

impl<'a> IntoIterator for Series<'a> {
    type Item = SeriesPoint;
    type IntoIter = Box<dyn Iterator<Item = SeriesPoint> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}
