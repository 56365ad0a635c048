//! Hour-bucketed aggregation of counted events.
//!
//! [`Aggregator`] owns the bucket state for one scope. [`Series`] is the
//! read side consumed by charts (sparse) and tables (24-row grid).

pub mod aggregator;
pub mod bucket;
pub mod series;

pub use aggregator::{Aggregator, Disposition};
pub use bucket::{BucketState, HourBucket};
pub use series::{GridRow, Series, SeriesPoint};
