//! Core domain types: counted events, downtime intervals, filters and scope.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Timelike};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::DashboardError;

/// Compass direction of travel at the intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Approach {
    NB,
    SB,
    EB,
    WB,
}

impl Approach {
    pub const ALL: [Approach; 4] = [Approach::NB, Approach::SB, Approach::EB, Approach::WB];

    pub fn as_str(self) -> &'static str {
        match self {
            Approach::NB => "NB",
            Approach::SB => "SB",
            Approach::EB => "EB",
            Approach::WB => "WB",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Approach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Approach {
    type Err = DashboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NB" => Ok(Approach::NB),
            "SB" => Ok(Approach::SB),
            "EB" => Ok(Approach::EB),
            "WB" => Ok(Approach::WB),
            other => Err(DashboardError::malformed(
                "approach",
                format!("unknown approach {other:?}"),
            )),
        }
    }
}

/// Category of road user that was counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleClass {
    Car,
    Truck,
    Bus,
    Pedestrian,
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 4] = [
        VehicleClass::Car,
        VehicleClass::Truck,
        VehicleClass::Bus,
        VehicleClass::Pedestrian,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            VehicleClass::Car => "car",
            VehicleClass::Truck => "truck",
            VehicleClass::Bus => "bus",
            VehicleClass::Pedestrian => "pedestrian",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleClass {
    type Err = DashboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "car" => Ok(VehicleClass::Car),
            "truck" => Ok(VehicleClass::Truck),
            "bus" => Ok(VehicleClass::Bus),
            "pedestrian" => Ok(VehicleClass::Pedestrian),
            other => Err(DashboardError::malformed(
                "class_",
                format!("unknown class {other:?}"),
            )),
        }
    }
}

/// A single vehicle or pedestrian detection. The timestamp is already
/// expressed in the sensor site's UTC offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CountedEvent {
    pub timestamp: DateTime<FixedOffset>,
    pub sensor_id: i64,
    pub approach: Approach,
    pub class: VehicleClass,
}

impl CountedEvent {
    /// Site-local hour of day, 0..=23.
    pub fn hour(&self) -> u8 {
        self.timestamp.hour() as u8
    }

    /// Site-local calendar date.
    pub fn local_date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    pub fn scope(&self) -> AggregationScope {
        AggregationScope::new(self.local_date(), self.sensor_id)
    }
}

/// An interval during which a sensor produced no data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DowntimeInterval {
    pub start_time: DateTime<FixedOffset>,
    pub end_time: DateTime<FixedOffset>,
    pub sensor_id: i64,
    /// Backend-rendered duration, e.g. `0:07:00`.
    pub duration: String,
}

/// The (date, sensor) pair that both a historical fetch and a live
/// subscription apply to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AggregationScope {
    pub date: NaiveDate,
    pub sensor_id: i64,
}

impl AggregationScope {
    pub fn new(date: NaiveDate, sensor_id: i64) -> Self {
        Self { date, sensor_id }
    }

    pub fn contains(&self, event: &CountedEvent) -> bool {
        event.sensor_id == self.sensor_id && event.local_date() == self.date
    }

    /// `YYYY-MM-DD`, as the backend expects it in query strings.
    pub fn date_param(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }
}

impl fmt::Display for AggregationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}/sensor={}",
            self.date.year(),
            self.date.month(),
            self.date.day(),
            self.sensor_id
        )
    }
}

/// Restricts counting to a single class, or admits everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClassFilter {
    #[default]
    All,
    Only(VehicleClass),
}

impl ClassFilter {
    pub fn admits(self, class: VehicleClass) -> bool {
        match self {
            ClassFilter::All => true,
            ClassFilter::Only(c) => c == class,
        }
    }

    pub fn as_param(self) -> &'static str {
        match self {
            ClassFilter::All => "All",
            ClassFilter::Only(c) => c.as_str(),
        }
    }
}

impl FromStr for ClassFilter {
    type Err = DashboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            Ok(ClassFilter::All)
        } else {
            s.parse().map(ClassFilter::Only)
        }
    }
}

/// Display-time projection over the four approaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApproachFilter {
    #[default]
    All,
    Only(Approach),
}

impl ApproachFilter {
    pub fn shows(self, approach: Approach) -> bool {
        match self {
            ApproachFilter::All => true,
            ApproachFilter::Only(a) => a == approach,
        }
    }
}

impl FromStr for ApproachFilter {
    type Err = DashboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            Ok(ApproachFilter::All)
        } else {
            s.parse().map(ApproachFilter::Only)
        }
    }
}

/// Immutable snapshot of what the operator is currently looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryParameters {
    pub date: NaiveDate,
    pub sensor_id: i64,
    pub approach: ApproachFilter,
    pub class: ClassFilter,
}

impl QueryParameters {
    pub fn new(date: NaiveDate, sensor_id: i64) -> Self {
        Self {
            date,
            sensor_id,
            approach: ApproachFilter::All,
            class: ClassFilter::All,
        }
    }

    pub fn scope(&self) -> AggregationScope {
        AggregationScope::new(self.date, self.sensor_id)
    }

    pub fn with_date(self, date: NaiveDate) -> Self {
        Self { date, ..self }
    }

    pub fn with_sensor(self, sensor_id: i64) -> Self {
        Self { sensor_id, ..self }
    }

    pub fn with_approach(self, approach: ApproachFilter) -> Self {
        Self { approach, ..self }
    }

    pub fn with_class(self, class: ClassFilter) -> Self {
        Self { class, ..self }
    }

    /// Whether moving from `self` to `next` invalidates bucket state.
    /// The approach filter is only a projection and never does.
    pub fn needs_rebaseline(&self, next: &QueryParameters) -> bool {
        self.scope() != next.scope() || self.class != next.class
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event_at(offset: FixedOffset, y: i32, m: u32, d: u32, h: u32) -> CountedEvent {
        CountedEvent {
            timestamp: offset.with_ymd_and_hms(y, m, d, h, 59, 59).unwrap(),
            sensor_id: 1,
            approach: Approach::NB,
            class: VehicleClass::Car,
        }
    }

    #[test]
    fn test_approach_round_trip_and_rejects_unknown() {
        for a in Approach::ALL {
            assert_eq!(a.as_str().parse::<Approach>().unwrap(), a);
        }
        assert!("XB".parse::<Approach>().is_err());
    }

    #[test]
    fn test_class_filter_admits() {
        assert!(ClassFilter::All.admits(VehicleClass::Bus));
        let peds: ClassFilter = "pedestrian".parse().unwrap();
        assert!(peds.admits(VehicleClass::Pedestrian));
        assert!(!peds.admits(VehicleClass::Car));
        assert_eq!("All".parse::<ClassFilter>().unwrap(), ClassFilter::All);
    }

    #[test]
    fn test_scope_uses_local_date_near_midnight() {
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        let e = event_at(offset, 2024, 1, 1, 23);
        assert_eq!(e.hour(), 23);
        let scope = AggregationScope::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 1);
        assert!(scope.contains(&e));
        // Same instant in UTC lands on 2024-01-02 hour 4.
        assert_eq!(e.timestamp.naive_utc().date().day(), 2);
    }

    #[test]
    fn test_approach_change_does_not_rebaseline() {
        let base = QueryParameters::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 1);
        assert!(!base.needs_rebaseline(&base.with_approach(ApproachFilter::Only(Approach::EB))));
        assert!(base.needs_rebaseline(&base.with_sensor(2)));
        assert!(base.needs_rebaseline(&base.with_class(ClassFilter::Only(VehicleClass::Bus))));
    }

    #[test]
    fn test_scope_display() {
        let scope = AggregationScope::new(NaiveDate::from_ymd_opt(2024, 3, 7).unwrap(), 4);
        assert_eq!(scope.to_string(), "2024-03-07/sensor=4");
        assert_eq!(scope.date_param(), "2024-03-07");
    }
}
