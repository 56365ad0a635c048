//! Downtime overlay regions for the hourly charts.
//!
//! A pure transform over [`DowntimeInterval`]s, independent of the counted
//! event pipeline.

use chrono::{DateTime, FixedOffset, NaiveDate, Timelike};

use crate::model::DowntimeInterval;

/// A shaded region from `x1` to `x2` (inclusive), keyed by hour strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayRegion {
    pub start_hour: u8,
    pub end_hour: u8,
}

impl OverlayRegion {
    pub fn x1(&self) -> String {
        format!("{:02}", self.start_hour)
    }

    pub fn x2(&self) -> String {
        format!("{:02}", self.end_hour)
    }

    pub fn covers(&self, hour: u8) -> bool {
        (self.start_hour..=self.end_hour).contains(&hour)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "x1": self.x1(), "x2": self.x2() })
    }
}

fn clamp_hour(ts: &DateTime<FixedOffset>, date: NaiveDate, before: u8, after: u8) -> u8 {
    let day = ts.date_naive();
    if day < date {
        before
    } else if day > date {
        after
    } else {
        ts.hour() as u8
    }
}

/// Maps one interval onto `date`'s hour range, or `None` if it does not
/// touch that date at all.
pub fn region_for(interval: &DowntimeInterval, date: NaiveDate) -> Option<OverlayRegion> {
    if interval.start_time.date_naive() > date || interval.end_time.date_naive() < date {
        return None;
    }
    Some(OverlayRegion {
        start_hour: clamp_hour(&interval.start_time, date, 0, 23),
        end_hour: clamp_hour(&interval.end_time, date, 0, 23),
    })
}

pub fn overlay_regions(intervals: &[DowntimeInterval], date: NaiveDate) -> Vec<OverlayRegion> {
    intervals
        .iter()
        .filter_map(|i| region_for(i, date))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(d: u32, h: u32, m: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 1, d, h, m, 0)
            .unwrap()
    }

    fn interval(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> DowntimeInterval {
        DowntimeInterval {
            start_time: start,
            end_time: end,
            sensor_id: 1,
            duration: String::new(),
        }
    }

    fn jan(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_afternoon_gap_spans_13_to_14() {
        let region = region_for(&interval(at(1, 13, 0), at(1, 14, 30)), jan(1)).unwrap();
        assert_eq!(region.x1(), "13");
        assert_eq!(region.x2(), "14");
        assert!(region.covers(13) && region.covers(14) && !region.covers(15));
    }

    #[test]
    fn test_gap_from_previous_day_clamps_to_midnight() {
        let region = region_for(&interval(at(1, 22, 0), at(2, 3, 0)), jan(2)).unwrap();
        assert_eq!((region.start_hour, region.end_hour), (0, 3));
    }

    #[test]
    fn test_gap_into_next_day_clamps_to_23() {
        let region = region_for(&interval(at(1, 22, 0), at(2, 3, 0)), jan(1)).unwrap();
        assert_eq!((region.start_hour, region.end_hour), (22, 23));
    }

    #[test]
    fn test_gap_on_other_day_is_dropped() {
        let gaps = vec![
            interval(at(3, 1, 0), at(3, 2, 0)),
            interval(at(1, 5, 0), at(1, 6, 0)),
        ];
        let regions = overlay_regions(&gaps, jan(1));
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].start_hour, 5);
    }

    #[test]
    fn test_region_json_shape() {
        let region = OverlayRegion {
            start_hour: 7,
            end_hour: 9,
        };
        assert_eq!(region.to_json(), serde_json::json!({"x1": "07", "x2": "09"}));
    }
}
