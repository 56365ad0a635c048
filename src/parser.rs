//! Schema validation at the fetch boundary.
//!
//! Wire rows are deserialized with every field optional, then validated into
//! domain types. A bad row becomes [`DashboardError::MalformedEvent`] and is
//! dropped without affecting its neighbours.

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::Deserialize;
use tracing::warn;

use crate::config::SiteZone;
use crate::error::{DashboardError, Result};
use crate::model::{CountedEvent, DowntimeInterval};

/// Counted-event row as served by the counts endpoints and the live stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CountRecord {
    pub time: Option<String>,
    #[serde(alias = "class")]
    pub class_: Option<String>,
    #[serde(alias = "sensorId")]
    pub sensor_id: Option<i64>,
    pub approach: Option<String>,
}

/// Row served by the data-gaps endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GapRecord {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub duration: Option<String>,
}

/// Parses a backend timestamp into the site's local offset.
///
/// Timestamps carrying an offset are converted; naive timestamps are taken
/// to already be site-local wall-clock time.
pub fn parse_timestamp(raw: &str, site: SiteZone) -> Result<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(site.convert(&dt));
    }

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return site.localize(&naive).ok_or_else(|| {
                DashboardError::malformed("time", format!("{raw:?} does not exist in {site}"))
            });
        }
    }

    Err(DashboardError::malformed(
        "time",
        format!("unparseable timestamp {raw:?}"),
    ))
}

impl CountRecord {
    pub fn validate(&self, site: SiteZone) -> Result<CountedEvent> {
        let time = self
            .time
            .as_deref()
            .ok_or_else(|| DashboardError::malformed("time", "missing"))?;
        let class = self
            .class_
            .as_deref()
            .ok_or_else(|| DashboardError::malformed("class_", "missing"))?;
        let sensor_id = self
            .sensor_id
            .ok_or_else(|| DashboardError::malformed("sensor_id", "missing"))?;
        let approach = self
            .approach
            .as_deref()
            .ok_or_else(|| DashboardError::malformed("approach", "missing"))?;

        Ok(CountedEvent {
            timestamp: parse_timestamp(time, site)?,
            sensor_id,
            approach: approach.parse()?,
            class: class.parse()?,
        })
    }
}

impl GapRecord {
    pub fn validate(&self, sensor_id: i64, site: SiteZone) -> Result<DowntimeInterval> {
        let start = self
            .start_time
            .as_deref()
            .ok_or_else(|| DashboardError::malformed("start_time", "missing"))?;
        let end = self
            .end_time
            .as_deref()
            .ok_or_else(|| DashboardError::malformed("end_time", "missing"))?;

        let start_time = parse_timestamp(start, site)?;
        let end_time = parse_timestamp(end, site)?;
        if end_time < start_time {
            return Err(DashboardError::malformed(
                "end_time",
                format!("{end} precedes {start}"),
            ));
        }

        Ok(DowntimeInterval {
            start_time,
            end_time,
            sensor_id,
            duration: self.duration.clone().unwrap_or_default(),
        })
    }
}

/// Validates a batch of count rows, logging and skipping the bad ones.
pub fn validate_counts(records: &[CountRecord], site: SiteZone) -> Vec<CountedEvent> {
    records
        .iter()
        .filter_map(|r| match r.validate(site) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(error = %e, record = ?r, "Dropping malformed count record");
                None
            }
        })
        .collect()
}

/// Validates a batch of gap rows, logging and skipping the bad ones.
pub fn validate_gaps(
    records: &[GapRecord],
    sensor_id: i64,
    site: SiteZone,
) -> Vec<DowntimeInterval> {
    records
        .iter()
        .filter_map(|r| match r.validate(sensor_id, site) {
            Ok(interval) => Some(interval),
            Err(e) => {
                warn!(error = %e, record = ?r, "Dropping malformed downtime record");
                None
            }
        })
        .collect()
}

/// Parses one line of a newline-delimited JSON live stream.
pub fn parse_live_line(line: &[u8], site: SiteZone) -> Result<CountedEvent> {
    let record: CountRecord = serde_json::from_slice(line)
        .map_err(|e| DashboardError::malformed("record", e.to_string()))?;
    record.validate(site)
}
