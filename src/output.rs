//! Presentation-side shaping of the aggregated series.
//!
//! Chart rows are sparse and keyed by two-digit hour strings. The hourly
//! table is always a 24-row grid. Both can be logged, printed as JSON, or
//! appended to CSV.

use anyhow::Result;
use chrono::{DateTime, FixedOffset, NaiveDate};
use csv::WriterBuilder;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::debug;

use crate::aggregate::{GridRow, Series};
use crate::dashboard::{Frame, Surface};
use crate::model::{Approach, ApproachFilter, DowntimeInterval, VehicleClass};
use crate::overlay::OverlayRegion;

/// The hourly table always covers a whole day.
pub const HOURS_PER_DAY: usize = 24;

/// `DD-MM-YYYY h:mm AM`, used for downtime rows.
pub fn format_date_time(ts: &DateTime<FixedOffset>) -> String {
    ts.format("%d-%m-%Y %-I:%M %p").to_string()
}

/// `DD-MM-YYYY hh:00 AM` label for an hour row.
pub fn format_hour(date: NaiveDate, hour: u8) -> String {
    date.and_hms_opt(u32::from(hour), 0, 0)
        .map(|dt| dt.format("%d-%m-%Y %I:%M %p").to_string())
        .unwrap_or_else(|| format!("{hour:02}"))
}

/// Sparse chart rows: `{"time": "08", "NB": 2, ...}`. Approaches without
/// counts, or hidden by the filter, are omitted.
pub fn chart_rows(series: &Series<'_>, filter: ApproachFilter) -> Vec<Value> {
    series
        .iter()
        .map(|point| {
            let mut row = Map::new();
            row.insert("time".into(), Value::String(format!("{:02}", point.hour)));
            for (approach, n) in point.visible(filter) {
                row.insert(approach.as_str().into(), json!(n));
            }
            Value::Object(row)
        })
        .collect()
}

/// One row of the hourly traffic table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HourlyRow {
    pub hour: String,
    pub car_nb: u64,
    pub car_sb: u64,
    pub car_eb: u64,
    pub car_wb: u64,
    pub truck_nb: u64,
    pub truck_sb: u64,
    pub truck_eb: u64,
    pub truck_wb: u64,
    pub bus_nb: u64,
    pub bus_sb: u64,
    pub bus_eb: u64,
    pub bus_wb: u64,
    pub ped_nb: u64,
    pub ped_sb: u64,
    pub ped_eb: u64,
    pub ped_wb: u64,
}

impl HourlyRow {
    pub fn from_grid(date: NaiveDate, row: &GridRow) -> Self {
        let c = |class, approach| row.count(class, approach);
        use Approach::*;
        use VehicleClass::*;
        Self {
            hour: format_hour(date, row.hour),
            car_nb: c(Car, NB),
            car_sb: c(Car, SB),
            car_eb: c(Car, EB),
            car_wb: c(Car, WB),
            truck_nb: c(Truck, NB),
            truck_sb: c(Truck, SB),
            truck_eb: c(Truck, EB),
            truck_wb: c(Truck, WB),
            bus_nb: c(Bus, NB),
            bus_sb: c(Bus, SB),
            bus_eb: c(Bus, EB),
            bus_wb: c(Bus, WB),
            ped_nb: c(Pedestrian, NB),
            ped_sb: c(Pedestrian, SB),
            ped_eb: c(Pedestrian, EB),
            ped_wb: c(Pedestrian, WB),
        }
    }

    fn cells(&self) -> [u64; 16] {
        [
            self.car_nb,
            self.car_sb,
            self.car_eb,
            self.car_wb,
            self.truck_nb,
            self.truck_sb,
            self.truck_eb,
            self.truck_wb,
            self.bus_nb,
            self.bus_sb,
            self.bus_eb,
            self.bus_wb,
            self.ped_nb,
            self.ped_sb,
            self.ped_eb,
            self.ped_wb,
        ]
    }
}

/// The full 24-row grid with hidden approaches zeroed.
pub fn hourly_rows(series: &Series<'_>, date: NaiveDate, filter: ApproachFilter) -> Vec<HourlyRow> {
    series
        .grid()
        .map(|row| HourlyRow::from_grid(date, &row.project(filter)))
        .collect()
}

/// A page of the hourly table. `total` is always the full day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HourlyPage {
    pub data: Vec<HourlyRow>,
    pub total: usize,
}

pub fn page(rows: &[HourlyRow], offset: usize, limit: usize) -> HourlyPage {
    let data = rows.iter().skip(offset).take(limit).cloned().collect();
    HourlyPage {
        data,
        total: HOURS_PER_DAY,
    }
}

/// One row of the system-health downtime table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DowntimeRow {
    pub start_time: String,
    pub end_time: String,
    pub duration: String,
}

impl From<&DowntimeInterval> for DowntimeRow {
    fn from(interval: &DowntimeInterval) -> Self {
        Self {
            start_time: format_date_time(&interval.start_time),
            end_time: format_date_time(&interval.end_time),
            duration: interval.duration.clone(),
        }
    }
}

pub fn downtime_rows(intervals: &[DowntimeInterval]) -> Vec<DowntimeRow> {
    intervals.iter().map(DowntimeRow::from).collect()
}

const TABLE_HEADER: [&str; 16] = [
    "Car NB", "Car SB", "Car EB", "Car WB", "Truck NB", "Truck SB", "Truck EB", "Truck WB",
    "Bus NB", "Bus SB", "Bus EB", "Bus WB", "Ped NB", "Ped SB", "Ped EB", "Ped WB",
];

/// Fixed-width text rendering of the hourly table.
pub fn render_table(rows: &[HourlyRow]) -> String {
    let mut out = format!("{:<20}", "Hour");
    for h in TABLE_HEADER {
        out.push_str(&format!("{h:>9}"));
    }
    out.push('\n');

    if rows.is_empty() {
        out.push_str("No data available\n");
        return out;
    }

    for row in rows {
        out.push_str(&format!("{:<20}", row.hour));
        for n in row.cells() {
            out.push_str(&format!("{n:>9}"));
        }
        out.push('\n');
    }
    out
}

/// Fixed-width text rendering of the downtime table.
pub fn render_downtime(rows: &[DowntimeRow]) -> String {
    let mut out = format!("{:<22}{:<22}{}\n", "Start Time", "End Time", "Duration");
    if rows.is_empty() {
        out.push_str("No data available\n");
        return out;
    }
    for row in rows {
        out.push_str(&format!(
            "{:<22}{:<22}{}\n",
            row.start_time, row.end_time, row.duration
        ));
    }
    out
}

pub fn overlay_json(regions: &[OverlayRegion]) -> Vec<Value> {
    regions.iter().map(OverlayRegion::to_json).collect()
}

/// Complete JSON document for one rendered frame.
pub fn frame_json(frame: &Frame<'_>) -> Value {
    json!({
        "scope": frame.params.scope().to_string(),
        "phase": frame.phase.as_str(),
        "generation": frame.generation,
        "approach": match frame.params.approach {
            ApproachFilter::All => "All",
            ApproachFilter::Only(a) => a.as_str(),
        },
        "class": frame.params.class.as_param(),
        "degraded": frame.degraded,
        "chart": chart_rows(&frame.series, frame.params.approach),
        "overlay": overlay_json(&frame.overlay),
    })
}

/// Appends rows to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_rows<T: Serialize>(path: &str, rows: &[T]) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, rows = rows.len(), "Appending CSV rows");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);

    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    Ok(())
}

/// Writes one JSON document per frame, one per line.
pub struct JsonSurface<W> {
    out: W,
}

impl<W: Write> JsonSurface<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> Surface for JsonSurface<W> {
    fn render(&mut self, frame: &Frame<'_>) -> Result<()> {
        serde_json::to_writer(&mut self.out, &frame_json(frame))?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

/// Redraws the hourly table and downtime list for every frame.
pub struct TableSurface<W> {
    out: W,
}

impl<W: Write> TableSurface<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> Surface for TableSurface<W> {
    fn render(&mut self, frame: &Frame<'_>) -> Result<()> {
        let rows = hourly_rows(&frame.series, frame.params.date, frame.params.approach);
        writeln!(
            self.out,
            "== {} [{}{}] class={}",
            frame.params.scope(),
            frame.phase.as_str(),
            if frame.degraded { ", degraded" } else { "" },
            frame.params.class.as_param()
        )?;
        self.out.write_all(render_table(&rows).as_bytes())?;
        self.out
            .write_all(render_downtime(&downtime_rows(frame.downtime)).as_bytes())?;
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregator;
    use crate::model::{AggregationScope, ClassFilter, CountedEvent};
    use chrono::TimeZone;
    use std::env;
    use std::fs;

    fn temp_path(name: &str) -> String {
        format!("{}/{}", env::temp_dir().display(), name)
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn ev(hour: u32, approach: Approach, class: VehicleClass) -> CountedEvent {
        CountedEvent {
            timestamp: FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2024, 1, 1, hour, 15, 0)
                .unwrap(),
            sensor_id: 1,
            approach,
            class,
        }
    }

    fn aggregator() -> Aggregator {
        let mut agg = Aggregator::new(ClassFilter::All);
        agg.reset_baseline(
            AggregationScope::new(date(), 1),
            &[
                ev(8, Approach::NB, VehicleClass::Car),
                ev(8, Approach::NB, VehicleClass::Car),
                ev(9, Approach::SB, VehicleClass::Pedestrian),
            ],
        );
        agg
    }

    #[test]
    fn test_chart_rows_keyed_by_hour_string() {
        let agg = aggregator();
        let rows = chart_rows(&agg.current_series(), ApproachFilter::All);
        assert_eq!(
            rows,
            vec![
                json!({"time": "08", "NB": 2}),
                json!({"time": "09", "SB": 1}),
            ]
        );
    }

    #[test]
    fn test_chart_rows_respect_approach_projection() {
        let agg = aggregator();
        let rows = chart_rows(&agg.current_series(), ApproachFilter::Only(Approach::SB));
        assert_eq!(rows[0], json!({"time": "08"}));
        assert_eq!(rows[1], json!({"time": "09", "SB": 1}));
    }

    #[test]
    fn test_hourly_rows_full_day_grid() {
        let agg = aggregator();
        let rows = hourly_rows(&agg.current_series(), date(), ApproachFilter::All);
        assert_eq!(rows.len(), HOURS_PER_DAY);
        assert_eq!(rows[0].hour, "01-01-2024 12:00 AM");
        assert_eq!(rows[8].car_nb, 2);
        assert_eq!(rows[9].ped_sb, 1);
        assert_eq!(rows[13].hour, "01-01-2024 01:00 PM");
        assert_eq!(rows[13].car_nb, 0);
    }

    #[test]
    fn test_page_reports_full_total() {
        let agg = aggregator();
        let rows = hourly_rows(&agg.current_series(), date(), ApproachFilter::All);
        let p = page(&rows, 20, 10);
        assert_eq!(p.data.len(), 4);
        assert_eq!(p.total, 24);
        assert_eq!(p.data[0].hour, "01-01-2024 08:00 PM");
    }

    #[test]
    fn test_downtime_row_format() {
        let interval = DowntimeInterval {
            start_time: FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2024, 1, 1, 13, 5, 0)
                .unwrap(),
            end_time: FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2024, 1, 1, 14, 30, 0)
                .unwrap(),
            sensor_id: 1,
            duration: "1:25:00".into(),
        };
        let row = DowntimeRow::from(&interval);
        assert_eq!(row.start_time, "01-01-2024 1:05 PM");
        assert_eq!(row.end_time, "01-01-2024 2:30 PM");
    }

    #[test]
    fn test_render_table_empty_shows_placeholder() {
        assert!(render_table(&[]).contains("No data available"));
        assert!(render_downtime(&[]).contains("No data available"));
    }

    #[test]
    fn test_append_rows_writes_header_once() {
        let path = temp_path("traffic_dashboard_test_header.csv");
        let _ = fs::remove_file(&path);

        let agg = aggregator();
        let rows = hourly_rows(&agg.current_series(), date(), ApproachFilter::All);
        append_rows(&path, &rows[..2]).unwrap();
        append_rows(&path, &rows[2..3]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let header_count = content.lines().filter(|l| l.starts_with("hour,")).count();
        assert_eq!(header_count, 1);
        assert_eq!(content.lines().count(), 4);

        fs::remove_file(&path).unwrap();
    }
}
