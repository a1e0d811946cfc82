//! CSV exports of the event log, cast log and per-wire reports
//!
//! Files land in the configured media directory. Names come from
//! templates where `{}` is replaced by a cruise number, `All`, or a wire
//! serial number.

use crate::config::ExportConfig;
use crate::db::{CastFilter, CastSummary, Cruise, Database, DbError, LogRecord, Wire};
use chrono::{Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, ExportError>;

/// Which cruise's data an export covers
#[derive(Debug, Clone)]
pub enum CruiseSelection {
    All,
    Cruise(Cruise),
}

impl CruiseSelection {
    /// Cruise number, or `All`
    pub fn key(&self) -> &str {
        match self {
            CruiseSelection::All => "All",
            CruiseSelection::Cruise(c) => &c.number,
        }
    }

    pub fn cruise_id(&self) -> Option<i32> {
        match self {
            CruiseSelection::All => None,
            CruiseSelection::Cruise(c) => Some(c.id),
        }
    }

    fn cast_filter(&self) -> CastFilter {
        match self {
            CruiseSelection::All => CastFilter::All,
            CruiseSelection::Cruise(c) => CastFilter::Cruise(c.id),
        }
    }
}

/// Fill a `{}` file name template
pub fn output_filename(template: &str, key: &str) -> String {
    template.replace("{}", key)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogRow {
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Time")]
    pub time: String,
    #[serde(rename = "Device")]
    pub device: String,
    #[serde(rename = "Event")]
    pub event: String,
    #[serde(rename = "Latitude")]
    pub latitude: String,
    #[serde(rename = "Longitude")]
    pub longitude: String,
}

const EVENT_LOG_HEADERS: [&str; 6] = ["Date", "Time", "Device", "Event", "Latitude", "Longitude"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastLogRow {
    #[serde(rename = "Deployed")]
    pub deployed: String,
    #[serde(rename = "Recovered")]
    pub recovered: String,
    #[serde(rename = "Device")]
    pub device: String,
    #[serde(rename = "Max Tension")]
    pub max_tension: Option<f64>,
    #[serde(rename = "Max Speed")]
    pub max_speed: Option<f64>,
    #[serde(rename = "Max Payout")]
    pub max_payout: Option<f64>,
    #[serde(rename = "Wire")]
    pub wire: String,
    #[serde(rename = "Winch #")]
    pub winch: i32,
}

const CAST_LOG_HEADERS: [&str; 8] = [
    "Deployed",
    "Recovered",
    "Device",
    "Max Tension",
    "Max Speed",
    "Max Payout",
    "Wire",
    "Winch #",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireReportRow {
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Max Tension")]
    pub max_tension: Option<f64>,
    #[serde(rename = "Max Speed")]
    pub max_speed: Option<f64>,
    #[serde(rename = "Max Payout")]
    pub max_payout: Option<f64>,
}

const WIRE_REPORT_HEADERS: [&str; 4] = ["Date", "Max Tension", "Max Speed", "Max Payout"];

/// One row per log entry, in the order given
pub fn event_log_rows(records: &[LogRecord]) -> Vec<EventLogRow> {
    records
        .iter()
        .map(|r| {
            let position = r.gps.position();
            EventLogRow {
                date: r.entry.timestamp.format("%Y-%m-%d").to_string(),
                time: r.entry.timestamp.format("%H:%M:%S").to_string(),
                device: r.device.name.clone(),
                event: r.event.name.clone(),
                latitude: position.latitude_label(),
                longitude: position.longitude_label(),
            }
        })
        .collect()
}

/// One row per reported cast. A single cruise's log leaves out casts
/// that were not on a winch.
pub fn cast_log_rows(casts: &[CastSummary], selection: &CruiseSelection) -> Vec<CastLogRow> {
    let winch_only = matches!(selection, CruiseSelection::Cruise(_));
    casts
        .iter()
        .filter(|c| c.report.is_some())
        .filter(|c| !winch_only || c.config.winch > 0)
        .map(|c| {
            let stats = c.stats();
            CastLogRow {
                deployed: c.deployment.timestamp.format(DATETIME_FORMAT).to_string(),
                recovered: c.recovery.timestamp.format(DATETIME_FORMAT).to_string(),
                device: c.device.name.clone(),
                max_tension: stats.max_tension,
                max_speed: stats.max_speed,
                max_payout: stats.max_payout,
                wire: c.wire.as_ref().map(|w| w.serial_number.clone()).unwrap_or_default(),
                winch: c.config.winch,
            }
        })
        .collect()
}

/// Reported casts on `wire` deployed on or after `start` and recovered
/// no later than midnight after `end`, dated by their recovery
pub fn wire_report_rows(casts: &[CastSummary], wire: &Wire, start: NaiveDate, end: NaiveDate) -> Vec<WireReportRow> {
    let window_start = start.and_time(NaiveTime::MIN);
    let window_end = (end + Duration::days(1)).and_time(NaiveTime::MIN);
    casts
        .iter()
        .filter(|c| c.report.is_some())
        .filter(|c| {
            c.wire
                .as_ref()
                .is_some_and(|w| w.serial_number == wire.serial_number)
        })
        .filter(|c| c.deployment.timestamp >= window_start && c.recovery.timestamp <= window_end)
        .map(|c| {
            let stats = c.stats();
            WireReportRow {
                date: c.recovery.timestamp.format(DATETIME_FORMAT).to_string(),
                max_tension: stats.max_tension,
                max_speed: stats.max_speed,
                max_payout: stats.max_payout,
            }
        })
        .collect()
}

/// Write rows under a fixed header line, so empty exports still carry it
pub fn write_rows<T: Serialize>(path: &Path, headers: &[&str], rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| ExportError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
    writer.write_record(headers)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush().map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Read back an exported event log
pub fn read_event_log(path: &Path) -> Result<Vec<EventLogRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader.deserialize().collect::<std::result::Result<Vec<EventLogRow>, _>>()?;
    Ok(rows)
}

/// Writes export files for one database
pub struct Exporter<'a> {
    db: &'a Database,
    settings: &'a ExportConfig,
}

impl<'a> Exporter<'a> {
    pub fn new(db: &'a Database, settings: &'a ExportConfig) -> Self {
        Self { db, settings }
    }

    fn target(&self, template: &str, key: &str) -> PathBuf {
        Path::new(&self.settings.media_dir).join(output_filename(template, key))
    }

    pub fn export_event_log(&self, selection: &CruiseSelection) -> Result<PathBuf> {
        let records = self.db.log_records(selection.cruise_id())?;
        let rows = event_log_rows(&records);
        let path = self.target(&self.settings.event_log_filename, selection.key());
        write_rows(&path, &EVENT_LOG_HEADERS, &rows)?;
        tracing::info!(path = %path.display(), rows = rows.len(), "exported event log");
        Ok(path)
    }

    pub fn export_cast_log(&self, selection: &CruiseSelection) -> Result<PathBuf> {
        let casts = self.db.cast_summaries(selection.cast_filter())?;
        let rows = cast_log_rows(&casts, selection);
        let path = self.target(&self.settings.cast_log_filename, selection.key());
        write_rows(&path, &CAST_LOG_HEADERS, &rows)?;
        tracing::info!(path = %path.display(), rows = rows.len(), "exported cast log");
        Ok(path)
    }

    /// Write a wire report and record that it was run
    pub fn export_wire_report(&self, wire_serial: &str, start: NaiveDate, end: NaiveDate) -> Result<PathBuf> {
        let wire = self.db.require_wire(wire_serial)?;
        self.db.create_wire_report(wire.id, start, end)?;
        let casts = self.db.cast_summaries(CastFilter::All)?;
        let rows = wire_report_rows(&casts, &wire, start, end);
        let path = self.target(&self.settings.wire_report_filename, &wire.serial_number);
        write_rows(&path, &WIRE_REPORT_HEADERS, &rows)?;
        tracing::info!(path = %path.display(), rows = rows.len(), wire = %wire, "exported wire report");
        Ok(path)
    }
}
