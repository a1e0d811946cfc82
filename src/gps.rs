//! Ship position log lookup
//!
//! The navigation logger writes a TOA5 table: one metadata line, the
//! column header, two lines of units/processing, then one row per fix.
//! Positions are degrees plus decimal minutes.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Default match window between an event and a position fix
pub const DEFAULT_TOLERANCE_SECS: i64 = 30;

const REQUIRED_COLUMNS: [&str; 5] = ["TIMESTAMP", "Lat_deg", "Lat_min", "Lon_deg", "Lon_min"];

#[derive(Debug, Error)]
pub enum GpsError {
    #[error("failed to read GPS log {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("GPS log CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("GPS log is missing its {0} line")]
    MissingHeader(&'static str),

    #[error("GPS log has no {0} column")]
    MissingColumn(&'static str),

    #[error("GPS log row {row}: {message}")]
    DataRow { row: usize, message: String },
}

/// A position in degrees and decimal minutes
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize)]
pub struct Position {
    pub latitude_degree: i32,
    pub latitude_minute: f64,
    pub longitude_degree: i32,
    pub longitude_minute: f64,
}

impl Position {
    pub fn latitude_label(&self) -> String {
        format_degree_minute(self.latitude_degree, self.latitude_minute)
    }

    pub fn longitude_label(&self) -> String {
        format_degree_minute(self.longitude_degree, self.longitude_minute)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.latitude_label(), self.longitude_label())
    }
}

/// `12°34.5678'`
pub fn format_degree_minute(degree: i32, minute: f64) -> String {
    format!("{}°{:.4}'", degree, minute)
}

/// One row of the position log
#[derive(Debug, Clone, PartialEq)]
pub struct PositionFix {
    pub timestamp: NaiveDateTime,
    /// None when any coordinate was NAN or blank
    pub position: Option<Position>,
}

/// Position fixes sorted by time
#[derive(Debug, Clone, Default)]
pub struct GpsLog {
    fixes: Vec<PositionFix>,
    tolerance: Duration,
}

impl GpsLog {
    pub fn new(mut fixes: Vec<PositionFix>, tolerance_secs: i64) -> Self {
        fixes.sort_by_key(|f| f.timestamp);
        Self {
            fixes,
            tolerance: Duration::seconds(tolerance_secs),
        }
    }

    /// Read the log at `path`. A missing file is an empty log.
    pub fn load(path: &Path, tolerance_secs: i64) -> Result<Self, GpsError> {
        if !path.is_file() {
            tracing::debug!(path = %path.display(), "no GPS log file; positions default to 0,0");
            return Ok(Self::new(Vec::new(), tolerance_secs));
        }
        let content = std::fs::read_to_string(path).map_err(|source| GpsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let fixes = parse_toa5(&content)?;
        tracing::debug!(path = %path.display(), fixes = fixes.len(), "loaded GPS log");
        Ok(Self::new(fixes, tolerance_secs))
    }

    /// Like [`GpsLog::load`], but a malformed file is logged and treated as empty
    pub fn load_or_empty(path: &Path, tolerance_secs: i64) -> Self {
        match Self::load(path, tolerance_secs) {
            Ok(log) => log,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable GPS log");
                Self::new(Vec::new(), tolerance_secs)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    /// The fix closest in time to `at`, if one lies within the tolerance
    pub fn nearest(&self, at: DateTime<Utc>) -> Option<Position> {
        let at = at.naive_utc();
        let idx = self.fixes.partition_point(|f| f.timestamp < at);
        let candidates = [idx.checked_sub(1), Some(idx)];
        let best = candidates
            .iter()
            .flatten()
            .filter_map(|&i| self.fixes.get(i))
            .min_by_key(|f| (f.timestamp - at).abs())?;
        if (best.timestamp - at).abs() > self.tolerance {
            return None;
        }
        best.position
    }

    /// Nearest fix, or 0°0', 0°0' when nothing matches
    pub fn position_at(&self, at: DateTime<Utc>) -> Position {
        self.nearest(at).unwrap_or_default()
    }
}

fn detect_delimiter(line: &str) -> u8 {
    if line.contains(';') && !line.contains(',') {
        b';'
    } else {
        b','
    }
}

/// Parse a logger timestamp such as `2019-06-01 12:00:00` or `2019-06-01 12:00:00.5`
pub(crate) fn parse_logger_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

fn parse_cell(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("nan") {
        return None;
    }
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse the text of a TOA5 position table
pub fn parse_toa5(content: &str) -> Result<Vec<PositionFix>, GpsError> {
    let header_line = content.lines().nth(1).ok_or(GpsError::MissingHeader("column header"))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(detect_delimiter(header_line))
        .from_reader(content.as_bytes());

    let mut records = reader.records();
    records.next().ok_or(GpsError::MissingHeader("metadata"))??;
    let header = records.next().ok_or(GpsError::MissingHeader("column header"))??;

    let mut indexes = [0usize; 5];
    for (slot, name) in indexes.iter_mut().zip(REQUIRED_COLUMNS) {
        *slot = header
            .iter()
            .position(|h| h.trim() == name)
            .ok_or(GpsError::MissingColumn(name))?;
    }
    let [ts_idx, lat_deg_idx, lat_min_idx, lon_deg_idx, lon_min_idx] = indexes;

    // units and processing lines
    records.next().ok_or(GpsError::MissingHeader("units"))??;
    records.next().ok_or(GpsError::MissingHeader("processing"))??;

    let mut fixes = Vec::new();
    for (row, record) in records.enumerate() {
        let record = record?;
        let cell = |i: usize| record.get(i).unwrap_or("");
        let raw_ts = cell(ts_idx).trim().trim_matches('"');
        let timestamp = parse_logger_timestamp(raw_ts).ok_or_else(|| GpsError::DataRow {
            row,
            message: format!("unparseable TIMESTAMP '{}'", raw_ts),
        })?;
        let coords = (
            parse_cell(cell(lat_deg_idx)),
            parse_cell(cell(lat_min_idx)),
            parse_cell(cell(lon_deg_idx)),
            parse_cell(cell(lon_min_idx)),
        );
        let position = match coords {
            (Some(lat_deg), Some(lat_min), Some(lon_deg), Some(lon_min)) => Some(Position {
                latitude_degree: lat_deg.trunc() as i32,
                latitude_minute: lat_min,
                longitude_degree: lon_deg.trunc() as i32,
                longitude_minute: lon_min,
            }),
            _ => None,
        };
        fixes.push(PositionFix { timestamp, position });
    }
    Ok(fixes)
}
