//! Winch telemetry and cast statistics
//!
//! The winch monitoring system writes one CSV per day, named after the
//! moment the file was opened (`2024-06-01 00-00-00 WinchDAC.csv`). Each
//! file carries eight metadata lines, a column header, a units line and
//! then one row per sample: elapsed seconds, wall clock, and a
//! tension/speed/payout triple for each of the three instrumented winches.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Winch numbers 1..=3 are instrumented; 0 means "not on a winch"
pub const MAX_WINCH: i32 = 3;

pub const DEFAULT_FILENAME_FORMAT: &str = "%Y-%m-%d %H-%M-%S WinchDAC.csv";
pub const DEFAULT_CLOCK_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";

const METADATA_LINES: usize = 8;
const CLOCK_COLUMN: usize = 1;
const FIRST_WINCH_COLUMN: usize = 2;
const COLUMNS_PER_WINCH: usize = 3;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid telemetry glob '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: CSV error: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{path}: {message}")]
    Format { path: PathBuf, message: String },

    #[error("winch number {0} is not instrumented")]
    NotInstrumented(i32),
}

/// One telemetry row for a single winch
#[derive(Debug, Clone, PartialEq)]
pub struct WinchSample {
    pub seconds: Option<f64>,
    pub clock: NaiveDateTime,
    /// lbs
    pub tension: Option<f64>,
    /// meters per minute
    pub speed: Option<f64>,
    /// meters
    pub payout: Option<f64>,
}

/// Summary figures for one cast. Every field is None when there was no
/// usable telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize)]
pub struct CastStats {
    pub max_tension: Option<f64>,
    pub max_payout: Option<f64>,
    pub max_speed: Option<f64>,
}

impl CastStats {
    pub fn is_empty(&self) -> bool {
        self.max_tension.is_none() && self.max_payout.is_none() && self.max_speed.is_none()
    }

    /// Maxima over the samples whose clock falls in `[start, end]`.
    ///
    /// Stays empty when nothing falls in the window or no sample in it
    /// recorded a tension.
    pub fn from_samples(samples: &[WinchSample], start: NaiveDateTime, end: NaiveDateTime) -> Self {
        let window: Vec<&WinchSample> = samples
            .iter()
            .filter(|s| start <= s.clock && s.clock <= end)
            .collect();
        if window.iter().all(|s| s.tension.is_none()) {
            return Self::default();
        }
        Self {
            max_tension: column_max(window.iter().map(|s| s.tension)),
            max_payout: column_max(window.iter().map(|s| s.payout)),
            max_speed: column_max(window.iter().map(|s| s.speed)),
        }
    }
}

fn column_max(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    values.flatten().reduce(f64::max).map(round_tenth)
}

/// Stored statistics keep one decimal place
fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Columns holding tension, speed and payout for a winch
pub fn winch_columns(winch: i32) -> Result<[usize; 3], TelemetryError> {
    if !(1..=MAX_WINCH).contains(&winch) {
        return Err(TelemetryError::NotInstrumented(winch));
    }
    let base = FIRST_WINCH_COLUMN + COLUMNS_PER_WINCH * (winch as usize - 1);
    Ok([base, base + 1, base + 2])
}

fn parse_number(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// First physical line of `text` and what follows it; blank lines count
fn split_line(text: &str) -> Option<(&str, &str)> {
    if text.is_empty() {
        return None;
    }
    Some(match text.find('\n') {
        Some(end) => (&text[..end], &text[end + 1..]),
        None => (text, ""),
    })
}

/// Where telemetry files live and how they are named
#[derive(Debug, Clone)]
pub struct TelemetrySource {
    pub pattern: String,
    pub filename_format: String,
    pub clock_format: String,
}

impl TelemetrySource {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            filename_format: DEFAULT_FILENAME_FORMAT.to_string(),
            clock_format: DEFAULT_CLOCK_FORMAT.to_string(),
        }
    }

    /// Date embedded in a telemetry file name, if the name follows the format
    pub fn file_date(&self, path: &Path) -> Option<NaiveDate> {
        let name = path.file_name()?.to_str()?;
        NaiveDateTime::parse_from_str(name, &self.filename_format)
            .ok()
            .map(|dt| dt.date())
    }

    /// Files whose embedded date lies in `[from, to]`, sorted by name
    pub fn files_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<PathBuf>, TelemetryError> {
        let entries = glob::glob(&self.pattern).map_err(|source| TelemetryError::Pattern {
            pattern: self.pattern.clone(),
            source,
        })?;
        let mut files = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable telemetry path");
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }
            match self.file_date(&path) {
                Some(date) if from <= date && date <= to => files.push(path),
                Some(_) => {}
                None => tracing::debug!(path = %path.display(), "file name has no telemetry date"),
            }
        }
        files.sort();
        Ok(files)
    }

    /// Parse one telemetry file for the given winch
    pub fn read_file(&self, path: &Path, winch: i32) -> Result<Vec<WinchSample>, TelemetryError> {
        let content = std::fs::read_to_string(path).map_err(|source| TelemetryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.parse(path, &content, winch)
    }

    fn parse(&self, path: &Path, content: &str, winch: i32) -> Result<Vec<WinchSample>, TelemetryError> {
        let [tension_idx, speed_idx, payout_idx] = winch_columns(winch)?;
        let csv_err = |source| TelemetryError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let format_err = |message: String| TelemetryError::Format {
            path: path.to_path_buf(),
            message,
        };

        // Fixed lines are counted physically; csv would drop blank ones.
        let mut rest = content;
        for _ in 0..METADATA_LINES {
            let (_, tail) = split_line(rest).ok_or_else(|| format_err("truncated metadata block".to_string()))?;
            rest = tail;
        }
        let (header_line, tail) =
            split_line(rest).ok_or_else(|| format_err("missing column header".to_string()))?;
        let columns = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(header_line.as_bytes())
            .records()
            .next()
            .transpose()
            .map_err(csv_err)?
            .map_or(0, |header| header.len());
        if columns <= payout_idx {
            return Err(format_err(format!(
                "winch {} needs {} columns, header has {}",
                winch,
                payout_idx + 1,
                columns
            )));
        }
        let (_units, body) = split_line(tail).ok_or_else(|| format_err("missing units line".to_string()))?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(body.as_bytes());
        let records = reader.records();

        let mut samples = Vec::new();
        for (row, record) in records.enumerate() {
            let record = record.map_err(csv_err)?;
            let cell = |i: usize| record.get(i).unwrap_or("");
            let raw_clock = cell(CLOCK_COLUMN).trim();
            let clock = NaiveDateTime::parse_from_str(raw_clock, &self.clock_format).map_err(|e| {
                format_err(format!("row {}: bad clock '{}': {}", row, raw_clock, e))
            })?;
            samples.push(WinchSample {
                seconds: parse_number(cell(0)),
                clock,
                tension: parse_number(cell(tension_idx)),
                speed: parse_number(cell(speed_idx)),
                payout: parse_number(cell(payout_idx)),
            });
        }
        Ok(samples)
    }

    /// All samples for `winch` from files dated within the cast's days.
    ///
    /// Unreadable files are logged and skipped; no files at all is an
    /// empty result, not an error.
    pub fn samples_for(
        &self,
        winch: i32,
        deployed: DateTime<Utc>,
        recovered: DateTime<Utc>,
    ) -> Result<Vec<WinchSample>, TelemetryError> {
        winch_columns(winch)?;
        let files = self.files_between(deployed.date_naive(), recovered.date_naive())?;
        let mut samples = Vec::new();
        for file in &files {
            match self.read_file(file, winch) {
                Ok(mut rows) => {
                    tracing::debug!(path = %file.display(), rows = rows.len(), "read winch telemetry");
                    samples.append(&mut rows);
                }
                Err(e) => tracing::warn!(error = %e, "skipping telemetry file"),
            }
        }
        Ok(samples)
    }

    /// Statistics for a cast on `winch` between the two timestamps.
    ///
    /// Winch 0, a bad glob, missing files or an empty window all yield
    /// empty stats.
    pub fn cast_stats(&self, winch: i32, deployed: DateTime<Utc>, recovered: DateTime<Utc>) -> CastStats {
        if winch == 0 {
            return CastStats::default();
        }
        match self.samples_for(winch, deployed, recovered) {
            Ok(samples) => CastStats::from_samples(&samples, deployed.naive_utc(), recovered.naive_utc()),
            Err(e) => {
                tracing::warn!(error = %e, "no winch statistics");
                CastStats::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const HEADER: &str = "\"WinchDAC\",\"v2.1\"
\"Ship\",\"R/V Example\"
\"Channels\",\"9\"
\"\"
\"\"
\"\"
\"\"
\"\"
\"Seconds\",\"Clock\",\"W1 Tension\",\"W1 Speed\",\"W1 Payout\",\"W2 Tension\",\"W2 Speed\",\"W2 Payout\",\"W3 Tension\",\"W3 Speed\",\"W3 Payout\"
\"s\",\"\",\"lbs\",\"m/min\",\"m\",\"lbs\",\"m/min\",\"m\",\"lbs\",\"m/min\",\"m\"
";

    fn file_body(rows: &[&str]) -> String {
        let mut body = HEADER.to_string();
        for row in rows {
            body.push_str(row);
            body.push('\n');
        }
        body
    }

    fn write_file(dir: &Path, name: &str, rows: &[&str]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, file_body(rows)).unwrap();
        path
    }

    fn utc(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, d, h, m, 0).unwrap()
    }

    fn source(dir: &Path) -> TelemetrySource {
        TelemetrySource::new(format!("{}/*WinchDAC.csv", dir.display()))
    }

    #[test]
    fn test_winch_columns() {
        assert_eq!(winch_columns(1).unwrap(), [2, 3, 4]);
        assert_eq!(winch_columns(3).unwrap(), [8, 9, 10]);
        assert!(winch_columns(0).is_err());
        assert!(winch_columns(4).is_err());
    }

    #[test]
    fn test_file_date() {
        let src = TelemetrySource::new("*.csv");
        let date = src.file_date(Path::new("/data/2024-06-01 00-00-00 WinchDAC.csv"));
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 6, 1));
        assert_eq!(src.file_date(Path::new("notes.csv")), None);
    }

    #[test]
    fn test_parse_selects_winch_columns() {
        let src = TelemetrySource::new("*.csv");
        let body = file_body(&["1,06/01/2024 01:00:00 PM,100,10,50,200,20,60,300,30,70"]);
        let w2 = src.parse(Path::new("x.csv"), &body, 2).unwrap();
        assert_eq!(w2.len(), 1);
        assert_eq!(w2[0].tension, Some(200.0));
        assert_eq!(w2[0].speed, Some(20.0));
        assert_eq!(w2[0].payout, Some(60.0));
        assert_eq!(w2[0].clock, utc(1, 13, 0).naive_utc());
    }

    #[test]
    fn test_blank_metadata_line_keeps_first_sample() {
        let src = TelemetrySource::new("*.csv");
        let body = "\"WinchDAC\",\"v2.1\"

\"Channels\",\"9\"
\"\"
\"\"
\"\"
\"\"
\"\"
\"Seconds\",\"Clock\",\"W1 Tension\",\"W1 Speed\",\"W1 Payout\",\"W2 Tension\",\"W2 Speed\",\"W2 Payout\",\"W3 Tension\",\"W3 Speed\",\"W3 Payout\"
\"s\",\"\",\"lbs\",\"m/min\",\"m\",\"lbs\",\"m/min\",\"m\",\"lbs\",\"m/min\",\"m\"
1,06/01/2024 01:00:00 PM,100,10,50,0,0,0,0,0,0
2,06/01/2024 01:00:01 PM,110,11,51,0,0,0,0,0,0
";
        let samples = src.parse(Path::new("x.csv"), body, 1).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].tension, Some(100.0));
        assert_eq!(samples[1].seconds, Some(2.0));
    }

    #[test]
    fn test_truncated_file_is_an_error() {
        let src = TelemetrySource::new("*.csv");
        let err = src.parse(Path::new("x.csv"), "\"WinchDAC\"\n\n\n", 1).unwrap_err();
        assert!(err.to_string().contains("truncated metadata block"));
    }

    #[test]
    fn test_stats_over_window() {
        let dir = tempfile::TempDir::new().unwrap();
        write_file(
            dir.path(),
            "2024-06-01 00-00-00 WinchDAC.csv",
            &[
                "1,06/01/2024 11:00:00 PM,999,99,999,0,0,0,0,0,0",
                "2,06/01/2024 11:30:00 PM,120.04,30.5,100,0,0,0,0,0,0",
            ],
        );
        write_file(
            dir.path(),
            "2024-06-02 00-00-00 WinchDAC.csv",
            &[
                "3,06/02/2024 12:15:00 AM,480.26,55.1,1500.5,0,0,0,0,0,0",
                "4,06/02/2024 01:00:00 AM,,40,1200,0,0,0,0,0,0",
                "5,06/02/2024 03:00:00 AM,999,99,9999,0,0,0,0,0,0",
            ],
        );
        let stats = source(dir.path()).cast_stats(1, utc(1, 23, 15), utc(2, 1, 0));
        assert_eq!(stats.max_tension, Some(480.3));
        assert_eq!(stats.max_speed, Some(55.1));
        assert_eq!(stats.max_payout, Some(1500.5));
    }

    #[test]
    fn test_winch_zero_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        write_file(
            dir.path(),
            "2024-06-01 00-00-00 WinchDAC.csv",
            &["1,06/01/2024 12:00:00 PM,100,10,50,0,0,0,0,0,0"],
        );
        let stats = source(dir.path()).cast_stats(0, utc(1, 11, 0), utc(1, 13, 0));
        assert!(stats.is_empty());
    }

    #[test]
    fn test_no_files_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let stats = source(dir.path()).cast_stats(1, utc(1, 11, 0), utc(1, 13, 0));
        assert_eq!(stats, CastStats::default());
    }

    #[test]
    fn test_empty_window_is_null_not_zero() {
        let dir = tempfile::TempDir::new().unwrap();
        write_file(
            dir.path(),
            "2024-06-01 00-00-00 WinchDAC.csv",
            &["1,06/01/2024 08:00:00 AM,100,10,50,0,0,0,0,0,0"],
        );
        let stats = source(dir.path()).cast_stats(1, utc(1, 11, 0), utc(1, 13, 0));
        assert!(stats.is_empty());
    }

    #[test]
    fn test_all_null_tension_is_empty() {
        let samples = vec![WinchSample {
            seconds: None,
            clock: utc(1, 12, 0).naive_utc(),
            tension: None,
            speed: Some(10.0),
            payout: Some(20.0),
        }];
        let stats = CastStats::from_samples(&samples, utc(1, 11, 0).naive_utc(), utc(1, 13, 0).naive_utc());
        assert!(stats.is_empty());
    }

    #[test]
    fn test_malformed_file_is_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("2024-06-01 00-00-00 WinchDAC.csv"), "garbage\n").unwrap();
        write_file(
            dir.path(),
            "2024-06-01 06-00-00 WinchDAC.csv",
            &["1,06/01/2024 12:00:00 PM,250,10,50,0,0,0,0,0,0"],
        );
        let stats = source(dir.path()).cast_stats(1, utc(1, 11, 0), utc(1, 13, 0));
        assert_eq!(stats.max_tension, Some(250.0));
    }
}
