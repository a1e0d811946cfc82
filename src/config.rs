//! Configuration file support for shiplog
//!
//! Reads from .shiplog/config.toml. Relative paths in the file are taken
//! from the directory that holds `.shiplog`.

use crate::gps::DEFAULT_TOLERANCE_SECS;
use crate::winch::{TelemetrySource, DEFAULT_CLOCK_FORMAT, DEFAULT_FILENAME_FORMAT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Configuration structure
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    /// Where the external data files live
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub gps: GpsConfig,

    /// Winch telemetry file layout
    #[serde(default)]
    pub winch: WinchConfig,

    /// Export file locations
    #[serde(default)]
    pub export: ExportConfig,

    /// Directory relative paths are resolved against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DataConfig {
    /// TOA5 position log written by the navigation logger
    #[serde(default = "default_gps_file")]
    pub gps_file: String,

    /// Glob matching the daily winch telemetry files
    #[serde(default = "default_winch_glob")]
    pub winch_glob: String,
}

fn default_gps_file() -> String {
    "data/gps.dat".to_string()
}

fn default_winch_glob() -> String {
    "data/winch/*WinchDAC.csv".to_string()
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            gps_file: default_gps_file(),
            winch_glob: default_winch_glob(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GpsConfig {
    /// Largest gap between an event and the fix used for it
    /// Default: 30
    #[serde(default = "default_tolerance_secs")]
    pub tolerance_secs: i64,
}

fn default_tolerance_secs() -> i64 {
    DEFAULT_TOLERANCE_SECS
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            tolerance_secs: default_tolerance_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WinchConfig {
    /// chrono format of telemetry file names
    #[serde(default = "default_filename_format")]
    pub filename_format: String,

    /// chrono format of the wall-clock column
    #[serde(default = "default_clock_format")]
    pub clock_format: String,
}

fn default_filename_format() -> String {
    DEFAULT_FILENAME_FORMAT.to_string()
}

fn default_clock_format() -> String {
    DEFAULT_CLOCK_FORMAT.to_string()
}

impl Default for WinchConfig {
    fn default() -> Self {
        Self {
            filename_format: default_filename_format(),
            clock_format: default_clock_format(),
        }
    }
}

/// Export destinations. `{}` in a file name is replaced by the cruise
/// number (or `All`), or by the wire serial number.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExportConfig {
    #[serde(default = "default_media_dir")]
    pub media_dir: String,

    #[serde(default = "default_event_log_filename")]
    pub event_log_filename: String,

    #[serde(default = "default_cast_log_filename")]
    pub cast_log_filename: String,

    #[serde(default = "default_wire_report_filename")]
    pub wire_report_filename: String,
}

fn default_media_dir() -> String {
    "media".to_string()
}

fn default_event_log_filename() -> String {
    "EventLog_{}.csv".to_string()
}

fn default_cast_log_filename() -> String {
    "CastLog_{}.csv".to_string()
}

fn default_wire_report_filename() -> String {
    "WireReport_{}.csv".to_string()
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            media_dir: default_media_dir(),
            event_log_filename: default_event_log_filename(),
            cast_log_filename: default_cast_log_filename(),
            wire_report_filename: default_wire_report_filename(),
        }
    }
}

impl Config {
    /// Load config from .shiplog/config.toml
    /// Returns default config if file doesn't exist or can't be parsed
    pub fn load() -> Self {
        let Some(path) = Self::find_config_path() else {
            return Self::default();
        };
        let base_dir = path
            .parent()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default();
        match Self::load_from(&path) {
            Ok(mut config) => {
                config.base_dir = base_dir;
                config
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring config file");
                Self {
                    base_dir,
                    ..Self::default()
                }
            }
        }
    }

    /// Parse a config file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Find config.toml by walking up directory tree
    fn find_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        let mut dir = current_dir.as_path();

        loop {
            let config_path = dir.join(".shiplog").join("config.toml");
            if config_path.exists() {
                return Some(config_path);
            }

            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
        None
    }

    /// Config file contents written by `shiplog init`
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn gps_path(&self) -> PathBuf {
        self.resolve(&self.data.gps_file)
    }

    pub fn telemetry_source(&self) -> TelemetrySource {
        TelemetrySource {
            pattern: self.resolve(&self.data.winch_glob).to_string_lossy().to_string(),
            filename_format: self.winch.filename_format.clone(),
            clock_format: self.winch.clock_format.clone(),
        }
    }

    /// Export settings with the media directory resolved
    pub fn export_settings(&self) -> ExportConfig {
        ExportConfig {
            media_dir: self.resolve(&self.export.media_dir).to_string_lossy().to_string(),
            ..self.export.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.gps.tolerance_secs, 30);
        assert_eq!(config.export.event_log_filename, "EventLog_{}.csv");
        assert_eq!(config.winch.filename_format, "%Y-%m-%d %H-%M-%S WinchDAC.csv");
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
[gps]
tolerance_secs = 10

[export]
media_dir = "/srv/media"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.gps.tolerance_secs, 10);
        assert_eq!(config.export_settings().media_dir, "/srv/media");
        assert_eq!(config.export.cast_log_filename, "CastLog_{}.csv");
        assert_eq!(config.data.gps_file, "data/gps.dat");
    }

    #[test]
    fn test_relative_paths_use_base_dir() {
        let config = Config {
            base_dir: PathBuf::from("/ship"),
            ..Config::default()
        };
        assert_eq!(config.gps_path(), PathBuf::from("/ship/data/gps.dat"));
        assert_eq!(config.telemetry_source().pattern, "/ship/data/winch/*WinchDAC.csv");
    }

    #[test]
    fn test_load_from_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("config.toml");
        assert!(matches!(Config::load_from(&missing), Err(ConfigError::Io { .. })));

        std::fs::write(&missing, "[gps]\ntolerance_secs = \"soon\"\n").unwrap();
        let err = Config::load_from(&missing).unwrap_err();
        assert!(matches!(err, ConfigError::Toml { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn test_default_toml_round_trips() {
        let config: Config = toml::from_str(&Config::default_toml()).unwrap();
        assert_eq!(config.export.wire_report_filename, "WireReport_{}.csv");
    }
}
