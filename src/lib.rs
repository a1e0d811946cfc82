//! ShipLog - shipboard event logging for research cruises
//!
//! Record instrument deployments and recoveries, pair them into casts, and
//! pull winch tension, speed and payout figures for each cast out of the
//! winch telemetry files.
//!
//! # Overview
//!
//! Every logged action is a [`db::LogEntry`]: a device, an event such as
//! `Deploy` or `Recover`, a timestamp and the ship's position at that time.
//! A Recover paired with the latest Deploy of the same device on the same
//! cruise forms a cast; [`cast::CastAnalyzer`] derives it and stores the
//! statistics.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`cruise`] | Cruise status, the active cruise, edit rules |
//! | [`device`] | Device hierarchy |
//! | [`matcher`] | Pairing recoveries with deployments |
//! | [`winch`] | Winch telemetry and cast statistics |
//! | [`gps`] | Position lookup from the navigation log |
//! | [`export`] | CSV event logs, cast logs and wire reports |
//!
//! # Quick Start
//!
//! ```no_run
//! use chrono::Utc;
//! use shiplog::{CastAnalyzer, Database, Position, TelemetrySource};
//!
//! let db = Database::new("shiplog.db").unwrap();
//! let deploy = db.create_event("Deploy").unwrap();
//! let recover = db.create_event("Recover").unwrap();
//! let ctd = db.create_device("CTD", None, &["Deploy", "Recover"]).unwrap();
//! let cruise = db.create_cruise("Spring Survey", "AE1901", Utc::now(), None).unwrap();
//! let config = db.create_config("CTD", None, 1).unwrap();
//! db.add_config_to_cruise("AE1901", config, Utc::now()).unwrap();
//!
//! db.log_event(cruise, ctd, deploy, Utc::now(), Position::default()).unwrap();
//! let recovery = db.log_event(cruise, ctd, recover, Utc::now(), Position::default()).unwrap();
//!
//! let telemetry = TelemetrySource::new("data/winch/*WinchDAC.csv");
//! let outcome = CastAnalyzer::new(&db, &telemetry).analyze_recovery(recovery).unwrap();
//! println!("{:?}", outcome);
//! ```

pub mod cast;
pub mod config;
pub mod cruise;
pub mod db;
pub mod device;
pub mod export;
pub mod gps;
pub mod matcher;
pub mod schema;
pub mod timestamp;
pub mod winch;

pub use cast::{AnalysisOutcome, CastAnalyzer, CastError};
pub use config::{Config, ConfigError};
pub use cruise::{CruiseError, CruiseField, CruiseStatus};
pub use db::{
    CastFilter, CastSummary, Cruise, CruiseUpdate, Database, DbError, Device, DeviceConfig, Event,
    LogEntry, LogRecord, Wire, CURRENT_SCHEMA,
};
pub use device::DeviceForest;
pub use export::{CruiseSelection, ExportError, Exporter};
pub use gps::{GpsLog, Position};
pub use matcher::MatchError;
pub use winch::{CastStats, TelemetrySource};

