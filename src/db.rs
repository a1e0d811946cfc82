//! SQLite database with Diesel ORM
//!
//! Stores cruises, devices, the event log and derived casts.
//! Tables are created on open if they are missing.

use crate::cruise::{self, CruiseError, CruiseField};
use crate::device::DeviceForest;
use crate::gps::Position;
use crate::matcher::{self, MatchError};
use crate::schema::*;
use crate::winch::{CastStats, MAX_WINCH};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use diesel::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Name of the event that starts a cast
pub const DEPLOY_EVENT: &str = "Deploy";
/// Name of the event that ends a cast
pub const RECOVER_EVENT: &str = "Recover";

/// Walk up directory tree to find .shiplog folder (like git finds .git)
/// Can be overridden with SHIPLOG_DB_PATH env var
fn get_db_path() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("SHIPLOG_DB_PATH") {
        return std::path::PathBuf::from(path);
    }

    if let Ok(current_dir) = std::env::current_dir() {
        let mut dir = current_dir.as_path();
        loop {
            let shiplog_dir = dir.join(".shiplog");
            if shiplog_dir.is_dir() {
                return shiplog_dir.join("shiplog.db");
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
    }

    // `shiplog init` will create it here
    std::path::PathBuf::from(".shiplog/shiplog.db")
}

/// Current schema version
pub const CURRENT_SCHEMA: ShipLogSchema = ShipLogSchema {
    major: 1,
    minor: 1,
    patch: 0,
    name: "shiplog",
    features: &[
        "cruises",
        "devices",
        "configs",
        "ship_logs",
        "casts",
        "cast_reports",
        "wire_reports",
    ],
};

/// Describes the version and capabilities of the schema
#[derive(Debug, Clone)]
pub struct ShipLogSchema {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub name: &'static str,
    pub features: &'static [&'static str],
}

impl ShipLogSchema {
    pub fn version_string(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(&feature)
    }
}

impl std::fmt::Display for ShipLogSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{} ({})", self.version_string(), self.name)
    }
}

// ============================================================================
// Diesel Models
// ============================================================================

#[derive(Insertable)]
#[diesel(table_name = schema_versions)]
pub struct NewSchemaVersion<'a> {
    pub version: &'a str,
    pub name: &'a str,
    pub features: &'a str,
    pub introduced_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, serde::Serialize)]
#[diesel(table_name = cruises)]
pub struct Cruise {
    pub id: i32,
    pub name: String,
    pub number: String,
    pub start_date: NaiveDateTime,
    pub end_date: Option<NaiveDateTime>,
}

#[derive(Insertable)]
#[diesel(table_name = cruises)]
pub struct NewCruise<'a> {
    pub name: &'a str,
    pub number: &'a str,
    pub start_date: NaiveDateTime,
    pub end_date: Option<NaiveDateTime>,
}

/// Field changes for an existing cruise; `None` leaves a field alone
#[derive(Debug, Default, Clone)]
pub struct CruiseUpdate {
    pub name: Option<String>,
    pub number: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, serde::Serialize)]
#[diesel(table_name = events)]
pub struct Event {
    pub id: i32,
    pub name: String,
}

#[derive(Insertable)]
#[diesel(table_name = events)]
pub struct NewEvent<'a> {
    pub name: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, serde::Serialize)]
#[diesel(table_name = devices)]
pub struct Device {
    pub id: i32,
    pub name: String,
    pub parent_id: Option<i32>,
}

#[derive(Insertable)]
#[diesel(table_name = devices)]
pub struct NewDevice<'a> {
    pub name: &'a str,
    pub parent_id: Option<i32>,
}

#[derive(Insertable)]
#[diesel(table_name = device_events)]
pub struct NewDeviceEvent {
    pub device_id: i32,
    pub event_id: i32,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, serde::Serialize)]
#[diesel(table_name = wires)]
pub struct Wire {
    pub id: i32,
    pub name: String,
    pub serial_number: String,
}

impl std::fmt::Display for Wire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.serial_number)
    }
}

#[derive(Insertable)]
#[diesel(table_name = wires)]
pub struct NewWire<'a> {
    pub name: &'a str,
    pub serial_number: &'a str,
}

/// A device on an optional wire and winch (0 = no instrumented winch)
#[derive(Queryable, Selectable, Debug, Clone, PartialEq, serde::Serialize)]
#[diesel(table_name = configs)]
pub struct DeviceConfig {
    pub id: i32,
    pub device_id: i32,
    pub wire_id: Option<i32>,
    pub winch: i32,
}

#[derive(Insertable)]
#[diesel(table_name = configs)]
pub struct NewDeviceConfig {
    pub device_id: i32,
    pub wire_id: Option<i32>,
    pub winch: i32,
}

#[derive(Insertable)]
#[diesel(table_name = cruise_configs)]
pub struct NewCruiseConfig {
    pub cruise_id: i32,
    pub config_id: i32,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, serde::Serialize)]
#[diesel(table_name = gps_fixes)]
pub struct GpsFix {
    pub id: i32,
    pub latitude_degree: i32,
    pub latitude_minute: f64,
    pub longitude_degree: i32,
    pub longitude_minute: f64,
}

impl GpsFix {
    pub fn position(&self) -> Position {
        Position {
            latitude_degree: self.latitude_degree,
            latitude_minute: self.latitude_minute,
            longitude_degree: self.longitude_degree,
            longitude_minute: self.longitude_minute,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = gps_fixes)]
pub struct NewGpsFix {
    pub latitude_degree: i32,
    pub latitude_minute: f64,
    pub longitude_degree: i32,
    pub longitude_minute: f64,
}

/// One logged action: a device event at a time and place
#[derive(Queryable, Selectable, Debug, Clone, PartialEq, serde::Serialize)]
#[diesel(table_name = ship_logs)]
pub struct LogEntry {
    pub id: i32,
    pub cruise_id: i32,
    pub device_id: i32,
    pub event_id: i32,
    pub gps_id: i32,
    pub timestamp: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = ship_logs)]
pub struct NewLogEntry {
    pub cruise_id: i32,
    pub device_id: i32,
    pub event_id: i32,
    pub gps_id: i32,
    pub timestamp: NaiveDateTime,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, serde::Serialize)]
#[diesel(table_name = casts)]
pub struct Cast {
    pub id: i32,
    pub cruise_id: i32,
    pub deployment_id: i32,
    pub recovery_id: i32,
    pub config_id: i32,
}

#[derive(Insertable)]
#[diesel(table_name = casts)]
pub struct NewCast {
    pub cruise_id: i32,
    pub deployment_id: i32,
    pub recovery_id: i32,
    pub config_id: i32,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, serde::Serialize)]
#[diesel(table_name = cast_reports)]
pub struct CastReport {
    pub id: i32,
    pub cast_id: i32,
    pub max_tension: Option<f64>,
    pub max_payout: Option<f64>,
    pub max_speed: Option<f64>,
}

impl CastReport {
    pub fn stats(&self) -> CastStats {
        CastStats {
            max_tension: self.max_tension,
            max_payout: self.max_payout,
            max_speed: self.max_speed,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = cast_reports)]
pub struct NewCastReport {
    pub cast_id: i32,
    pub max_tension: Option<f64>,
    pub max_payout: Option<f64>,
    pub max_speed: Option<f64>,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, serde::Serialize)]
#[diesel(table_name = wire_reports)]
pub struct WireReport {
    pub id: i32,
    pub wire_id: i32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub created_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = wire_reports)]
pub struct NewWireReport<'a> {
    pub wire_id: i32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub created_at: &'a str,
}

// ============================================================================
// Joined views
// ============================================================================

/// A log entry with its names and position resolved
#[derive(Debug, Clone, serde::Serialize)]
pub struct LogRecord {
    pub entry: LogEntry,
    pub cruise: Cruise,
    pub device: Device,
    pub event: Event,
    pub gps: GpsFix,
}

impl LogRecord {
    /// `2024-06-01 12:00:00: AE1901 - CTD Deploy`
    pub fn label(&self) -> String {
        format!(
            "{}: {} - {} {}",
            crate::timestamp::display(self.entry.timestamp),
            self.cruise.number,
            self.device.name,
            self.event.name
        )
    }
}

/// A cast with everything needed to report on it
#[derive(Debug, Clone, serde::Serialize)]
pub struct CastSummary {
    pub cast: Cast,
    pub cruise: Cruise,
    pub device: Device,
    pub deployment: LogEntry,
    pub recovery: LogEntry,
    pub config: DeviceConfig,
    pub wire: Option<Wire>,
    pub report: Option<CastReport>,
}

impl CastSummary {
    /// `Spring Survey CTD cast recovered at 14:05 on 2024-06-01`
    pub fn label(&self) -> String {
        format!(
            "{} {} cast recovered at {} on {}",
            self.cruise.name,
            self.device.name,
            self.recovery.timestamp.format("%H:%M"),
            self.recovery.timestamp.format("%Y-%m-%d")
        )
    }

    pub fn stats(&self) -> CastStats {
        self.report.as_ref().map(CastReport::stats).unwrap_or_default()
    }
}

/// `CTD on winch #2 on Main Wire (W-100)`
pub fn config_label(device: &Device, config: &DeviceConfig, wire: Option<&Wire>) -> String {
    let winch = if config.winch > 0 {
        format!("on winch #{}", config.winch)
    } else {
        "not on a winch".to_string()
    };
    let wire = match wire {
        Some(w) => format!("on {}", w),
        None => "not on a wire".to_string(),
    };
    format!("{} {} {}", device.name, winch, wire)
}

/// Which casts to summarise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastFilter {
    All,
    Cruise(i32),
}

// ============================================================================
// Helper structs for raw SQL queries
// ============================================================================

#[derive(QueryableByName, Debug)]
struct CountResult {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    count: i64,
}

// ============================================================================
// Database Connection
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Database connection wrapper with connection pool
pub struct Database {
    pool: DbPool,
}

/// Error type for database operations
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("{0}")]
    Validation(String),

    #[error("{kind} '{key}' not found")]
    NotFound { kind: &'static str, key: String },

    #[error(transparent)]
    Cruise(#[from] CruiseError),

    #[error(transparent)]
    Match(#[from] MatchError),
}

impl DbError {
    fn not_found(kind: &'static str, key: impl ToString) -> Self {
        DbError::NotFound {
            kind,
            key: key.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

fn replace_cast_report(conn: &mut SqliteConnection, cast_id: i32, stats: &CastStats) -> Result<i32> {
    diesel::delete(cast_reports::table.filter(cast_reports::cast_id.eq(cast_id))).execute(conn)?;
    diesel::insert_into(cast_reports::table)
        .values(&NewCastReport {
            cast_id,
            max_tension: stats.max_tension,
            max_payout: stats.max_payout,
            max_speed: stats.max_speed,
        })
        .execute(conn)?;
    last_insert_id(conn)
}

fn last_insert_id(conn: &mut SqliteConnection) -> Result<i32> {
    let id: i32 = diesel::select(diesel::dsl::sql::<diesel::sql_types::Integer>("last_insert_rowid()"))
        .first(conn)?;
    Ok(id)
}

impl Database {
    /// Get the database path that will be used
    pub fn db_path() -> std::path::PathBuf {
        get_db_path()
    }

    /// Create a new database at a custom path
    pub fn new(path: &str) -> Result<Self> {
        Self::open_at(path)
    }

    /// Open database at default path (respects SHIPLOG_DB_PATH env var)
    pub fn open() -> Result<Self> {
        let path = get_db_path();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| DbError::Connection(e.to_string()))?;
            }
        }
        Self::open_at(&path)
    }

    /// Open database at specified path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(&path_str);
        let pool = Pool::builder()
            .max_size(5)
            .build(manager)
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.init_schema()?;
        tracing::debug!(path = %path_str, schema = %CURRENT_SCHEMA, "opened database");
        Ok(db)
    }

    fn get_conn(&self) -> Result<DbConn> {
        self.pool.get().map_err(|e| DbError::Connection(e.to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.get_conn()?;

        let statements = [
            r#"CREATE TABLE IF NOT EXISTS schema_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                version TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                features TEXT NOT NULL,
                introduced_at TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS cruises (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                name TEXT NOT NULL UNIQUE,
                number TEXT NOT NULL UNIQUE,
                start_date TEXT NOT NULL,
                end_date TEXT
            )"#,
            r#"CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                name TEXT NOT NULL UNIQUE
            )"#,
            r#"CREATE TABLE IF NOT EXISTS devices (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                name TEXT NOT NULL UNIQUE,
                parent_id INTEGER,
                FOREIGN KEY (parent_id) REFERENCES devices(id)
            )"#,
            r#"CREATE TABLE IF NOT EXISTS device_events (
                device_id INTEGER NOT NULL,
                event_id INTEGER NOT NULL,
                PRIMARY KEY (device_id, event_id),
                FOREIGN KEY (device_id) REFERENCES devices(id),
                FOREIGN KEY (event_id) REFERENCES events(id)
            )"#,
            r#"CREATE TABLE IF NOT EXISTS wires (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                name TEXT NOT NULL,
                serial_number TEXT NOT NULL UNIQUE
            )"#,
            r#"CREATE TABLE IF NOT EXISTS configs (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                device_id INTEGER NOT NULL,
                wire_id INTEGER,
                winch INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (device_id) REFERENCES devices(id),
                FOREIGN KEY (wire_id) REFERENCES wires(id)
            )"#,
            r#"CREATE TABLE IF NOT EXISTS cruise_configs (
                cruise_id INTEGER NOT NULL,
                config_id INTEGER NOT NULL,
                PRIMARY KEY (cruise_id, config_id),
                FOREIGN KEY (cruise_id) REFERENCES cruises(id),
                FOREIGN KEY (config_id) REFERENCES configs(id)
            )"#,
            r#"CREATE TABLE IF NOT EXISTS gps_fixes (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                latitude_degree INTEGER NOT NULL DEFAULT 0,
                latitude_minute REAL NOT NULL DEFAULT 0,
                longitude_degree INTEGER NOT NULL DEFAULT 0,
                longitude_minute REAL NOT NULL DEFAULT 0
            )"#,
            r#"CREATE TABLE IF NOT EXISTS ship_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                cruise_id INTEGER NOT NULL,
                device_id INTEGER NOT NULL,
                event_id INTEGER NOT NULL,
                gps_id INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                FOREIGN KEY (cruise_id) REFERENCES cruises(id),
                FOREIGN KEY (device_id) REFERENCES devices(id),
                FOREIGN KEY (event_id) REFERENCES events(id),
                FOREIGN KEY (gps_id) REFERENCES gps_fixes(id)
            )"#,
            r#"CREATE TABLE IF NOT EXISTS casts (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                cruise_id INTEGER NOT NULL,
                deployment_id INTEGER NOT NULL,
                recovery_id INTEGER NOT NULL,
                config_id INTEGER NOT NULL,
                FOREIGN KEY (cruise_id) REFERENCES cruises(id),
                FOREIGN KEY (deployment_id) REFERENCES ship_logs(id),
                FOREIGN KEY (recovery_id) REFERENCES ship_logs(id),
                FOREIGN KEY (config_id) REFERENCES configs(id)
            )"#,
            r#"CREATE TABLE IF NOT EXISTS cast_reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                cast_id INTEGER NOT NULL,
                max_tension REAL,
                max_payout REAL,
                max_speed REAL,
                FOREIGN KEY (cast_id) REFERENCES casts(id)
            )"#,
            r#"CREATE TABLE IF NOT EXISTS wire_reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                wire_id INTEGER NOT NULL,
                start_date TEXT NOT NULL,
                end_date TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (wire_id) REFERENCES wires(id)
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_ship_logs_cruise_device ON ship_logs(cruise_id, device_id)",
            "CREATE INDEX IF NOT EXISTS idx_ship_logs_timestamp ON ship_logs(timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_casts_recovery ON casts(recovery_id)",
            "CREATE INDEX IF NOT EXISTS idx_cast_reports_cast ON cast_reports(cast_id)",
        ];
        for statement in statements {
            diesel::sql_query(statement).execute(&mut conn)?;
        }

        self.register_schema(&mut conn, &CURRENT_SCHEMA)
    }

    fn register_schema(&self, conn: &mut SqliteConnection, schema: &ShipLogSchema) -> Result<()> {
        let now = chrono::Local::now().to_rfc3339();
        let features_json = serde_json::to_string(&schema.features).unwrap_or_default();

        let new_schema = NewSchemaVersion {
            version: &schema.version_string(),
            name: schema.name,
            features: &features_json,
            introduced_at: &now,
        };

        diesel::insert_or_ignore_into(schema_versions::table)
            .values(&new_schema)
            .execute(conn)?;

        Ok(())
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Create an event type such as "Deploy" or "Recover"
    pub fn create_event(&self, name: &str) -> Result<i32> {
        let mut conn = self.get_conn()?;
        if self.find_event(&mut conn, name)?.is_some() {
            return Err(DbError::Validation(format!("Event '{}' already exists", name)));
        }
        diesel::insert_into(events::table)
            .values(&NewEvent { name })
            .execute(&mut conn)?;
        last_insert_id(&mut conn)
    }

    fn find_event(&self, conn: &mut SqliteConnection, name: &str) -> Result<Option<Event>> {
        Ok(events::table
            .filter(events::name.eq(name))
            .first::<Event>(conn)
            .optional()?)
    }

    pub fn get_event_by_name(&self, name: &str) -> Result<Option<Event>> {
        let mut conn = self.get_conn()?;
        self.find_event(&mut conn, name)
    }

    pub fn require_event(&self, name: &str) -> Result<Event> {
        self.get_event_by_name(name)?
            .ok_or_else(|| DbError::not_found("Event", name))
    }

    pub fn get_event(&self, id: i32) -> Result<Event> {
        let mut conn = self.get_conn()?;
        events::table
            .find(id)
            .first::<Event>(&mut conn)
            .optional()?
            .ok_or_else(|| DbError::not_found("Event", id))
    }

    pub fn list_events(&self) -> Result<Vec<Event>> {
        let mut conn = self.get_conn()?;
        Ok(events::table.order(events::name.asc()).load::<Event>(&mut conn)?)
    }

    // ========================================================================
    // Devices
    // ========================================================================

    /// Create a device, optionally under a parent, with its applicable events
    pub fn create_device(&self, name: &str, parent: Option<&str>, event_names: &[&str]) -> Result<i32> {
        if self.get_device_by_name(name)?.is_some() {
            return Err(DbError::Validation(format!("Device '{}' already exists", name)));
        }
        let parent_id = match parent {
            Some(parent_name) => {
                let parent = self.require_device(parent_name)?;
                self.warn_if_parent_has_events(&parent)?;
                Some(parent.id)
            }
            None => None,
        };
        let event_ids = event_names
            .iter()
            .map(|e| self.require_event(e).map(|ev| ev.id))
            .collect::<Result<Vec<i32>>>()?;

        let mut conn = self.get_conn()?;
        conn.transaction::<_, DbError, _>(|conn| {
            diesel::insert_into(devices::table)
                .values(&NewDevice { name, parent_id })
                .execute(conn)?;
            let device_id = last_insert_id(conn)?;
            for event_id in event_ids {
                diesel::insert_or_ignore_into(device_events::table)
                    .values(&NewDeviceEvent { device_id, event_id })
                    .execute(conn)?;
            }
            Ok(device_id)
        })
    }

    fn warn_if_parent_has_events(&self, parent: &Device) -> Result<()> {
        let events = self.device_events(parent.id)?;
        if !events.is_empty() {
            tracing::warn!(
                device = %parent.name,
                events = events.len(),
                "parent devices should not have events of their own"
            );
        }
        Ok(())
    }

    /// Add applicable events to an existing device
    pub fn add_device_events(&self, device_name: &str, event_names: &[&str]) -> Result<()> {
        let device = self.require_device(device_name)?;
        let mut conn = self.get_conn()?;
        for name in event_names {
            let event = self
                .find_event(&mut conn, name)?
                .ok_or_else(|| DbError::not_found("Event", name))?;
            diesel::insert_or_ignore_into(device_events::table)
                .values(&NewDeviceEvent {
                    device_id: device.id,
                    event_id: event.id,
                })
                .execute(&mut conn)?;
        }
        if !self.device_forest()?.all_children(device.id).is_empty() {
            tracing::warn!(device = %device.name, "added events to a parent device");
        }
        Ok(())
    }

    /// Re-parent a device. Rejects changes that would make the tree cyclic.
    pub fn set_device_parent(&self, device_name: &str, parent: Option<&str>) -> Result<()> {
        let device = self.require_device(device_name)?;
        let parent_id = match parent {
            Some(parent_name) => {
                let parent = self.require_device(parent_name)?;
                if self.device_forest()?.would_create_cycle(device.id, parent.id) {
                    return Err(DbError::Validation(format!(
                        "Making '{}' the parent of '{}' would create a cycle",
                        parent.name, device.name
                    )));
                }
                self.warn_if_parent_has_events(&parent)?;
                Some(parent.id)
            }
            None => None,
        };
        let mut conn = self.get_conn()?;
        diesel::update(devices::table.find(device.id))
            .set(devices::parent_id.eq(parent_id))
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn get_device_by_name(&self, name: &str) -> Result<Option<Device>> {
        let mut conn = self.get_conn()?;
        Ok(devices::table
            .filter(devices::name.eq(name))
            .first::<Device>(&mut conn)
            .optional()?)
    }

    pub fn require_device(&self, name: &str) -> Result<Device> {
        self.get_device_by_name(name)?
            .ok_or_else(|| DbError::not_found("Device", name))
    }

    pub fn get_device(&self, id: i32) -> Result<Device> {
        let mut conn = self.get_conn()?;
        devices::table
            .find(id)
            .first::<Device>(&mut conn)
            .optional()?
            .ok_or_else(|| DbError::not_found("Device", id))
    }

    pub fn list_devices(&self) -> Result<Vec<Device>> {
        let mut conn = self.get_conn()?;
        Ok(devices::table.order(devices::name.asc()).load::<Device>(&mut conn)?)
    }

    pub fn device_forest(&self) -> Result<DeviceForest> {
        Ok(DeviceForest::new(self.list_devices()?))
    }

    /// Events applicable to a device
    pub fn device_events(&self, device_id: i32) -> Result<Vec<Event>> {
        let mut conn = self.get_conn()?;
        let event_ids: Vec<i32> = device_events::table
            .filter(device_events::device_id.eq(device_id))
            .select(device_events::event_id)
            .load(&mut conn)?;
        Ok(events::table
            .filter(events::id.eq_any(event_ids))
            .order(events::name.asc())
            .load::<Event>(&mut conn)?)
    }

    // ========================================================================
    // Wires and configs
    // ========================================================================

    pub fn create_wire(&self, name: &str, serial_number: &str) -> Result<i32> {
        if self.get_wire_by_serial(serial_number)?.is_some() {
            return Err(DbError::Validation(format!(
                "Wire with serial number '{}' already exists",
                serial_number
            )));
        }
        let mut conn = self.get_conn()?;
        diesel::insert_into(wires::table)
            .values(&NewWire { name, serial_number })
            .execute(&mut conn)?;
        last_insert_id(&mut conn)
    }

    pub fn get_wire_by_serial(&self, serial_number: &str) -> Result<Option<Wire>> {
        let mut conn = self.get_conn()?;
        Ok(wires::table
            .filter(wires::serial_number.eq(serial_number))
            .first::<Wire>(&mut conn)
            .optional()?)
    }

    pub fn require_wire(&self, serial_number: &str) -> Result<Wire> {
        self.get_wire_by_serial(serial_number)?
            .ok_or_else(|| DbError::not_found("Wire", serial_number))
    }

    pub fn list_wires(&self) -> Result<Vec<Wire>> {
        let mut conn = self.get_conn()?;
        Ok(wires::table.order(wires::serial_number.asc()).load::<Wire>(&mut conn)?)
    }

    /// Create a device configuration. Winch must be 0..=3.
    pub fn create_config(&self, device_name: &str, wire_serial: Option<&str>, winch: i32) -> Result<i32> {
        if !(0..=MAX_WINCH).contains(&winch) {
            return Err(DbError::Validation(format!(
                "Winch must be between 0 and {}, got {}",
                MAX_WINCH, winch
            )));
        }
        let device = self.require_device(device_name)?;
        let wire_id = match wire_serial {
            Some(serial) => Some(self.require_wire(serial)?.id),
            None => None,
        };
        let mut conn = self.get_conn()?;
        diesel::insert_into(configs::table)
            .values(&NewDeviceConfig {
                device_id: device.id,
                wire_id,
                winch,
            })
            .execute(&mut conn)?;
        last_insert_id(&mut conn)
    }

    pub fn get_config(&self, id: i32) -> Result<DeviceConfig> {
        let mut conn = self.get_conn()?;
        configs::table
            .find(id)
            .first::<DeviceConfig>(&mut conn)
            .optional()?
            .ok_or_else(|| DbError::not_found("Config", id))
    }

    pub fn list_configs(&self) -> Result<Vec<DeviceConfig>> {
        let mut conn = self.get_conn()?;
        Ok(configs::table.order(configs::id.asc()).load::<DeviceConfig>(&mut conn)?)
    }

    /// Human-readable description of a config
    pub fn describe_config(&self, config: &DeviceConfig) -> Result<String> {
        let device = self.get_device(config.device_id)?;
        let wire = self.wire_by_id(config.wire_id)?;
        Ok(config_label(&device, config, wire.as_ref()))
    }

    pub fn wire_by_id(&self, id: Option<i32>) -> Result<Option<Wire>> {
        let Some(id) = id else {
            return Ok(None);
        };
        let mut conn = self.get_conn()?;
        Ok(wires::table.find(id).first::<Wire>(&mut conn).optional()?)
    }

    // ========================================================================
    // Cruises
    // ========================================================================

    pub fn create_cruise(
        &self,
        name: &str,
        number: &str,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<i32> {
        let start_date = crate::timestamp::truncate_seconds(start).naive_utc();
        let end_date = end.map(|e| crate::timestamp::truncate_seconds(e).naive_utc());
        if let Some(end) = end_date {
            if end < start_date {
                return Err(CruiseError::EndBeforeStart { start: start_date, end }.into());
            }
        }
        let mut conn = self.get_conn()?;
        let clashes: i64 = cruises::table
            .filter(cruises::name.eq(name).or(cruises::number.eq(number)))
            .count()
            .get_result(&mut conn)?;
        if clashes > 0 {
            return Err(DbError::Validation(format!(
                "A cruise named '{}' or numbered '{}' already exists",
                name, number
            )));
        }
        diesel::insert_into(cruises::table)
            .values(&NewCruise {
                name,
                number,
                start_date,
                end_date,
            })
            .execute(&mut conn)?;
        last_insert_id(&mut conn)
    }

    pub fn list_cruises(&self) -> Result<Vec<Cruise>> {
        let mut conn = self.get_conn()?;
        Ok(cruises::table
            .order((cruises::start_date.asc(), cruises::id.asc()))
            .load::<Cruise>(&mut conn)?)
    }

    pub fn get_cruise(&self, id: i32) -> Result<Cruise> {
        let mut conn = self.get_conn()?;
        cruises::table
            .find(id)
            .first::<Cruise>(&mut conn)
            .optional()?
            .ok_or_else(|| DbError::not_found("Cruise", id))
    }

    pub fn require_cruise(&self, number: &str) -> Result<Cruise> {
        let mut conn = self.get_conn()?;
        cruises::table
            .filter(cruises::number.eq(number))
            .first::<Cruise>(&mut conn)
            .optional()?
            .ok_or_else(|| DbError::not_found("Cruise", number))
    }

    /// The cruise in progress at `now`; errors when cruises overlap
    pub fn get_active_cruise(&self, now: DateTime<Utc>) -> Result<Option<Cruise>> {
        let cruises = self.list_cruises()?;
        Ok(cruise::resolve_active(&cruises, now)?.cloned())
    }

    /// Set or move the end of a cruise. Ended cruises cannot be changed.
    pub fn end_cruise(&self, number: &str, end: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
        let cruise = self.require_cruise(number)?;
        cruise.check_editable(CruiseField::EndDate, now)?;
        let end_date = crate::timestamp::truncate_seconds(end).naive_utc();
        if end_date < cruise.start_date {
            return Err(CruiseError::EndBeforeStart {
                start: cruise.start_date,
                end: end_date,
            }
            .into());
        }
        let mut conn = self.get_conn()?;
        diesel::update(cruises::table.find(cruise.id))
            .set(cruises::end_date.eq(Some(end_date)))
            .execute(&mut conn)?;
        Ok(())
    }

    /// Apply field edits permitted by the cruise's current status
    pub fn update_cruise(&self, number: &str, update: &CruiseUpdate, now: DateTime<Utc>) -> Result<Cruise> {
        let cruise = self.require_cruise(number)?;
        if update.name.is_some() {
            cruise.check_editable(CruiseField::Name, now)?;
        }
        if update.number.is_some() {
            cruise.check_editable(CruiseField::Number, now)?;
        }
        if update.start_date.is_some() {
            cruise.check_editable(CruiseField::StartDate, now)?;
        }

        let name = update.name.clone().unwrap_or_else(|| cruise.name.clone());
        let new_number = update.number.clone().unwrap_or_else(|| cruise.number.clone());
        let start_date = update
            .start_date
            .map(|s| crate::timestamp::truncate_seconds(s).naive_utc())
            .unwrap_or(cruise.start_date);
        if let Some(end) = cruise.end_date {
            if end < start_date {
                return Err(CruiseError::EndBeforeStart { start: start_date, end }.into());
            }
        }

        let mut conn = self.get_conn()?;
        diesel::update(cruises::table.find(cruise.id))
            .set((
                cruises::name.eq(&name),
                cruises::number.eq(&new_number),
                cruises::start_date.eq(start_date),
            ))
            .execute(&mut conn)?;
        self.get_cruise(cruise.id)
    }

    /// Attach a device config to a cruise
    pub fn add_config_to_cruise(&self, number: &str, config_id: i32, now: DateTime<Utc>) -> Result<()> {
        let cruise = self.require_cruise(number)?;
        cruise.check_editable(CruiseField::Configs, now)?;
        let config = self.get_config(config_id)?;
        if self
            .cruise_configs(cruise.id)?
            .iter()
            .any(|c| c.device_id == config.device_id && c.id != config.id)
        {
            return Err(MatchError::DuplicateConfig {
                device_id: config.device_id,
                cruise_id: cruise.id,
            }
            .into());
        }
        let mut conn = self.get_conn()?;
        diesel::insert_or_ignore_into(cruise_configs::table)
            .values(&NewCruiseConfig {
                cruise_id: cruise.id,
                config_id: config.id,
            })
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn cruise_configs(&self, cruise_id: i32) -> Result<Vec<DeviceConfig>> {
        let mut conn = self.get_conn()?;
        let config_ids: Vec<i32> = cruise_configs::table
            .filter(cruise_configs::cruise_id.eq(cruise_id))
            .select(cruise_configs::config_id)
            .load(&mut conn)?;
        Ok(configs::table
            .filter(configs::id.eq_any(config_ids))
            .order(configs::id.asc())
            .load::<DeviceConfig>(&mut conn)?)
    }

    /// Devices configured on a cruise, in configuration order
    pub fn cruise_devices(&self, cruise_id: i32) -> Result<Vec<Device>> {
        let forest = self.device_forest()?;
        Ok(self
            .cruise_configs(cruise_id)?
            .iter()
            .filter_map(|c| forest.get(c.device_id).cloned())
            .collect())
    }

    /// Top-level devices of everything configured on a cruise
    pub fn parent_devices(&self, cruise_id: i32) -> Result<Vec<Device>> {
        let configured = self.cruise_devices(cruise_id)?;
        let forest = self.device_forest()?;
        Ok(forest
            .top_level_parents(&configured)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Devices configured on a cruise whose direct parent is `parent_id`
    pub fn child_devices(&self, parent_id: i32, cruise_id: i32) -> Result<Vec<Device>> {
        let configured = self.cruise_devices(cruise_id)?;
        let forest = self.device_forest()?;
        Ok(forest
            .child_devices(parent_id, &configured)
            .into_iter()
            .cloned()
            .collect())
    }

    /// The config in effect for a device on a cruise
    pub fn find_config(&self, cruise_id: i32, device_id: i32) -> Result<Option<DeviceConfig>> {
        let configs = self.cruise_configs(cruise_id)?;
        Ok(matcher::single_config(configs, device_id, cruise_id)?)
    }

    // ========================================================================
    // Event log
    // ========================================================================

    /// Record a device event with the position it happened at
    pub fn log_event(
        &self,
        cruise_id: i32,
        device_id: i32,
        event_id: i32,
        timestamp: DateTime<Utc>,
        position: Position,
    ) -> Result<i32> {
        let timestamp = crate::timestamp::truncate_seconds(timestamp).naive_utc();
        let mut conn = self.get_conn()?;
        conn.transaction::<_, DbError, _>(|conn| {
            diesel::insert_into(gps_fixes::table)
                .values(&NewGpsFix {
                    latitude_degree: position.latitude_degree,
                    latitude_minute: position.latitude_minute,
                    longitude_degree: position.longitude_degree,
                    longitude_minute: position.longitude_minute,
                })
                .execute(conn)?;
            let gps_id = last_insert_id(conn)?;
            diesel::insert_into(ship_logs::table)
                .values(&NewLogEntry {
                    cruise_id,
                    device_id,
                    event_id,
                    gps_id,
                    timestamp,
                })
                .execute(conn)?;
            last_insert_id(conn)
        })
    }

    pub fn get_log_entry(&self, id: i32) -> Result<LogEntry> {
        let mut conn = self.get_conn()?;
        ship_logs::table
            .find(id)
            .first::<LogEntry>(&mut conn)
            .optional()?
            .ok_or_else(|| DbError::not_found("Log entry", id))
    }

    pub fn get_gps_fix(&self, id: i32) -> Result<GpsFix> {
        let mut conn = self.get_conn()?;
        gps_fixes::table
            .find(id)
            .first::<GpsFix>(&mut conn)
            .optional()?
            .ok_or_else(|| DbError::not_found("GPS fix", id))
    }

    /// Log entries ordered by time, for one cruise or all of them
    pub fn log_entries(&self, cruise_id: Option<i32>) -> Result<Vec<LogEntry>> {
        let mut conn = self.get_conn()?;
        let mut query = ship_logs::table.into_boxed();
        if let Some(id) = cruise_id {
            query = query.filter(ship_logs::cruise_id.eq(id));
        }
        Ok(query
            .order((ship_logs::timestamp.asc(), ship_logs::id.asc()))
            .load::<LogEntry>(&mut conn)?)
    }

    pub fn device_log(&self, cruise_id: i32, device_id: i32) -> Result<Vec<LogEntry>> {
        let mut conn = self.get_conn()?;
        Ok(ship_logs::table
            .filter(ship_logs::cruise_id.eq(cruise_id))
            .filter(ship_logs::device_id.eq(device_id))
            .order((ship_logs::timestamp.asc(), ship_logs::id.asc()))
            .load::<LogEntry>(&mut conn)?)
    }

    /// Log entries with cruise, device, event and position resolved
    pub fn log_records(&self, cruise_id: Option<i32>) -> Result<Vec<LogRecord>> {
        let entries = self.log_entries(cruise_id)?;
        let mut conn = self.get_conn()?;
        let cruises: HashMap<i32, Cruise> = cruises::table
            .load::<Cruise>(&mut conn)?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();
        let devices: HashMap<i32, Device> = devices::table
            .load::<Device>(&mut conn)?
            .into_iter()
            .map(|d| (d.id, d))
            .collect();
        let events: HashMap<i32, Event> = events::table
            .load::<Event>(&mut conn)?
            .into_iter()
            .map(|e| (e.id, e))
            .collect();
        let gps_ids: Vec<i32> = entries.iter().map(|e| e.gps_id).collect();
        let fixes: HashMap<i32, GpsFix> = gps_fixes::table
            .filter(gps_fixes::id.eq_any(gps_ids))
            .load::<GpsFix>(&mut conn)?
            .into_iter()
            .map(|g| (g.id, g))
            .collect();

        entries
            .into_iter()
            .map(|entry| {
                Ok(LogRecord {
                    cruise: lookup(&cruises, entry.cruise_id, "Cruise")?,
                    device: lookup(&devices, entry.device_id, "Device")?,
                    event: lookup(&events, entry.event_id, "Event")?,
                    gps: lookup(&fixes, entry.gps_id, "GPS fix")?,
                    entry,
                })
            })
            .collect()
    }

    /// The deploy entry paired with a recovery entry, if any
    pub fn find_deployment(&self, recovery: &LogEntry) -> Result<Option<LogEntry>> {
        let Some(deploy) = self.get_event_by_name(DEPLOY_EVENT)? else {
            return Ok(None);
        };
        let records = self.device_log(recovery.cruise_id, recovery.device_id)?;
        Ok(matcher::find_deployment(recovery, &records, deploy.id).cloned())
    }

    // ========================================================================
    // Casts
    // ========================================================================

    /// Insert a cast together with its report; neither is kept if either fails
    pub fn create_cast(
        &self,
        deployment: &LogEntry,
        recovery: &LogEntry,
        config_id: i32,
        stats: &CastStats,
    ) -> Result<i32> {
        let mut conn = self.get_conn()?;
        conn.transaction::<_, DbError, _>(|conn| {
            diesel::insert_into(casts::table)
                .values(&NewCast {
                    cruise_id: recovery.cruise_id,
                    deployment_id: deployment.id,
                    recovery_id: recovery.id,
                    config_id,
                })
                .execute(conn)?;
            let cast_id = last_insert_id(conn)?;
            replace_cast_report(conn, cast_id, stats)?;
            Ok(cast_id)
        })
    }

    pub fn cast_for_recovery(&self, recovery_id: i32) -> Result<Option<Cast>> {
        let mut conn = self.get_conn()?;
        Ok(casts::table
            .filter(casts::recovery_id.eq(recovery_id))
            .order(casts::id.asc())
            .first::<Cast>(&mut conn)
            .optional()?)
    }

    /// Store the statistics for a cast, replacing any earlier report
    pub fn save_cast_report(&self, cast_id: i32, stats: &CastStats) -> Result<i32> {
        let mut conn = self.get_conn()?;
        conn.transaction::<_, DbError, _>(|conn| replace_cast_report(conn, cast_id, stats))
    }

    pub fn cast_report(&self, cast_id: i32) -> Result<Option<CastReport>> {
        let mut conn = self.get_conn()?;
        Ok(cast_reports::table
            .filter(cast_reports::cast_id.eq(cast_id))
            .first::<CastReport>(&mut conn)
            .optional()?)
    }

    pub fn count_casts(&self) -> Result<i64> {
        let mut conn = self.get_conn()?;
        let row: CountResult = diesel::sql_query("SELECT COUNT(*) AS count FROM casts").get_result(&mut conn)?;
        Ok(row.count)
    }

    /// Casts with their log entries, config, wire and report, ordered by
    /// recovery time
    pub fn cast_summaries(&self, filter: CastFilter) -> Result<Vec<CastSummary>> {
        let mut conn = self.get_conn()?;
        let mut query = casts::table.into_boxed();
        if let CastFilter::Cruise(id) = filter {
            query = query.filter(casts::cruise_id.eq(id));
        }
        let cast_rows = query.load::<Cast>(&mut conn)?;

        let entry_ids: Vec<i32> = cast_rows
            .iter()
            .flat_map(|c| [c.deployment_id, c.recovery_id])
            .collect();
        let entries: HashMap<i32, LogEntry> = ship_logs::table
            .filter(ship_logs::id.eq_any(entry_ids))
            .load::<LogEntry>(&mut conn)?
            .into_iter()
            .map(|e| (e.id, e))
            .collect();
        let config_ids: Vec<i32> = cast_rows.iter().map(|c| c.config_id).collect();
        let config_map: HashMap<i32, DeviceConfig> = configs::table
            .filter(configs::id.eq_any(config_ids))
            .load::<DeviceConfig>(&mut conn)?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();
        let cast_ids: Vec<i32> = cast_rows.iter().map(|c| c.id).collect();
        let reports: HashMap<i32, CastReport> = cast_reports::table
            .filter(cast_reports::cast_id.eq_any(cast_ids))
            .order(cast_reports::id.asc())
            .load::<CastReport>(&mut conn)?
            .into_iter()
            .map(|r| (r.cast_id, r))
            .collect();
        let cruise_map: HashMap<i32, Cruise> = cruises::table
            .load::<Cruise>(&mut conn)?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();
        let device_map: HashMap<i32, Device> = devices::table
            .load::<Device>(&mut conn)?
            .into_iter()
            .map(|d| (d.id, d))
            .collect();
        let wire_map: HashMap<i32, Wire> = wires::table
            .load::<Wire>(&mut conn)?
            .into_iter()
            .map(|w| (w.id, w))
            .collect();

        let mut summaries = cast_rows
            .into_iter()
            .map(|cast| {
                let recovery = lookup(&entries, cast.recovery_id, "Log entry")?;
                let config = lookup(&config_map, cast.config_id, "Config")?;
                Ok(CastSummary {
                    cruise: lookup(&cruise_map, cast.cruise_id, "Cruise")?,
                    device: lookup(&device_map, recovery.device_id, "Device")?,
                    deployment: lookup(&entries, cast.deployment_id, "Log entry")?,
                    wire: config.wire_id.and_then(|id| wire_map.get(&id).cloned()),
                    report: reports.get(&cast.id).cloned(),
                    recovery,
                    config,
                    cast,
                })
            })
            .collect::<Result<Vec<CastSummary>>>()?;
        summaries.sort_by_key(|s| (s.recovery.timestamp, s.cast.id));
        Ok(summaries)
    }

    // ========================================================================
    // Wire reports
    // ========================================================================

    pub fn create_wire_report(&self, wire_id: i32, start_date: NaiveDate, end_date: NaiveDate) -> Result<i32> {
        if end_date < start_date {
            return Err(DbError::Validation(format!(
                "Wire report end {} is before start {}",
                end_date, start_date
            )));
        }
        let mut conn = self.get_conn()?;
        let now = chrono::Local::now().to_rfc3339();
        diesel::insert_into(wire_reports::table)
            .values(&NewWireReport {
                wire_id,
                start_date,
                end_date,
                created_at: &now,
            })
            .execute(&mut conn)?;
        last_insert_id(&mut conn)
    }

    pub fn list_wire_reports(&self) -> Result<Vec<WireReport>> {
        let mut conn = self.get_conn()?;
        Ok(wire_reports::table
            .order(wire_reports::id.asc())
            .load::<WireReport>(&mut conn)?)
    }
}

fn lookup<T: Clone>(map: &HashMap<i32, T>, id: i32, kind: &'static str) -> Result<T> {
    map.get(&id).cloned().ok_or_else(|| DbError::not_found(kind, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    fn open_temp() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_at(dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn test_schema_display() {
        assert_eq!(CURRENT_SCHEMA.to_string(), "v1.1.0 (shiplog)");
        assert!(CURRENT_SCHEMA.has_feature("casts"));
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        Database::open_at(&path).unwrap().create_event("Deploy").unwrap();
        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.list_events().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let (_dir, db) = open_temp();
        db.create_event("Deploy").unwrap();
        assert!(matches!(db.create_event("Deploy"), Err(DbError::Validation(_))));
        db.create_cruise("Survey", "AE1", t0(), None).unwrap();
        assert!(db.create_cruise("Survey", "AE2", t0(), None).is_err());
    }

    #[test]
    fn test_device_tree_and_events() {
        let (_dir, db) = open_temp();
        db.create_event("Deploy").unwrap();
        db.create_event("Recover").unwrap();
        db.create_device("Plankton Tow", None, &[]).unwrap();
        db.create_device("Zooplankton Tow", Some("Plankton Tow"), &["Deploy", "Recover"])
            .unwrap();
        let child = db.require_device("Zooplankton Tow").unwrap();
        assert_eq!(db.device_events(child.id).unwrap().len(), 2);

        let err = db.set_device_parent("Plankton Tow", Some("Zooplankton Tow")).unwrap_err();
        assert!(err.to_string().contains("cycle"));

        assert!(matches!(
            db.create_device("Net", None, &["Sample"]),
            Err(DbError::NotFound { kind: "Event", .. })
        ));
    }

    #[test]
    fn test_config_winch_range() {
        let (_dir, db) = open_temp();
        db.create_device("CTD", None, &[]).unwrap();
        assert!(db.create_config("CTD", None, 4).is_err());
        assert!(db.create_config("CTD", None, -1).is_err());
        let id = db.create_config("CTD", None, 0).unwrap();
        assert_eq!(
            db.describe_config(&db.get_config(id).unwrap()).unwrap(),
            "CTD not on a winch not on a wire"
        );
    }

    #[test]
    fn test_active_cruise_overlap_detected() {
        let (_dir, db) = open_temp();
        db.create_cruise("First", "AE1", t0(), None).unwrap();
        assert_eq!(db.get_active_cruise(t0()).unwrap().unwrap().number, "AE1");
        db.create_cruise("Second", "AE2", t0() - Duration::days(1), Some(t0() + Duration::days(1)))
            .unwrap();
        assert!(matches!(
            db.get_active_cruise(t0()),
            Err(DbError::Cruise(CruiseError::Overlap(_)))
        ));
        assert!(db.get_active_cruise(t0() - Duration::days(2)).unwrap().is_none());
    }

    #[test]
    fn test_ended_cruise_is_frozen() {
        let (_dir, db) = open_temp();
        db.create_cruise("Survey", "AE1", t0(), None).unwrap();
        db.end_cruise("AE1", t0() + Duration::days(2), t0() + Duration::days(1))
            .unwrap();
        let later = t0() + Duration::days(3);
        assert!(db.end_cruise("AE1", t0() + Duration::days(4), later).is_err());
        let update = CruiseUpdate {
            name: Some("Renamed".into()),
            ..Default::default()
        };
        assert!(db.update_cruise("AE1", &update, later).is_err());
        let renamed = db.update_cruise("AE1", &update, t0() - Duration::days(1)).unwrap();
        assert_eq!(renamed.name, "Renamed");
    }

    #[test]
    fn test_duplicate_device_config_on_cruise() {
        let (_dir, db) = open_temp();
        db.create_device("CTD", None, &[]).unwrap();
        db.create_cruise("Survey", "AE1", t0(), None).unwrap();
        let a = db.create_config("CTD", None, 1).unwrap();
        let b = db.create_config("CTD", None, 2).unwrap();
        db.add_config_to_cruise("AE1", a, t0()).unwrap();
        assert!(matches!(
            db.add_config_to_cruise("AE1", b, t0()),
            Err(DbError::Match(MatchError::DuplicateConfig { .. }))
        ));
        let cruise = db.require_cruise("AE1").unwrap();
        let device = db.require_device("CTD").unwrap();
        assert_eq!(db.find_config(cruise.id, device.id).unwrap().unwrap().id, a);
    }

    #[test]
    fn test_cruise_device_grouping() {
        let (_dir, db) = open_temp();
        let tow = db.create_device("Plankton Tow", None, &[]).unwrap();
        db.create_device("Zooplankton Tow", Some("Plankton Tow"), &[]).unwrap();
        db.create_device("CTD", None, &[]).unwrap();
        db.create_cruise("Survey", "AE1", t0(), None).unwrap();
        let zoo = db.create_config("Zooplankton Tow", None, 0).unwrap();
        let ctd = db.create_config("CTD", None, 1).unwrap();
        db.add_config_to_cruise("AE1", zoo, t0()).unwrap();
        db.add_config_to_cruise("AE1", ctd, t0()).unwrap();
        let cruise = db.require_cruise("AE1").unwrap();

        let parents: Vec<String> = db
            .parent_devices(cruise.id)
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(parents, vec!["CTD", "Plankton Tow"]);
        let children = db.child_devices(tow, cruise.id).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "Zooplankton Tow");
    }

    #[test]
    fn test_log_records_resolve_names() {
        let (_dir, db) = open_temp();
        let deploy = db.create_event("Deploy").unwrap();
        let ctd = db.create_device("CTD", None, &["Deploy"]).unwrap();
        let cruise = db.create_cruise("Survey", "AE1", t0(), None).unwrap();
        let position = Position {
            latitude_degree: 44,
            latitude_minute: 38.25,
            longitude_degree: -124,
            longitude_minute: 3.5,
        };
        db.log_event(cruise, ctd, deploy, t0() + Duration::hours(1), position)
            .unwrap();
        let records = db.log_records(Some(cruise)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].device.name, "CTD");
        assert_eq!(records[0].gps.position(), position);
        assert_eq!(records[0].label(), "2024-06-01 09:00:00: AE1 - CTD Deploy");
    }

    fn logged_pair(db: &Database) -> (LogEntry, LogEntry, i32) {
        let deploy = db.create_event("Deploy").unwrap();
        let recover = db.create_event("Recover").unwrap();
        let ctd = db.create_device("CTD", None, &[]).unwrap();
        let cruise = db.create_cruise("Survey", "AE1", t0(), None).unwrap();
        let config = db.create_config("CTD", None, 1).unwrap();
        let d = db.log_event(cruise, ctd, deploy, t0(), Position::default()).unwrap();
        let r = db
            .log_event(cruise, ctd, recover, t0() + Duration::hours(2), Position::default())
            .unwrap();
        (db.get_log_entry(d).unwrap(), db.get_log_entry(r).unwrap(), config)
    }

    #[test]
    fn test_save_cast_report_replaces() {
        let (_dir, db) = open_temp();
        let (deployment, recovery, config) = logged_pair(&db);
        let cast = db
            .create_cast(&deployment, &recovery, config, &CastStats::default())
            .unwrap();
        assert!(db.cast_report(cast).unwrap().unwrap().stats().is_empty());
        let stats = CastStats {
            max_tension: Some(500.0),
            max_payout: Some(1200.0),
            max_speed: Some(60.0),
        };
        db.save_cast_report(cast, &stats).unwrap();
        assert_eq!(db.cast_report(cast).unwrap().unwrap().stats(), stats);
        let summaries = db.cast_summaries(CastFilter::All).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].label(), "Survey CTD cast recovered at 10:00 on 2024-06-01");
        assert_eq!(db.count_casts().unwrap(), 1);
    }

    #[test]
    fn test_cast_not_kept_when_report_fails() {
        let (_dir, db) = open_temp();
        let (deployment, recovery, config) = logged_pair(&db);
        {
            let mut conn = db.get_conn().unwrap();
            diesel::sql_query("DROP TABLE cast_reports").execute(&mut conn).unwrap();
        }
        assert!(db
            .create_cast(&deployment, &recovery, config, &CastStats::default())
            .is_err());
        assert_eq!(db.count_casts().unwrap(), 0);
        assert!(db.cast_for_recovery(recovery.id).unwrap().is_none());
    }
}
