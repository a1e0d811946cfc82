use chrono::{DateTime, NaiveDate, Utc};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use shiplog::cruise::find_overlaps;
use shiplog::db::{config_label, DEPLOY_EVENT, RECOVER_EVENT};
use shiplog::timestamp::{display, parse_date, parse_timestamp};
use shiplog::{
    AnalysisOutcome, CastAnalyzer, CastFilter, CastStats, Config, Cruise, CruiseSelection, CruiseUpdate,
    Database, Device, DeviceForest, Exporter, GpsLog, CURRENT_SCHEMA,
};
use std::io;
use tracing_subscriber::EnvFilter;

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser, Debug)]
#[command(name = "shiplog")]
#[command(author, version, about = "Shipboard event log: deployments, recoveries and winch cast statistics")]
struct Cli {
    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create .shiplog with a database, default config and the Deploy/Recover events
    Init,

    /// Manage event types
    Event {
        #[command(subcommand)]
        action: EventAction,
    },

    /// Manage devices and their hierarchy
    Device {
        #[command(subcommand)]
        action: DeviceAction,
    },

    /// Manage winch wires
    Wire {
        #[command(subcommand)]
        action: WireAction,
    },

    /// Manage device configurations (device + wire + winch)
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Manage cruises
    Cruise {
        #[command(subcommand)]
        action: CruiseAction,
    },

    /// Log a device event on the active cruise
    Log {
        /// Device name
        device: String,

        /// Event name, e.g. Deploy or Recover
        event: String,

        /// When it happened (defaults to now)
        #[arg(long, value_parser = parse_timestamp_arg)]
        at: Option<DateTime<Utc>>,

        /// Cruise number (defaults to the cruise active at that time)
        #[arg(long)]
        cruise: Option<String>,

        /// Do not derive a cast from a Recover
        #[arg(long)]
        no_analyze: bool,
    },

    /// List logged events
    Logs {
        /// Only this cruise
        #[arg(long)]
        cruise: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Derive or refresh the cast ending at a Recover log entry
    Analyze {
        /// Log entry ID of the recovery
        id: i32,
    },

    /// List casts with their winch statistics
    Casts {
        /// Only this cruise
        #[arg(long)]
        cruise: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Write CSV exports into the media directory
    Export {
        #[command(subcommand)]
        action: ExportAction,
    },

    /// Write a per-wire report of cast statistics
    WireReport {
        /// Wire serial number
        serial: String,

        /// First day (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date_arg)]
        start: NaiveDate,

        /// Last day (YYYY-MM-DD), inclusive
        #[arg(long, value_parser = parse_date_arg)]
        end: NaiveDate,
    },

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
enum EventAction {
    /// Create an event type
    Add { name: String },
    /// List event types
    List {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum DeviceAction {
    /// Create a device
    Add {
        name: String,

        /// Parent device name
        #[arg(long)]
        parent: Option<String>,

        /// Applicable event (repeatable)
        #[arg(long = "event")]
        events: Vec<String>,
    },
    /// Add applicable events to a device
    Events {
        name: String,
        #[arg(required = true)]
        events: Vec<String>,
    },
    /// Change or clear a device's parent
    SetParent {
        name: String,
        /// New parent; omit to make the device top-level
        parent: Option<String>,
    },
    /// List devices
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show the device hierarchy
    Tree,
}

#[derive(Subcommand, Debug)]
enum WireAction {
    /// Register a wire
    Add { name: String, serial: String },
    /// List wires
    List {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Create a configuration
    Add {
        device: String,

        /// Wire serial number
        #[arg(long)]
        wire: Option<String>,

        /// Winch number, 0 for none
        #[arg(long, default_value = "0")]
        winch: i32,
    },
    /// List configurations
    List {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum CruiseAction {
    /// Create a cruise
    Add {
        name: String,
        number: String,

        #[arg(long, value_parser = parse_timestamp_arg)]
        start: DateTime<Utc>,

        #[arg(long, value_parser = parse_timestamp_arg)]
        end: Option<DateTime<Utc>>,
    },
    /// Set the end of a cruise (defaults to now)
    End {
        number: String,

        #[arg(long, value_parser = parse_timestamp_arg)]
        at: Option<DateTime<Utc>>,
    },
    /// Edit a cruise's name, number or start
    Edit {
        number: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long = "new-number")]
        new_number: Option<String>,

        #[arg(long, value_parser = parse_timestamp_arg)]
        start: Option<DateTime<Utc>>,
    },
    /// List cruises with their status
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show the active cruise
    Active,
    /// Report overlapping cruises
    Check,
    /// Show the devices configured on a cruise
    Devices { number: String },
    /// Attach a configuration to a cruise
    AddConfig { number: String, config_id: i32 },
}

#[derive(Subcommand, Debug)]
enum ExportAction {
    /// Export the event log
    Events {
        /// Cruise number (all cruises when omitted)
        #[arg(long)]
        cruise: Option<String>,
    },
    /// Export the cast log
    Casts {
        /// Cruise number (all cruises when omitted)
        #[arg(long)]
        cruise: Option<String>,
    },
}

fn parse_timestamp_arg(value: &str) -> Result<DateTime<Utc>, String> {
    parse_timestamp(value).ok_or_else(|| format!("invalid timestamp '{}' (use YYYY-MM-DD HH:MM[:SS] or RFC 3339)", value))
}

fn parse_date_arg(value: &str) -> Result<NaiveDate, String> {
    parse_date(value).ok_or_else(|| format!("invalid date '{}' (use YYYY-MM-DD)", value))
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli.command) {
        eprintln!("{} {}", "Error:".red(), e);
        std::process::exit(1);
    }
}

fn run(command: Command) -> CliResult {
    match command {
        Command::Init => init(),
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "shiplog", &mut io::stdout());
            Ok(())
        }
        Command::Event { action } => event_command(&Database::open()?, action),
        Command::Device { action } => device_command(&Database::open()?, action),
        Command::Wire { action } => wire_command(&Database::open()?, action),
        Command::Config { action } => config_command(&Database::open()?, action),
        Command::Cruise { action } => cruise_command(&Database::open()?, action),
        Command::Log {
            device,
            event,
            at,
            cruise,
            no_analyze,
        } => log_command(&Database::open()?, &device, &event, at, cruise.as_deref(), no_analyze),
        Command::Logs { cruise, json } => {
            let db = Database::open()?;
            let cruise_id = match cruise {
                Some(number) => Some(db.require_cruise(&number)?.id),
                None => None,
            };
            let records = db.log_records(cruise_id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
                return Ok(());
            }
            if records.is_empty() {
                println!("No events logged.");
            }
            for r in &records {
                println!("{:>4}  {}  {}", r.entry.id.to_string().cyan(), r.label(), r.gps.position());
            }
            Ok(())
        }
        Command::Analyze { id } => {
            let db = Database::open()?;
            let config = Config::load();
            let telemetry = config.telemetry_source();
            let outcome = CastAnalyzer::new(&db, &telemetry).analyze_recovery(id)?;
            print_outcome(&outcome);
            Ok(())
        }
        Command::Casts { cruise, json } => {
            let db = Database::open()?;
            let filter = match cruise {
                Some(number) => CastFilter::Cruise(db.require_cruise(&number)?.id),
                None => CastFilter::All,
            };
            let casts = db.cast_summaries(filter)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&casts)?);
                return Ok(());
            }
            if casts.is_empty() {
                println!("No casts.");
            }
            for c in &casts {
                println!(
                    "{:>4}  {}  {}",
                    c.cast.id.to_string().cyan(),
                    c.label(),
                    format_stats(&c.stats()).dimmed()
                );
            }
            Ok(())
        }
        Command::Export { action } => {
            let db = Database::open()?;
            let config = Config::load();
            let settings = config.export_settings();
            let exporter = Exporter::new(&db, &settings);
            let path = match action {
                ExportAction::Events { cruise } => exporter.export_event_log(&selection(&db, cruise)?)?,
                ExportAction::Casts { cruise } => exporter.export_cast_log(&selection(&db, cruise)?)?,
            };
            println!("{} {}", "Exported".green(), path.display());
            Ok(())
        }
        Command::WireReport { serial, start, end } => {
            let db = Database::open()?;
            let config = Config::load();
            let settings = config.export_settings();
            let path = Exporter::new(&db, &settings).export_wire_report(&serial, start, end)?;
            println!("{} {}", "Exported".green(), path.display());
            Ok(())
        }
    }
}

fn init() -> CliResult {
    let shiplog_dir = std::path::Path::new(".shiplog");
    std::fs::create_dir_all(shiplog_dir)?;
    let config_path = shiplog_dir.join("config.toml");
    if !config_path.exists() {
        std::fs::write(&config_path, Config::default_toml())?;
        println!("{} {}", "Created".green(), config_path.display());
    }

    let db = Database::open()?;
    for name in [DEPLOY_EVENT, RECOVER_EVENT] {
        if db.get_event_by_name(name)?.is_none() {
            db.create_event(name)?;
        }
    }
    println!(
        "{} shiplog database at {} (schema {})",
        "Initialized".green(),
        Database::db_path().display(),
        CURRENT_SCHEMA
    );
    Ok(())
}

fn selection(db: &Database, cruise: Option<String>) -> Result<CruiseSelection, Box<dyn std::error::Error>> {
    Ok(match cruise {
        Some(number) => CruiseSelection::Cruise(db.require_cruise(&number)?),
        None => CruiseSelection::All,
    })
}

fn event_command(db: &Database, action: EventAction) -> CliResult {
    match action {
        EventAction::Add { name } => {
            let id = db.create_event(&name)?;
            println!("{} event {} (ID: {})", "Created".green(), name, id);
        }
        EventAction::List { json } => {
            let events = db.list_events()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&events)?);
            } else {
                for e in events {
                    println!("{:>4}  {}", e.id.to_string().cyan(), e.name);
                }
            }
        }
    }
    Ok(())
}

fn device_command(db: &Database, action: DeviceAction) -> CliResult {
    match action {
        DeviceAction::Add { name, parent, events } => {
            let events: Vec<&str> = events.iter().map(String::as_str).collect();
            let id = db.create_device(&name, parent.as_deref(), &events)?;
            println!("{} device {} (ID: {})", "Created".green(), name, id);
        }
        DeviceAction::Events { name, events } => {
            let events: Vec<&str> = events.iter().map(String::as_str).collect();
            db.add_device_events(&name, &events)?;
            println!("{} events for {}", "Updated".green(), name);
        }
        DeviceAction::SetParent { name, parent } => {
            db.set_device_parent(&name, parent.as_deref())?;
            match parent {
                Some(p) => println!("{} {} is now under {}", "Updated".green(), name, p),
                None => println!("{} {} is now top-level", "Updated".green(), name),
            }
        }
        DeviceAction::List { json } => {
            let devices = db.list_devices()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
                return Ok(());
            }
            let forest = DeviceForest::new(devices.clone());
            for d in &devices {
                let events: Vec<String> = db.device_events(d.id)?.into_iter().map(|e| e.name).collect();
                let parent = forest.parent_of(d).map(|p| format!(" (in {})", p.name)).unwrap_or_default();
                println!(
                    "{:>4}  {}{}  {}",
                    d.id.to_string().cyan(),
                    d.name,
                    parent.dimmed(),
                    events.join(", ")
                );
            }
        }
        DeviceAction::Tree => {
            let forest = db.device_forest()?;
            for root in forest.roots() {
                print_device_tree(&forest, root, 0);
            }
        }
    }
    Ok(())
}

fn print_device_tree(forest: &DeviceForest, device: &Device, depth: usize) {
    println!("{}{}", "  ".repeat(depth), device.name);
    for child in forest.all_children(device.id) {
        print_device_tree(forest, child, depth + 1);
    }
}

fn wire_command(db: &Database, action: WireAction) -> CliResult {
    match action {
        WireAction::Add { name, serial } => {
            let id = db.create_wire(&name, &serial)?;
            println!("{} wire {} ({}) (ID: {})", "Created".green(), name, serial, id);
        }
        WireAction::List { json } => {
            let wires = db.list_wires()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&wires)?);
            } else {
                for w in wires {
                    println!("{:>4}  {}", w.id.to_string().cyan(), w);
                }
            }
        }
    }
    Ok(())
}

fn config_command(db: &Database, action: ConfigAction) -> CliResult {
    match action {
        ConfigAction::Add { device, wire, winch } => {
            let id = db.create_config(&device, wire.as_deref(), winch)?;
            let label = db.describe_config(&db.get_config(id)?)?;
            println!("{} config {} (ID: {})", "Created".green(), label, id);
        }
        ConfigAction::List { json } => {
            let configs = db.list_configs()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&configs)?);
            } else {
                for c in &configs {
                    println!("{:>4}  {}", c.id.to_string().cyan(), db.describe_config(c)?);
                }
            }
        }
    }
    Ok(())
}

fn cruise_command(db: &Database, action: CruiseAction) -> CliResult {
    let now = Utc::now();
    match action {
        CruiseAction::Add { name, number, start, end } => {
            let id = db.create_cruise(&name, &number, start, end)?;
            println!("{} cruise {} ({}) (ID: {})", "Created".green(), name, number, id);
            warn_overlaps(&db.list_cruises()?);
        }
        CruiseAction::End { number, at } => {
            db.end_cruise(&number, at.unwrap_or(now), now)?;
            println!("{} end of cruise {}", "Set".green(), number);
            warn_overlaps(&db.list_cruises()?);
        }
        CruiseAction::Edit {
            number,
            name,
            new_number,
            start,
        } => {
            let update = CruiseUpdate {
                name,
                number: new_number,
                start_date: start,
            };
            let cruise = db.update_cruise(&number, &update, now)?;
            println!("{} {}", "Updated".green(), cruise.label(now));
            warn_overlaps(&db.list_cruises()?);
        }
        CruiseAction::List { json } => {
            let cruises = db.list_cruises()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&cruises)?);
                return Ok(());
            }
            for c in &cruises {
                println!("{:>4}  {}  {}", c.id.to_string().cyan(), c.label(now), cruise_window(c).dimmed());
            }
        }
        CruiseAction::Active => match db.get_active_cruise(now)? {
            Some(c) => println!("{}  {}", c.label(now), cruise_window(&c).dimmed()),
            None => println!("No active cruise."),
        },
        CruiseAction::Check => {
            let cruises = db.list_cruises()?;
            let overlaps = find_overlaps(&cruises);
            if overlaps.is_empty() {
                println!("{} no overlapping cruises", "OK".green());
            }
            for (a, b) in overlaps {
                println!("{} {} overlaps {}", "Overlap:".yellow(), a.number, b.number);
            }
        }
        CruiseAction::Devices { number } => {
            let cruise = db.require_cruise(&number)?;
            for top in db.parent_devices(cruise.id)? {
                println!("{}", top.name);
                for child in db.child_devices(top.id, cruise.id)? {
                    println!("  {}", child.name);
                }
            }
        }
        CruiseAction::AddConfig { number, config_id } => {
            db.add_config_to_cruise(&number, config_id, now)?;
            let config = db.get_config(config_id)?;
            let device = db.get_device(config.device_id)?;
            let wire = db.wire_by_id(config.wire_id)?;
            println!(
                "{} {} to cruise {}",
                "Added".green(),
                config_label(&device, &config, wire.as_ref()),
                number
            );
        }
    }
    Ok(())
}

fn cruise_window(cruise: &Cruise) -> String {
    let end = cruise.end_date.map(display).unwrap_or_else(|| "open".to_string());
    format!("{} to {}", display(cruise.start_date), end)
}

fn warn_overlaps(cruises: &[Cruise]) {
    for (a, b) in find_overlaps(cruises) {
        eprintln!("{} cruise {} overlaps {}", "Warning:".yellow(), a.number, b.number);
    }
}

fn log_command(
    db: &Database,
    device_name: &str,
    event_name: &str,
    at: Option<DateTime<Utc>>,
    cruise_number: Option<&str>,
    no_analyze: bool,
) -> CliResult {
    let timestamp = at.unwrap_or_else(Utc::now);
    let cruise = match cruise_number {
        Some(number) => db.require_cruise(number)?,
        None => db
            .get_active_cruise(timestamp)?
            .ok_or("no active cruise at that time; pass --cruise")?,
    };
    let device = db.require_device(device_name)?;
    let event = db.require_event(event_name)?;

    if !db.device_events(device.id)?.iter().any(|e| e.id == event.id) {
        tracing::warn!(device = %device.name, event = %event.name, "event is not listed for this device");
    }
    if db.find_config(cruise.id, device.id)?.is_none() {
        tracing::warn!(device = %device.name, cruise = %cruise.number, "device is not configured on this cruise");
    }

    let config = Config::load();
    let gps = GpsLog::load_or_empty(&config.gps_path(), config.gps.tolerance_secs);
    let position = gps.position_at(timestamp);
    let id = db.log_event(cruise.id, device.id, event.id, timestamp, position)?;
    println!(
        "{} {} {} at {} ({}) (ID: {})",
        "Logged".green(),
        device.name,
        event.name,
        display(db.get_log_entry(id)?.timestamp),
        position,
        id
    );

    if event.name == RECOVER_EVENT && !no_analyze {
        let telemetry = config.telemetry_source();
        let outcome = CastAnalyzer::new(db, &telemetry).analyze_recovery(id)?;
        print_outcome(&outcome);
    }
    Ok(())
}

fn format_stats(stats: &CastStats) -> String {
    let cell = |v: Option<f64>| v.map(|v| format!("{:.1}", v)).unwrap_or_else(|| "-".to_string());
    format!(
        "tension {}  speed {}  payout {}",
        cell(stats.max_tension),
        cell(stats.max_speed),
        cell(stats.max_payout)
    )
}

fn print_outcome(outcome: &AnalysisOutcome) {
    match outcome {
        AnalysisOutcome::Created { cast_id, stats } => {
            println!("{} cast {}: {}", "Derived".green(), cast_id, format_stats(stats));
        }
        AnalysisOutcome::Updated { cast_id, stats } => {
            println!("{} cast {}: {}", "Recomputed".green(), cast_id, format_stats(stats));
        }
        AnalysisOutcome::NoConfig => {
            println!("{} device is not configured on this cruise", "No cast:".yellow());
        }
        AnalysisOutcome::NoDeployment => {
            println!("{} no deployment logged for this device", "No cast:".yellow());
        }
    }
}
