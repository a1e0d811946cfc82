//! Turning a recovery into a cast with winch statistics
//!
//! Logging a Recover does not create a cast by itself. The caller runs
//! [`CastAnalyzer::analyze_recovery`] afterwards, and may run it again
//! later when telemetry arrives late.

use crate::db::{Database, DbError, LogEntry, RECOVER_EVENT};
use crate::winch::{CastStats, TelemetrySource};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CastError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error("log entry {id} is a '{event}' event, not a {expected}")]
    NotARecovery {
        id: i32,
        event: String,
        expected: &'static str,
    },
}

/// What analysing a recovery did
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    /// A new cast and report were stored
    Created { cast_id: i32, stats: CastStats },
    /// The recovery already had a cast; its report was recomputed
    Updated { cast_id: i32, stats: CastStats },
    /// The device has no config on the cruise
    NoConfig,
    /// No Deploy was logged for the device on the cruise
    NoDeployment,
}

impl AnalysisOutcome {
    pub fn cast_id(&self) -> Option<i32> {
        match self {
            AnalysisOutcome::Created { cast_id, .. } | AnalysisOutcome::Updated { cast_id, .. } => {
                Some(*cast_id)
            }
            _ => None,
        }
    }
}

pub struct CastAnalyzer<'a> {
    db: &'a Database,
    telemetry: &'a TelemetrySource,
}

impl<'a> CastAnalyzer<'a> {
    pub fn new(db: &'a Database, telemetry: &'a TelemetrySource) -> Self {
        Self { db, telemetry }
    }

    /// Derive (or re-derive) the cast ending at a Recover log entry
    pub fn analyze_recovery(&self, recovery_id: i32) -> Result<AnalysisOutcome, CastError> {
        let recovery = self.db.get_log_entry(recovery_id)?;
        let event = self.db.get_event(recovery.event_id)?;
        if event.name != RECOVER_EVENT {
            return Err(CastError::NotARecovery {
                id: recovery_id,
                event: event.name,
                expected: RECOVER_EVENT,
            });
        }

        if let Some(existing) = self.db.cast_for_recovery(recovery.id)? {
            let deployment = self.db.get_log_entry(existing.deployment_id)?;
            let config = self.db.get_config(existing.config_id)?;
            let stats = self.stats_for(config.winch, &deployment, &recovery);
            self.db.save_cast_report(existing.id, &stats)?;
            tracing::info!(cast = existing.id, recovery = recovery.id, "recomputed cast report");
            return Ok(AnalysisOutcome::Updated {
                cast_id: existing.id,
                stats,
            });
        }

        let Some(config) = self.db.find_config(recovery.cruise_id, recovery.device_id)? else {
            tracing::warn!(
                recovery = recovery.id,
                device = recovery.device_id,
                "device is not configured on this cruise; no cast"
            );
            return Ok(AnalysisOutcome::NoConfig);
        };
        let Some(deployment) = self.db.find_deployment(&recovery)? else {
            tracing::warn!(recovery = recovery.id, "no deployment logged for this recovery; no cast");
            return Ok(AnalysisOutcome::NoDeployment);
        };
        if deployment.timestamp > recovery.timestamp {
            tracing::warn!(
                deployment = deployment.id,
                recovery = recovery.id,
                "latest deployment is after the recovery"
            );
        }

        let stats = self.stats_for(config.winch, &deployment, &recovery);
        let cast_id = self.db.create_cast(&deployment, &recovery, config.id, &stats)?;
        tracing::info!(
            cast = cast_id,
            deployment = deployment.id,
            recovery = recovery.id,
            winch = config.winch,
            "derived cast"
        );
        Ok(AnalysisOutcome::Created { cast_id, stats })
    }

    fn stats_for(&self, winch: i32, deployment: &LogEntry, recovery: &LogEntry) -> CastStats {
        self.telemetry
            .cast_stats(winch, deployment.timestamp.and_utc(), recovery.timestamp.and_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CastFilter;
    use crate::gps::Position;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tempfile::TempDir;

    const TELEMETRY: &str = "\"WinchDAC\",\"v2.1\"
\"\"
\"\"
\"\"
\"\"
\"\"
\"\"
\"\"
\"Seconds\",\"Clock\",\"W1 Tension\",\"W1 Speed\",\"W1 Payout\",\"W2 Tension\",\"W2 Speed\",\"W2 Payout\",\"W3 Tension\",\"W3 Speed\",\"W3 Payout\"
\"s\",\"\",\"lbs\",\"m/min\",\"m\",\"lbs\",\"m/min\",\"m\",\"lbs\",\"m/min\",\"m\"
1,06/01/2024 09:30:00 AM,0,0,0,250.5,42,800,0,0,0
2,06/01/2024 10:00:00 AM,0,0,0,512.25,55.5,1650,0,0,0
3,06/01/2024 12:00:00 PM,0,0,0,900,90,9000,0,0,0
";

    struct Fixture {
        _dir: TempDir,
        db: Database,
        telemetry: TelemetrySource,
        cruise: i32,
        ctd: i32,
        deploy: i32,
        recover: i32,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    fn fixture(winch: i32) -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = Database::open_at(dir.path().join("test.db")).unwrap();
        std::fs::write(dir.path().join("2024-06-01 00-00-00 WinchDAC.csv"), TELEMETRY).unwrap();
        let telemetry = TelemetrySource::new(format!("{}/*WinchDAC.csv", dir.path().display()));
        let deploy = db.create_event("Deploy").unwrap();
        let recover = db.create_event("Recover").unwrap();
        let ctd = db.create_device("CTD", None, &["Deploy", "Recover"]).unwrap();
        let cruise = db.create_cruise("Survey", "AE1", t0(), None).unwrap();
        let config = db.create_config("CTD", None, winch).unwrap();
        db.add_config_to_cruise("AE1", config, t0()).unwrap();
        Fixture {
            _dir: dir,
            db,
            telemetry,
            cruise,
            ctd,
            deploy,
            recover,
        }
    }

    impl Fixture {
        fn log(&self, event: i32, hours: i64) -> i32 {
            self.db
                .log_event(self.cruise, self.ctd, event, t0() + Duration::hours(hours), Position::default())
                .unwrap()
        }

        fn analyze(&self, id: i32) -> Result<AnalysisOutcome, CastError> {
            CastAnalyzer::new(&self.db, &self.telemetry).analyze_recovery(id)
        }
    }

    #[test]
    fn test_deploy_then_recover_makes_one_cast() {
        let f = fixture(2);
        f.log(f.deploy, 1);
        let recovery = f.log(f.recover, 3);
        let stats = match f.analyze(recovery).unwrap() {
            AnalysisOutcome::Created { stats, .. } => stats,
            other => panic!("expected a new cast, got {:?}", other),
        };
        assert_eq!(stats.max_tension, Some(512.3));
        assert_eq!(stats.max_speed, Some(55.5));
        assert_eq!(stats.max_payout, Some(1650.0));

        let casts = f.db.cast_summaries(CastFilter::Cruise(f.cruise)).unwrap();
        assert_eq!(casts.len(), 1);
        assert_eq!(casts[0].recovery.id, recovery);
        assert_eq!(casts[0].deployment.timestamp, (t0() + Duration::hours(1)).naive_utc());
        assert_eq!(casts[0].recovery.timestamp, (t0() + Duration::hours(3)).naive_utc());
    }

    #[test]
    fn test_reanalysis_replaces_report() {
        let f = fixture(2);
        f.log(f.deploy, 1);
        let recovery = f.log(f.recover, 3);
        let first = f.analyze(recovery).unwrap();
        let second = f.analyze(recovery).unwrap();
        assert!(matches!(second, AnalysisOutcome::Updated { .. }));
        assert_eq!(first.cast_id(), second.cast_id());
        assert_eq!(f.db.count_casts().unwrap(), 1);
    }

    #[test]
    fn test_winch_zero_cast_has_empty_stats() {
        let f = fixture(0);
        f.log(f.deploy, 1);
        let recovery = f.log(f.recover, 3);
        match f.analyze(recovery).unwrap() {
            AnalysisOutcome::Created { stats, .. } => assert!(stats.is_empty()),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_recover_without_deploy() {
        let f = fixture(2);
        let recovery = f.log(f.recover, 3);
        assert_eq!(f.analyze(recovery).unwrap(), AnalysisOutcome::NoDeployment);
        assert_eq!(f.db.count_casts().unwrap(), 0);
    }

    #[test]
    fn test_unconfigured_device() {
        let f = fixture(2);
        let net = f.db.create_device("Net", None, &["Deploy", "Recover"]).unwrap();
        f.db
            .log_event(f.cruise, net, f.deploy, t0() + Duration::hours(1), Position::default())
            .unwrap();
        let recovery = f
            .db
            .log_event(f.cruise, net, f.recover, t0() + Duration::hours(2), Position::default())
            .unwrap();
        assert_eq!(f.analyze(recovery).unwrap(), AnalysisOutcome::NoConfig);
    }

    #[test]
    fn test_deploy_is_not_a_recovery() {
        let f = fixture(2);
        let deploy = f.log(f.deploy, 1);
        assert!(matches!(f.analyze(deploy), Err(CastError::NotARecovery { .. })));
    }

    #[test]
    fn test_missing_telemetry_still_creates_cast() {
        let f = fixture(2);
        let telemetry = TelemetrySource::new("/nonexistent/*WinchDAC.csv");
        f.log(f.deploy, 1);
        let recovery = f.log(f.recover, 3);
        let outcome = CastAnalyzer::new(&f.db, &telemetry).analyze_recovery(recovery).unwrap();
        match outcome {
            AnalysisOutcome::Created { stats, .. } => assert_eq!(stats, CastStats::default()),
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
