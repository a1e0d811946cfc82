//! Pairing a recovery with its deployment

use crate::db::{DeviceConfig, LogEntry};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MatchError {
    #[error("More than one of the same device configured for this cruise (device {device_id}, cruise {cruise_id})")]
    DuplicateConfig { device_id: i32, cruise_id: i32 },
}

/// The deploy record paired with `recovery`.
///
/// Picks the latest Deploy for the same cruise and device. The deploy is
/// not required to precede the recovery and may already belong to an
/// earlier cast, so a missed Deploy makes the next Recover pair with the
/// previous cycle's deployment.
pub fn find_deployment<'a>(
    recovery: &LogEntry,
    records: &'a [LogEntry],
    deploy_event_id: i32,
) -> Option<&'a LogEntry> {
    records
        .iter()
        .filter(|r| {
            r.cruise_id == recovery.cruise_id
                && r.device_id == recovery.device_id
                && r.event_id == deploy_event_id
        })
        .max_by_key(|r| (r.timestamp, r.id))
}

/// The one config for a device on a cruise
pub fn single_config(
    configs: Vec<DeviceConfig>,
    device_id: i32,
    cruise_id: i32,
) -> Result<Option<DeviceConfig>, MatchError> {
    let mut matching = configs.into_iter().filter(|c| c.device_id == device_id);
    let first = matching.next();
    if matching.next().is_some() {
        return Err(MatchError::DuplicateConfig { device_id, cruise_id });
    }
    Ok(first)
}
