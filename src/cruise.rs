//! Cruise lifecycle: status, the active-cruise lookup and edit rules
//!
//! All checks take the current instant as a parameter. Nothing in here
//! reads the clock, so the same cruise list always resolves the same way
//! for the same `now`.

use crate::db::Cruise;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fmt;
use thiserror::Error;

/// Where a cruise sits relative to a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CruiseStatus {
    Future,
    Active,
    Ended,
}

impl fmt::Display for CruiseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CruiseStatus::Future => write!(f, "FUTURE"),
            CruiseStatus::Active => write!(f, "ACTIVE"),
            CruiseStatus::Ended => write!(f, "ENDED"),
        }
    }
}

/// Cruise fields an operator can edit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CruiseField {
    Name,
    Number,
    StartDate,
    EndDate,
    Configs,
}

impl fmt::Display for CruiseField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CruiseField::Name => "name",
            CruiseField::Number => "number",
            CruiseField::StartDate => "start date",
            CruiseField::EndDate => "end date",
            CruiseField::Configs => "device configurations",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CruiseError {
    #[error("Overlapping cruises not allowed: {}", .0.join(", "))]
    Overlap(Vec<String>),

    #[error("cannot change {field} of cruise {number} while it is {status}")]
    ReadOnly {
        number: String,
        field: CruiseField,
        status: CruiseStatus,
    },

    #[error("cruise end {end} is before its start {start}")]
    EndBeforeStart {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
}

impl Cruise {
    /// True once the end date has passed. Open-ended cruises never end.
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        matches!(self.end_date, Some(end) if end < now.naive_utc())
    }

    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.start_date <= now.naive_utc()
    }

    pub fn is_future(&self, now: DateTime<Utc>) -> bool {
        !self.has_started(now)
    }

    /// Start has passed and the end (if any) has not
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.has_started(now) && !self.has_ended(now)
    }

    pub fn status(&self, now: DateTime<Utc>) -> CruiseStatus {
        if self.has_ended(now) {
            CruiseStatus::Ended
        } else if self.has_started(now) {
            CruiseStatus::Active
        } else {
            CruiseStatus::Future
        }
    }

    /// Display label such as `ACTIVE - Spring Survey (AE1901)`
    pub fn label(&self, now: DateTime<Utc>) -> String {
        format!("{} - {} ({})", self.status(now), self.name, self.number)
    }

    /// Whether this cruise's time window intersects another's
    pub fn overlaps(&self, other: &Cruise) -> bool {
        let self_before_other = matches!(self.end_date, Some(end) if end < other.start_date);
        let other_before_self = matches!(other.end_date, Some(end) if end < self.start_date);
        !self_before_other && !other_before_self
    }

    /// Reject an edit of `field` given the cruise's current status
    pub fn check_editable(&self, field: CruiseField, now: DateTime<Utc>) -> Result<(), CruiseError> {
        let status = self.status(now);
        if read_only_fields(status).contains(&field) {
            return Err(CruiseError::ReadOnly {
                number: self.number.clone(),
                field,
                status,
            });
        }
        Ok(())
    }
}

/// Fields locked for a cruise in the given state.
///
/// Ended cruises are frozen. Active cruises may still be ended and have
/// devices configured; everything that identifies the voyage is fixed.
pub fn read_only_fields(status: CruiseStatus) -> &'static [CruiseField] {
    match status {
        CruiseStatus::Future => &[],
        CruiseStatus::Active => &[CruiseField::Name, CruiseField::Number, CruiseField::StartDate],
        CruiseStatus::Ended => &[
            CruiseField::Name,
            CruiseField::Number,
            CruiseField::StartDate,
            CruiseField::EndDate,
            CruiseField::Configs,
        ],
    }
}

/// Find the single cruise whose window contains `now`.
///
/// Returns `Ok(None)` when no cruise is active and an overlap error when
/// more than one is.
pub fn resolve_active(cruises: &[Cruise], now: DateTime<Utc>) -> Result<Option<&Cruise>, CruiseError> {
    let active: Vec<&Cruise> = cruises.iter().filter(|c| c.is_active(now)).collect();
    match active.as_slice() {
        [] => Ok(None),
        [only] => Ok(Some(*only)),
        many => Err(CruiseError::Overlap(
            many.iter().map(|c| c.number.clone()).collect(),
        )),
    }
}

/// Every pair of cruises whose windows intersect
pub fn find_overlaps(cruises: &[Cruise]) -> Vec<(&Cruise, &Cruise)> {
    let mut pairs = Vec::new();
    for (i, a) in cruises.iter().enumerate() {
        for b in &cruises[i + 1..] {
            if a.overlaps(b) {
                pairs.push((a, b));
            }
        }
    }
    pairs
}
