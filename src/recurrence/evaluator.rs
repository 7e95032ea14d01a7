use chrono::{Datelike, Duration, NaiveDate, Weekday};

use super::models::{RecurrenceDescriptor, RecurrenceKind, RecurrenceUnit};

/// Weekday that closes a cycle. Descriptors created on it target the next cycle, and the
/// materializer rolls live anchors forward on it.
pub const CYCLE_BOUNDARY: Weekday = Weekday::Sat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Firing {
    Fires,
    Idle,
    /// The descriptor has run past its end date and must be cancelled by the caller.
    Expired,
}

/// Sunday on or before `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_sunday()))
}

/// key: recurrence-anchor -> most recent Sunday, pushed one cycle out on the boundary day
pub fn anchor_for(reference: NaiveDate, unit: RecurrenceUnit) -> NaiveDate {
    let start = week_start(reference);
    if reference.weekday() == CYCLE_BOUNDARY {
        start + unit.cycle_length()
    } else {
        start
    }
}

/// key: recurrence-evaluator -> fire decision for one day
pub fn evaluate(descriptor: &RecurrenceDescriptor, today: NaiveDate) -> Firing {
    if let RecurrenceKind::Repeating { ends_on } = descriptor.kind {
        if today >= ends_on {
            return Firing::Expired;
        }
    }

    match descriptor.unit {
        RecurrenceUnit::Daily => Firing::Fires,
        RecurrenceUnit::Weekly | RecurrenceUnit::Biweekly => {
            if !descriptor.weekdays.contains(&today.weekday()) {
                return Firing::Idle;
            }
            let offset = (week_start(today) - descriptor.anchor).num_days();
            let cycle = descriptor.unit.cycle_length().num_days();
            if offset < 0 || offset % cycle != 0 {
                Firing::Idle
            } else {
                Firing::Fires
            }
        }
    }
}

pub fn fires_today(descriptor: &RecurrenceDescriptor, today: NaiveDate) -> bool {
    evaluate(descriptor, today) == Firing::Fires
}

/// New anchor for the boundary-day refresh, if one is due.
///
/// Only anchors whose week has already started move; a descriptor created on the boundary
/// day already points at the next cycle and keeps it.
pub fn refreshed_anchor(descriptor: &RecurrenceDescriptor, today: NaiveDate) -> Option<NaiveDate> {
    if today.weekday() != CYCLE_BOUNDARY || descriptor.anchor > today {
        return None;
    }
    Some(descriptor.anchor + descriptor.unit.cycle_length())
}
