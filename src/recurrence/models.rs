use chrono::{DateTime, Duration, NaiveDate, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::evaluator::anchor_for;

/// key: recurrence-models -> series,descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceUnit {
    Daily,
    Weekly,
    Biweekly,
}

impl RecurrenceUnit {
    /// Length of one anchor cycle. Daily series still roll their anchor weekly.
    pub fn cycle_length(self) -> Duration {
        match self {
            RecurrenceUnit::Daily | RecurrenceUnit::Weekly => Duration::weeks(1),
            RecurrenceUnit::Biweekly => Duration::weeks(2),
        }
    }

    pub fn uses_weekdays(self) -> bool {
        !matches!(self, RecurrenceUnit::Daily)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecurrenceKind {
    /// Open-ended.
    Recurring,
    /// Stops on `ends_on`.
    Repeating { ends_on: NaiveDate },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceDescriptor {
    #[serde(flatten)]
    pub kind: RecurrenceKind,
    pub unit: RecurrenceUnit,
    #[serde(default)]
    pub weekdays: Vec<Weekday>,
    /// Sunday that starts the week the next cycle fires in.
    pub anchor: NaiveDate,
}

impl RecurrenceDescriptor {
    /// Builds a descriptor whose anchor is derived from the day it was created on.
    pub fn new(
        kind: RecurrenceKind,
        unit: RecurrenceUnit,
        weekdays: Vec<Weekday>,
        created_on: NaiveDate,
    ) -> Self {
        let mut weekdays = weekdays;
        weekdays.sort_by_key(|day| day.num_days_from_sunday());
        weekdays.dedup();
        Self {
            kind,
            unit,
            weekdays,
            anchor: anchor_for(created_on, unit),
        }
    }

    pub fn ends_on(&self) -> Option<NaiveDate> {
        match self.kind {
            RecurrenceKind::Recurring => None,
            RecurrenceKind::Repeating { ends_on } => Some(ends_on),
        }
    }
}

/// A logical recurring series. Holds the single live descriptor; every entry it
/// materializes points back here through `TimeEntry::series_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringSeries {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub quantity: Decimal,
    pub descriptor: RecurrenceDescriptor,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl RecurringSeries {
    pub fn new(invoice_id: Uuid, quantity: Decimal, descriptor: RecurrenceDescriptor) -> Self {
        Self {
            id: Uuid::new_v4(),
            invoice_id,
            quantity,
            descriptor,
            active: true,
            created_at: Utc::now(),
        }
    }
}
