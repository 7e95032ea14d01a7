use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// key: billing-models -> owners,invoices,batches
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Owner {
    pub id: Uuid,
    pub email: String,
    /// Inactive owners are never billed, dispatched or reminded.
    pub billing_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Weekly,
    Biweekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl IntervalUnit {
    /// Cycles are counted in whole weeks: a "month" is four of them.
    pub fn weeks(self) -> i64 {
        match self {
            IntervalUnit::Weekly => 1,
            IntervalUnit::Biweekly => 2,
            IntervalUnit::Monthly => 4,
            IntervalUnit::Quarterly => 12,
            IntervalUnit::Yearly => 52,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalCycle {
    pub unit: IntervalUnit,
    pub next_date: NaiveDate,
    /// Start of the current accrual window.
    pub last_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyCycle {
    pub last_billed_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneCycle {
    /// One-based index of the next milestone to bill.
    pub milestone_step: u32,
    pub milestone_total_steps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SingleStatus {
    Draft,
    Final,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleCycle {
    pub due_date: NaiveDate,
    pub installments_total: u8,
    #[serde(default)]
    pub installments_sent: u8,
    pub next_installment_date: Option<NaiveDate>,
    #[serde(default)]
    pub discount: Decimal,
    #[serde(default)]
    pub tax: Decimal,
    #[serde(default)]
    pub late_penalty: Decimal,
    #[serde(default)]
    pub late_penalty_enabled: bool,
    pub status: SingleStatus,
}

/// key: billing-cycle-model -> per-variant cycle state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BillingCycle {
    Interval(IntervalCycle),
    Weekly(WeeklyCycle),
    Milestone(MilestoneCycle),
    Single(SingleCycle),
}

impl BillingCycle {
    pub fn kind(&self) -> &'static str {
        match self {
            BillingCycle::Interval(_) => "interval",
            BillingCycle::Weekly(_) => "weekly",
            BillingCycle::Milestone(_) => "milestone",
            BillingCycle::Single(_) => "single",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub client_ref: String,
    pub rate: Decimal,
    pub paused: bool,
    pub archived: bool,
    /// Entries dated before this day are rejected.
    pub entry_cutoff: Option<NaiveDate>,
    pub cycle: BillingCycle,
    /// Bumped on every cycle change; writers compare-and-set against it.
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    pub fn new(owner_id: Uuid, client_ref: impl Into<String>, rate: Decimal, cycle: BillingCycle) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            client_ref: client_ref.into(),
            rate,
            paused: false,
            archived: false,
            entry_cutoff: None,
            cycle,
            version: 0,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaidStatus {
    NotStarted,
    Pending,
    Paid,
    Failed,
    Cancelled,
}

impl PaidStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaidStatus::NotStarted => "not_started",
            PaidStatus::Pending => "pending",
            PaidStatus::Paid => "paid",
            PaidStatus::Failed => "failed",
            PaidStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "not_started" => Some(PaidStatus::NotStarted),
            "pending" => Some(PaidStatus::Pending),
            "paid" => Some(PaidStatus::Paid),
            "failed" => Some(PaidStatus::Failed),
            "cancelled" => Some(PaidStatus::Cancelled),
            _ => None,
        }
    }

    pub fn can_transition_to(self, next: PaidStatus) -> bool {
        use PaidStatus::*;
        matches!(
            (self, next),
            (NotStarted, Pending)
                | (NotStarted, Cancelled)
                | (Pending, Paid)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Failed, Pending)
                | (Failed, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PaidStatus::Paid | PaidStatus::Cancelled)
    }
}

/// key: billing-batch-model -> immutable snapshot of one billing event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingBatch {
    pub id: Uuid,
    /// Cleared if the invoice is later removed; the batch itself stays.
    pub invoice_id: Option<Uuid>,
    pub total: Decimal,
    pub rate_snapshot: Decimal,
    pub hours: Decimal,
    pub late_penalty: Decimal,
    pub installment_number: Option<i16>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub paid_status: PaidStatus,
    pub due_date: Option<NaiveDate>,
    pub ledger_synced_at: Option<DateTime<Utc>>,
    pub payment_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl BillingBatch {
    /// Amount counted against a single invoice's balance; penalties are charged on top.
    pub fn principal(&self) -> Decimal {
        self.total - self.late_penalty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cycle_serializes_with_kind_tag() {
        let cycle = BillingCycle::Milestone(MilestoneCycle {
            milestone_step: 2,
            milestone_total_steps: 3,
        });
        let value = serde_json::to_value(&cycle).unwrap();
        assert_eq!(
            value,
            json!({"kind": "milestone", "milestone_step": 2, "milestone_total_steps": 3})
        );
    }

    #[test]
    fn paid_and_cancelled_are_terminal() {
        for next in [
            PaidStatus::NotStarted,
            PaidStatus::Pending,
            PaidStatus::Paid,
            PaidStatus::Failed,
            PaidStatus::Cancelled,
        ] {
            assert!(!PaidStatus::Paid.can_transition_to(next));
            assert!(!PaidStatus::Cancelled.can_transition_to(next));
        }
        assert!(PaidStatus::Failed.can_transition_to(PaidStatus::Pending));
        assert!(!PaidStatus::NotStarted.can_transition_to(PaidStatus::Paid));
    }
}
