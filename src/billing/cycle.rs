use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};

use super::models::{BillingCycle, SingleStatus};

/// Days between consecutive installments of a single invoice.
pub const INSTALLMENT_SPACING_DAYS: i64 = 14;

/// Reminder lead times before a single invoice's due date. Each one is an independent trigger.
pub const REMINDER_LEAD_DAYS: [i64; 2] = [1, 2];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Bill today.
    Bill,
    /// Billing happens tomorrow; send the client a heads-up.
    Preview,
}

/// What the generator produced for the cycle being advanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Billed,
    /// An accrual cycle with nothing to bill.
    Empty,
}

/// key: billing-cycle-calculator -> trigger/advance per variant
impl BillingCycle {
    pub fn trigger(&self, today: NaiveDate) -> Option<Trigger> {
        match self {
            BillingCycle::Interval(cycle) => {
                if cycle.next_date == today {
                    Some(Trigger::Bill)
                } else if Some(cycle.next_date) == today.succ_opt() {
                    Some(Trigger::Preview)
                } else {
                    None
                }
            }
            BillingCycle::Weekly(cycle) => {
                if today.weekday() == Weekday::Mon && cycle.last_billed_on != Some(today) {
                    Some(Trigger::Bill)
                } else {
                    None
                }
            }
            BillingCycle::Milestone(_) => None,
            BillingCycle::Single(cycle) => {
                if cycle.status == SingleStatus::Final
                    && cycle.next_installment_date == Some(today)
                {
                    Some(Trigger::Bill)
                } else {
                    None
                }
            }
        }
    }

    /// Lead times whose reminder fires today. Empty for every variant but a final single invoice.
    pub fn reminder_leads(&self, today: NaiveDate) -> Vec<i64> {
        let BillingCycle::Single(cycle) = self else {
            return Vec::new();
        };
        if cycle.status != SingleStatus::Final || cycle.installments_sent >= cycle.installments_total
        {
            return Vec::new();
        }
        let days_until_due = (cycle.due_date - today).num_days();
        REMINDER_LEAD_DAYS
            .iter()
            .copied()
            .filter(|lead| *lead == days_until_due)
            .collect()
    }

    /// Accrual variants bill the hours logged since the previous cycle and keep the calendar
    /// moving even when a period is empty. Weekly invoices bill a flat rate instead.
    pub fn is_accrual(&self) -> bool {
        matches!(self, BillingCycle::Interval(_))
    }

    /// Reason generation must not run, if any.
    pub fn blocked_reason(&self) -> Option<&'static str> {
        match self {
            BillingCycle::Milestone(cycle) if cycle.milestone_step > cycle.milestone_total_steps => {
                Some("all milestones billed")
            }
            BillingCycle::Single(cycle) if cycle.status == SingleStatus::Draft => {
                Some("invoice is still a draft")
            }
            BillingCycle::Single(cycle) if cycle.installments_sent >= cycle.installments_total => {
                Some("all installments billed")
            }
            _ => None,
        }
    }

    pub fn advance(&mut self, today: NaiveDate, now: DateTime<Utc>, outcome: CycleOutcome) {
        match self {
            BillingCycle::Interval(cycle) => {
                if outcome == CycleOutcome::Billed {
                    cycle.last_date = now;
                }
                cycle.next_date = today + Duration::weeks(cycle.unit.weeks());
            }
            BillingCycle::Weekly(cycle) => {
                cycle.last_billed_on = Some(today);
            }
            BillingCycle::Milestone(cycle) => {
                cycle.milestone_step += 1;
            }
            BillingCycle::Single(cycle) => {
                cycle.installments_sent = cycle.installments_sent.saturating_add(1);
                if cycle.installments_sent >= cycle.installments_total {
                    cycle.next_installment_date = None;
                } else {
                    let base = cycle.next_installment_date.unwrap_or(today);
                    cycle.next_installment_date =
                        Some(base + Duration::days(INSTALLMENT_SPACING_DAYS));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::models::{
        IntervalCycle, IntervalUnit, MilestoneCycle, SingleCycle, WeeklyCycle,
    };
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn interval(next_date: NaiveDate) -> BillingCycle {
        BillingCycle::Interval(IntervalCycle {
            unit: IntervalUnit::Monthly,
            next_date,
            last_date: Utc.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap(),
        })
    }

    fn single(due_date: NaiveDate, total: u8) -> SingleCycle {
        SingleCycle {
            due_date,
            installments_total: total,
            installments_sent: 0,
            next_installment_date: Some(date(2024, 6, 3)),
            discount: Decimal::ZERO,
            tax: Decimal::ZERO,
            late_penalty: Decimal::ZERO,
            late_penalty_enabled: false,
            status: SingleStatus::Final,
        }
    }

    #[test]
    fn interval_bills_today_and_previews_tomorrow() {
        let today = date(2024, 6, 3);
        assert_eq!(interval(today).trigger(today), Some(Trigger::Bill));
        assert_eq!(interval(date(2024, 6, 4)).trigger(today), Some(Trigger::Preview));
        assert_eq!(interval(date(2024, 6, 5)).trigger(today), None);
    }

    #[test]
    fn billed_interval_resets_window_and_moves_four_weeks() {
        let today = date(2024, 6, 3);
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 6, 0, 0).unwrap();
        let mut cycle = interval(today);
        cycle.advance(today, now, CycleOutcome::Billed);
        let BillingCycle::Interval(state) = cycle else { unreachable!() };
        assert_eq!(state.last_date, now);
        assert_eq!(state.next_date, date(2024, 7, 1));
        assert_eq!(state.next_date, state.last_date.date_naive() + Duration::weeks(4));
    }

    #[test]
    fn empty_interval_keeps_accrual_window() {
        let today = date(2024, 6, 3);
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 6, 0, 0).unwrap();
        let mut cycle = interval(today);
        cycle.advance(today, now, CycleOutcome::Empty);
        let BillingCycle::Interval(state) = cycle else { unreachable!() };
        assert_eq!(state.last_date, Utc.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap());
        assert_eq!(state.next_date, date(2024, 7, 1));
    }

    #[test]
    fn weekly_fires_once_per_monday() {
        let monday = date(2024, 6, 3);
        let mut cycle = BillingCycle::Weekly(WeeklyCycle::default());
        assert_eq!(cycle.trigger(date(2024, 6, 4)), None);
        assert_eq!(cycle.trigger(monday), Some(Trigger::Bill));
        cycle.advance(monday, Utc::now(), CycleOutcome::Billed);
        assert_eq!(cycle.trigger(monday), None);
        assert_eq!(cycle.trigger(date(2024, 6, 10)), Some(Trigger::Bill));
    }

    #[test]
    fn milestone_blocks_after_last_step() {
        let mut cycle = BillingCycle::Milestone(MilestoneCycle {
            milestone_step: 2,
            milestone_total_steps: 2,
        });
        assert_eq!(cycle.trigger(date(2024, 6, 3)), None);
        assert_eq!(cycle.blocked_reason(), None);
        cycle.advance(date(2024, 6, 3), Utc::now(), CycleOutcome::Billed);
        assert_eq!(cycle.blocked_reason(), Some("all milestones billed"));
    }

    #[test]
    fn installments_space_fourteen_days_then_clear() {
        let mut cycle = BillingCycle::Single(single(date(2024, 6, 3), 3));
        let today = date(2024, 6, 3);
        assert_eq!(cycle.trigger(today), Some(Trigger::Bill));

        cycle.advance(today, Utc::now(), CycleOutcome::Billed);
        assert_eq!(cycle.trigger(date(2024, 6, 17)), Some(Trigger::Bill));

        cycle.advance(date(2024, 6, 17), Utc::now(), CycleOutcome::Billed);
        assert_eq!(cycle.trigger(date(2024, 7, 1)), Some(Trigger::Bill));

        cycle.advance(date(2024, 7, 1), Utc::now(), CycleOutcome::Billed);
        let BillingCycle::Single(state) = &cycle else { unreachable!() };
        assert_eq!(state.next_installment_date, None);
        assert_eq!(cycle.blocked_reason(), Some("all installments billed"));
    }

    #[test]
    fn reminders_fire_one_and_two_days_ahead() {
        let cycle = BillingCycle::Single(single(date(2024, 6, 10), 1));
        assert_eq!(cycle.reminder_leads(date(2024, 6, 7)), Vec::<i64>::new());
        assert_eq!(cycle.reminder_leads(date(2024, 6, 8)), vec![2]);
        assert_eq!(cycle.reminder_leads(date(2024, 6, 9)), vec![1]);
        assert_eq!(cycle.reminder_leads(date(2024, 6, 10)), Vec::<i64>::new());
    }

    #[test]
    fn draft_single_never_triggers() {
        let mut state = single(date(2024, 6, 10), 1);
        state.status = SingleStatus::Draft;
        let cycle = BillingCycle::Single(state);
        assert_eq!(cycle.trigger(date(2024, 6, 3)), None);
        assert!(cycle.reminder_leads(date(2024, 6, 9)).is_empty());
    }
}
