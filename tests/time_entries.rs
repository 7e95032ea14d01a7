mod common;

use rust_decimal_macros::dec;

use common::{date, Harness};
use timebill::billing::{BillingCycle, WeeklyCycle};
use timebill::entries::{
    record_time_entry, skip_entry, update_entry_quantity, NewTimeEntry, RecurrenceRequest,
};
use timebill::error::{BillingError, ValidationError};
use timebill::recurrence::RecurrenceUnit;
use timebill::store::Store;

fn weekly() -> BillingCycle {
    BillingCycle::Weekly(WeeklyCycle::default())
}

fn entry(invoice_id: uuid::Uuid, quantity: rust_decimal::Decimal) -> NewTimeEntry {
    NewTimeEntry {
        invoice_id,
        quantity,
        tracked_on: date(2024, 6, 3),
        recurrence: None,
    }
}

fn validation(err: BillingError) -> ValidationError {
    match err {
        BillingError::Validation(inner) => inner,
        other => panic!("expected a validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn daily_cap_spans_every_invoice_of_the_owner() {
    let harness = Harness::on(date(2024, 6, 3)).await;
    let first = harness.invoice(dec!(40), weekly()).await;
    let second = harness.invoice(dec!(55), weekly()).await;
    record_time_entry(&harness.ctx, entry(first.id, dec!(15)))
        .await
        .unwrap();
    record_time_entry(&harness.ctx, entry(second.id, dec!(8)))
        .await
        .unwrap();

    for invoice_id in [first.id, second.id] {
        let err = record_time_entry(&harness.ctx, entry(invoice_id, dec!(2)))
            .await
            .unwrap_err();
        assert_eq!(
            validation(err),
            ValidationError::DailyCapExceeded {
                date: date(2024, 6, 3),
                logged: dec!(23),
                requested: dec!(2),
            }
        );
    }
    record_time_entry(&harness.ctx, entry(second.id, dec!(1)))
        .await
        .unwrap();
}

#[tokio::test]
async fn skipped_entries_free_up_the_day() {
    let harness = Harness::on(date(2024, 6, 3)).await;
    let invoice = harness.invoice(dec!(40), weekly()).await;
    let long_day = record_time_entry(&harness.ctx, entry(invoice.id, dec!(20)))
        .await
        .unwrap();
    assert!(record_time_entry(&harness.ctx, entry(invoice.id, dec!(6)))
        .await
        .is_err());

    skip_entry(&harness.ctx, long_day.id).await.unwrap();
    record_time_entry(&harness.ctx, entry(invoice.id, dec!(6)))
        .await
        .unwrap();
}

#[tokio::test]
async fn editing_an_entry_does_not_count_its_old_hours() {
    let harness = Harness::on(date(2024, 6, 3)).await;
    let invoice = harness.invoice(dec!(40), weekly()).await;
    let logged = record_time_entry(&harness.ctx, entry(invoice.id, dec!(20)))
        .await
        .unwrap();

    let edited = update_entry_quantity(&harness.ctx, logged.id, dec!(24))
        .await
        .unwrap();
    assert_eq!(edited.quantity, dec!(24));
    let stored = harness.store.get_entry(logged.id).await.unwrap().unwrap();
    assert_eq!(stored.quantity, dec!(24));
}

#[tokio::test]
async fn entries_before_the_cutoff_are_rejected() {
    let harness = Harness::on(date(2024, 6, 3)).await;
    let mut invoice = harness.invoice(dec!(40), weekly()).await;
    invoice.entry_cutoff = Some(date(2024, 6, 4));
    harness.store.update_invoice(&invoice).await.unwrap();

    let err = record_time_entry(&harness.ctx, entry(invoice.id, dec!(1)))
        .await
        .unwrap_err();
    assert_eq!(
        validation(err),
        ValidationError::BeforeCutoff {
            date: date(2024, 6, 3),
            cutoff: date(2024, 6, 4),
        }
    );
}

#[tokio::test]
async fn out_of_range_quantities_are_rejected() {
    let harness = Harness::on(date(2024, 6, 3)).await;
    let invoice = harness.invoice(dec!(40), weekly()).await;

    for quantity in [dec!(0), dec!(-2), dec!(24.5)] {
        let err = record_time_entry(&harness.ctx, entry(invoice.id, quantity))
            .await
            .unwrap_err();
        assert_eq!(
            validation(err),
            ValidationError::QuantityOutOfRange { quantity }
        );
    }
    assert!(harness
        .store
        .entries_for_invoice(invoice.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn repeating_series_must_end_after_it_starts() {
    let harness = Harness::on(date(2024, 6, 3)).await;
    let invoice = harness.invoice(dec!(40), weekly()).await;
    let mut input = entry(invoice.id, dec!(2));
    input.recurrence = Some(RecurrenceRequest {
        unit: RecurrenceUnit::Daily,
        weekdays: Vec::new(),
        ends_on: Some(date(2024, 6, 3)),
    });

    let err = record_time_entry(&harness.ctx, input).await.unwrap_err();
    assert_eq!(
        validation(err),
        ValidationError::EndsBeforeStart {
            starts_on: date(2024, 6, 3),
        }
    );
    assert!(harness.store.list_live_series().await.unwrap().is_empty());
}

#[tokio::test]
async fn archived_invoices_take_no_entries() {
    let harness = Harness::on(date(2024, 6, 3)).await;
    let mut invoice = harness.invoice(dec!(40), weekly()).await;
    invoice.archived = true;
    harness.store.update_invoice(&invoice).await.unwrap();

    let err = record_time_entry(&harness.ctx, entry(invoice.id, dec!(1)))
        .await
        .unwrap_err();
    assert_eq!(validation(err), ValidationError::InvoiceArchived);
}
