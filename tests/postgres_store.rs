use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal_macros::dec;
use sqlx::PgPool;
use uuid::Uuid;

use timebill::billing::{
    generate_batch, BillingCycle, GenerationOutcome, GenerationTrigger, IntervalCycle,
    IntervalUnit, Invoice, Owner,
};
use timebill::clock::FixedClock;
use timebill::entries::TimeEntry;
use timebill::store::{PgStore, Store};
use timebill::AppContext;

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
}

async fn seeded(pool: PgPool) -> (AppContext, Arc<PgStore>, Invoice) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let store = Arc::new(PgStore::new(pool));
    let owner = Owner {
        id: Uuid::new_v4(),
        email: "pg@example.com".to_string(),
        billing_active: true,
    };
    store.upsert_owner(&owner).await.unwrap();
    let invoice = Invoice::new(
        owner.id,
        "PG-001",
        dec!(25),
        BillingCycle::Interval(IntervalCycle {
            unit: IntervalUnit::Weekly,
            next_date: monday(),
            last_date: Utc.with_ymd_and_hms(2024, 5, 27, 12, 0, 0).unwrap(),
        }),
    );
    store.insert_invoice(&invoice).await.unwrap();
    let ctx = AppContext::new(store.clone(), Arc::new(FixedClock::on(monday())));
    (ctx, store, invoice)
}

// key: pg-store-tests -> claim semantics against a real database
#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn concurrent_generation_claims_entries_once(pool: PgPool) {
    let (ctx, store, invoice) = seeded(pool).await;
    for (hours, day) in [(dec!(2), 29), (dec!(3), 30), (dec!(4), 31)] {
        let entry = TimeEntry::new(
            invoice.id,
            hours,
            NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
        );
        store.insert_entry(&entry).await.unwrap();
    }

    let first = tokio::spawn({
        let ctx = ctx.clone();
        async move { generate_batch(&ctx, invoice.id, GenerationTrigger::Scheduled).await }
    });
    let second = tokio::spawn({
        let ctx = ctx.clone();
        async move { generate_batch(&ctx, invoice.id, GenerationTrigger::Scheduled).await }
    });
    let outcomes = [first.await.unwrap().unwrap(), second.await.unwrap().unwrap()];
    let created = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, GenerationOutcome::Created(_)))
        .count();
    assert_eq!(created, 1);

    let batches = store.list_batches(invoice.id).await.unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].total, dec!(225));
    assert!(store.unbilled_entries(invoice.id).await.unwrap().is_empty());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn series_occurrences_are_unique_per_day(pool: PgPool) {
    use timebill::recurrence::{
        RecurrenceDescriptor, RecurrenceKind, RecurrenceUnit, RecurringSeries,
    };

    let (_ctx, store, invoice) = seeded(pool).await;
    let descriptor =
        RecurrenceDescriptor::new(RecurrenceKind::Recurring, RecurrenceUnit::Daily, vec![], monday());
    let series = RecurringSeries::new(invoice.id, dec!(1), descriptor);
    store.insert_series(&series).await.unwrap();

    let first = TimeEntry::materialized(&series, monday());
    let second = TimeEntry::materialized(&series, monday());
    assert!(store.materialize_entry(&first).await.unwrap());
    assert!(!store.materialize_entry(&second).await.unwrap());
    assert!(store.series_has_entry_on(series.id, monday()).await.unwrap());

    assert!(store.cancel_series(series.id).await.unwrap());
    assert!(!store.cancel_series(series.id).await.unwrap());
}
