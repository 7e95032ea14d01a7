use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{BatchCommit, CommitOutcome, Store};
use crate::billing::models::{BillingBatch, BillingCycle, Invoice, Owner, PaidStatus};
use crate::entries::TimeEntry;
use crate::error::StoreError;
use crate::recurrence::{RecurrenceDescriptor, RecurringSeries};

/// key: pg-store -> Postgres backend
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct InvoiceRow {
    id: Uuid,
    owner_id: Uuid,
    client_ref: String,
    rate: Decimal,
    paused: bool,
    archived: bool,
    entry_cutoff: Option<NaiveDate>,
    cycle: Json<BillingCycle>,
    version: i64,
    created_at: DateTime<Utc>,
}

impl From<InvoiceRow> for Invoice {
    fn from(row: InvoiceRow) -> Self {
        Invoice {
            id: row.id,
            owner_id: row.owner_id,
            client_ref: row.client_ref,
            rate: row.rate,
            paused: row.paused,
            archived: row.archived,
            entry_cutoff: row.entry_cutoff,
            cycle: row.cycle.0,
            version: row.version,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct SeriesRow {
    id: Uuid,
    invoice_id: Uuid,
    quantity: Decimal,
    descriptor: Json<RecurrenceDescriptor>,
    active: bool,
    created_at: DateTime<Utc>,
}

impl From<SeriesRow> for RecurringSeries {
    fn from(row: SeriesRow) -> Self {
        RecurringSeries {
            id: row.id,
            invoice_id: row.invoice_id,
            quantity: row.quantity,
            descriptor: row.descriptor.0,
            active: row.active,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct BatchRow {
    id: Uuid,
    invoice_id: Option<Uuid>,
    total: Decimal,
    rate_snapshot: Decimal,
    hours: Decimal,
    late_penalty: Decimal,
    installment_number: Option<i16>,
    period_start: NaiveDate,
    period_end: NaiveDate,
    paid_status: String,
    due_date: Option<NaiveDate>,
    ledger_synced_at: Option<DateTime<Utc>>,
    payment_intent_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<BatchRow> for BillingBatch {
    type Error = StoreError;

    fn try_from(row: BatchRow) -> Result<Self, Self::Error> {
        let paid_status = PaidStatus::parse(&row.paid_status).ok_or_else(|| {
            StoreError::Corrupt(format!(
                "batch {} has unknown paid_status `{}`",
                row.id, row.paid_status
            ))
        })?;
        Ok(BillingBatch {
            id: row.id,
            invoice_id: row.invoice_id,
            total: row.total,
            rate_snapshot: row.rate_snapshot,
            hours: row.hours,
            late_penalty: row.late_penalty,
            installment_number: row.installment_number,
            period_start: row.period_start,
            period_end: row.period_end,
            paid_status,
            due_date: row.due_date,
            ledger_synced_at: row.ledger_synced_at,
            payment_intent_id: row.payment_intent_id,
            created_at: row.created_at,
        })
    }
}

fn into_batches(rows: Vec<BatchRow>) -> Result<Vec<BillingBatch>, StoreError> {
    rows.into_iter().map(BillingBatch::try_from).collect()
}

const ENTRY_COLUMNS: &str =
    "id, invoice_id, quantity, tracked_on, series_id, batch_id, created_at";

#[async_trait]
impl Store for PgStore {
    async fn upsert_owner(&self, owner: &Owner) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO owners (id, email, billing_active)
            VALUES ($1, $2, $3)
            ON CONFLICT (id)
            DO UPDATE SET
                email = EXCLUDED.email,
                billing_active = EXCLUDED.billing_active
            "#,
        )
        .bind(owner.id)
        .bind(&owner.email)
        .bind(owner.billing_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn owner_billing_active(&self, owner_id: Uuid) -> Result<bool, StoreError> {
        let active: Option<bool> =
            sqlx::query_scalar("SELECT billing_active FROM owners WHERE id = $1")
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(active.unwrap_or(false))
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO invoices (
                id,
                owner_id,
                client_ref,
                rate,
                paused,
                archived,
                entry_cutoff,
                cycle,
                version,
                created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(invoice.id)
        .bind(invoice.owner_id)
        .bind(&invoice.client_ref)
        .bind(invoice.rate)
        .bind(invoice.paused)
        .bind(invoice.archived)
        .bind(invoice.entry_cutoff)
        .bind(Json(&invoice.cycle))
        .bind(invoice.version)
        .bind(invoice.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, StoreError> {
        let row = sqlx::query_as::<_, InvoiceRow>("SELECT * FROM invoices WHERE id = $1")
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Invoice::from))
    }

    async fn list_dispatchable_invoices(&self) -> Result<Vec<Invoice>, StoreError> {
        let rows = sqlx::query_as::<_, InvoiceRow>(
            r#"
            SELECT i.*
            FROM invoices i
            JOIN owners o ON o.id = i.owner_id
            WHERE NOT i.paused
              AND NOT i.archived
              AND o.billing_active
            ORDER BY i.created_at, i.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Invoice::from).collect())
    }

    async fn update_invoice(&self, invoice: &Invoice) -> Result<Invoice, StoreError> {
        let row = sqlx::query_as::<_, InvoiceRow>(
            r#"
            UPDATE invoices
            SET
                client_ref = $3,
                rate = $4,
                paused = $5,
                archived = $6,
                entry_cutoff = $7,
                cycle = $8,
                version = version + 1
            WHERE id = $1
              AND version = $2
            RETURNING *
            "#,
        )
        .bind(invoice.id)
        .bind(invoice.version)
        .bind(&invoice.client_ref)
        .bind(invoice.rate)
        .bind(invoice.paused)
        .bind(invoice.archived)
        .bind(invoice.entry_cutoff)
        .bind(Json(&invoice.cycle))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.into()),
            None => {
                let exists: Option<Uuid> =
                    sqlx::query_scalar("SELECT id FROM invoices WHERE id = $1")
                        .bind(invoice.id)
                        .fetch_optional(&self.pool)
                        .await?;
                Err(match exists {
                    Some(_) => StoreError::VersionConflict {
                        invoice_id: invoice.id,
                    },
                    None => StoreError::NotFound {
                        entity: "invoice",
                        id: invoice.id,
                    },
                })
            }
        }
    }

    async fn insert_series(&self, series: &RecurringSeries) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO recurring_series (id, invoice_id, quantity, descriptor, active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(series.id)
        .bind(series.invoice_id)
        .bind(series.quantity)
        .bind(Json(&series.descriptor))
        .bind(series.active)
        .bind(series.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_series(&self, series_id: Uuid) -> Result<Option<RecurringSeries>, StoreError> {
        let row = sqlx::query_as::<_, SeriesRow>("SELECT * FROM recurring_series WHERE id = $1")
            .bind(series_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(RecurringSeries::from))
    }

    async fn list_live_series(&self) -> Result<Vec<RecurringSeries>, StoreError> {
        let rows = sqlx::query_as::<_, SeriesRow>(
            r#"
            SELECT s.*
            FROM recurring_series s
            JOIN invoices i ON i.id = s.invoice_id
            WHERE s.active
              AND NOT i.archived
            ORDER BY s.created_at, s.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RecurringSeries::from).collect())
    }

    async fn cancel_series(&self, series_id: Uuid) -> Result<bool, StoreError> {
        let was_active: Option<bool> = sqlx::query_scalar(
            r#"
            UPDATE recurring_series AS s
            SET active = FALSE
            FROM recurring_series AS before
            WHERE s.id = $1
              AND before.id = s.id
            RETURNING before.active
            "#,
        )
        .bind(series_id)
        .fetch_optional(&self.pool)
        .await?;
        was_active.ok_or(StoreError::NotFound {
            entity: "recurring series",
            id: series_id,
        })
    }

    async fn set_series_anchor(
        &self,
        series_id: Uuid,
        anchor: NaiveDate,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE recurring_series
            SET descriptor = jsonb_set(descriptor, '{anchor}', to_jsonb($2::text))
            WHERE id = $1
            "#,
        )
        .bind(series_id)
        .bind(anchor.format("%Y-%m-%d").to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "recurring series",
                id: series_id,
            });
        }
        Ok(())
    }

    async fn insert_entry(&self, entry: &TimeEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO time_entries (id, invoice_id, quantity, tracked_on, series_id, batch_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(entry.invoice_id)
        .bind(entry.quantity)
        .bind(entry.tracked_on)
        .bind(entry.series_id)
        .bind(entry.batch_id)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_entry(&self, entry_id: Uuid) -> Result<Option<TimeEntry>, StoreError> {
        let entry = sqlx::query_as::<_, TimeEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM time_entries WHERE id = $1"
        ))
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn set_entry_quantity(
        &self,
        entry_id: Uuid,
        quantity: Decimal,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE time_entries SET quantity = $2 WHERE id = $1")
            .bind(entry_id)
            .bind(quantity)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "time entry",
                id: entry_id,
            });
        }
        Ok(())
    }

    async fn entries_for_invoice(&self, invoice_id: Uuid) -> Result<Vec<TimeEntry>, StoreError> {
        let entries = sqlx::query_as::<_, TimeEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM time_entries WHERE invoice_id = $1 ORDER BY tracked_on, created_at, id"
        ))
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn unbilled_entries(&self, invoice_id: Uuid) -> Result<Vec<TimeEntry>, StoreError> {
        let entries = sqlx::query_as::<_, TimeEntry>(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM time_entries
            WHERE invoice_id = $1
              AND batch_id IS NULL
              AND quantity > 0
            ORDER BY tracked_on, created_at, id
            "#
        ))
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn entries_in_batch(&self, batch_id: Uuid) -> Result<Vec<TimeEntry>, StoreError> {
        let entries = sqlx::query_as::<_, TimeEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM time_entries WHERE batch_id = $1 ORDER BY tracked_on, created_at, id"
        ))
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn owner_hours_on(
        &self,
        owner_id: Uuid,
        date: NaiveDate,
        excluding: Option<Uuid>,
    ) -> Result<Decimal, StoreError> {
        let total: Decimal = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(e.quantity), 0)
            FROM time_entries e
            JOIN invoices i ON i.id = e.invoice_id
            WHERE i.owner_id = $1
              AND e.tracked_on = $2
              AND ($3::uuid IS NULL OR e.id <> $3)
            "#,
        )
        .bind(owner_id)
        .bind(date)
        .bind(excluding)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    async fn series_has_entry_on(
        &self,
        series_id: Uuid,
        date: NaiveDate,
    ) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM time_entries WHERE series_id = $1 AND tracked_on = $2)",
        )
        .bind(series_id)
        .bind(date)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn materialize_entry(&self, entry: &TimeEntry) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO time_entries (id, invoice_id, quantity, tracked_on, series_id, batch_id, created_at)
            VALUES ($1, $2, $3, $4, $5, NULL, $6)
            ON CONFLICT (series_id, tracked_on) WHERE series_id IS NOT NULL
            DO NOTHING
            "#,
        )
        .bind(entry.id)
        .bind(entry.invoice_id)
        .bind(entry.quantity)
        .bind(entry.tracked_on)
        .bind(entry.series_id)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn commit_batch(&self, commit: BatchCommit) -> Result<CommitOutcome, StoreError> {
        let BatchCommit {
            batch,
            entry_ids,
            invoice,
        } = commit;
        let mut tx = self.pool.begin().await?;

        let advanced = sqlx::query(
            r#"
            UPDATE invoices
            SET cycle = $3, version = version + 1
            WHERE id = $1
              AND version = $2
            "#,
        )
        .bind(invoice.id)
        .bind(invoice.version)
        .bind(Json(&invoice.cycle))
        .execute(&mut tx)
        .await?;
        if advanced.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(CommitOutcome::InvoiceChanged);
        }

        sqlx::query(
            r#"
            INSERT INTO billing_batches (
                id,
                invoice_id,
                total,
                rate_snapshot,
                hours,
                late_penalty,
                installment_number,
                period_start,
                period_end,
                paid_status,
                due_date,
                ledger_synced_at,
                payment_intent_id,
                created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(batch.id)
        .bind(batch.invoice_id)
        .bind(batch.total)
        .bind(batch.rate_snapshot)
        .bind(batch.hours)
        .bind(batch.late_penalty)
        .bind(batch.installment_number)
        .bind(batch.period_start)
        .bind(batch.period_end)
        .bind(batch.paid_status.as_str())
        .bind(batch.due_date)
        .bind(batch.ledger_synced_at)
        .bind(&batch.payment_intent_id)
        .bind(batch.created_at)
        .execute(&mut tx)
        .await?;

        let stamped = sqlx::query(
            r#"
            UPDATE time_entries
            SET batch_id = $1
            WHERE id = ANY($2)
              AND batch_id IS NULL
            "#,
        )
        .bind(batch.id)
        .bind(&entry_ids[..])
        .execute(&mut tx)
        .await?;
        if stamped.rows_affected() != entry_ids.len() as u64 {
            tx.rollback().await?;
            return Ok(CommitOutcome::EntriesClaimed);
        }

        tx.commit().await?;
        Ok(CommitOutcome::Committed)
    }

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<BillingBatch>, StoreError> {
        let row = sqlx::query_as::<_, BatchRow>("SELECT * FROM billing_batches WHERE id = $1")
            .bind(batch_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(BillingBatch::try_from).transpose()
    }

    async fn list_batches(&self, invoice_id: Uuid) -> Result<Vec<BillingBatch>, StoreError> {
        let rows = sqlx::query_as::<_, BatchRow>(
            "SELECT * FROM billing_batches WHERE invoice_id = $1 ORDER BY created_at, id",
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;
        into_batches(rows)
    }

    async fn list_unsynced_batches(&self) -> Result<Vec<BillingBatch>, StoreError> {
        let rows = sqlx::query_as::<_, BatchRow>(
            r#"
            SELECT *
            FROM billing_batches
            WHERE ledger_synced_at IS NULL
              AND paid_status <> 'cancelled'
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        into_batches(rows)
    }

    async fn transition_batch(
        &self,
        batch_id: Uuid,
        from: PaidStatus,
        to: PaidStatus,
    ) -> Result<BillingBatch, StoreError> {
        if from.can_transition_to(to) {
            let row = sqlx::query_as::<_, BatchRow>(
                r#"
                UPDATE billing_batches
                SET paid_status = $3
                WHERE id = $1
                  AND paid_status = $2
                RETURNING *
                "#,
            )
            .bind(batch_id)
            .bind(from.as_str())
            .bind(to.as_str())
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = row {
                return row.try_into();
            }
        }

        let current = self.get_batch(batch_id).await?.ok_or(StoreError::NotFound {
            entity: "billing batch",
            id: batch_id,
        })?;
        Err(StoreError::InvalidTransition {
            batch_id,
            from: current.paid_status,
            to,
        })
    }

    async fn cancel_installment(
        &self,
        batch_id: Uuid,
        from: PaidStatus,
        invoice: &Invoice,
    ) -> Result<BillingBatch, StoreError> {
        let mut tx = self.pool.begin().await?;

        let released = sqlx::query(
            r#"
            UPDATE invoices
            SET cycle = $3, version = version + 1
            WHERE id = $1
              AND version = $2
            "#,
        )
        .bind(invoice.id)
        .bind(invoice.version)
        .bind(Json(&invoice.cycle))
        .execute(&mut tx)
        .await?;
        if released.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::VersionConflict {
                invoice_id: invoice.id,
            });
        }

        let row = if from.can_transition_to(PaidStatus::Cancelled) {
            sqlx::query_as::<_, BatchRow>(
                r#"
                UPDATE billing_batches
                SET paid_status = $3
                WHERE id = $1
                  AND paid_status = $2
                RETURNING *
                "#,
            )
            .bind(batch_id)
            .bind(from.as_str())
            .bind(PaidStatus::Cancelled.as_str())
            .fetch_optional(&mut tx)
            .await?
        } else {
            None
        };
        let Some(row) = row else {
            tx.rollback().await?;
            let current = self.get_batch(batch_id).await?.ok_or(StoreError::NotFound {
                entity: "billing batch",
                id: batch_id,
            })?;
            return Err(StoreError::InvalidTransition {
                batch_id,
                from: current.paid_status,
                to: PaidStatus::Cancelled,
            });
        };

        tx.commit().await?;
        row.try_into()
    }

    async fn set_batch_total(
        &self,
        batch_id: Uuid,
        total: Decimal,
        hours: Decimal,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE billing_batches SET total = $2, hours = $3 WHERE id = $1")
            .bind(batch_id)
            .bind(total)
            .bind(hours)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "billing batch",
                id: batch_id,
            });
        }
        Ok(())
    }

    async fn mark_ledger_synced(
        &self,
        batch_id: Uuid,
        synced_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE billing_batches SET ledger_synced_at = $2 WHERE id = $1")
            .bind(batch_id)
            .bind(synced_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_payment_intent(&self, batch_id: Uuid, intent_id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE billing_batches SET payment_intent_id = $2 WHERE id = $1")
            .bind(batch_id)
            .bind(intent_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
