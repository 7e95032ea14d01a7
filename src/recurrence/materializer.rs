use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::evaluator::{evaluate, refreshed_anchor, Firing};
use super::models::RecurringSeries;
use crate::context::AppContext;
use crate::entries::TimeEntry;
use crate::error::{BillingResult, StoreError};

/// Counts reported by one materializer run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaterializeSummary {
    pub created: usize,
    pub cancelled: usize,
    pub anchors_refreshed: usize,
    pub failed: usize,
}

impl fmt::Display for MaterializeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Time entries created: {}", self.created)
    }
}

#[derive(Debug, Default)]
struct SeriesStep {
    created: bool,
    cancelled: bool,
    refreshed: bool,
}

/// key: time-entry-materializer -> daily job creating today's recurring entries
///
/// One failing series is logged and skipped; the rest of the run continues. Running twice on
/// the same day creates nothing the second time.
pub async fn materialize_recurring_entries(ctx: &AppContext) -> BillingResult<MaterializeSummary> {
    let today = ctx.clock.today();
    let live = ctx.store.list_live_series().await?;
    let mut summary = MaterializeSummary::default();

    for series in live {
        match materialize_series(ctx, &series, today).await {
            Ok(step) => {
                summary.created += usize::from(step.created);
                summary.cancelled += usize::from(step.cancelled);
                summary.anchors_refreshed += usize::from(step.refreshed);
            }
            Err(err) => {
                summary.failed += 1;
                warn!(?err, series_id = %series.id, "failed to materialize recurring series");
            }
        }
    }

    info!(
        %today,
        created = summary.created,
        cancelled = summary.cancelled,
        anchors_refreshed = summary.anchors_refreshed,
        failed = summary.failed,
        "recurring entries materialized"
    );
    Ok(summary)
}

async fn materialize_series(
    ctx: &AppContext,
    series: &RecurringSeries,
    today: NaiveDate,
) -> Result<SeriesStep, StoreError> {
    let mut step = SeriesStep::default();

    if !ctx.store.series_has_entry_on(series.id, today).await? {
        match evaluate(&series.descriptor, today) {
            Firing::Fires => {
                let entry = TimeEntry::materialized(series, today);
                step.created = ctx.store.materialize_entry(&entry).await?;
                if step.created {
                    debug!(series_id = %series.id, entry_id = %entry.id, "recurring entry created");
                }
            }
            Firing::Expired => {
                step.cancelled = ctx.store.cancel_series(series.id).await?;
                info!(series_id = %series.id, "repeating series reached its end date");
                return Ok(step);
            }
            Firing::Idle => {}
        }
    }

    if let Some(anchor) = refreshed_anchor(&series.descriptor, today) {
        ctx.store.set_series_anchor(series.id, anchor).await?;
        step.refreshed = true;
    }
    Ok(step)
}
