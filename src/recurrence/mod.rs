pub mod evaluator;
pub mod materializer;
pub mod models;

pub use evaluator::{anchor_for, evaluate, fires_today, refreshed_anchor, Firing};
pub use materializer::{materialize_recurring_entries, MaterializeSummary};
pub use models::{RecurrenceDescriptor, RecurrenceKind, RecurrenceUnit, RecurringSeries};
