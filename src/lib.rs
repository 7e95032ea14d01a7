pub mod billing;
pub mod clock;
pub mod config;
pub mod context;
pub mod entries;
pub mod error;
pub mod job_queue;
pub mod recurrence;
pub mod routes;
pub mod store;

pub use context::AppContext;
