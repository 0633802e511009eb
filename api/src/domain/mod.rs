//! Persistence for the publishing pipeline.
//!
//! Query modules use the generic Executor pattern so they run against both
//! `&PgPool` and an open transaction. Services never call them directly; they
//! go through the ports in [`ports`], which [`pg::PgStore`] implements.

pub mod accounts;
pub mod alert_state;
pub mod cron_runs;
pub mod pg;
pub mod ports;
pub mod scheduled_posts;

pub use pg::PgStore;
pub use ports::{AccountDirectory, AlertStateStore, CronRunStore, ScheduledPostStore, StoreError};
