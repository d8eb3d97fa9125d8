//! Feed synchronization: per-subscription incremental fetch, retention, and
//! the periodic cycle that drives both.
//!
//! - [`engine`] - cursor-based fetch for a single subscription
//! - [`retention`] - per-user pruning under a size floor and age ceiling
//! - [`scheduler`] - sequences every subscription then retention, forever

mod engine;
mod retention;
mod scheduler;
#[cfg(test)]
mod testing;

pub use engine::{SyncEngine, SyncError, SyncOutcome, SyncSettings};
pub use retention::{RetentionManager, RetentionPolicy, RetentionReport};
pub use scheduler::{CycleReport, Scheduler, DEFAULT_REFRESH_INTERVAL, MIN_REFRESH_INTERVAL};
