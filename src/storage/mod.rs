//! Durable session output
//!
//! The per-sample detail file lives with the acquisition pipeline; this
//! module owns what outlives a session: the shared summary log and the
//! output directory lock.

pub mod lockfile;
pub mod summary_log;

pub use lockfile::ProcessLock;
pub use summary_log::{is_read_only, SummaryLog};
