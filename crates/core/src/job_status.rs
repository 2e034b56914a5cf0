//! Well-known status names reported by the remote job-status endpoint.
//!
//! Only the two terminal names carry meaning for the client. Any other
//! non-empty status string (`PENDING`, `RUNNING`, ...) is treated as
//! non-terminal progress.

/// Job finished and produced output artifacts.
pub const JOB_COMPLETED: &str = "COMPLETED";

/// Job failed; the response carries an error message.
pub const JOB_FAILED: &str = "FAILED";

/// Default cadence between two status queries.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
