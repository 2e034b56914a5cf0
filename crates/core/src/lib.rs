//! Domain model for remote stem-separation sessions.
//!
//! Holds the [`session::JobSession`] lifecycle state machine, payload
//! metadata and content-type helpers, and well-known status names shared
//! by the HTTP client and the orchestration pipeline.

pub mod error;
pub mod job_status;
pub mod media;
pub mod session;
pub mod types;
