//! Session orchestration for remote stem separation.
//!
//! [`orchestrator::Orchestrator`] sequences credential issuance, upload,
//! job launch and status polling for one payload at a time, owning the
//! session state and the polling task. Presentation layers read
//! snapshots or subscribe to [`events::SessionEvent`]s.

pub mod events;
pub mod orchestrator;
pub mod poller;

#[cfg(test)]
pub(crate) mod testing;
