//! Job session lifecycle.
//!
//! A [`JobSession`] tracks one payload-to-result run: credentials are
//! requested, the payload is transferred, the remote job is launched and
//! then polled until it reaches a terminal state. All mutation goes
//! through methods that enforce [`LifecycleState::can_transition_to`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Timestamp;

/// Fallback reason used when a failure carries an empty message.
const UNKNOWN_FAILURE: &str = "Job failed without an error message";

// ---------------------------------------------------------------------------
// LifecycleState
// ---------------------------------------------------------------------------

/// Lifecycle state of a [`JobSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Idle,
    RequestingCredentials,
    Transferring,
    Launching,
    Polling,
    Completed,
    Failed,
}

impl LifecycleState {
    /// `Completed` and `Failed` end a session.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// A session is active while it is neither idle nor terminal.
    pub fn is_active(self) -> bool {
        !self.is_terminal() && self != Self::Idle
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    ///
    /// Any state may be reset to `Idle` (local cancellation). `Failed` is
    /// reachable from every active state.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;

        matches!(
            (self, next),
            (_, Idle)
                | (Idle | Completed | Failed, RequestingCredentials)
                | (RequestingCredentials, Transferring)
                | (Transferring, Launching)
                | (Launching, Polling)
                | (Polling, Polling)
                | (Polling, Completed)
                | (RequestingCredentials | Transferring | Launching | Polling, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::RequestingCredentials => "requesting_credentials",
            Self::Transferring => "transferring",
            Self::Launching => "launching",
            Self::Polling => "polling",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// OutputArtifact
// ---------------------------------------------------------------------------

/// One output file produced by a completed job (e.g. the `vocals` stem).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputArtifact {
    /// Stem kind reported by the service, e.g. `"vocals"`.
    pub kind: String,
    /// Time-limited download URL.
    pub locator: String,
}

impl OutputArtifact {
    pub fn new(kind: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            locator: locator.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// JobSession
// ---------------------------------------------------------------------------

/// Snapshot-able state of one remote job lifecycle.
///
/// Cloning yields an immutable snapshot suitable for presentation; it
/// never carries any handle to the polling task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct JobSession {
    state: LifecycleState,
    file_name: Option<String>,
    correlation_id: Option<String>,
    storage_locator: Option<String>,
    remote_status: Option<String>,
    progress_message: Option<String>,
    output_artifacts: Vec<OutputArtifact>,
    failure_reason: Option<String>,
    started_at: Option<Timestamp>,
    finished_at: Option<Timestamp>,
}

impl JobSession {
    /// A fresh idle session.
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// Identifier issued by the credential broker (`sessionId` on the wire).
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Where the transferred payload lives (`s3Key` on the wire).
    pub fn storage_locator(&self) -> Option<&str> {
        self.storage_locator.as_deref()
    }

    /// Latest raw status string reported while polling.
    pub fn remote_status(&self) -> Option<&str> {
        self.remote_status.as_deref()
    }

    pub fn progress_message(&self) -> Option<&str> {
        self.progress_message.as_deref()
    }

    pub fn output_artifacts(&self) -> &[OutputArtifact] {
        &self.output_artifacts
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn started_at(&self) -> Option<Timestamp> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<Timestamp> {
        self.finished_at
    }

    /// Start a new run for `file_name`, discarding everything from the
    /// previous run.
    ///
    /// Only allowed from `Idle` or a terminal state.
    pub fn begin(&mut self, file_name: &str) -> Result<(), CoreError> {
        self.check_transition(LifecycleState::RequestingCredentials)?;
        *self = Self {
            state: LifecycleState::RequestingCredentials,
            file_name: Some(file_name.to_string()),
            started_at: Some(chrono::Utc::now()),
            ..Self::default()
        };
        Ok(())
    }

    /// Record the broker's identifiers and move on to the transfer.
    ///
    /// The storage locator is assigned exactly once per run.
    pub fn assign_credentials(
        &mut self,
        correlation_id: &str,
        storage_locator: &str,
    ) -> Result<(), CoreError> {
        self.check_transition(LifecycleState::Transferring)?;
        if self.storage_locator.is_some() || self.correlation_id.is_some() {
            return Err(CoreError::Conflict(
                "Credentials were already assigned to this session".to_string(),
            ));
        }
        self.correlation_id = Some(correlation_id.to_string());
        self.storage_locator = Some(storage_locator.to_string());
        self.state = LifecycleState::Transferring;
        Ok(())
    }

    /// The payload reached object storage; the job can be launched.
    pub fn mark_transferred(&mut self) -> Result<(), CoreError> {
        self.transition(LifecycleState::Launching)
    }

    /// The remote job was accepted; polling begins.
    pub fn mark_launched(&mut self) -> Result<(), CoreError> {
        self.transition(LifecycleState::Polling)
    }

    /// Apply a non-terminal status report. Only the progress fields change.
    pub fn record_progress(
        &mut self,
        remote_status: &str,
        message: Option<&str>,
    ) -> Result<(), CoreError> {
        if self.state != LifecycleState::Polling {
            return Err(CoreError::InvalidTransition {
                from: self.state,
                to: LifecycleState::Polling,
            });
        }
        self.remote_status = Some(remote_status.to_string());
        if let Some(message) = message {
            self.progress_message = Some(message.to_string());
        }
        Ok(())
    }

    /// Terminal success: the artifacts are stored in the order reported.
    pub fn complete(&mut self, artifacts: Vec<OutputArtifact>) -> Result<(), CoreError> {
        self.transition(LifecycleState::Completed)?;
        self.output_artifacts = artifacts;
        self.finished_at = Some(chrono::Utc::now());
        Ok(())
    }

    /// Terminal failure from any active state.
    pub fn fail(&mut self, reason: &str) -> Result<(), CoreError> {
        self.transition(LifecycleState::Failed)?;
        let reason = reason.trim();
        self.failure_reason = Some(if reason.is_empty() {
            UNKNOWN_FAILURE.to_string()
        } else {
            reason.to_string()
        });
        self.output_artifacts.clear();
        self.finished_at = Some(chrono::Utc::now());
        Ok(())
    }

    /// Drop everything and return to `Idle`.
    pub fn reset(&mut self) {
        *self = Self::idle();
    }

    // ---- private helpers ----

    fn check_transition(&self, next: LifecycleState) -> Result<(), CoreError> {
        if self.state.can_transition_to(next) {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition {
                from: self.state,
                to: next,
            })
        }
    }

    fn transition(&mut self, next: LifecycleState) -> Result<(), CoreError> {
        self.check_transition(next)?;
        self.state = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn polling_session() -> JobSession {
        let mut session = JobSession::idle();
        session.begin("song.mp3").unwrap();
        session.assign_credentials("s1", "k1").unwrap();
        session.mark_transferred().unwrap();
        session.mark_launched().unwrap();
        session
    }

    // -- LifecycleState ------------------------------------------------------

    #[test]
    fn idle_is_neither_active_nor_terminal() {
        assert!(!LifecycleState::Idle.is_active());
        assert!(!LifecycleState::Idle.is_terminal());
    }

    #[test]
    fn sequential_states_are_active() {
        for state in [
            LifecycleState::RequestingCredentials,
            LifecycleState::Transferring,
            LifecycleState::Launching,
            LifecycleState::Polling,
        ] {
            assert!(state.is_active(), "{state} should be active");
            assert!(state.can_transition_to(LifecycleState::Failed));
        }
    }

    #[test]
    fn steps_cannot_be_skipped() {
        assert!(!LifecycleState::Idle.can_transition_to(LifecycleState::Transferring));
        assert!(!LifecycleState::RequestingCredentials.can_transition_to(LifecycleState::Launching));
        assert!(!LifecycleState::Transferring.can_transition_to(LifecycleState::Polling));
        assert!(!LifecycleState::Launching.can_transition_to(LifecycleState::Completed));
    }

    #[test]
    fn terminal_states_only_restart_or_reset() {
        for state in [LifecycleState::Completed, LifecycleState::Failed] {
            assert!(state.can_transition_to(LifecycleState::RequestingCredentials));
            assert!(state.can_transition_to(LifecycleState::Idle));
            assert!(!state.can_transition_to(LifecycleState::Failed));
            assert!(!state.can_transition_to(LifecycleState::Completed));
            assert!(!state.can_transition_to(LifecycleState::Polling));
        }
    }

    #[test]
    fn idle_cannot_fail() {
        assert!(!LifecycleState::Idle.can_transition_to(LifecycleState::Failed));
    }

    #[test]
    fn state_serializes_as_snake_case() {
        let json = serde_json::to_string(&LifecycleState::RequestingCredentials).unwrap();
        assert_eq!(json, "\"requesting_credentials\"");
    }

    // -- JobSession ----------------------------------------------------------

    #[test]
    fn happy_path_reaches_completed() {
        let mut session = polling_session();
        session.record_progress("RUNNING", Some("Separating")).unwrap();
        session
            .complete(vec![OutputArtifact::new("vocals", "https://x/vocals.wav")])
            .unwrap();

        assert_eq!(session.state(), LifecycleState::Completed);
        assert_eq!(session.correlation_id(), Some("s1"));
        assert_eq!(session.storage_locator(), Some("k1"));
        assert_eq!(session.output_artifacts().len(), 1);
        assert!(session.failure_reason().is_none());
        assert!(session.finished_at().is_some());
    }

    #[test]
    fn progress_only_updates_message() {
        let mut session = polling_session();
        session.record_progress("PENDING", None).unwrap();
        assert_eq!(session.remote_status(), Some("PENDING"));
        assert!(session.progress_message().is_none());

        session.record_progress("RUNNING", Some("Half way")).unwrap();
        assert_eq!(session.state(), LifecycleState::Polling);
        assert_eq!(session.progress_message(), Some("Half way"));
        assert!(session.output_artifacts().is_empty());
    }

    #[test]
    fn progress_outside_polling_is_rejected() {
        let mut session = JobSession::idle();
        session.begin("a.wav").unwrap();
        assert_matches!(
            session.record_progress("RUNNING", None),
            Err(CoreError::InvalidTransition { .. })
        );
    }

    #[test]
    fn begin_while_active_is_rejected() {
        let mut session = JobSession::idle();
        session.begin("a.wav").unwrap();
        assert_matches!(
            session.begin("b.wav"),
            Err(CoreError::InvalidTransition {
                from: LifecycleState::RequestingCredentials,
                to: LifecycleState::RequestingCredentials,
            })
        );
        assert_eq!(session.file_name(), Some("a.wav"));
    }

    #[test]
    fn begin_after_terminal_clears_previous_run() {
        let mut session = polling_session();
        session.fail("OOM").unwrap();

        session.begin("next.wav").unwrap();
        assert_eq!(session.state(), LifecycleState::RequestingCredentials);
        assert!(session.failure_reason().is_none());
        assert!(session.correlation_id().is_none());
        assert!(session.storage_locator().is_none());
        assert_eq!(session.file_name(), Some("next.wav"));
    }

    #[test]
    fn failure_records_reason() {
        let mut session = polling_session();
        session.fail("Error: OOM").unwrap();
        assert_eq!(session.state(), LifecycleState::Failed);
        assert_eq!(session.failure_reason(), Some("Error: OOM"));
    }

    #[test]
    fn empty_failure_reason_gets_fallback() {
        let mut session = JobSession::idle();
        session.begin("a.wav").unwrap();
        session.fail("  ").unwrap();
        assert_eq!(session.failure_reason(), Some(UNKNOWN_FAILURE));
    }

    #[test]
    fn second_terminal_transition_is_rejected() {
        let mut session = polling_session();
        session.complete(Vec::new()).unwrap();

        assert_matches!(session.fail("late"), Err(CoreError::InvalidTransition { .. }));
        assert_matches!(
            session.complete(vec![OutputArtifact::new("drums", "https://x/d.wav")]),
            Err(CoreError::InvalidTransition { .. })
        );
        assert_eq!(session.state(), LifecycleState::Completed);
        assert!(session.failure_reason().is_none());
    }

    #[test]
    fn credentials_cannot_be_reassigned() {
        let mut session = JobSession::idle();
        session.begin("a.wav").unwrap();
        session.assign_credentials("s1", "k1").unwrap();
        assert!(session.assign_credentials("s2", "k2").is_err());
        assert_eq!(session.storage_locator(), Some("k1"));
    }

    #[test]
    fn reset_returns_to_idle() {
        let mut session = polling_session();
        session.reset();
        assert_eq!(session, JobSession::idle());
    }

    #[test]
    fn snapshot_serializes_public_fields() {
        let mut session = polling_session();
        session
            .complete(vec![OutputArtifact::new("vocals", "https://x/vocals.wav")])
            .unwrap();

        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["state"], "completed");
        assert_eq!(json["correlation_id"], "s1");
        assert_eq!(json["output_artifacts"][0]["kind"], "vocals");
        assert!(json["failure_reason"].is_null());
    }
}
