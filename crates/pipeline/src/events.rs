//! Events broadcast by the orchestrator as a session progresses.

use serde::Serialize;
use stemsplit_core::session::{LifecycleState, OutputArtifact};

/// Broadcast channel capacity for session events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A change observable by presentation layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The lifecycle state changed.
    StateChanged { state: LifecycleState },

    /// A non-terminal status report arrived while polling.
    Progress {
        status: String,
        message: Option<String>,
    },

    /// The job finished and produced artifacts.
    Completed { artifacts: Vec<OutputArtifact> },

    /// The session failed at some step.
    Failed { reason: String },

    /// The session was cancelled locally and reset to idle.
    Cancelled,
}

impl SessionEvent {
    /// Whether no further events follow for the current session.
    pub fn ends_session(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled
        )
    }
}
