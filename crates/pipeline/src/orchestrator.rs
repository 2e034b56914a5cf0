//! Single-session job orchestrator.
//!
//! [`Orchestrator`] drives one payload through credential issuance, upload,
//! job launch and status polling, applying every step result to a
//! [`JobSession`] it owns. Each run gets a fresh epoch; results carrying a
//! stale epoch (the run was cancelled or superseded while the step was in
//! flight) are dropped under the session lock.
//!
//! The sequential steps run on a task the orchestrator owns, so a caller
//! that stops waiting on [`Orchestrator::start_session`] does not strand
//! the session mid-step.
//!
//! State changes are broadcast as [`SessionEvent`]s. Call
//! [`Orchestrator::subscribe`] to receive them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stemsplit_client::backend::SeparationBackend;
use stemsplit_client::status::{JobStatusReport, PollError};
use stemsplit_core::error::CoreError;
use stemsplit_core::media::PayloadMetadata;
use stemsplit_core::session::{JobSession, LifecycleState};
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

use crate::events::{SessionEvent, EVENT_CHANNEL_CAPACITY};
use crate::poller::{PollFlow, PollSink, PollerHandle, StatusPoller};

/// Upper bound on waiting for the poll task during [`Orchestrator::shutdown`].
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Reasons [`Orchestrator::start_session`] refuses to start.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Another session is still in a non-terminal, non-idle state.
    #[error("A session is already in progress ({0})")]
    AlreadyActive(LifecycleState),

    /// The payload or its metadata failed validation.
    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] CoreError),
}

/// Owns the session state and at most one poll task.
///
/// Dropping the orchestrator stops polling.
pub struct Orchestrator {
    shared: Arc<Shared>,
}

struct Shared {
    backend: Arc<dyn SeparationBackend>,
    poll_interval: Duration,
    inner: Mutex<Inner>,
    event_tx: broadcast::Sender<SessionEvent>,
    /// Master cancellation token; step and poll tasks run on child tokens.
    cancel: CancellationToken,
}

struct Inner {
    session: JobSession,
    epoch: u64,
    /// Cancels the task running the sequential steps of the current run.
    steps: Option<CancellationToken>,
    poller: Option<PollerHandle>,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn SeparationBackend>, poll_interval: Duration) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                backend,
                poll_interval,
                inner: Mutex::new(Inner {
                    session: JobSession::idle(),
                    epoch: 0,
                    steps: None,
                    poller: None,
                }),
                event_tx,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Snapshot of the current session.
    pub async fn current_state(&self) -> JobSession {
        self.shared.inner.lock().await.session.clone()
    }

    /// Whether a poll task is currently running.
    pub async fn is_polling(&self) -> bool {
        self.shared
            .inner
            .lock()
            .await
            .poller
            .as_ref()
            .is_some_and(|poller| !poller.is_finished())
    }

    /// Start a new session for `payload`.
    ///
    /// Runs the sequential steps to completion and returns the snapshot
    /// taken once polling began, or once a step failed. Step failures are
    /// recorded on the session, not returned as errors.
    ///
    /// The steps run on their own task: dropping the returned future does
    /// not stop them. Use [`cancel_session`](Self::cancel_session) to abandon
    /// a run.
    pub async fn start_session(
        &self,
        payload: Vec<u8>,
        metadata: PayloadMetadata,
    ) -> Result<JobSession, SessionError> {
        metadata.validate()?;
        if payload.is_empty() {
            return Err(CoreError::Validation("Payload is empty".to_string()).into());
        }

        let (epoch, steps_cancel) = {
            let mut inner = self.shared.inner.lock().await;
            let state = inner.session.state();
            if state.is_active() {
                return Err(SessionError::AlreadyActive(state));
            }
            if let Some(poller) = inner.poller.take() {
                poller.stop();
            }
            inner
                .session
                .begin(&metadata.file_name)
                .map_err(|_| SessionError::AlreadyActive(state))?;
            inner.epoch += 1;
            let steps_cancel = self.shared.cancel.child_token();
            inner.steps = Some(steps_cancel.clone());
            self.shared.emit(SessionEvent::StateChanged {
                state: inner.session.state(),
            });
            (inner.epoch, steps_cancel)
        };

        tracing::info!(
            epoch,
            file_name = %metadata.file_name,
            content_type = %metadata.content_type,
            size_bytes = payload.len(),
            "Session started",
        );

        let shared = Arc::clone(&self.shared);
        let steps = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = steps_cancel.cancelled() => None,
                snapshot = shared.drive(epoch, payload, metadata) => Some(snapshot),
            }
        });

        match steps.await {
            Ok(Some(snapshot)) => Ok(snapshot),
            Ok(None) => Ok(self.current_state().await),
            Err(e) => Ok(self
                .shared
                .fail_step(epoch, "steps", format!("Session step task failed: {e}"))
                .await),
        }
    }

    /// Stop polling and reset to `Idle` without contacting the remote
    /// system. A step still in flight has its result discarded.
    pub async fn cancel_session(&self) {
        let mut inner = self.shared.inner.lock().await;
        let state = inner.session.state();
        if state == LifecycleState::Idle && inner.poller.is_none() {
            return;
        }
        if let Some(poller) = self.shared.reset_locked(&mut inner) {
            poller.stop();
        }
        tracing::info!(from = %state, "Session cancelled");
    }

    /// Wait until the session is no longer in progress and return its
    /// snapshot. Returns immediately when idle or already terminal.
    pub async fn wait_for_terminal(&self) -> JobSession {
        let mut rx = self.subscribe();
        loop {
            let snapshot = self.current_state().await;
            if !snapshot.state().is_active() {
                return snapshot;
            }
            match rx.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return snapshot,
            }
        }
    }

    /// Cancel the session and wait (bounded) for the poll task to exit.
    pub async fn shutdown(&self) {
        let poller = {
            let mut inner = self.shared.inner.lock().await;
            if inner.session.state() == LifecycleState::Idle && inner.poller.is_none() {
                None
            } else {
                self.shared.reset_locked(&mut inner)
            }
        };

        if let Some(poller) = poller {
            poller.join(SHUTDOWN_TIMEOUT).await;
        }
        tracing::info!("Orchestrator shut down");
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl Shared {
    /// Run credentials, transfer and launch, then spawn the poller.
    async fn drive(
        self: &Arc<Self>,
        epoch: u64,
        payload: Vec<u8>,
        metadata: PayloadMetadata,
    ) -> JobSession {
        let ticket = match self.backend.request_upload(&metadata).await {
            Ok(ticket) => ticket,
            Err(e) => return self.fail_step(epoch, "credentials", e.to_string()).await,
        };
        if let Err(snapshot) = self
            .advance(epoch, |s| {
                s.assign_credentials(&ticket.correlation_id, &ticket.storage_locator)
            })
            .await
        {
            return snapshot;
        }

        if let Err(e) = self
            .backend
            .transfer(&ticket, &metadata.content_type, payload)
            .await
        {
            return self.fail_step(epoch, "transfer", e.to_string()).await;
        }
        if let Err(snapshot) = self.advance(epoch, JobSession::mark_transferred).await {
            return snapshot;
        }

        if let Err(e) = self
            .backend
            .launch(&ticket.storage_locator, &ticket.correlation_id)
            .await
        {
            return self.fail_step(epoch, "launch", e.to_string()).await;
        }

        let mut inner = self.inner.lock().await;
        if inner.epoch != epoch {
            tracing::debug!(epoch, "Discarding launch of a superseded session");
            return inner.session.clone();
        }
        if let Err(e) = inner.session.mark_launched() {
            tracing::warn!(epoch, error = %e, "Rejected session transition");
            return inner.session.clone();
        }
        self.emit(SessionEvent::StateChanged {
            state: inner.session.state(),
        });

        let sink = SessionSink {
            shared: Arc::clone(self),
            epoch,
        };
        let poller = StatusPoller::new(
            Arc::clone(&self.backend),
            ticket.correlation_id.clone(),
            self.poll_interval,
        );
        inner.poller = Some(poller.spawn(self.cancel.child_token(), sink));

        inner.session.clone()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    /// Invalidate the current run, stop its step task and reset to `Idle`.
    /// Returns the poll task, if any, for the caller to stop or join.
    fn reset_locked(&self, inner: &mut Inner) -> Option<PollerHandle> {
        if let Some(steps) = inner.steps.take() {
            steps.cancel();
        }
        inner.epoch += 1;
        inner.session.reset();

        self.emit(SessionEvent::Cancelled);
        self.emit(SessionEvent::StateChanged {
            state: LifecycleState::Idle,
        });
        inner.poller.take()
    }

    /// Apply a step's transition if `epoch` is still current. On a stale
    /// epoch or rejected transition the current snapshot is returned.
    async fn advance<F>(&self, epoch: u64, step: F) -> Result<(), JobSession>
    where
        F: FnOnce(&mut JobSession) -> Result<(), CoreError>,
    {
        let mut inner = self.inner.lock().await;
        if inner.epoch != epoch {
            tracing::debug!(epoch, "Discarding step result of a superseded session");
            return Err(inner.session.clone());
        }
        if let Err(e) = step(&mut inner.session) {
            tracing::warn!(epoch, error = %e, "Rejected session transition");
            return Err(inner.session.clone());
        }
        self.emit(SessionEvent::StateChanged {
            state: inner.session.state(),
        });
        Ok(())
    }

    async fn fail_step(&self, epoch: u64, step: &'static str, reason: String) -> JobSession {
        let mut inner = self.inner.lock().await;
        if inner.epoch != epoch {
            tracing::debug!(epoch, step, "Discarding failure of a superseded session");
            return inner.session.clone();
        }
        tracing::warn!(epoch, step, error = %reason, "Session step failed");
        self.fail_locked(&mut inner, &reason);
        inner.session.clone()
    }

    fn fail_locked(&self, inner: &mut Inner, reason: &str) {
        if let Err(e) = inner.session.fail(reason) {
            tracing::warn!(error = %e, "Rejected session transition");
            return;
        }
        self.emit(SessionEvent::StateChanged {
            state: LifecycleState::Failed,
        });
        self.emit(SessionEvent::Failed {
            reason: inner.session.failure_reason().unwrap_or(reason).to_string(),
        });
    }
}

/// Applies poll results to the session that spawned the poller.
struct SessionSink {
    shared: Arc<Shared>,
    epoch: u64,
}

#[async_trait]
impl PollSink for SessionSink {
    async fn deliver(&self, result: Result<JobStatusReport, PollError>) -> PollFlow {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        if inner.epoch != self.epoch || inner.session.state() != LifecycleState::Polling {
            return PollFlow::Stop;
        }
        let session_id = inner.session.correlation_id().unwrap_or_default().to_string();

        match result {
            Ok(JobStatusReport::InProgress { status, message }) => {
                if let Err(e) = inner.session.record_progress(&status, message.as_deref()) {
                    tracing::warn!(%session_id, error = %e, "Rejected progress update");
                    return PollFlow::Stop;
                }
                tracing::debug!(%session_id, %status, "Job in progress");
                shared.emit(SessionEvent::Progress { status, message });
                PollFlow::Continue
            }
            Ok(JobStatusReport::Completed { artifacts }) => {
                inner.poller.take();
                if let Err(e) = inner.session.complete(artifacts.clone()) {
                    tracing::warn!(%session_id, error = %e, "Rejected session transition");
                    return PollFlow::Stop;
                }
                tracing::info!(%session_id, artifacts = artifacts.len(), "Job completed");
                shared.emit(SessionEvent::StateChanged {
                    state: LifecycleState::Completed,
                });
                shared.emit(SessionEvent::Completed { artifacts });
                PollFlow::Stop
            }
            Ok(JobStatusReport::Failed { reason }) => {
                inner.poller.take();
                tracing::info!(%session_id, %reason, "Remote job failed");
                shared.fail_locked(&mut inner, &reason);
                PollFlow::Stop
            }
            Err(e) => {
                inner.poller.take();
                tracing::warn!(%session_id, error = %e, "Status query failed");
                shared.fail_locked(&mut inner, &e.to_string());
                PollFlow::Stop
            }
        }
    }
}
